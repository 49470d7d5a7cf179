use crate::api::{handlers, AppState};
use crate::config::ServerConfig;
use crate::metrics::track_metrics;
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let metrics_enabled = state.metrics_enabled;

    let mut router = Router::new()
        // Health endpoints
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        // Reference data
        .route("/delegaciones", get(handlers::list_delegations))
        .route("/api/zonas_riesgo", get(handlers::risk_zones))
        .route("/estadisticas_historicas", get(handlers::historical_stats))
        .route("/api/estimaciones_riesgo", get(handlers::risk_estimates))
        // Incidents and forecasts
        .route("/incidentes", get(handlers::get_incidents))
        .route("/modelos/:delegation_id/entrenar", post(handlers::train_model))
        // Feedback loop
        .route("/retroalimentacion", post(handlers::submit_feedback))
        .route("/migrar_predicciones", post(handlers::migrate_predictions));

    if metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(cors_layer(&server.cors_origins))
}

/// Permissive CORS unless specific origins are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
