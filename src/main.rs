use risk_forecast::{
    api::{build_router, AppState},
    config::Config,
    state::{create_model_store, create_repository},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let (config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "risk_forecast={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(e) = load_error {
        tracing::warn!("Failed to load configuration: {}", e);
        tracing::warn!("Using default configuration");
    }

    tracing::info!("Starting Risk Forecast v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    let metrics_enabled = if config.observability.prometheus_enabled {
        match risk_forecast::metrics::init_metrics() {
            Ok(()) => {
                tracing::info!("Prometheus metrics initialized");
                true
            }
            Err(e) => {
                tracing::warn!("Failed to initialize metrics: {}", e);
                tracing::warn!("Continuing without metrics");
                false
            }
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
        false
    };

    // Initialize storage backends
    let repository = create_repository(&config.database).await?;
    tracing::info!(in_memory = config.database.is_in_memory(), "Incident repository initialized");

    let model_store = create_model_store(&config.model_store)?;
    tracing::info!(backend = ?config.model_store.backend, "Model store initialized");

    let app_state = AppState::new(repository, model_store, config.prediction.clone())?
        .with_metrics(metrics_enabled);
    let app = build_router(app_state, &config.server);

    // Start HTTP server
    let http_addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Incidents: http://{}/incidentes", http_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
