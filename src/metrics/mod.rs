//! Prometheus metrics for the risk forecasting service.
//!
//! Counters cover HTTP traffic, model training and acquisition, synthetic
//! incident generation and the feedback loop. Everything is registered on
//! [`PROMETHEUS_REGISTRY`] and exported by [`gather_metrics`].
//!
//! # Example
//! ```no_run
//! use risk_forecast::metrics::TRAINING_RUNS_TOTAL;
//!
//! TRAINING_RUNS_TOTAL.with_label_values(&["trained"]).inc();
//! ```

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
};
use std::time::Instant;

const NAMESPACE: &str = "risk_forecast";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    /// Training attempts
    ///
    /// Labels: outcome (trained, insufficient_data, failed)
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Model training attempts by outcome").namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    /// Wall-clock time spent fitting a forest
    pub static ref TRAINING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("training_duration_seconds", "Random forest fit duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("Failed to create TRAINING_DURATION_SECONDS metric");

    /// How the predictor obtained its model
    ///
    /// Labels: source (fresh, retrained, stale_fallback, trained_new, none)
    pub static ref MODEL_ACQUISITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("model_acquisitions_total", "Model acquisitions by source").namespace(NAMESPACE),
        &["source"]
    ).expect("Failed to create MODEL_ACQUISITIONS_TOTAL metric");

    /// Synthetic incidents produced
    ///
    /// Labels: period (day, week, month)
    pub static ref SYNTHETIC_INCIDENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("synthetic_incidents_total", "Synthetic incidents generated").namespace(NAMESPACE),
        &["period"]
    ).expect("Failed to create SYNTHETIC_INCIDENTS_TOTAL metric");

    /// How each synthetic incident got its risk level
    ///
    /// Labels: method (model, random_fallback, random_no_model)
    pub static ref RISK_RESOLUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("risk_resolutions_total", "Risk level resolutions by method").namespace(NAMESPACE),
        &["method"]
    ).expect("Failed to create RISK_RESOLUTIONS_TOTAL metric");

    /// Confirmed predictions staged
    pub static ref FEEDBACK_RECORDS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("feedback_records_total", "Confirmed predictions staged").namespace(NAMESPACE)
    ).expect("Failed to create FEEDBACK_RECORDS_TOTAL metric");

    /// Staged predictions copied into the incident table
    pub static ref PREDICTIONS_MIGRATED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("predictions_migrated_total", "Confirmed predictions migrated").namespace(NAMESPACE)
    ).expect("Failed to create PREDICTIONS_MIGRATED_TOTAL metric");

    /// Process start time, seconds since the epoch
    pub static ref START_TIME_SECONDS: IntGauge = IntGauge::with_opts(
        Opts::new("start_time_seconds", "Process start time").namespace(NAMESPACE)
    ).expect("Failed to create START_TIME_SECONDS metric");
}

fn register<C>(collector: C) -> Result<(), prometheus::Error>
where
    C: prometheus::core::Collector + 'static,
{
    match PROMETHEUS_REGISTRY.register(Box::new(collector)) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register every metric with the global registry. Safe to call repeatedly.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    register(HTTP_REQUESTS_TOTAL.clone())?;
    register(HTTP_REQUEST_DURATION_SECONDS.clone())?;

    register(TRAINING_RUNS_TOTAL.clone())?;
    register(TRAINING_DURATION_SECONDS.clone())?;
    register(MODEL_ACQUISITIONS_TOTAL.clone())?;
    register(SYNTHETIC_INCIDENTS_TOTAL.clone())?;
    register(RISK_RESOLUTIONS_TOTAL.clone())?;

    register(FEEDBACK_RECORDS_TOTAL.clone())?;
    register(PREDICTIONS_MIGRATED_TOTAL.clone())?;

    register(START_TIME_SECONDS.clone())?;
    START_TIME_SECONDS.set(chrono::Utc::now().timestamp());

    tracing::debug!("Prometheus metrics registered");
    Ok(())
}

/// Axum middleware recording request count and latency
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
