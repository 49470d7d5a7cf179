pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::error::Result;
use crate::feedback::FeedbackService;
use crate::ml::{ModelRegistry, PredictionConfig, Predictor, Trainer};
use crate::state::{IncidentRepository, ModelStore};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn IncidentRepository>,
    pub trainer: Arc<Trainer>,
    pub predictor: Arc<Predictor>,
    pub feedback: Arc<FeedbackService>,
    pub metrics_enabled: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services on top of the two stores
    pub fn new(
        repository: Arc<dyn IncidentRepository>,
        model_store: Arc<dyn ModelStore>,
        config: PredictionConfig,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let registry = ModelRegistry::new(model_store);
        let trainer = Trainer::new(repository.clone(), registry, config.clone());
        let predictor = Predictor::new(repository.clone(), trainer.clone(), config.clone())?;
        let feedback = FeedbackService::new(repository.clone(), trainer.clone(), config);

        Ok(Self {
            repository,
            trainer: Arc::new(trainer),
            predictor: Arc::new(predictor),
            feedback: Arc::new(feedback),
            metrics_enabled: false,
            started_at: Instant::now(),
        })
    }

    /// Expose `GET /metrics`
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}
