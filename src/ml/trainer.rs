use crate::error::{AppError, Result};
use crate::metrics::{TRAINING_DURATION_SECONDS, TRAINING_RUNS_TOTAL};
use crate::ml::classifier::RiskClassifier;
use crate::ml::features::encode_training_rows;
use crate::ml::models::{PredictionConfig, TrainedModel, TrainingOutcome};
use crate::ml::registry::{FrequencyKind, ModelRegistry};
use crate::state::IncidentRepository;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fits and persists per-delegation risk classifiers
#[derive(Clone)]
pub struct Trainer {
    repository: Arc<dyn IncidentRepository>,
    registry: ModelRegistry,
    config: Arc<PredictionConfig>,
}

impl Trainer {
    pub fn new(
        repository: Arc<dyn IncidentRepository>,
        registry: ModelRegistry,
        config: Arc<PredictionConfig>,
    ) -> Self {
        Self {
            repository,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Train a delegation's model, swallowing every failure.
    ///
    /// `None` means no model was produced, either because history is too
    /// short or because training failed.
    pub async fn train(&self, delegation_id: i64) -> Option<TrainedModel> {
        match self.try_train(delegation_id).await {
            Ok(outcome) => outcome.into_model(),
            Err(e) => {
                TRAINING_RUNS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(delegation_id, error = %e, "Model training failed");
                None
            }
        }
    }

    /// Train a delegation's model and report why nothing was produced.
    ///
    /// Overwrites the persisted model and both frequency tables on success.
    pub async fn try_train(&self, delegation_id: i64) -> Result<TrainingOutcome> {
        let rows = self
            .repository
            .training_rows(delegation_id, self.config.training_window)
            .await?;

        if rows.len() < self.config.min_training_rows {
            TRAINING_RUNS_TOTAL
                .with_label_values(&["insufficient_data"])
                .inc();
            info!(
                delegation_id,
                available = rows.len(),
                required = self.config.min_training_rows,
                "Not enough incidents to train a model"
            );
            return Ok(TrainingOutcome::InsufficientData {
                available: rows.len(),
                required: self.config.min_training_rows,
            });
        }

        let n_samples = rows.len();
        let dataset = encode_training_rows(&rows)?;
        debug!(
            delegation_id,
            n_samples,
            n_features = dataset.n_features(),
            "Encoded training set"
        );

        let params = self.config.forest_params();
        let start = Instant::now();
        let (classifier, schema) = tokio::task::spawn_blocking(move || {
            let classifier = RiskClassifier::fit(&dataset, params)?;
            Ok::<_, AppError>((classifier, dataset.schema))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;
        TRAINING_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

        let model = TrainedModel {
            delegation_id,
            classifier,
            schema,
            trained_at: Utc::now(),
            n_samples,
        };
        self.registry.save_model(&model).await?;

        let types = self
            .repository
            .type_frequencies(delegation_id, None)
            .await?;
        self.registry
            .save_frequencies(FrequencyKind::Types, delegation_id, &types)
            .await?;

        let locations = self.repository.location_frequencies(delegation_id).await?;
        self.registry
            .save_frequencies(FrequencyKind::Locations, delegation_id, &locations)
            .await?;

        TRAINING_RUNS_TOTAL.with_label_values(&["trained"]).inc();
        info!(
            delegation_id,
            n_samples,
            n_features = model.schema.len(),
            types = types.len(),
            locations = locations.len(),
            "Model trained"
        );

        Ok(TrainingOutcome::Trained(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Delegation;
    use crate::state::{InMemoryModelStore, InMemoryRepository};
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn small_config() -> Arc<PredictionConfig> {
        Arc::new(PredictionConfig {
            n_trees: 5,
            ..Default::default()
        })
    }

    fn seed(repo: &InMemoryRepository, delegation_id: i64, n: usize) {
        repo.add_delegation(Delegation::new(delegation_id, "Centro"));
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..n {
            let night = i % 2 == 0;
            repo.add_incident(
                delegation_id,
                if night { "Asalto" } else { "Robo" },
                if i % 3 == 0 { "Zocalo" } else { "Alameda" },
                start + Duration::days(i as i64),
                NaiveTime::from_hms_opt(if night { 22 } else { 10 }, 0, 0).unwrap(),
                if night { 3 } else { 1 },
            );
        }
    }

    fn trainer(repo: InMemoryRepository) -> (Trainer, ModelRegistry) {
        let registry = ModelRegistry::new(Arc::new(InMemoryModelStore::new()));
        let trainer = Trainer::new(Arc::new(repo), registry.clone(), small_config());
        (trainer, registry)
    }

    #[tokio::test]
    async fn test_insufficient_data_is_not_an_error() {
        let repo = InMemoryRepository::with_default_risk_levels();
        seed(&repo, 1, 9);
        let (trainer, registry) = trainer(repo);

        let outcome = trainer.try_train(1).await.unwrap();
        assert!(matches!(
            outcome,
            TrainingOutcome::InsufficientData {
                available: 9,
                required: 10
            }
        ));
        assert!(registry.load_model(1).await.unwrap().is_none());
        assert!(trainer.train(1).await.is_none());
    }

    #[tokio::test]
    async fn test_training_persists_model_and_tables() {
        let repo = InMemoryRepository::with_default_risk_levels();
        seed(&repo, 1, 30);
        let (trainer, registry) = trainer(repo);

        let model = trainer.train(1).await.unwrap();
        assert_eq!(model.n_samples, 30);
        assert_eq!(model.schema.len(), 3 + 2 + 2);

        let (stored, _) = registry.load_model(1).await.unwrap().unwrap();
        assert_eq!(stored.schema, model.schema);

        let types = registry
            .load_frequencies(FrequencyKind::Types, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(types.get("Asalto"), Some(15));
        assert_eq!(types.get("Robo"), Some(15));

        let locations = registry
            .load_frequencies(FrequencyKind::Locations, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locations.get("Zocalo"), Some(10));
    }

    #[tokio::test]
    async fn test_training_window_limits_rows() {
        let repo = InMemoryRepository::with_default_risk_levels();
        seed(&repo, 1, 40);
        let registry = ModelRegistry::new(Arc::new(InMemoryModelStore::new()));
        let config = Arc::new(PredictionConfig {
            n_trees: 5,
            training_window: 12,
            ..Default::default()
        });
        let trainer = Trainer::new(Arc::new(repo), registry, config);

        let model = trainer.train(1).await.unwrap();
        assert_eq!(model.n_samples, 12);
    }

    #[tokio::test]
    async fn test_single_risk_level_history_still_trains() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Centro"));
        for i in 0..20 {
            repo.add_incident(
                1,
                "Robo",
                "Zocalo",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(i),
                NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
                3,
            );
        }
        let (trainer, registry) = trainer(repo);

        let model = trainer.try_train(1).await.unwrap().into_model().unwrap();
        assert_eq!(model.classifier.classes(), &[3]);
        assert!(registry.load_model(1).await.unwrap().is_some());
        assert!(registry
            .load_frequencies(FrequencyKind::Types, 1)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_database_failure_yields_no_model() {
        let repo = InMemoryRepository::with_default_risk_levels();
        seed(&repo, 1, 20);
        repo.set_offline(true);
        let (trainer, _) = trainer(repo);

        assert!(trainer.try_train(1).await.is_err());
        assert!(trainer.train(1).await.is_none());
    }
}
