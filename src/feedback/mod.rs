//! Operator feedback on synthetic incidents.
//!
//! Confirmed or corrected predictions are staged in the relational store and
//! immediately retrain their delegation's model. A separate migration step
//! promotes staged rows into the historical incident table.

use crate::error::{AppError, Result};
use crate::metrics::{FEEDBACK_RECORDS_TOTAL, PREDICTIONS_MIGRATED_TOTAL};
use crate::ml::{PredictionConfig, Trainer};
use crate::models::{ConfirmedPrediction, MigrationOutcome};
use crate::state::IncidentRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened after a feedback record was staged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackReceipt {
    pub prediction_id: String,
    pub delegation_id: i64,
    /// Whether the follow-up training produced a model
    pub retrained: bool,
}

/// Migration result plus the delegations whose retraining produced a model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub migrated: u64,
    pub delegation_ids: Vec<i64>,
    pub retrained: Vec<i64>,
}

/// Records feedback and promotes confirmed predictions
#[derive(Clone)]
pub struct FeedbackService {
    repository: Arc<dyn IncidentRepository>,
    trainer: Trainer,
    config: Arc<PredictionConfig>,
}

impl FeedbackService {
    pub fn new(
        repository: Arc<dyn IncidentRepository>,
        trainer: Trainer,
        config: Arc<PredictionConfig>,
    ) -> Self {
        Self {
            repository,
            trainer,
            config,
        }
    }

    /// Stage a confirmed prediction and retrain its delegation.
    ///
    /// Rejects identifiers without the synthetic prefix. Training runs
    /// synchronously; a training failure does not fail the call.
    pub async fn record_feedback(&self, prediction: ConfirmedPrediction) -> Result<FeedbackReceipt> {
        if !prediction
            .prediction_id
            .starts_with(&self.config.prediction_prefix)
        {
            return Err(AppError::Validation(format!(
                "Incident id '{}' is not a prediction (expected prefix '{}')",
                prediction.prediction_id, self.config.prediction_prefix
            )));
        }

        if self
            .repository
            .get_delegation(prediction.delegation_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "Delegation {} not found",
                prediction.delegation_id
            )));
        }

        self.repository
            .record_confirmed_prediction(&prediction)
            .await?;
        FEEDBACK_RECORDS_TOTAL.inc();

        let retrained = self.trainer.train(prediction.delegation_id).await.is_some();
        info!(
            prediction_id = %prediction.prediction_id,
            delegation_id = prediction.delegation_id,
            confirmed = prediction.confirmed,
            retrained,
            "Feedback recorded"
        );

        Ok(FeedbackReceipt {
            prediction_id: prediction.prediction_id,
            delegation_id: prediction.delegation_id,
            retrained,
        })
    }

    /// Promote every confirmed, unmigrated prediction and retrain the
    /// delegations that received rows
    pub async fn migrate_confirmed(&self) -> Result<MigrationReport> {
        let MigrationOutcome {
            migrated,
            delegation_ids,
        } = self.repository.migrate_confirmed_predictions().await?;
        PREDICTIONS_MIGRATED_TOTAL.inc_by(migrated);

        let mut retrained = Vec::new();
        for &delegation_id in &delegation_ids {
            if self.trainer.train(delegation_id).await.is_some() {
                retrained.push(delegation_id);
            } else {
                warn!(delegation_id, "No model after migration retrain");
            }
        }

        info!(
            migrated,
            delegations = delegation_ids.len(),
            retrained = retrained.len(),
            "Confirmed predictions migrated"
        );

        Ok(MigrationReport {
            migrated,
            delegation_ids,
            retrained,
        })
    }
}
