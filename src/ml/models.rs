use crate::error::{AppError, Result};
use crate::ml::classifier::{ForestParams, RiskClassifier};
use crate::ml::features::FeatureSchema;
use crate::models::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hour-of-day weights biased toward evening hours, hour 0 through 23
pub const DEFAULT_HOUR_WEIGHTS: [u32; 24] = [
    3, 2, 1, 1, 1, 2, 3, 5, 7, 6, 5, 6, 7, 6, 5, 6, 7, 8, 10, 12, 15, 13, 10, 5,
];

/// Training and forecasting parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionConfig {
    /// Age after which a persisted model is retrained
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,

    /// Minimum historical incidents required to train
    #[serde(default = "default_min_training_rows")]
    pub min_training_rows: usize,

    /// Most recent incidents used for training
    #[serde(default = "default_training_window")]
    pub training_window: usize,

    /// Trees in the random forest
    #[serde(default = "default_n_trees")]
    pub n_trees: u16,

    /// Optional depth limit of each tree
    #[serde(default)]
    pub max_depth: Option<u16>,

    /// Hour-of-day sampling weights (24 entries)
    #[serde(default = "default_hour_weights")]
    pub hour_weights: Vec<u32>,

    /// Synthetic incidents per day for a `day` request (inclusive)
    #[serde(default = "default_day_range")]
    pub day_range: (u32, u32),

    /// Synthetic incidents per day for a `week` request (inclusive)
    #[serde(default = "default_week_range")]
    pub week_range: (u32, u32),

    /// Synthetic incidents per day for a `month` request (inclusive)
    #[serde(default = "default_month_range")]
    pub month_range: (u32, u32),

    /// Top incident types used when no frequency table is stored
    #[serde(default = "default_fallback_type_limit")]
    pub fallback_type_limit: usize,

    /// Distinct locations used when no frequency table is stored
    #[serde(default = "default_fallback_location_limit")]
    pub fallback_location_limit: usize,

    /// Prefix distinguishing synthetic incident ids
    #[serde(default = "default_prediction_prefix")]
    pub prediction_prefix: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            staleness_days: default_staleness_days(),
            min_training_rows: default_min_training_rows(),
            training_window: default_training_window(),
            n_trees: default_n_trees(),
            max_depth: None,
            hour_weights: default_hour_weights(),
            day_range: default_day_range(),
            week_range: default_week_range(),
            month_range: default_month_range(),
            fallback_type_limit: default_fallback_type_limit(),
            fallback_location_limit: default_fallback_location_limit(),
            prediction_prefix: default_prediction_prefix(),
        }
    }
}

impl PredictionConfig {
    /// Check the invariants the sampler relies on
    pub fn validate(&self) -> Result<()> {
        if self.hour_weights.len() != 24 {
            return Err(AppError::Configuration(format!(
                "hour_weights must have 24 entries, got {}",
                self.hour_weights.len()
            )));
        }
        if self.hour_weights.iter().all(|&w| w == 0) {
            return Err(AppError::Configuration(
                "hour_weights must contain a positive weight".to_string(),
            ));
        }
        for (name, (min, max)) in [
            ("day_range", self.day_range),
            ("week_range", self.week_range),
            ("month_range", self.month_range),
        ] {
            if min > max {
                return Err(AppError::Configuration(format!(
                    "{} has min {} greater than max {}",
                    name, min, max
                )));
            }
        }
        if self.staleness_days < 0 {
            return Err(AppError::Configuration(
                "staleness_days must not be negative".to_string(),
            ));
        }
        if self.prediction_prefix.is_empty() {
            return Err(AppError::Configuration(
                "prediction_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-day incident count range for a requested period
    pub fn daily_range(&self, period: Period) -> (u32, u32) {
        match period {
            Period::Day => self.day_range,
            Period::Week => self.week_range,
            Period::Month => self.month_range,
        }
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.staleness_days)
    }

    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
        }
    }
}

fn default_staleness_days() -> i64 {
    30
}

fn default_min_training_rows() -> usize {
    10
}

fn default_training_window() -> usize {
    1000
}

fn default_n_trees() -> u16 {
    100
}

fn default_hour_weights() -> Vec<u32> {
    DEFAULT_HOUR_WEIGHTS.to_vec()
}

fn default_day_range() -> (u32, u32) {
    (3, 8)
}

fn default_week_range() -> (u32, u32) {
    (2, 6)
}

fn default_month_range() -> (u32, u32) {
    (1, 5)
}

fn default_fallback_type_limit() -> usize {
    10
}

fn default_fallback_location_limit() -> usize {
    20
}

fn default_prediction_prefix() -> String {
    "pred-".to_string()
}

/// Historical occurrence count per category value
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequencyTable {
    entries: Vec<(String, u64)>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(value, count)` pairs, summing repeated values and
    /// keeping first-seen order
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (value, count) in counts {
            table.add(value, count);
        }
        table
    }

    pub fn add(&mut self, value: impl Into<String>, count: u64) {
        let value = value.into();
        match self.entries.iter_mut().find(|(v, _)| *v == value) {
            Some((_, existing)) => *existing += count,
            None => self.entries.push((value, count)),
        }
    }

    pub fn get(&self, value: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, c)| *c)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(v, _)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A table is usable for weighted sampling only if some weight is positive
    pub fn is_degenerate(&self) -> bool {
        self.total() == 0
    }

    /// The `n` most frequent values, ties kept in insertion order
    pub fn top(&self, n: usize) -> Self {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(n);
        Self { entries }
    }
}

impl From<HashMap<String, u64>> for FrequencyTable {
    fn from(map: HashMap<String, u64>) -> Self {
        let mut entries: Vec<(String, u64)> = map.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }
}

/// A delegation's classifier together with the exact column encoding it
/// was fit on
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    pub delegation_id: i64,
    pub classifier: RiskClassifier,
    pub schema: FeatureSchema,
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
}

impl TrainedModel {
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            delegation_id: self.delegation_id,
            trained_at: self.trained_at,
            n_samples: self.n_samples,
            n_features: self.schema.len(),
            risk_levels: self.classifier.classes().to_vec(),
        }
    }
}

/// Serializable description of a trained model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub delegation_id: i64,
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
    pub n_features: usize,
    pub risk_levels: Vec<i64>,
}

/// What a training attempt produced
#[derive(Debug)]
pub enum TrainingOutcome {
    Trained(TrainedModel),
    /// Fewer historical incidents than the configured minimum
    InsufficientData { available: usize, required: usize },
}

impl TrainingOutcome {
    pub fn into_model(self) -> Option<TrainedModel> {
        match self {
            TrainingOutcome::Trained(model) => Some(model),
            TrainingOutcome::InsufficientData { .. } => None,
        }
    }
}

/// How the predictor obtained the model it used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Persisted model within the staleness window
    Fresh,
    /// Stale model replaced by a successful retrain
    Retrained,
    /// Retraining failed, stale model used
    StaleFallback,
    /// No persisted model, trained from scratch
    TrainedNew,
    /// No model available
    None,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::Fresh => "fresh",
            ModelSource::Retrained => "retrained",
            ModelSource::StaleFallback => "stale_fallback",
            ModelSource::TrainedNew => "trained_new",
            ModelSource::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_config_default() {
        let config = PredictionConfig::default();
        assert_eq!(config.staleness_days, 30);
        assert_eq!(config.min_training_rows, 10);
        assert_eq!(config.training_window, 1000);
        assert_eq!(config.hour_weights.len(), 24);
        assert_eq!(config.hour_weights[20], 15);
        assert_eq!(config.prediction_prefix, "pred-");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_daily_ranges() {
        let config = PredictionConfig::default();
        assert_eq!(config.daily_range(Period::Day), (3, 8));
        assert_eq!(config.daily_range(Period::Week), (2, 6));
        assert_eq!(config.daily_range(Period::Month), (1, 5));
    }

    #[test]
    fn test_validate_rejects_bad_hour_profile() {
        let mut config = PredictionConfig::default();
        config.hour_weights = vec![1; 23];
        assert!(config.validate().is_err());

        config.hour_weights = vec![0; 24];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = PredictionConfig {
            week_range: (6, 2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frequency_table_merges_duplicates() {
        let table = FrequencyTable::from_counts(vec![("Robo", 3), ("Asalto", 2), ("Robo", 4)]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("Robo"), Some(7));
        assert_eq!(table.total(), 9);
        assert!(!table.is_degenerate());
    }

    #[test]
    fn test_frequency_table_top() {
        let table =
            FrequencyTable::from_counts(vec![("a", 1), ("b", 5), ("c", 3), ("d", 5)]);
        let top = table.top(2);

        assert_eq!(top.values().collect::<Vec<_>>(), vec!["b", "d"]);
    }

    #[test]
    fn test_degenerate_table() {
        assert!(FrequencyTable::new().is_degenerate());
        assert!(FrequencyTable::from_counts(vec![("a", 0)]).is_degenerate());
    }
}
