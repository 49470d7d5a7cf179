//! Per-delegation risk classification and incident forecasting
//!
//! This module provides:
//! - Feature encoding with an explicit column schema
//! - A random forest risk-level classifier
//! - Model persistence through the model store
//! - On-demand training and staleness-driven retraining
//! - Synthetic incident generation from frequency tables and the classifier

pub mod classifier;
pub mod features;
pub mod models;
pub mod predictor;
pub mod registry;
pub mod sampling;
pub mod trainer;

pub use classifier::{Classifier, ForestParams, RiskClassifier};
pub use features::{encode_training_rows, EncodedDataset, FeatureRow, FeatureSchema};
pub use models::{
    FrequencyTable, ModelSource, ModelSummary, PredictionConfig, TrainedModel, TrainingOutcome,
    DEFAULT_HOUR_WEIGHTS,
};
pub use predictor::{generic_locations, generic_types, Predictor, GENERIC_INCIDENT_TYPES};
pub use registry::{FrequencyKind, ModelRegistry};
pub use trainer::Trainer;
