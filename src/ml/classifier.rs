use crate::error::{AppError, Result};
use crate::ml::features::EncodedDataset;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::SplitCriterion;
use std::fmt;

/// Trait for risk-level classifiers
pub trait Classifier: Send + Sync {
    /// Predict one risk-level identifier per feature row
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<i64>>;

    /// Number of input columns the classifier expects
    fn n_features(&self) -> usize;
}

/// Hyperparameters of the random forest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: u16,
    pub max_depth: Option<u16>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
        }
    }
}

type Forest = RandomForestClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

/// Fitted estimator behind a `RiskClassifier`
#[derive(Serialize, Deserialize)]
enum Estimator {
    Forest(Forest),
    /// Every training label was the same risk level
    Constant(i64),
}

/// Random forest predicting a risk-level identifier from encoded incident
/// features
#[derive(Serialize, Deserialize)]
pub struct RiskClassifier {
    estimator: Estimator,
    n_features: usize,
    classes: Vec<i64>,
}

impl RiskClassifier {
    /// Fit a forest on an encoded dataset
    pub fn fit(dataset: &EncodedDataset, params: ForestParams) -> Result<Self> {
        if dataset.n_samples() == 0 {
            return Err(AppError::Model("No samples provided for training".to_string()));
        }

        let mut classes: Vec<i64> = dataset.labels.iter().copied().collect();
        classes.sort_unstable();
        classes.dedup();

        if let [only] = classes[..] {
            return Ok(Self {
                estimator: Estimator::Constant(only),
                n_features: dataset.n_features(),
                classes,
            });
        }

        let x = ndarray_to_densematrix(&dataset.features);
        let y = dataset
            .labels
            .iter()
            .map(|&label| {
                i32::try_from(label).map_err(|_| {
                    AppError::Model(format!("Risk level id {} out of range", label))
                })
            })
            .collect::<Result<Vec<i32>>>()?;

        let mut parameters = RandomForestClassifierParameters::default()
            .with_n_trees(params.n_trees.max(1))
            .with_criterion(SplitCriterion::Gini);
        if let Some(depth) = params.max_depth {
            parameters = parameters.with_max_depth(depth);
        }

        let forest = RandomForestClassifier::fit(&x, &y, parameters)
            .map_err(|e| AppError::Model(format!("Failed to train random forest: {}", e)))?;

        Ok(Self {
            estimator: Estimator::Forest(forest),
            n_features: dataset.n_features(),
            classes,
        })
    }

    /// Distinct risk-level identifiers seen during training
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    /// Predict the risk level of a single feature vector
    #[cfg(test)]
    pub fn predict_one(&self, features: &[f64]) -> Result<i64> {
        let matrix = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| AppError::Model(format!("Failed to create feature array: {}", e)))?;

        self.predict(&matrix)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Model("Classifier returned no prediction".to_string()))
    }
}

impl Classifier for RiskClassifier {
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<i64>> {
        if features.ncols() != self.n_features {
            return Err(AppError::Model(format!(
                "Expected {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }

        match &self.estimator {
            Estimator::Constant(level) => Ok(vec![*level; features.nrows()]),
            Estimator::Forest(forest) => {
                let x = ndarray_to_densematrix(features);
                let predictions = forest
                    .predict(&x)
                    .map_err(|e| AppError::Model(format!("Prediction failed: {}", e)))?;

                Ok(predictions.into_iter().map(i64::from).collect())
            }
        }
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl fmt::Debug for RiskClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskClassifier")
            .field("n_features", &self.n_features)
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
    let shape = arr.shape();
    let data: Vec<f64> = arr.iter().copied().collect();
    DenseMatrix::new(shape[0], shape[1], data, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::{encode_training_rows, FeatureRow};
    use crate::models::TrainingRow;
    use chrono::{NaiveDate, NaiveTime};

    fn create_test_rows(n_samples: usize) -> Vec<TrainingRow> {
        (0..n_samples)
            .map(|i| {
                // Night incidents downtown are high risk, the rest low risk
                let night = i % 2 == 0;
                TrainingRow {
                    date: NaiveDate::from_ymd_opt(2024, 1 + (i % 12) as u32, 1 + (i % 28) as u32)
                        .unwrap(),
                    time: NaiveTime::from_hms_opt(if night { 23 } else { 9 }, 0, 0).unwrap(),
                    incident_type: if night { "Asalto" } else { "Robo" }.to_string(),
                    location: if night { "Centro" } else { "Norte" }.to_string(),
                    risk_level_id: if night { 3 } else { 1 },
                }
            })
            .collect()
    }

    fn small_forest() -> ForestParams {
        ForestParams {
            n_trees: 10,
            max_depth: None,
        }
    }

    #[test]
    fn test_random_forest_fit_and_predict() {
        let dataset = encode_training_rows(&create_test_rows(40)).unwrap();
        let classifier = RiskClassifier::fit(&dataset, small_forest()).unwrap();

        assert_eq!(classifier.n_features(), dataset.n_features());
        assert_eq!(classifier.classes(), &[1, 3]);

        let night = dataset
            .schema
            .reindex(&FeatureRow::for_incident(23, 3, 6, "Asalto", "Centro"));
        let prediction = classifier.predict_one(&night).unwrap();
        assert!(classifier.classes().contains(&prediction));
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let dataset = encode_training_rows(&create_test_rows(20)).unwrap();
        let classifier = RiskClassifier::fit(&dataset, small_forest()).unwrap();

        assert!(classifier.predict_one(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_single_class_history_predicts_that_class() {
        let rows: Vec<TrainingRow> = create_test_rows(12)
            .into_iter()
            .map(|row| TrainingRow {
                risk_level_id: 3,
                ..row
            })
            .collect();
        let dataset = encode_training_rows(&rows).unwrap();
        let classifier = RiskClassifier::fit(&dataset, small_forest()).unwrap();

        assert_eq!(classifier.classes(), &[3]);
        let row = dataset.features.row(0).to_vec();
        assert_eq!(classifier.predict_one(&row).unwrap(), 3);
        assert!(classifier.predict_one(&[0.0]).is_err());

        let bytes = bincode::serialize(&classifier).unwrap();
        let restored: RiskClassifier = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.predict_one(&row).unwrap(), 3);
    }

    #[test]
    fn test_classifier_roundtrips_through_bincode() {
        let dataset = encode_training_rows(&create_test_rows(30)).unwrap();
        let classifier = RiskClassifier::fit(&dataset, small_forest()).unwrap();

        let bytes = bincode::serialize(&classifier).unwrap();
        let restored: RiskClassifier = bincode::deserialize(&bytes).unwrap();

        let row = dataset.features.row(0).to_vec();
        assert_eq!(
            classifier.predict_one(&row).unwrap(),
            restored.predict_one(&row).unwrap()
        );
    }
}
