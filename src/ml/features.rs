use crate::error::{AppError, Result};
use crate::models::TrainingRow;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Hour-of-day column
pub const HOUR_COLUMN: &str = "hora";
/// ISO weekday column (1-7)
pub const WEEKDAY_COLUMN: &str = "dia_semana";
/// Calendar month column
pub const MONTH_COLUMN: &str = "mes";
/// Prefix of one-hot incident type columns
pub const TYPE_PREFIX: &str = "tipo_";
/// Prefix of one-hot location columns
pub const LOCATION_PREFIX: &str = "ubicacion_";

/// Ordered list of feature columns a classifier was fit on.
///
/// Any inference-time row must go through [`FeatureSchema::reindex`] so the
/// vector handed to the classifier has exactly these columns in this order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Project a named feature row onto this schema.
    ///
    /// Columns missing from the row are 0.0, columns the schema does not
    /// know are dropped. Never fails.
    pub fn reindex(&self, row: &FeatureRow) -> Vec<f64> {
        self.columns
            .iter()
            .map(|column| row.get(column).unwrap_or(0.0))
            .collect()
    }

    /// Reindex a single row into a `1 × n_columns` matrix
    pub fn reindex_matrix(&self, row: &FeatureRow) -> Result<Array2<f64>> {
        let values = self.reindex(row);
        Array2::from_shape_vec((1, values.len()), values)
            .map_err(|e| AppError::Model(format!("Failed to create feature array: {}", e)))
    }
}

/// Sparse named feature values for one incident
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    values: HashMap<String, f64>,
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row for a (possibly synthetic) incident: temporal values plus the
    /// one-hot columns of its type and location
    pub fn for_incident(
        hour: u32,
        weekday: u32,
        month: u32,
        incident_type: &str,
        location: &str,
    ) -> Self {
        let mut row = Self::new();
        row.set(HOUR_COLUMN, f64::from(hour));
        row.set(WEEKDAY_COLUMN, f64::from(weekday));
        row.set(MONTH_COLUMN, f64::from(month));
        row.set(type_column(incident_type), 1.0);
        row.set(location_column(location), 1.0);
        row
    }

    pub fn set(&mut self, column: impl Into<String>, value: f64) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn type_column(incident_type: &str) -> String {
    format!("{}{}", TYPE_PREFIX, incident_type)
}

pub fn location_column(location: &str) -> String {
    format!("{}{}", LOCATION_PREFIX, location)
}

/// Encoded training matrix with its schema and target labels
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub schema: FeatureSchema,
    pub features: Array2<f64>,
    pub labels: Array1<i64>,
}

impl EncodedDataset {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// One-hot encode historical incidents.
///
/// Temporal columns come first, followed by the sorted `tipo_*` columns and
/// the sorted `ubicacion_*` columns. The target (risk level) is kept apart.
pub fn encode_training_rows(rows: &[TrainingRow]) -> Result<EncodedDataset> {
    if rows.is_empty() {
        return Err(AppError::Model(
            "Cannot encode an empty training set".to_string(),
        ));
    }

    let types: BTreeSet<&str> = rows.iter().map(|r| r.incident_type.as_str()).collect();
    let locations: BTreeSet<&str> = rows.iter().map(|r| r.location.as_str()).collect();

    let mut columns = vec![
        HOUR_COLUMN.to_string(),
        WEEKDAY_COLUMN.to_string(),
        MONTH_COLUMN.to_string(),
    ];
    columns.extend(types.iter().map(|t| type_column(t)));
    columns.extend(locations.iter().map(|l| location_column(l)));

    let schema = FeatureSchema::new(columns);
    let mut features = Array2::zeros((rows.len(), schema.len()));

    for (i, row) in rows.iter().enumerate() {
        let encoded = schema.reindex(&FeatureRow::for_incident(
            row.hour(),
            row.weekday(),
            row.month(),
            &row.incident_type,
            &row.location,
        ));
        for (j, value) in encoded.into_iter().enumerate() {
            features[[i, j]] = value;
        }
    }

    let labels = rows.iter().map(|r| r.risk_level_id).collect::<Array1<i64>>();

    Ok(EncodedDataset {
        schema,
        features,
        labels,
    })
}
