use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A synthetic incident confirmed or corrected by an operator, staged for
/// promotion into the historical incident table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedPrediction {
    /// Synthetic identifier of the prediction, e.g. `pred-48213`
    pub prediction_id: String,
    pub delegation_id: i64,
    pub incident_type: String,
    pub location: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub risk_level_id: i64,
    pub confirmed: bool,
    pub migrated: bool,
}

/// Result of promoting staged predictions into historical incidents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MigrationOutcome {
    /// Number of rows copied into the incident table
    pub migrated: u64,

    /// Delegations that received new rows, ascending
    pub delegation_ids: Vec<i64>,
}
