pub mod factory;
pub mod model_store;
pub mod mysql_store;
pub mod sled_store;
pub mod store;

pub use factory::{create_model_store, create_repository};
pub use model_store::{InMemoryModelStore, StoredEntry};
pub use mysql_store::MySqlRepository;
pub use sled_store::SledModelStore;
pub use store::InMemoryRepository;

use crate::error::Result;
use crate::ml::FrequencyTable;
use crate::models::{
    ConfirmedPrediction, DailyRiskStat, Delegation, IncidentRecord, MigrationOutcome,
    RiskLevel, RiskZone, TrainingRow,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Relational data store holding delegations, incidents, risk levels and
/// the staging table of confirmed predictions
#[async_trait]
pub trait IncidentRepository: Send + Sync {
    /// Look up a delegation by id
    async fn get_delegation(&self, id: i64) -> Result<Option<Delegation>>;

    /// All delegations, ordered by id
    async fn list_delegations(&self) -> Result<Vec<Delegation>>;

    /// Most recent incidents of a delegation (date then time, descending)
    async fn training_rows(&self, delegation_id: i64, limit: usize) -> Result<Vec<TrainingRow>>;

    /// Incident count per type, most frequent first when `limit` is given
    async fn type_frequencies(
        &self,
        delegation_id: i64,
        limit: Option<usize>,
    ) -> Result<FrequencyTable>;

    /// Incident count per location
    async fn location_frequencies(&self, delegation_id: i64) -> Result<FrequencyTable>;

    /// Up to `limit` distinct locations in random order
    async fn distinct_locations(&self, delegation_id: i64, limit: usize) -> Result<Vec<String>>;

    /// Full risk-level reference set
    async fn risk_levels(&self) -> Result<Vec<RiskLevel>>;

    /// Historical incidents of a delegation within an inclusive date range,
    /// ordered by date and time
    async fn incidents_between(
        &self,
        delegation_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<IncidentRecord>>;

    /// Color-band shares per delegation for incidents on or after `since`
    async fn risk_zones(&self, since: NaiveDate) -> Result<Vec<RiskZone>>;

    /// Per-day, per-risk-level incident counts on or after `since`
    async fn historical_stats(
        &self,
        delegation_id: i64,
        since: NaiveDate,
    ) -> Result<Vec<DailyRiskStat>>;

    /// Stage a confirmed or corrected prediction
    async fn record_confirmed_prediction(&self, prediction: &ConfirmedPrediction) -> Result<()>;

    /// Copy every confirmed, unmigrated staged row into the incident table
    /// and mark it migrated. All or nothing.
    async fn migrate_confirmed_predictions(&self) -> Result<MigrationOutcome>;
}

/// Durable key-value store for trained models and frequency tables.
///
/// The timestamp recorded by `put` is the staleness clock.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// When the value under `key` was last written
    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn remove(&self, key: &str) -> Result<()>;
}
