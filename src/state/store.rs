use crate::error::{AppError, Result};
use crate::ml::FrequencyTable;
use crate::models::{
    format_hour_minute, percentage, ConfirmedPrediction, DailyRiskStat, Delegation, Incident,
    IncidentId, IncidentOrigin, IncidentRecord, MigrationOutcome, RiskLevel, RiskZone,
    TrainingRow,
};
use crate::state::IncidentRepository;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Timelike};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    delegations: BTreeMap<i64, Delegation>,
    risk_levels: BTreeMap<i64, RiskLevel>,
    incidents: Vec<Incident>,
    staged: Vec<ConfirmedPrediction>,
    next_incident_id: i64,
}

/// In-memory relational store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-loaded with the three standard risk levels
    pub fn with_default_risk_levels() -> Self {
        let repo = Self::new();
        repo.add_risk_level(RiskLevel::new(1, "Bajo", "success"));
        repo.add_risk_level(RiskLevel::new(2, "Medio", "warning"));
        repo.add_risk_level(RiskLevel::new(3, "Alto", "danger"));
        repo
    }

    pub fn add_delegation(&self, delegation: Delegation) {
        self.tables
            .write()
            .delegations
            .insert(delegation.id, delegation);
    }

    pub fn add_risk_level(&self, level: RiskLevel) {
        self.tables.write().risk_levels.insert(level.id, level);
    }

    /// Insert a manually captured incident and return its id
    pub fn add_incident(
        &self,
        delegation_id: i64,
        incident_type: &str,
        location: &str,
        date: NaiveDate,
        time: NaiveTime,
        risk_level_id: i64,
    ) -> i64 {
        let mut tables = self.tables.write();
        tables.next_incident_id += 1;
        let id = tables.next_incident_id;
        tables.incidents.push(Incident {
            id,
            delegation_id,
            incident_type: incident_type.to_string(),
            location: location.to_string(),
            date,
            time,
            risk_level_id,
            origin: IncidentOrigin::Manual,
        });
        id
    }

    /// Historical incidents of a delegation in insertion order
    pub fn incidents_for(&self, delegation_id: i64) -> Vec<Incident> {
        self.tables
            .read()
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id)
            .cloned()
            .collect()
    }

    /// Snapshot of the staging table
    pub fn staged_predictions(&self) -> Vec<ConfirmedPrediction> {
        self.tables.read().staged.clone()
    }

    /// Simulate an unreachable database: every call fails while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Database(
                "Could not connect to the database".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IncidentRepository for InMemoryRepository {
    async fn get_delegation(&self, id: i64) -> Result<Option<Delegation>> {
        self.ensure_online()?;
        Ok(self.tables.read().delegations.get(&id).cloned())
    }

    async fn list_delegations(&self) -> Result<Vec<Delegation>> {
        self.ensure_online()?;
        Ok(self.tables.read().delegations.values().cloned().collect())
    }

    async fn training_rows(&self, delegation_id: i64, limit: usize) -> Result<Vec<TrainingRow>> {
        self.ensure_online()?;
        let tables = self.tables.read();
        let mut incidents: Vec<&Incident> = tables
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id)
            .collect();

        incidents.sort_by(|a, b| (b.date, b.time).cmp(&(a.date, a.time)));

        Ok(incidents
            .into_iter()
            .take(limit)
            .map(TrainingRow::from)
            .collect())
    }

    async fn type_frequencies(
        &self,
        delegation_id: i64,
        limit: Option<usize>,
    ) -> Result<FrequencyTable> {
        self.ensure_online()?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for incident in self
            .tables
            .read()
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id)
        {
            *counts.entry(incident.incident_type.clone()).or_insert(0) += 1;
        }

        let table = FrequencyTable::from(counts);
        Ok(match limit {
            Some(n) => table.top(n),
            None => table,
        })
    }

    async fn location_frequencies(&self, delegation_id: i64) -> Result<FrequencyTable> {
        self.ensure_online()?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for incident in self
            .tables
            .read()
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id)
        {
            *counts.entry(incident.location.clone()).or_insert(0) += 1;
        }
        Ok(FrequencyTable::from(counts))
    }

    async fn distinct_locations(&self, delegation_id: i64, limit: usize) -> Result<Vec<String>> {
        self.ensure_online()?;
        let mut locations: Vec<String> = Vec::new();
        for incident in self
            .tables
            .read()
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id)
        {
            if !locations.contains(&incident.location) {
                locations.push(incident.location.clone());
            }
        }

        locations.shuffle(&mut rand::thread_rng());
        locations.truncate(limit);
        Ok(locations)
    }

    async fn risk_levels(&self) -> Result<Vec<RiskLevel>> {
        self.ensure_online()?;
        Ok(self.tables.read().risk_levels.values().cloned().collect())
    }

    async fn incidents_between(
        &self,
        delegation_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<IncidentRecord>> {
        self.ensure_online()?;
        let tables = self.tables.read();
        let mut incidents: Vec<&Incident> = tables
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id && i.date >= from && i.date <= to)
            .collect();
        incidents.sort_by_key(|i| (i.date, i.time));

        Ok(incidents
            .into_iter()
            .filter_map(|incident| {
                let level = tables.risk_levels.get(&incident.risk_level_id)?;
                Some(IncidentRecord {
                    id: IncidentId::Recorded(incident.id),
                    incident_type: incident.incident_type.clone(),
                    location: incident.location.clone(),
                    time: format_hour_minute(incident.time.hour(), incident.time.minute()),
                    risk: level.name.clone(),
                    color_code: level.color_code.clone(),
                    date: incident.date,
                    is_prediction: false,
                })
            })
            .collect())
    }

    async fn risk_zones(&self, since: NaiveDate) -> Result<Vec<RiskZone>> {
        self.ensure_online()?;
        let tables = self.tables.read();

        // delegation -> (danger, warning, success, total)
        let mut bands: BTreeMap<i64, (usize, usize, usize, usize)> = BTreeMap::new();
        for incident in tables.incidents.iter().filter(|i| i.date >= since) {
            let entry = bands.entry(incident.delegation_id).or_default();
            entry.3 += 1;
            match tables
                .risk_levels
                .get(&incident.risk_level_id)
                .map(|l| l.color_code.as_str())
            {
                Some("danger") => entry.0 += 1,
                Some("warning") => entry.1 += 1,
                Some("success") => entry.2 += 1,
                _ => {}
            }
        }

        Ok(bands
            .into_iter()
            .filter_map(|(id, (red, yellow, green, total))| {
                let delegation = tables.delegations.get(&id)?;
                Some(RiskZone {
                    id,
                    nombre: delegation.name.clone(),
                    red: percentage(red, total),
                    yellow: percentage(yellow, total),
                    green: percentage(green, total),
                    total: total as i64,
                })
            })
            .collect())
    }

    async fn historical_stats(
        &self,
        delegation_id: i64,
        since: NaiveDate,
    ) -> Result<Vec<DailyRiskStat>> {
        self.ensure_online()?;
        let tables = self.tables.read();

        let mut counts: BTreeMap<(NaiveDate, i64), i64> = BTreeMap::new();
        for incident in tables
            .incidents
            .iter()
            .filter(|i| i.delegation_id == delegation_id && i.date >= since)
        {
            *counts
                .entry((incident.date, incident.risk_level_id))
                .or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .filter_map(|((fecha, level_id), total)| {
                let level = tables.risk_levels.get(&level_id)?;
                Some(DailyRiskStat {
                    fecha,
                    riesgo: level.name.clone(),
                    codigo_color: level.color_code.clone(),
                    total,
                })
            })
            .collect())
    }

    async fn record_confirmed_prediction(&self, prediction: &ConfirmedPrediction) -> Result<()> {
        self.ensure_online()?;
        self.tables.write().staged.push(prediction.clone());
        tracing::debug!(
            prediction_id = %prediction.prediction_id,
            delegation_id = prediction.delegation_id,
            "Confirmed prediction staged"
        );
        Ok(())
    }

    async fn migrate_confirmed_predictions(&self) -> Result<MigrationOutcome> {
        self.ensure_online()?;
        let mut tables = self.tables.write();

        let pending: Vec<ConfirmedPrediction> = tables
            .staged
            .iter()
            .filter(|p| p.confirmed && !p.migrated)
            .cloned()
            .collect();

        let mut delegation_ids = Vec::new();
        for prediction in &pending {
            tables.next_incident_id += 1;
            let id = tables.next_incident_id;
            tables.incidents.push(Incident {
                id,
                delegation_id: prediction.delegation_id,
                incident_type: prediction.incident_type.clone(),
                location: prediction.location.clone(),
                date: prediction.date,
                time: prediction.time,
                risk_level_id: prediction.risk_level_id,
                origin: IncidentOrigin::Prediccion,
            });
            delegation_ids.push(prediction.delegation_id);
        }

        for staged in tables.staged.iter_mut().filter(|p| p.confirmed && !p.migrated) {
            staged.migrated = true;
        }

        delegation_ids.sort_unstable();
        delegation_ids.dedup();

        Ok(MigrationOutcome {
            migrated: pending.len() as u64,
            delegation_ids,
        })
    }
}
