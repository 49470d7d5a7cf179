//! Synthetic incident generation for future dates.
//!
//! A forecast combines three sources: frequency tables decide *what* and
//! *where*, the hour profile decides *when*, and the delegation's classifier
//! (when one exists) decides the risk level. Anything the classifier cannot
//! answer falls back to a uniformly random risk level.

use crate::error::{AppError, Result};
use crate::metrics::{MODEL_ACQUISITIONS_TOTAL, RISK_RESOLUTIONS_TOTAL, SYNTHETIC_INCIDENTS_TOTAL};
use crate::ml::classifier::Classifier;
use crate::ml::features::FeatureRow;
use crate::ml::models::{FrequencyTable, ModelSource, PredictionConfig, TrainedModel};
use crate::ml::registry::{FrequencyKind, ModelRegistry};
use crate::ml::sampling::{
    draw_count, sample_minute, synthetic_id, uniform_choice, HourProfile, WeightedSampler,
};
use crate::ml::trainer::Trainer;
use crate::models::{
    format_hour_minute, DailyRiskStat, Delegation, IncidentId, IncidentRecord, Period, RiskLevel,
};
use crate::state::IncidentRepository;
use chrono::{Datelike, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Incident types used when a delegation has no history at all
pub const GENERIC_INCIDENT_TYPES: [(&str, u64); 5] = [
    ("Asalto a transeúnte", 10),
    ("Robo de vehículo", 8),
    ("Asalto a negocio", 6),
    ("Robo a casa habitación", 5),
    ("Asalto con violencia", 4),
];

/// Street locations used when a delegation has no history at all
pub fn generic_locations(delegation_name: &str) -> Vec<String> {
    (1..=5)
        .map(|i| format!("Calle Principal {}, {}", i, delegation_name))
        .collect()
}

pub fn generic_types() -> FrequencyTable {
    FrequencyTable::from_counts(GENERIC_INCIDENT_TYPES)
}

/// Everything a forecast needs, fetched before any sampling happens
struct ForecastContext {
    model: Option<TrainedModel>,
    types: WeightedSampler,
    locations: Vec<String>,
    risk_levels: Vec<RiskLevel>,
    risk_index: HashMap<i64, usize>,
}

impl ForecastContext {
    fn risk_level(&self, id: i64) -> Option<&RiskLevel> {
        self.risk_index.get(&id).map(|&i| &self.risk_levels[i])
    }
}

/// Produces synthetic incidents for a delegation and period
#[derive(Clone)]
pub struct Predictor {
    repository: Arc<dyn IncidentRepository>,
    registry: ModelRegistry,
    trainer: Trainer,
    config: Arc<PredictionConfig>,
    hours: HourProfile,
}

impl Predictor {
    pub fn new(
        repository: Arc<dyn IncidentRepository>,
        trainer: Trainer,
        config: Arc<PredictionConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let hours = HourProfile::new(&config.hour_weights)?;
        Ok(Self {
            repository,
            registry: trainer.registry().clone(),
            trainer,
            config,
            hours,
        })
    }

    /// Obtain a usable model for a delegation.
    ///
    /// A persisted model younger than the staleness threshold is returned
    /// as is. An older one triggers a retrain and is kept only if the
    /// retrain produces nothing. Without a persisted model a new one is
    /// trained, which may still yield `None`.
    pub async fn acquire_model(&self, delegation_id: i64) -> (Option<TrainedModel>, ModelSource) {
        let persisted = match self.registry.load_model(delegation_id).await {
            Ok(model) => model,
            Err(e) => {
                warn!(delegation_id, error = %e, "Could not load persisted model");
                None
            }
        };

        let (model, source) = match persisted {
            Some((model, stored_at)) if Utc::now() - stored_at <= self.config.staleness() => {
                (Some(model), ModelSource::Fresh)
            }
            Some((stale, stored_at)) => {
                info!(delegation_id, stored_at = %stored_at, "Model is stale, retraining");
                match self.trainer.train(delegation_id).await {
                    Some(model) => (Some(model), ModelSource::Retrained),
                    None => (Some(stale), ModelSource::StaleFallback),
                }
            }
            None => match self.trainer.train(delegation_id).await {
                Some(model) => (Some(model), ModelSource::TrainedNew),
                None => (None, ModelSource::None),
            },
        };

        MODEL_ACQUISITIONS_TOTAL
            .with_label_values(&[source.as_str()])
            .inc();
        debug!(delegation_id, source = source.as_str(), "Model acquired");
        (model, source)
    }

    /// Forecast incidents with an entropy-seeded generator
    pub async fn predict(
        &self,
        delegation_id: i64,
        base_date: NaiveDate,
        period: Period,
    ) -> Result<Vec<IncidentRecord>> {
        let mut rng = StdRng::from_entropy();
        self.predict_with_rng(delegation_id, base_date, period, &mut rng)
            .await
    }

    /// Forecast incidents for every date of `period` starting at `base_date`.
    ///
    /// Results are sorted by date, then by `HH:MM` time.
    pub async fn predict_with_rng<R: Rng + Send>(
        &self,
        delegation_id: i64,
        base_date: NaiveDate,
        period: Period,
        rng: &mut R,
    ) -> Result<Vec<IncidentRecord>> {
        let delegation = self
            .repository
            .get_delegation(delegation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Delegation {} not found", delegation_id))
            })?;

        let context = self.prepare(&delegation).await?;
        let dates = period.dates(base_date);
        let records = self.synthesize(&context, &dates, self.config.daily_range(period), rng);

        SYNTHETIC_INCIDENTS_TOTAL
            .with_label_values(&[&period.to_string()])
            .inc_by(records.len() as f64);
        info!(
            delegation_id,
            base_date = %base_date,
            period = %period,
            incidents = records.len(),
            with_model = context.model.is_some(),
            "Forecast generated"
        );

        Ok(records)
    }

    /// Forecast per-day, per-risk-level counts over `days` consecutive days
    /// starting at `first`, using an entropy-seeded generator
    pub async fn estimate(
        &self,
        delegation_id: i64,
        first: NaiveDate,
        days: u32,
    ) -> Result<Vec<DailyRiskStat>> {
        let mut rng = StdRng::from_entropy();
        self.estimate_with_rng(delegation_id, first, days, &mut rng)
            .await
    }

    /// Daily risk estimates built from the same synthetic incidents as a
    /// day-by-day forecast.
    ///
    /// Rows are ordered by date, then by risk level id.
    pub async fn estimate_with_rng<R: Rng + Send>(
        &self,
        delegation_id: i64,
        first: NaiveDate,
        days: u32,
        rng: &mut R,
    ) -> Result<Vec<DailyRiskStat>> {
        let delegation = self
            .repository
            .get_delegation(delegation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Delegation {} not found", delegation_id))
            })?;

        let context = self.prepare(&delegation).await?;
        let dates: Vec<NaiveDate> = first.iter_days().take(days as usize).collect();
        let records = self.synthesize(
            &context,
            &dates,
            self.config.daily_range(Period::Day),
            rng,
        );

        SYNTHETIC_INCIDENTS_TOTAL
            .with_label_values(&["estimate"])
            .inc_by(records.len() as f64);

        let level_order: HashMap<&str, i64> = context
            .risk_levels
            .iter()
            .map(|level| (level.name.as_str(), level.id))
            .collect();
        let mut counts: BTreeMap<(NaiveDate, i64, &str, &str), i64> = BTreeMap::new();
        for record in &records {
            let order = level_order.get(record.risk.as_str()).copied().unwrap_or(i64::MAX);
            *counts
                .entry((record.date, order, record.risk.as_str(), record.color_code.as_str()))
                .or_insert(0) += 1;
        }

        info!(
            delegation_id,
            first = %first,
            days,
            incidents = records.len(),
            "Risk estimate generated"
        );

        Ok(counts
            .into_iter()
            .map(|((fecha, _, riesgo, codigo_color), total)| DailyRiskStat {
                fecha,
                riesgo: riesgo.to_string(),
                codigo_color: codigo_color.to_string(),
                total,
            })
            .collect())
    }

    async fn prepare(&self, delegation: &Delegation) -> Result<ForecastContext> {
        let (model, _) = self.acquire_model(delegation.id).await;

        let type_table = self.type_table(delegation.id).await?;
        let types = match WeightedSampler::from_table(&type_table) {
            Some(sampler) => sampler,
            None => WeightedSampler::from_table(&generic_types()).ok_or_else(|| {
                AppError::Internal("Generic incident types are not sampleable".to_string())
            })?,
        };

        let mut locations = self.locations(delegation.id).await?;
        if locations.is_empty() {
            debug!(delegation_id = delegation.id, "Using generic locations");
            locations = generic_locations(&delegation.name);
        }

        let risk_levels = self.repository.risk_levels().await?;
        if risk_levels.is_empty() {
            return Err(AppError::Internal(
                "No risk levels are defined".to_string(),
            ));
        }
        let risk_index = risk_levels
            .iter()
            .enumerate()
            .map(|(i, level)| (level.id, i))
            .collect();

        Ok(ForecastContext {
            model,
            types,
            locations,
            risk_levels,
            risk_index,
        })
    }

    /// Stored type table, else the most frequent types, else empty
    async fn type_table(&self, delegation_id: i64) -> Result<FrequencyTable> {
        match self
            .registry
            .load_frequencies(FrequencyKind::Types, delegation_id)
            .await
        {
            Ok(Some(table)) if !table.is_degenerate() => return Ok(table),
            Ok(_) => {}
            Err(e) => warn!(delegation_id, error = %e, "Could not load type frequencies"),
        }

        self.repository
            .type_frequencies(delegation_id, Some(self.config.fallback_type_limit))
            .await
    }

    /// Stored location table, else a random sample of distinct locations
    async fn locations(&self, delegation_id: i64) -> Result<Vec<String>> {
        match self
            .registry
            .load_frequencies(FrequencyKind::Locations, delegation_id)
            .await
        {
            Ok(Some(table)) if !table.is_empty() => {
                return Ok(table.values().map(str::to_string).collect())
            }
            Ok(_) => {}
            Err(e) => warn!(delegation_id, error = %e, "Could not load location frequencies"),
        }

        self.repository
            .distinct_locations(delegation_id, self.config.fallback_location_limit)
            .await
    }

    fn synthesize<R: Rng + ?Sized>(
        &self,
        context: &ForecastContext,
        dates: &[NaiveDate],
        range: (u32, u32),
        rng: &mut R,
    ) -> Vec<IncidentRecord> {
        let mut records = Vec::new();

        for &date in dates {
            for _ in 0..draw_count(range, rng) {
                let incident_type = context.types.sample(rng).to_string();
                let location = uniform_choice(&context.locations, rng)
                    .cloned()
                    .unwrap_or_default();
                let hour = self.hours.sample_hour(rng);
                let minute = sample_minute(rng);

                let level = self.resolve_risk(context, date, hour, &incident_type, &location, rng);

                records.push(IncidentRecord {
                    id: IncidentId::Predicted(synthetic_id(&self.config.prediction_prefix, rng)),
                    incident_type,
                    location,
                    time: format_hour_minute(hour, minute),
                    risk: level.name.clone(),
                    color_code: level.color_code.clone(),
                    date,
                    is_prediction: true,
                });
            }
        }

        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        records
    }

    fn resolve_risk<'a, R: Rng + ?Sized>(
        &self,
        context: &'a ForecastContext,
        date: NaiveDate,
        hour: u32,
        incident_type: &str,
        location: &str,
        rng: &mut R,
    ) -> &'a RiskLevel {
        let method = match &context.model {
            Some(model) => {
                let row = FeatureRow::for_incident(
                    hour,
                    date.weekday().number_from_monday(),
                    date.month(),
                    incident_type,
                    location,
                );
                let predicted = model
                    .schema
                    .reindex_matrix(&row)
                    .and_then(|features| model.classifier.predict(&features));

                match predicted {
                    Ok(ids) => {
                        if let Some(level) = ids.first().and_then(|&id| context.risk_level(id)) {
                            RISK_RESOLUTIONS_TOTAL.with_label_values(&["model"]).inc();
                            return level;
                        }
                        debug!(predicted = ?ids, "Classifier returned an unknown risk level");
                    }
                    Err(e) => debug!(error = %e, "Classification failed"),
                }
                "random_fallback"
            }
            None => "random_no_model",
        };

        RISK_RESOLUTIONS_TOTAL.with_label_values(&[method]).inc();
        // `prepare` guarantees at least one risk level
        uniform_choice(&context.risk_levels, rng).unwrap_or(&context.risk_levels[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RISK_RESOLUTIONS_TOTAL;
    use crate::ml::classifier::{ForestParams, RiskClassifier};
    use crate::ml::features::{encode_training_rows, FeatureSchema, HOUR_COLUMN};
    use crate::models::TrainingRow;
    use crate::state::{InMemoryModelStore, InMemoryRepository, ModelStore};
    use chrono::{Duration, NaiveTime};

    fn build(repo: InMemoryRepository) -> (Predictor, ModelRegistry, Arc<InMemoryModelStore>) {
        let store = Arc::new(InMemoryModelStore::new());
        let registry = ModelRegistry::new(store.clone());
        let config = Arc::new(PredictionConfig {
            n_trees: 5,
            ..Default::default()
        });
        let repository: Arc<dyn IncidentRepository> = Arc::new(repo);
        let trainer = Trainer::new(repository.clone(), registry.clone(), config.clone());
        let predictor = Predictor::new(repository, trainer, config).unwrap();
        (predictor, registry, store)
    }

    fn seed_history(repo: &InMemoryRepository, delegation_id: i64, n: usize) {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..n {
            repo.add_incident(
                delegation_id,
                if i % 2 == 0 { "Asalto" } else { "Robo" },
                if i % 2 == 0 { "Zocalo" } else { "Alameda" },
                start + Duration::days(i as i64),
                NaiveTime::from_hms_opt(if i % 2 == 0 { 22 } else { 9 }, 0, 0).unwrap(),
                if i % 2 == 0 { 3 } else { 1 },
            );
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Model fitted directly on two alternating labels
    fn fitted_model(delegation_id: i64, labels: [i64; 2]) -> TrainedModel {
        let rows: Vec<TrainingRow> = (0..12)
            .map(|i| TrainingRow {
                date: date("2024-01-01") + Duration::days(i),
                time: NaiveTime::from_hms_opt(if i % 2 == 0 { 22 } else { 9 }, 0, 0).unwrap(),
                incident_type: "Robo".to_string(),
                location: "Zocalo".to_string(),
                risk_level_id: labels[(i % 2) as usize],
            })
            .collect();
        let dataset = encode_training_rows(&rows).unwrap();
        let classifier = RiskClassifier::fit(
            &dataset,
            ForestParams {
                n_trees: 5,
                max_depth: None,
            },
        )
        .unwrap();

        TrainedModel {
            delegation_id,
            classifier,
            schema: dataset.schema,
            trained_at: Utc::now(),
            n_samples: rows.len(),
        }
    }

    fn random_fallbacks() -> f64 {
        RISK_RESOLUTIONS_TOTAL
            .with_label_values(&["random_fallback"])
            .get()
    }

    #[tokio::test]
    async fn test_unknown_delegation_is_not_found() {
        let (predictor, _, _) = build(InMemoryRepository::with_default_risk_levels());
        let mut rng = StdRng::seed_from_u64(1);

        let err = predictor
            .predict_with_rng(99, date("2099-01-01"), Period::Day, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_no_history_uses_generic_fallbacks() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(3, "Centro"));
        let (predictor, _, _) = build(repo);
        let mut rng = StdRng::seed_from_u64(42);

        let records = predictor
            .predict_with_rng(3, date("2099-02-01"), Period::Day, &mut rng)
            .await
            .unwrap();

        assert!((3..=8).contains(&records.len()));
        let generic: Vec<&str> = GENERIC_INCIDENT_TYPES.iter().map(|(t, _)| *t).collect();
        for record in &records {
            assert_eq!(record.date, date("2099-02-01"));
            assert!(generic.contains(&record.incident_type.as_str()));
            assert!(record.location.contains("Centro"));
            assert!(record.is_prediction);
            assert!(["Bajo", "Medio", "Alto"].contains(&record.risk.as_str()));
        }
    }

    #[tokio::test]
    async fn test_acquire_model_sources() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        repo.add_delegation(Delegation::new(2, "Sur"));
        seed_history(&repo, 1, 20);
        seed_history(&repo, 2, 4);
        let (predictor, _, store) = build(repo);

        let (model, source) = predictor.acquire_model(1).await;
        assert!(model.is_some());
        assert_eq!(source, ModelSource::TrainedNew);

        let (_, source) = predictor.acquire_model(1).await;
        assert_eq!(source, ModelSource::Fresh);

        let (model, source) = predictor.acquire_model(2).await;
        assert!(model.is_none());
        assert_eq!(source, ModelSource::None);

        // Age the model past the staleness threshold
        let bytes = store.get("model:1").await.unwrap().unwrap();
        store.put_with_timestamp("model:1", bytes, Utc::now() - Duration::days(45));
        let (_, source) = predictor.acquire_model(1).await;
        assert_eq!(source, ModelSource::Retrained);
    }

    #[tokio::test]
    async fn test_stale_model_kept_when_retraining_fails() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        seed_history(&repo, 1, 20);
        let (predictor, _, store) = build(repo.clone());

        assert!(predictor.acquire_model(1).await.0.is_some());
        let bytes = store.get("model:1").await.unwrap().unwrap();
        store.put_with_timestamp("model:1", bytes, Utc::now() - Duration::days(31));

        repo.set_offline(true);
        let (model, source) = predictor.acquire_model(1).await;
        assert!(model.is_some());
        assert_eq!(source, ModelSource::StaleFallback);
    }

    #[tokio::test]
    async fn test_trained_delegation_uses_historical_categories() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        seed_history(&repo, 1, 20);
        let (predictor, _, _) = build(repo);
        let mut rng = StdRng::seed_from_u64(9);

        let records = predictor
            .predict_with_rng(1, date("2099-03-01"), Period::Week, &mut rng)
            .await
            .unwrap();

        assert!(records.len() >= 14 && records.len() <= 42);
        for record in &records {
            assert!(["Asalto", "Robo"].contains(&record.incident_type.as_str()));
            assert!(["Zocalo", "Alameda"].contains(&record.location.as_str()));
        }
    }

    #[tokio::test]
    async fn test_single_risk_level_history_forecasts_that_level() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        for i in 0..20 {
            repo.add_incident(
                1,
                if i % 2 == 0 { "Asalto" } else { "Robo" },
                "Zocalo",
                date("2024-01-01") + Duration::days(i),
                NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                3,
            );
        }
        let (predictor, _, _) = build(repo);

        let (model, source) = predictor.acquire_model(1).await;
        assert!(model.is_some());
        assert_eq!(source, ModelSource::TrainedNew);

        let mut rng = StdRng::seed_from_u64(5);
        let records = predictor
            .predict_with_rng(1, date("2099-04-01"), Period::Week, &mut rng)
            .await
            .unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.risk == "Alto" && r.color_code == "danger"));
    }

    #[tokio::test]
    async fn test_unknown_predicted_level_falls_back_to_random() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        let (predictor, registry, _) = build(repo);
        registry.save_model(&fitted_model(1, [7, 8])).await.unwrap();

        let before = random_fallbacks();
        let mut rng = StdRng::seed_from_u64(13);
        let records = predictor
            .predict_with_rng(1, date("2099-04-01"), Period::Day, &mut rng)
            .await
            .unwrap();

        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| ["Bajo", "Medio", "Alto"].contains(&r.risk.as_str())));
        assert!(random_fallbacks() >= before + records.len() as f64);
    }

    #[tokio::test]
    async fn test_classification_error_falls_back_to_random() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        let (predictor, registry, _) = build(repo);

        let mut model = fitted_model(1, [1, 3]);
        model.schema = FeatureSchema::new(vec![HOUR_COLUMN.to_string()]);
        registry.save_model(&model).await.unwrap();

        let before = random_fallbacks();
        let mut rng = StdRng::seed_from_u64(21);
        let records = predictor
            .predict_with_rng(1, date("2099-04-01"), Period::Day, &mut rng)
            .await
            .unwrap();

        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| ["success", "warning", "danger"].contains(&r.color_code.as_str())));
        assert!(random_fallbacks() >= before + records.len() as f64);
    }

    #[tokio::test]
    async fn test_estimate_counts_per_day_and_level() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(1, "Norte"));
        seed_history(&repo, 1, 20);
        let (predictor, _, _) = build(repo);
        let mut rng = StdRng::seed_from_u64(8);

        let stats = predictor
            .estimate_with_rng(1, date("2099-06-01"), 7, &mut rng)
            .await
            .unwrap();

        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for stat in &stats {
            assert!(stat.total > 0);
            assert!(["Bajo", "Medio", "Alto"].contains(&stat.riesgo.as_str()));
            *per_day.entry(stat.fecha).or_default() += stat.total;
        }
        assert_eq!(per_day.len(), 7);
        assert_eq!(*per_day.keys().next().unwrap(), date("2099-06-01"));
        assert_eq!(*per_day.keys().last().unwrap(), date("2099-06-07"));
        assert!(per_day.values().all(|&n| (3..=8).contains(&n)));

        let dates: Vec<_> = stats.iter().map(|s| s.fecha).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[tokio::test]
    async fn test_missing_risk_levels_is_an_error() {
        let repo = InMemoryRepository::new();
        repo.add_delegation(Delegation::new(1, "Norte"));
        let (predictor, _, _) = build(repo);
        let mut rng = StdRng::seed_from_u64(2);

        assert!(predictor
            .predict_with_rng(1, date("2099-01-01"), Period::Day, &mut rng)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_same_seed_same_forecast() {
        let repo = InMemoryRepository::with_default_risk_levels();
        repo.add_delegation(Delegation::new(3, "Centro"));
        let (predictor, _, _) = build(repo);

        let mut first = StdRng::seed_from_u64(77);
        let mut second = StdRng::seed_from_u64(77);
        let a = predictor
            .predict_with_rng(3, date("2099-05-01"), Period::Month, &mut first)
            .await
            .unwrap();
        let b = predictor
            .predict_with_rng(3, date("2099-05-01"), Period::Month, &mut second)
            .await
            .unwrap();

        assert_eq!(a, b);
    }
}
