use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::ml::{ModelSummary, TrainingOutcome};
use crate::models::*;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

/// Liveness text
pub async fn root() -> &'static str {
    "Risk forecast API is running"
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Prometheus exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// List delegations
pub async fn list_delegations(State(state): State<AppState>) -> Result<Json<Vec<Delegation>>> {
    Ok(Json(state.repository.list_delegations().await?))
}

/// Color-band shares per delegation over the last 30 days
pub async fn risk_zones(State(state): State<AppState>) -> Result<Json<Vec<RiskZone>>> {
    let since = today() - Duration::days(30);
    Ok(Json(state.repository.risk_zones(since).await?))
}

#[derive(Debug, Deserialize)]
pub struct HistoricalStatsQuery {
    pub delegacion_id: Option<String>,
    pub dias: Option<i64>,
}

/// Per-day, per-risk-level counts for a delegation
pub async fn historical_stats(
    State(state): State<AppState>,
    Query(query): Query<HistoricalStatsQuery>,
) -> Result<Json<Vec<DailyRiskStat>>> {
    let delegation_id = parse_delegation_id(query.delegacion_id.as_deref())?;
    let days = query.dias.unwrap_or(30);
    if !(1..=3650).contains(&days) {
        return Err(AppError::Validation(
            "dias must be between 1 and 3650".to_string(),
        ));
    }

    let since = today() - Duration::days(days);
    Ok(Json(
        state
            .repository
            .historical_stats(delegation_id, since)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RiskEstimateQuery {
    pub delegacion_id: Option<String>,
    pub dias: Option<i64>,
}

/// Forecast per-day, per-risk-level counts for the days after today
pub async fn risk_estimates(
    State(state): State<AppState>,
    Query(query): Query<RiskEstimateQuery>,
) -> Result<Json<Vec<DailyRiskStat>>> {
    let delegation_id = parse_delegation_id(query.delegacion_id.as_deref())?;
    let days = query.dias.unwrap_or(7);
    if !(1..=366).contains(&days) {
        return Err(AppError::Validation(
            "dias must be between 1 and 366".to_string(),
        ));
    }

    let first = today() + Duration::days(1);
    Ok(Json(
        state
            .predictor
            .estimate(delegation_id, first, days as u32)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct IncidentQuery {
    pub delegacion_id: Option<String>,
    pub fecha: Option<String>,
    pub periodo: Option<String>,
}

/// Historical incidents for past dates, synthetic ones for future dates
pub async fn get_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentQuery>,
) -> Result<Json<Vec<IncidentRecord>>> {
    let delegation_id = parse_delegation_id(query.delegacion_id.as_deref())?;
    let period = parse_period(query.periodo.as_deref())?;
    let today = today();
    let base_date = resolve_base_date(period, query.fecha.as_deref(), today)?;

    if base_date > today {
        let records = state
            .predictor
            .predict(delegation_id, base_date, period)
            .await?;
        return Ok(Json(records));
    }

    if state
        .repository
        .get_delegation(delegation_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!(
            "Delegation {} not found",
            delegation_id
        )));
    }

    let (from, to) = period.window(base_date);
    Ok(Json(
        state
            .repository
            .incidents_between(delegation_id, from, to)
            .await?,
    ))
}

/// Train a delegation's model on demand
pub async fn train_model(
    State(state): State<AppState>,
    Path(delegation_id): Path<i64>,
) -> Result<Json<TrainResponse>> {
    if state
        .repository
        .get_delegation(delegation_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!(
            "Delegation {} not found",
            delegation_id
        )));
    }

    let response = match state.trainer.try_train(delegation_id).await? {
        TrainingOutcome::Trained(model) => TrainResponse {
            status: "trained".to_string(),
            model: Some(model.summary()),
            available: Some(model.n_samples),
            required: None,
        },
        TrainingOutcome::InsufficientData {
            available,
            required,
        } => TrainResponse {
            status: "insufficient_data".to_string(),
            model: None,
            available: Some(available),
            required: Some(required),
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1))]
    pub incidente_id: String,
    #[validate(range(min = 1))]
    pub delegacion_id: i64,
    #[validate(length(min = 1, max = 255))]
    pub tipo: String,
    #[validate(length(min = 1, max = 255))]
    pub ubicacion: String,
    pub fecha: String,
    pub hora: String,
    #[validate(range(min = 1))]
    pub nivel_riesgo_id: i64,
    #[serde(default = "default_confirmed")]
    pub confirmado: bool,
}

fn default_confirmed() -> bool {
    true
}

impl FeedbackRequest {
    pub fn into_prediction(self) -> Result<ConfirmedPrediction> {
        Ok(ConfirmedPrediction {
            date: parse_date(&self.fecha)?,
            time: parse_time(&self.hora)?,
            prediction_id: self.incidente_id,
            delegation_id: self.delegacion_id,
            incident_type: self.tipo,
            location: self.ubicacion,
            risk_level_id: self.nivel_riesgo_id,
            confirmed: self.confirmado,
            migrated: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub message: String,
    pub retrained: bool,
}

/// Record a confirmed or corrected prediction
pub async fn submit_feedback(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate()?;

    let receipt = state
        .feedback
        .record_feedback(request.into_prediction()?)
        .await?;

    Ok(Json(FeedbackResponse {
        success: true,
        message: "Feedback recorded".to_string(),
        retrained: receipt.retrained,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationResponse {
    pub success: bool,
    pub message: String,
    pub migrated: u64,
    pub delegations: Vec<i64>,
    pub retrained: Vec<i64>,
}

/// Promote confirmed predictions into the incident table
pub async fn migrate_predictions(State(state): State<AppState>) -> Result<Json<MigrationResponse>> {
    let report = state.feedback.migrate_confirmed().await?;

    Ok(Json(MigrationResponse {
        success: true,
        message: format!("{} predictions migrated", report.migrated),
        migrated: report.migrated,
        delegations: report.delegation_ids,
        retrained: report.retrained,
    }))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_delegation_id(raw: Option<&str>) -> Result<i64> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("delegacion_id is required".to_string()))?;

    raw.parse::<i64>().map_err(|_| {
        AppError::Validation(format!("delegacion_id must be an integer, got '{}'", raw))
    })
}

fn parse_period(raw: Option<&str>) -> Result<Period> {
    match raw {
        None => Ok(Period::Day),
        Some(value) => Period::from_str(value).map_err(|_| {
            AppError::Validation("Invalid period. Use 'day', 'week' or 'month'".to_string())
        }),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", raw))
    })
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("Invalid time '{}', expected HH:MM", raw)))
}

/// First date of the requested period.
///
/// Months accept `YYYY-MM` or a full date and resolve to the first of the
/// month; days and weeks need a full date. A missing date means today.
pub fn resolve_base_date(period: Period, raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match (period, raw.map(str::trim).filter(|s| !s.is_empty())) {
        (Period::Month, None) => Ok(today.with_day(1).unwrap_or(today)),
        (Period::Month, Some(value)) => {
            let first = NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d")
                .or_else(|_| {
                    NaiveDate::parse_from_str(value, "%Y-%m-%d")
                        .map(|date| date.with_day(1).unwrap_or(date))
                })
                .map_err(|_| {
                    AppError::Validation(format!(
                        "Invalid month '{}', expected YYYY-MM",
                        value
                    ))
                })?;
            Ok(first)
        }
        (_, None) => Ok(today),
        (_, Some(value)) => parse_date(value),
    }
}
