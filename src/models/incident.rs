use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A historical incident as stored in the relational database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    /// Database identifier
    pub id: i64,

    /// Owning delegation
    pub delegation_id: i64,

    /// Incident category
    pub incident_type: String,

    /// Free-text location
    pub location: String,

    /// Calendar date of the incident
    pub date: NaiveDate,

    /// Time of day of the incident
    pub time: NaiveTime,

    /// Risk level reference
    pub risk_level_id: i64,

    /// Where the row came from
    pub origin: IncidentOrigin,
}

/// Origin tag of a historical incident row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentOrigin {
    /// Captured by the ingestion process
    Manual,
    /// Confirmed prediction migrated from the staging table
    Prediccion,
}

/// Raw training input for one historical incident
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub incident_type: String,
    pub location: String,
    pub risk_level_id: i64,
}

impl TrainingRow {
    /// Hour of day (0-23)
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    /// ISO weekday, Monday = 1 through Sunday = 7
    pub fn weekday(&self) -> u32 {
        self.date.weekday().number_from_monday()
    }

    /// Calendar month (1-12)
    pub fn month(&self) -> u32 {
        self.date.month()
    }
}

impl From<&Incident> for TrainingRow {
    fn from(incident: &Incident) -> Self {
        Self {
            date: incident.date,
            time: incident.time,
            incident_type: incident.incident_type.clone(),
            location: incident.location.clone(),
            risk_level_id: incident.risk_level_id,
        }
    }
}

/// Identifier of an incident record in a response payload.
///
/// Recorded incidents carry their numeric database id, synthetic ones a
/// prefixed string such as `pred-48213`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IncidentId {
    Recorded(i64),
    Predicted(String),
}

/// Incident as rendered to API clients, either historical or synthetic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentRecord {
    pub id: IncidentId,

    #[serde(rename = "tipo")]
    pub incident_type: String,

    #[serde(rename = "ubicacion")]
    pub location: String,

    /// Time of day formatted as `HH:MM`
    #[serde(rename = "hora")]
    pub time: String,

    /// Risk level display name
    #[serde(rename = "riesgo")]
    pub risk: String,

    #[serde(rename = "codigo_color")]
    pub color_code: String,

    #[serde(rename = "fecha")]
    pub date: NaiveDate,

    #[serde(rename = "es_prediccion", default, skip_serializing_if = "is_false")]
    pub is_prediction: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl IncidentRecord {
    /// Ordering key used for response payloads
    pub fn sort_key(&self) -> (NaiveDate, &str) {
        (self.date, self.time.as_str())
    }
}

/// Format a time of day the way records expose it
pub fn format_hour_minute(hour: u32, minute: u32) -> String {
    format!("{:02}:{:02}", hour, minute)
}

/// Requested time window for incident queries and forecasts
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Every calendar date covered by this period starting at `base`.
    ///
    /// `Day` is the date itself, `Week` the date plus the six following
    /// days, `Month` every day of the calendar month containing `base`.
    pub fn dates(&self, base: NaiveDate) -> Vec<NaiveDate> {
        let (first, last) = self.window(base);
        first
            .iter_days()
            .take_while(|date| *date <= last)
            .collect()
    }

    /// Inclusive first and last date of the period
    pub fn window(&self, base: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Period::Day => (base, base),
            Period::Week => (base, base + Duration::days(6)),
            Period::Month => {
                let days = days_in_month(base.year(), base.month());
                let first = base.with_day(1).unwrap_or(base);
                (first, first + Duration::days(i64::from(days) - 1))
            }
        }
    }
}

/// Gregorian leap-year rule
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in a calendar month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_day_period_is_single_date() {
        let dates = Period::Day.dates(date("2099-02-01"));
        assert_eq!(dates, vec![date("2099-02-01")]);
    }

    #[test]
    fn test_week_period_spans_seven_days() {
        let dates = Period::Week.dates(date("2030-12-29"));
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], date("2030-12-29"));
        assert_eq!(dates[6], date("2031-01-04"));
    }

    #[test]
    fn test_month_period_handles_leap_years() {
        assert_eq!(Period::Month.dates(date("2028-02-01")).len(), 29);
        assert_eq!(Period::Month.dates(date("2027-02-15")).len(), 28);
        assert_eq!(Period::Month.dates(date("2100-02-01")).len(), 28);
        assert_eq!(Period::Month.dates(date("2000-02-01")).len(), 29);
        assert_eq!(Period::Month.dates(date("2030-04-20")).len(), 30);
        assert_eq!(Period::Month.dates(date("2030-07-31")).len(), 31);
    }

    #[test]
    fn test_month_period_starts_on_first_day() {
        let dates = Period::Month.dates(date("2030-09-17"));
        assert_eq!(dates.first(), Some(&date("2030-09-01")));
        assert_eq!(dates.last(), Some(&date("2030-09-30")));
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!(Period::from_str("day").unwrap(), Period::Day);
        assert_eq!(Period::from_str("week").unwrap(), Period::Week);
        assert_eq!(Period::from_str("month").unwrap(), Period::Month);
        assert!(Period::from_str("year").is_err());
        assert_eq!(Period::Week.to_string(), "week");
    }

    #[test]
    fn test_training_row_uses_iso_weekday() {
        let row = TrainingRow {
            // 2030-06-02 is a Sunday
            date: date("2030-06-02"),
            time: NaiveTime::from_hms_opt(21, 15, 0).unwrap(),
            incident_type: "Robo".to_string(),
            location: "Centro".to_string(),
            risk_level_id: 1,
        };

        assert_eq!(row.weekday(), 7);
        assert_eq!(row.hour(), 21);
        assert_eq!(row.month(), 6);
    }

    #[test]
    fn test_incident_id_serialization() {
        let recorded = serde_json::to_value(IncidentId::Recorded(42)).unwrap();
        let predicted = serde_json::to_value(IncidentId::Predicted("pred-12345".into())).unwrap();

        assert_eq!(recorded, serde_json::json!(42));
        assert_eq!(predicted, serde_json::json!("pred-12345"));
    }

    #[test]
    fn test_historical_record_omits_prediction_flag() {
        let record = IncidentRecord {
            id: IncidentId::Recorded(7),
            incident_type: "Robo".to_string(),
            location: "Centro".to_string(),
            time: format_hour_minute(9, 5),
            risk: "Alto".to_string(),
            color_code: "danger".to_string(),
            date: date("2024-01-10"),
            is_prediction: false,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["hora"], "09:05");
        assert!(json.get("es_prediccion").is_none());
    }
}
