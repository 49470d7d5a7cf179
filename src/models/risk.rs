use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Categorical severity label carrying a display color code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct RiskLevel {
    pub id: i64,

    #[serde(rename = "nombre")]
    #[sqlx(rename = "nombre")]
    pub name: String,

    /// Ordinal severity proxy such as `danger`, `warning` or `success`
    #[serde(rename = "codigo_color")]
    #[sqlx(rename = "codigo_color")]
    pub color_code: String,
}

impl RiskLevel {
    pub fn new(id: i64, name: impl Into<String>, color_code: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color_code: color_code.into(),
        }
    }
}

/// Share of incidents per color band for a delegation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct RiskZone {
    pub id: i64,
    pub nombre: String,
    /// Percentage of `danger` incidents
    pub red: i64,
    /// Percentage of `warning` incidents
    pub yellow: i64,
    /// Percentage of `success` incidents
    pub green: i64,
    pub total: i64,
}

/// Number of incidents recorded on one day for one risk level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct DailyRiskStat {
    pub fecha: NaiveDate,
    pub riesgo: String,
    pub codigo_color: String,
    pub total: i64,
}

/// Round a share to a whole percentage the way the zone report does
pub fn percentage(part: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(5, 5), 100);
    }
}
