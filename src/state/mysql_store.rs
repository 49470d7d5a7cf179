//! MySQL-backed incident repository.

use crate::error::Result;
use crate::ml::FrequencyTable;
use crate::models::{
    ConfirmedPrediction, DailyRiskStat, Delegation, IncidentId, IncidentOrigin, IncidentRecord,
    MigrationOutcome, RiskLevel, RiskZone, TrainingRow,
};
use crate::state::IncidentRepository;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

/// Relational store reached through a sqlx connection pool
#[derive(Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

#[derive(sqlx::FromRow)]
struct TrainingRowRecord {
    fecha_incidente: NaiveDate,
    hora_incidente: NaiveTime,
    tipo: String,
    ubicacion: String,
    nivel_riesgo_id: i64,
}

impl From<TrainingRowRecord> for TrainingRow {
    fn from(row: TrainingRowRecord) -> Self {
        TrainingRow {
            date: row.fecha_incidente,
            time: row.hora_incidente,
            incident_type: row.tipo,
            location: row.ubicacion,
            risk_level_id: row.nivel_riesgo_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: i64,
    tipo: String,
    ubicacion: String,
    hora: String,
    riesgo: String,
    codigo_color: String,
    fecha: NaiveDate,
}

impl From<IncidentRow> for IncidentRecord {
    fn from(row: IncidentRow) -> Self {
        IncidentRecord {
            id: IncidentId::Recorded(row.id),
            incident_type: row.tipo,
            location: row.ubicacion,
            time: row.hora,
            risk: row.riesgo,
            color_code: row.codigo_color,
            date: row.fecha,
            is_prediction: false,
        }
    }
}

impl MySqlRepository {
    /// Create a connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to MySQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist
    pub async fn run_migrations(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!("Database schema applied successfully");
        Ok(())
    }

    async fn frequencies(
        &self,
        column: &str,
        delegation_id: i64,
        limit: Option<usize>,
    ) -> Result<FrequencyTable> {
        let mut query = format!(
            "SELECT {column}, COUNT(*) AS total FROM incidentes WHERE delegacion_id = ? \
             GROUP BY {column} ORDER BY total DESC, {column}"
        );
        if let Some(n) = limit {
            query.push_str(&format!(" LIMIT {}", n));
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(&query)
            .bind(delegation_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(FrequencyTable::from_counts(
            rows.into_iter()
                .map(|(value, count)| (value, count.max(0) as u64)),
        ))
    }
}

#[async_trait]
impl IncidentRepository for MySqlRepository {
    async fn get_delegation(&self, id: i64) -> Result<Option<Delegation>> {
        let delegation = sqlx::query_as::<_, Delegation>(
            "SELECT id, nombre FROM delegaciones WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(delegation)
    }

    async fn list_delegations(&self) -> Result<Vec<Delegation>> {
        let delegations =
            sqlx::query_as::<_, Delegation>("SELECT id, nombre FROM delegaciones ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(delegations)
    }

    async fn training_rows(&self, delegation_id: i64, limit: usize) -> Result<Vec<TrainingRow>> {
        let rows = sqlx::query_as::<_, TrainingRowRecord>(
            r#"
            SELECT fecha_incidente, hora_incidente, tipo, ubicacion, nivel_riesgo_id
            FROM incidentes
            WHERE delegacion_id = ?
            ORDER BY fecha_incidente DESC, hora_incidente DESC
            LIMIT ?
            "#,
        )
        .bind(delegation_id)
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrainingRow::from).collect())
    }

    async fn type_frequencies(
        &self,
        delegation_id: i64,
        limit: Option<usize>,
    ) -> Result<FrequencyTable> {
        self.frequencies("tipo", delegation_id, limit).await
    }

    async fn location_frequencies(&self, delegation_id: i64) -> Result<FrequencyTable> {
        self.frequencies("ubicacion", delegation_id, None).await
    }

    async fn distinct_locations(&self, delegation_id: i64, limit: usize) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT ubicacion FROM (
                SELECT DISTINCT ubicacion FROM incidentes WHERE delegacion_id = ?
            ) AS distinct_locations
            ORDER BY RAND()
            LIMIT ?
            "#,
        )
        .bind(delegation_id)
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(location,)| location).collect())
    }

    async fn risk_levels(&self) -> Result<Vec<RiskLevel>> {
        let levels = sqlx::query_as::<_, RiskLevel>(
            "SELECT id, nombre, codigo_color FROM niveles_riesgo ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(levels)
    }

    async fn incidents_between(
        &self,
        delegation_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<IncidentRecord>> {
        let rows = sqlx::query_as::<_, IncidentRow>(
            r#"
            SELECT
                i.id,
                i.tipo,
                i.ubicacion,
                TIME_FORMAT(i.hora_incidente, '%H:%i') AS hora,
                r.nombre AS riesgo,
                r.codigo_color,
                i.fecha_incidente AS fecha
            FROM incidentes i
            JOIN niveles_riesgo r ON i.nivel_riesgo_id = r.id
            WHERE i.delegacion_id = ?
              AND i.fecha_incidente BETWEEN ? AND ?
            ORDER BY i.fecha_incidente, i.hora_incidente
            "#,
        )
        .bind(delegation_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(IncidentRecord::from).collect())
    }

    async fn risk_zones(&self, since: NaiveDate) -> Result<Vec<RiskZone>> {
        let zones = sqlx::query_as::<_, RiskZone>(
            r#"
            SELECT
                d.id,
                d.nombre,
                CAST(ROUND(SUM(CASE WHEN nr.codigo_color = 'danger' THEN 1 ELSE 0 END) / COUNT(i.id) * 100) AS SIGNED) AS red,
                CAST(ROUND(SUM(CASE WHEN nr.codigo_color = 'warning' THEN 1 ELSE 0 END) / COUNT(i.id) * 100) AS SIGNED) AS yellow,
                CAST(ROUND(SUM(CASE WHEN nr.codigo_color = 'success' THEN 1 ELSE 0 END) / COUNT(i.id) * 100) AS SIGNED) AS green,
                COUNT(i.id) AS total
            FROM delegaciones d
            JOIN incidentes i ON d.id = i.delegacion_id
            LEFT JOIN niveles_riesgo nr ON i.nivel_riesgo_id = nr.id
            WHERE i.fecha_incidente >= ?
            GROUP BY d.id, d.nombre
            ORDER BY d.id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(zones)
    }

    async fn historical_stats(
        &self,
        delegation_id: i64,
        since: NaiveDate,
    ) -> Result<Vec<DailyRiskStat>> {
        let stats = sqlx::query_as::<_, DailyRiskStat>(
            r#"
            SELECT
                i.fecha_incidente AS fecha,
                r.nombre AS riesgo,
                r.codigo_color,
                COUNT(*) AS total
            FROM incidentes i
            JOIN niveles_riesgo r ON i.nivel_riesgo_id = r.id
            WHERE i.delegacion_id = ?
              AND i.fecha_incidente >= ?
            GROUP BY i.fecha_incidente, r.id, r.nombre, r.codigo_color
            ORDER BY i.fecha_incidente, r.id
            "#,
        )
        .bind(delegation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn record_confirmed_prediction(&self, prediction: &ConfirmedPrediction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO predicciones_confirmadas (
                incidente_original_id, delegacion_id, tipo, ubicacion,
                fecha_incidente, hora_incidente, nivel_riesgo_id, confirmado
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prediction.prediction_id)
        .bind(prediction.delegation_id)
        .bind(&prediction.incident_type)
        .bind(&prediction.location)
        .bind(prediction.date)
        .bind(prediction.time)
        .bind(prediction.risk_level_id)
        .bind(prediction.confirmed)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            prediction_id = %prediction.prediction_id,
            delegation_id = prediction.delegation_id,
            "Confirmed prediction staged"
        );
        Ok(())
    }

    async fn migrate_confirmed_predictions(&self) -> Result<MigrationOutcome> {
        let mut tx = self.pool.begin().await?;

        let pending: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, delegacion_id
            FROM predicciones_confirmadas
            WHERE confirmado = TRUE AND migrado = FALSE
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        if pending.is_empty() {
            tx.commit().await?;
            return Ok(MigrationOutcome::default());
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO incidentes (
                delegacion_id, tipo, ubicacion, fecha_incidente,
                hora_incidente, nivel_riesgo_id, origen
            )
            SELECT
                delegacion_id, tipo, ubicacion, fecha_incidente,
                hora_incidente, nivel_riesgo_id, ?
            FROM predicciones_confirmadas
            WHERE confirmado = TRUE AND migrado = FALSE
            "#,
        )
        .bind(IncidentOrigin::Prediccion.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE predicciones_confirmadas SET migrado = TRUE WHERE confirmado = TRUE AND migrado = FALSE",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut delegation_ids: Vec<i64> = pending.into_iter().map(|(_, id)| id).collect();
        delegation_ids.sort_unstable();
        delegation_ids.dedup();

        tracing::info!(
            migrated = inserted,
            delegations = delegation_ids.len(),
            "Confirmed predictions migrated"
        );

        Ok(MigrationOutcome {
            migrated: inserted,
            delegation_ids,
        })
    }
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Delegations
CREATE TABLE IF NOT EXISTS delegaciones (
    id BIGINT PRIMARY KEY AUTO_INCREMENT,
    nombre VARCHAR(255) NOT NULL
);

-- Risk levels
CREATE TABLE IF NOT EXISTS niveles_riesgo (
    id BIGINT PRIMARY KEY,
    nombre VARCHAR(50) NOT NULL,
    codigo_color VARCHAR(20) NOT NULL
);

-- Historical incidents
CREATE TABLE IF NOT EXISTS incidentes (
    id BIGINT PRIMARY KEY AUTO_INCREMENT,
    delegacion_id BIGINT NOT NULL,
    tipo VARCHAR(255) NOT NULL,
    ubicacion VARCHAR(255) NOT NULL,
    fecha_incidente DATE NOT NULL,
    hora_incidente TIME NOT NULL,
    nivel_riesgo_id BIGINT NOT NULL,
    origen VARCHAR(32) NOT NULL DEFAULT 'manual',
    INDEX idx_incidentes_delegacion_fecha (delegacion_id, fecha_incidente, hora_incidente),
    FOREIGN KEY (delegacion_id) REFERENCES delegaciones(id),
    FOREIGN KEY (nivel_riesgo_id) REFERENCES niveles_riesgo(id)
);

-- Confirmed predictions awaiting migration
CREATE TABLE IF NOT EXISTS predicciones_confirmadas (
    id BIGINT PRIMARY KEY AUTO_INCREMENT,
    incidente_original_id VARCHAR(64) NOT NULL,
    delegacion_id BIGINT NOT NULL,
    tipo VARCHAR(255) NOT NULL,
    ubicacion VARCHAR(255) NOT NULL,
    fecha_incidente DATE NOT NULL,
    hora_incidente TIME NOT NULL,
    nivel_riesgo_id BIGINT NOT NULL,
    confirmado BOOLEAN NOT NULL DEFAULT TRUE,
    migrado BOOLEAN NOT NULL DEFAULT FALSE,
    creado_en TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    INDEX idx_predicciones_pendientes (confirmado, migrado)
);
"#;
