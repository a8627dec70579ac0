//! Forecast table in PostgreSQL.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use forecast_common::{CycleId, DatabaseConfig, ForecastError, ForecastResult};

use crate::forecast_store::ForecastStore;
use crate::record::{CycleRows, RecordKey, TileForecastRecord};

/// Rows per INSERT statement. Five binds per row keeps this well under
/// PostgreSQL's 65535 bind-parameter limit.
const MAX_ROWS_PER_STATEMENT: usize = 5000;

/// Connection pool and forecast table operations.
pub struct PgForecastStore {
    pool: PgPool,
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> ForecastError + '_ {
    move |e| ForecastError::DatabaseError(format!("{}: {}", context, e))
}

impl PgForecastStore {
    /// Connect using the configured host, credentials and SSL mode.
    pub async fn connect(config: &DatabaseConfig) -> ForecastResult<Self> {
        let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(|e| {
            ForecastError::ConfigError(format!("POSTGRES_SSLMODE '{}': {}", config.ssl_mode, e))
        })?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(db_err("Connection failed"))?;

        info!(url = %config.redacted_url(), "Connected to forecast database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the forecast table and its indexes if missing.
    pub async fn migrate(&self) -> ForecastResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err("Migration failed"))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    async fn upsert_records(&self, records: &[TileForecastRecord]) -> ForecastResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        // ON CONFLICT DO UPDATE cannot touch the same row twice in one
        // statement, so collapse duplicate keys first (last one wins).
        let unique: BTreeMap<RecordKey, &TileForecastRecord> =
            records.iter().map(|r| (r.key(), r)).collect();
        let unique: Vec<&TileForecastRecord> = unique.into_values().collect();

        let mut tx = self.pool.begin().await.map_err(db_err("Begin failed"))?;
        let mut written = 0u64;

        for chunk in unique.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO tile_forecasts \
                 (tile_id, run_date, cycle_hour, forecast_datetime, forecast_data) ",
            );
            qb.push_values(chunk, |mut row, record| {
                row.push_bind(record.tile_id)
                    .push_bind(record.cycle.run_date)
                    .push_bind(record.cycle.cycle_hour as i16)
                    .push_bind(record.forecast_datetime)
                    .push_bind(record.forecast_data());
            });
            qb.push(
                " ON CONFLICT (run_date, cycle_hour, tile_id, forecast_datetime) \
                 DO UPDATE SET forecast_data = EXCLUDED.forecast_data, updated_at = NOW()",
            );

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err("Insert failed"))?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(db_err("Commit failed"))?;
        debug!(rows = written, "Upserted forecast rows");
        Ok(written)
    }

    async fn count_all(&self) -> ForecastResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tile_forecasts")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Count failed"))?;
        Ok(count as u64)
    }

    async fn count_cycle(&self, cycle: &CycleId) -> ForecastResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tile_forecasts WHERE run_date = $1 AND cycle_hour = $2",
        )
        .bind(cycle.run_date)
        .bind(cycle.cycle_hour as i16)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Count failed"))?;
        Ok(count as u64)
    }

    async fn list_cycles(&self) -> ForecastResult<Vec<CycleRows>> {
        let rows: Vec<(NaiveDate, i16, i64)> = sqlx::query_as(
            "SELECT run_date, cycle_hour, COUNT(*) FROM tile_forecasts \
             GROUP BY run_date, cycle_hour \
             ORDER BY run_date DESC, cycle_hour DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query failed"))?;

        rows.into_iter()
            .map(|(run_date, hour, count)| -> ForecastResult<CycleRows> {
                let hour = u8::try_from(hour).map_err(|_| {
                    ForecastError::DatabaseError(format!("cycle_hour out of range: {}", hour))
                })?;
                Ok(CycleRows {
                    cycle: CycleId::new(run_date, hour)?,
                    rows: count as u64,
                })
            })
            .collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> ForecastResult<u64> {
        let result = sqlx::query("DELETE FROM tile_forecasts WHERE forecast_datetime < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err("Delete failed"))?;
        Ok(result.rows_affected())
    }

    async fn delete_aged_runs(
        &self,
        cutoff: NaiveDate,
        now: DateTime<Utc>,
    ) -> ForecastResult<u64> {
        let result = sqlx::query(
            "DELETE FROM tile_forecasts WHERE run_date < $1 AND forecast_datetime <= $2",
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err("Delete failed"))?;
        Ok(result.rows_affected())
    }

    async fn delete_cycle(&self, cycle: &CycleId) -> ForecastResult<u64> {
        let result =
            sqlx::query("DELETE FROM tile_forecasts WHERE run_date = $1 AND cycle_hour = $2")
                .bind(cycle.run_date)
                .bind(cycle.cycle_hour as i16)
                .execute(&self.pool)
                .await
                .map_err(db_err("Delete failed"))?;
        Ok(result.rows_affected())
    }

    async fn delete_all_except(&self, keep: &CycleId) -> ForecastResult<u64> {
        let result = sqlx::query(
            "DELETE FROM tile_forecasts WHERE NOT (run_date = $1 AND cycle_hour = $2)",
        )
        .bind(keep.run_date)
        .bind(keep.cycle_hour as i16)
        .execute(&self.pool)
        .await
        .map_err(db_err("Delete failed"))?;
        Ok(result.rows_affected())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tile_forecasts (
    id BIGSERIAL PRIMARY KEY,
    tile_id BIGINT NOT NULL,
    run_date DATE NOT NULL,
    cycle_hour SMALLINT NOT NULL CHECK (cycle_hour BETWEEN 0 AND 23),
    forecast_datetime TIMESTAMPTZ NOT NULL,
    forecast_data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE(run_date, cycle_hour, tile_id, forecast_datetime)
);

CREATE INDEX IF NOT EXISTS idx_tile_forecasts_forecast_datetime ON tile_forecasts(forecast_datetime);
CREATE INDEX IF NOT EXISTS idx_tile_forecasts_run_date_cycle ON tile_forecasts(run_date, cycle_hour);
CREATE INDEX IF NOT EXISTS idx_tile_forecasts_tile ON tile_forecasts(tile_id, forecast_datetime)
"#;
