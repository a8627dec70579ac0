//! The forecast table seam.
//!
//! Stages talk to the relational store only through [`ForecastStore`], so a
//! run can be exercised against [`crate::MemoryForecastStore`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use forecast_common::{CycleId, ForecastResult};

use crate::record::{CycleRows, TileForecastRecord};

#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Conflict-tolerant bulk write. Rows are keyed by
    /// (run_date, cycle_hour, tile_id, forecast_datetime); an existing row
    /// has its variables replaced. Returns the number of rows written.
    async fn upsert_records(&self, records: &[TileForecastRecord]) -> ForecastResult<u64>;

    /// Total rows in the forecast table.
    async fn count_all(&self) -> ForecastResult<u64>;

    /// Rows belonging to one cycle.
    async fn count_cycle(&self, cycle: &CycleId) -> ForecastResult<u64>;

    /// Distinct cycles present, newest first, with their row counts.
    async fn list_cycles(&self) -> ForecastResult<Vec<CycleRows>>;

    /// Delete rows whose forecast_datetime is strictly before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> ForecastResult<u64>;

    /// Delete rows of runs dated before `cutoff` whose forecast_datetime is
    /// not strictly after `now`.
    async fn delete_aged_runs(&self, cutoff: NaiveDate, now: DateTime<Utc>)
        -> ForecastResult<u64>;

    /// Delete every row of one cycle regardless of forecast_datetime.
    async fn delete_cycle(&self, cycle: &CycleId) -> ForecastResult<u64>;

    /// Delete every row not belonging to `keep`.
    async fn delete_all_except(&self, keep: &CycleId) -> ForecastResult<u64>;
}
