//! In-memory forecast table.
//!
//! Same semantics as the PostgreSQL store, keyed by [`RecordKey`]. Used by
//! tests and by dry runs that must not touch the database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use forecast_common::{CycleId, ForecastResult};

use crate::forecast_store::ForecastStore;
use crate::record::{CycleRows, RecordKey, TileForecastRecord};

#[derive(Default)]
pub struct MemoryForecastStore {
    rows: RwLock<BTreeMap<RecordKey, TileForecastRecord>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, in key order.
    pub async fn records(&self) -> Vec<TileForecastRecord> {
        self.rows.read().await.values().cloned().collect()
    }

    async fn delete_where<F>(&self, mut predicate: F) -> u64
    where
        F: FnMut(&RecordKey) -> bool + Send,
    {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|key, _| !predicate(key));
        (before - rows.len()) as u64
    }
}

#[async_trait]
impl ForecastStore for MemoryForecastStore {
    async fn upsert_records(&self, records: &[TileForecastRecord]) -> ForecastResult<u64> {
        let mut rows = self.rows.write().await;
        for record in records {
            rows.insert(record.key(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn count_all(&self) -> ForecastResult<u64> {
        Ok(self.rows.read().await.len() as u64)
    }

    async fn count_cycle(&self, cycle: &CycleId) -> ForecastResult<u64> {
        Ok(self
            .rows
            .read()
            .await
            .keys()
            .filter(|k| k.cycle == *cycle)
            .count() as u64)
    }

    async fn list_cycles(&self) -> ForecastResult<Vec<CycleRows>> {
        let mut counts: BTreeMap<CycleId, u64> = BTreeMap::new();
        for key in self.rows.read().await.keys() {
            *counts.entry(key.cycle).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .rev()
            .map(|(cycle, rows)| CycleRows { cycle, rows })
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> ForecastResult<u64> {
        Ok(self.delete_where(|k| k.forecast_datetime < now).await)
    }

    async fn delete_aged_runs(
        &self,
        cutoff: NaiveDate,
        now: DateTime<Utc>,
    ) -> ForecastResult<u64> {
        Ok(self
            .delete_where(|k| k.cycle.run_date < cutoff && k.forecast_datetime <= now)
            .await)
    }

    async fn delete_cycle(&self, cycle: &CycleId) -> ForecastResult<u64> {
        let cycle = *cycle;
        Ok(self.delete_where(|k| k.cycle == cycle).await)
    }

    async fn delete_all_except(&self, keep: &CycleId) -> ForecastResult<u64> {
        let keep = *keep;
        Ok(self.delete_where(|k| k.cycle != keep).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(cycle: &str, tile: i64, hour: i64) -> TileForecastRecord {
        let cycle = CycleId::parse(cycle).unwrap();
        let dt = cycle.run_time() + Duration::hours(hour);
        let mut r = TileForecastRecord::new(cycle, tile, dt);
        r.variables.insert("t_2m".to_string(), hour as f64);
        r
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryForecastStore::new();
        let batch = vec![record("20240101_00", 1, 0), record("20240101_00", 2, 0)];

        store.upsert_records(&batch).await.unwrap();
        store.upsert_records(&batch).await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_variables() {
        let store = MemoryForecastStore::new();
        let mut r = record("20240101_00", 1, 0);
        store.upsert_records(&[r.clone()]).await.unwrap();

        r.variables.insert("t_2m".to_string(), 99.0);
        store.upsert_records(&[r]).await.unwrap();

        let rows = store.records().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variables["t_2m"], 99.0);
    }

    #[tokio::test]
    async fn test_list_cycles_newest_first() {
        let store = MemoryForecastStore::new();
        store
            .upsert_records(&[
                record("20240101_00", 1, 0),
                record("20240101_06", 1, 0),
                record("20240101_06", 2, 0),
            ])
            .await
            .unwrap();

        let cycles = store.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].cycle.canonical(), "20240101_06");
        assert_eq!(cycles[0].rows, 2);
        assert_eq!(cycles[1].rows, 1);
    }

    #[tokio::test]
    async fn test_delete_expired_is_strict() {
        let store = MemoryForecastStore::new();
        store
            .upsert_records(&[record("20240101_00", 1, 0), record("20240101_00", 1, 3)])
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_except() {
        let store = MemoryForecastStore::new();
        store
            .upsert_records(&[record("20240101_00", 1, 0), record("20240101_06", 1, 0)])
            .await
            .unwrap();

        let keep = CycleId::parse("20240101_06").unwrap();
        assert_eq!(store.delete_all_except(&keep).await.unwrap(), 1);
        assert_eq!(store.count_cycle(&keep).await.unwrap(), 1);
    }
}
