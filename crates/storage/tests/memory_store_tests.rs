//! Retention-related deletes on the in-memory forecast table.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use forecast_common::CycleId;
use storage::{ForecastStore, MemoryForecastStore, TileForecastRecord};

fn record(cycle: &str, tile: i64, valid: chrono::DateTime<Utc>) -> TileForecastRecord {
    let mut r = TileForecastRecord::new(CycleId::parse(cycle).unwrap(), tile, valid);
    r.variables.insert("pmsl".to_string(), 1013.25);
    r
}

// ============================================================================
// delete_aged_runs
// ============================================================================

#[tokio::test]
async fn test_aged_runs_keep_future_rows() {
    let store = MemoryForecastStore::new();
    let now = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();

    store
        .upsert_records(&[
            record("20240101_00", 1, now - Duration::hours(1)),
            record("20240101_00", 1, now),
            record("20240101_00", 1, now + Duration::hours(1)),
            record("20240105_00", 1, now - Duration::hours(1)),
        ])
        .await
        .unwrap();

    let cutoff = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
    let deleted = store.delete_aged_runs(cutoff, now).await.unwrap();

    assert_eq!(deleted, 2);
    let remaining = store.records().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .any(|r| r.cycle.canonical() == "20240101_00" && r.forecast_datetime > now));
    assert!(remaining.iter().any(|r| r.cycle.canonical() == "20240105_00"));
}

// ============================================================================
// delete_cycle
// ============================================================================

#[tokio::test]
async fn test_delete_cycle_ignores_valid_time() {
    let store = MemoryForecastStore::new();
    let far_future = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();

    store
        .upsert_records(&[
            record("20240101_00", 1, far_future),
            record("20240101_00", 2, far_future),
            record("20240101_06", 1, far_future),
        ])
        .await
        .unwrap();

    let stale = CycleId::parse("2024010100").unwrap();
    assert_eq!(store.delete_cycle(&stale).await.unwrap(), 2);
    assert_eq!(store.count_cycle(&stale).await.unwrap(), 0);
    assert_eq!(store.count_all().await.unwrap(), 1);
}
