//! Cycle name resolution across both on-disk naming conventions.

use chrono::NaiveDate;
use forecast_common::{latest_cycle, CycleId, ForecastError};

// ============================================================================
// Canonical identity
// ============================================================================

#[test]
fn test_every_hour_resolves_identically_in_both_forms() {
    for hour in 0..24u8 {
        let compact = format!("20240229{:02}", hour);
        let separated = format!("20240229_{:02}", hour);

        let a = CycleId::parse(&compact).unwrap();
        let b = CycleId::parse(&separated).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.run_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(a.cycle_hour, hour);
        assert_eq!(a.canonical(), separated);
        assert_eq!(b.compact(), compact);
    }
}

#[test]
fn test_canonical_string_reparses_to_same_identity() {
    let id = CycleId::parse("2023123118").unwrap();
    assert_eq!(CycleId::parse(&id.canonical()).unwrap(), id);
}

// ============================================================================
// Rejection
// ============================================================================

#[test]
fn test_underscore_only_after_eighth_digit() {
    for name in ["2024_010106", "202401_0106", "2024010106_", "_2024010106"] {
        assert!(matches!(
            CycleId::parse(name),
            Err(ForecastError::MalformedCycleName(_))
        ));
    }
}

#[test]
fn test_non_ascii_digits_rejected() {
    assert!(CycleId::parse("２０２４０１０１０６").is_err());
}

// ============================================================================
// Latest cycle selection
// ============================================================================

#[test]
fn test_latest_prefers_newer_date_over_higher_hour() {
    let names = vec!["20240101_18".to_string(), "20240102_00".to_string()];
    assert_eq!(latest_cycle(&names).unwrap().canonical(), "20240102_00");
}

#[test]
fn test_latest_ignores_unrelated_names() {
    let names = ["normalized", "tmp", "2024010106"];
    assert_eq!(latest_cycle(&names).unwrap().canonical(), "20240101_06");
}

#[test]
fn test_latest_with_only_unrelated_names() {
    let names = ["normalized", "tmp"];
    assert!(matches!(
        latest_cycle(&names),
        Err(ForecastError::NoCyclesFound(_))
    ));
}
