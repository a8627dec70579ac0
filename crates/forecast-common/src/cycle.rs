//! Forecast cycle identity.
//!
//! Cycle directories come in two naming conventions, compact `YYYYMMDDHH`
//! and separated `YYYYMMDD_HH`. Both resolve to the same [`CycleId`], and
//! the separated form is the canonical string used for correlation between
//! the raw tree, the normalized tree and the forecast table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Identity of one model run.
///
/// Field order matters: the derived `Ord` sorts by run date, then hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId {
    pub run_date: NaiveDate,
    pub cycle_hour: u8,
}

impl CycleId {
    /// Build a cycle from its parts, rejecting hours outside 0..=23.
    pub fn new(run_date: NaiveDate, cycle_hour: u8) -> ForecastResult<Self> {
        if cycle_hour > 23 {
            return Err(ForecastError::MalformedCycleName(format!(
                "{}_{:02}",
                run_date.format("%Y%m%d"),
                cycle_hour
            )));
        }
        Ok(Self {
            run_date,
            cycle_hour,
        })
    }

    /// Parse a directory name in either accepted form.
    pub fn parse(name: &str) -> ForecastResult<Self> {
        let malformed = || ForecastError::MalformedCycleName(name.to_string());

        if !name.is_ascii() {
            return Err(malformed());
        }

        let bytes = name.as_bytes();
        let (date_part, hour_part) = match bytes.len() {
            10 => (&name[..8], &name[8..]),
            11 if bytes[8] == b'_' => (&name[..8], &name[9..]),
            _ => return Err(malformed()),
        };

        if !date_part.bytes().all(|b| b.is_ascii_digit())
            || !hour_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }

        let run_date = NaiveDate::parse_from_str(date_part, "%Y%m%d").map_err(|_| malformed())?;
        let cycle_hour: u8 = hour_part.parse().map_err(|_| malformed())?;
        if cycle_hour > 23 {
            return Err(malformed());
        }

        Ok(Self {
            run_date,
            cycle_hour,
        })
    }

    /// The most recent run at or before `reference`, with run hours aligned to
    /// multiples of `cycle_hours`.
    pub fn at_or_before(reference: DateTime<Utc>, cycle_hours: u32) -> Self {
        let step = cycle_hours.clamp(1, 24);
        let hour = (reference.hour() / step) * step;
        Self {
            run_date: reference.date_naive(),
            cycle_hour: hour as u8,
        }
    }

    /// Canonical separated form, `YYYYMMDD_HH`.
    pub fn canonical(&self) -> String {
        format!("{}_{:02}", self.run_date.format("%Y%m%d"), self.cycle_hour)
    }

    /// Compact form, `YYYYMMDDHH`.
    pub fn compact(&self) -> String {
        format!("{}{:02}", self.run_date.format("%Y%m%d"), self.cycle_hour)
    }

    /// Wall-clock instant the run was initialised.
    pub fn run_time(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.run_date.and_time(NaiveTime::MIN))
            + Duration::hours(self.cycle_hour as i64)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for CycleId {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CycleId::parse(s)
    }
}

/// Select the most recent cycle from a set of directory names.
///
/// Names that are not cycle names are ignored. Ordering is by identity, so
/// a compact and a separated name compare correctly with each other.
pub fn latest_cycle<S: AsRef<str>>(names: &[S]) -> ForecastResult<CycleId> {
    let mut cycles: Vec<CycleId> = names
        .iter()
        .filter_map(|n| CycleId::parse(n.as_ref()).ok())
        .collect();

    cycles.sort_unstable_by(|a, b| b.cmp(a));

    cycles
        .first()
        .copied()
        .ok_or_else(|| ForecastError::NoCyclesFound(format!("{} candidate names", names.len())))
}

/// Lifecycle of a cycle. Stages only ever move a cycle forward; retention
/// can purge a cycle from any earlier status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Downloaded,
    Processed,
    Imported,
    Verified,
    Purged,
}

impl CycleStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CycleStatus::Downloaded => "downloaded",
            CycleStatus::Processed => "processed",
            CycleStatus::Imported => "imported",
            CycleStatus::Verified => "verified",
            CycleStatus::Purged => "purged",
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cycle together with how far it has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastCycle {
    pub id: CycleId,
    pub status: CycleStatus,
}

impl ForecastCycle {
    pub fn new(id: CycleId, status: CycleStatus) -> Self {
        Self { id, status }
    }

    /// Move to `next` if it is later in the lifecycle. Returns whether the
    /// status changed.
    pub fn advance(&mut self, next: CycleStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Mark the cycle as removed by retention.
    pub fn purge(&mut self) {
        self.status = CycleStatus::Purged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_compact() {
        let id = CycleId::parse("2024010106").unwrap();
        assert_eq!(id.run_date, date(2024, 1, 1));
        assert_eq!(id.cycle_hour, 6);
    }

    #[test]
    fn test_parse_separated() {
        let id = CycleId::parse("20240101_06").unwrap();
        assert_eq!(id.run_date, date(2024, 1, 1));
        assert_eq!(id.cycle_hour, 6);
    }

    #[test]
    fn test_both_forms_are_same_identity() {
        let a = CycleId::parse("2024010106").unwrap();
        let b = CycleId::parse("20240101_06").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "20240101_06");
        assert_eq!(b.compact(), "2024010106");
    }

    #[test]
    fn test_rejects_malformed() {
        for name in [
            "",
            "202401010",
            "20240101066",
            "2024010_106",
            "20240101-06",
            "2024o10106",
            "20240101_6",
            "20240101__06",
            "2024010124",
            "20241301_00",
            "20240230_00",
            "normalized",
        ] {
            let err = CycleId::parse(name).unwrap_err();
            assert!(
                matches!(err, ForecastError::MalformedCycleName(_)),
                "expected MalformedCycleName for {:?}",
                name
            );
        }
    }

    #[test]
    fn test_ordering_by_date_then_hour() {
        let a = CycleId::parse("20240101_18").unwrap();
        let b = CycleId::parse("20240102_00").unwrap();
        let c = CycleId::parse("20240102_06").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_latest_cycle_mixed_forms() {
        let names = ["20240101_12", "2024010118", "20240101_06", "normalized"];
        let latest = latest_cycle(&names).unwrap();
        assert_eq!(latest.canonical(), "20240101_18");
    }

    #[test]
    fn test_latest_cycle_empty() {
        let names: [&str; 0] = [];
        assert!(matches!(
            latest_cycle(&names),
            Err(ForecastError::NoCyclesFound(_))
        ));
    }

    #[test]
    fn test_at_or_before_floors_hour() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 17, 42, 0).unwrap();
        let id = CycleId::at_or_before(t, 6);
        assert_eq!(id.canonical(), "20240305_12");

        let id3 = CycleId::at_or_before(t, 3);
        assert_eq!(id3.cycle_hour, 15);
    }

    #[test]
    fn test_run_time() {
        let id = CycleId::parse("20240101_06").unwrap();
        assert_eq!(
            id.run_time(),
            Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_from_str_and_display() {
        let id: CycleId = "2024123118".parse().unwrap();
        assert_eq!(id.to_string(), "20241231_18");
    }

    #[test]
    fn test_status_only_moves_forward() {
        let id = CycleId::parse("20240101_06").unwrap();
        let mut cycle = ForecastCycle::new(id, CycleStatus::Downloaded);

        assert!(cycle.advance(CycleStatus::Imported));
        assert!(!cycle.advance(CycleStatus::Processed));
        assert_eq!(cycle.status, CycleStatus::Imported);

        cycle.purge();
        assert_eq!(cycle.status, CycleStatus::Purged);
        assert!(!cycle.advance(CycleStatus::Verified));
        assert_eq!(cycle.status.to_string(), "purged");
    }
}
