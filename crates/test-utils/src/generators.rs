//! Generators for normalized CSV content.
//!
//! Output is in the long format the import stage reads: one row per tile,
//! valid time and variable.

use chrono::{DateTime, Duration, Utc};

/// Builder for one normalized CSV file.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use test_utils::NormalizedCsv;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
/// let csv = NormalizedCsv::new()
///     .row(1, start, "T_2M", 280.5)
///     .build();
/// assert_eq!(csv.lines().count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct NormalizedCsv {
    header: String,
    rows: Vec<String>,
}

impl NormalizedCsv {
    pub fn new() -> Self {
        Self::with_header("cell_id,forecast_datetime,parameter,value")
    }

    /// Use a custom header, e.g. with `tile_id` or `parameter_name` columns.
    /// Rows are still written as tile, datetime, parameter, value.
    pub fn with_header(header: &str) -> Self {
        Self {
            header: header.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, tile: i64, at: DateTime<Utc>, parameter: &str, value: f64) -> Self {
        self.rows.push(format!(
            "{},{},{},{}",
            tile,
            at.format("%Y-%m-%d %H:%M:%S"),
            parameter,
            value
        ));
        self
    }

    /// Append a line verbatim.
    pub fn raw_line(mut self, line: &str) -> Self {
        self.rows.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = self.header.clone();
        out.push('\n');
        for row in &self.rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }
}

impl Default for NormalizedCsv {
    fn default() -> Self {
        Self::new()
    }
}

/// A full grid of rows: every tile in `tiles`, hourly from `start` for
/// `hours` steps, for each `(parameter, base_value)`. Values vary with tile
/// and step so rows are distinguishable.
pub fn forecast_grid_csv(
    tiles: std::ops::Range<i64>,
    start: DateTime<Utc>,
    hours: i64,
    parameters: &[(&str, f64)],
) -> String {
    let mut csv = NormalizedCsv::new();
    for tile in tiles {
        for step in 0..hours {
            let at = start + Duration::hours(step);
            for (parameter, base) in parameters {
                csv = csv.row(tile, at, parameter, base + tile as f64 + step as f64 * 0.1);
            }
        }
    }
    csv.build()
}

/// Rows a `forecast_grid_csv` call produces once merged per tile and time.
pub fn grid_record_count(tiles: std::ops::Range<i64>, hours: i64) -> u64 {
    (tiles.end - tiles.start).max(0) as u64 * hours.max(0) as u64
}
