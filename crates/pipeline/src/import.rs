//! Import stage: load a normalized directory into the forecast table.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use forecast_common::{CycleId, ForecastError, ForecastResult};
use storage::{ForecastStore, TileForecastRecord};

use crate::transform::list_normalized_files;

/// Outcome of importing one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub files: usize,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub records_written: u64,
}

/// Column positions resolved from a header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    tile: usize,
    datetime: usize,
    parameter: usize,
    value: usize,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, String> {
        let names: Vec<String> = split_row(header)
            .into_iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| names.iter().position(|n| n == alias))
                .ok_or_else(|| format!("missing column {}", aliases.join("/")))
        };

        Ok(Self {
            tile: find(&["cell_id", "tile_id"])?,
            datetime: find(&["forecast_datetime"])?,
            parameter: find(&["parameter_name", "parameter"])?,
            value: find(&["value"])?,
        })
    }
}

/// One long-format observation: a single variable of one tile at one time.
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    tile_id: i64,
    forecast_datetime: DateTime<Utc>,
    parameter: String,
    value: f64,
}

fn split_row(line: &str) -> Vec<&str> {
    line.split(',').map(|f| f.trim().trim_matches('"')).collect()
}

/// Parse a forecast timestamp. Offset-less forms are taken as UTC.
pub fn parse_forecast_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_row(line: &str, cols: &Columns) -> Option<Observation> {
    let fields = split_row(line);
    let get = |i: usize| fields.get(i).copied();

    let tile_id = get(cols.tile)?.parse::<i64>().ok()?;
    let forecast_datetime = parse_forecast_datetime(get(cols.datetime)?)?;
    let parameter = get(cols.parameter)?.to_lowercase();
    if parameter.is_empty() {
        return None;
    }
    let value = get(cols.value)?.parse::<f64>().ok().filter(|v| v.is_finite())?;

    Some(Observation {
        tile_id,
        forecast_datetime,
        parameter,
        value,
    })
}

pub struct Importer {
    store: Arc<dyn ForecastStore>,
    batch_size: usize,
}

impl Importer {
    pub fn new(store: Arc<dyn ForecastStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Read every normalized file in `dir`, merge observations into one record
    /// per (tile, forecast time) tagged with `cycle`, and upsert them.
    #[instrument(skip(self, dir), fields(cycle = %cycle, dir = %dir.display()))]
    pub async fn import_cycle(&self, dir: &Path, cycle: &CycleId) -> ForecastResult<ImportSummary> {
        let files = list_normalized_files(dir).await.map_err(|e| {
            ForecastError::ImportError(format!("Cannot read {}: {}", dir.display(), e))
        })?;
        if files.is_empty() {
            return Err(ForecastError::ImportError(format!(
                "no normalized files in {}",
                dir.display()
            )));
        }

        let mut summary = ImportSummary {
            files: files.len(),
            ..Default::default()
        };
        let mut merged: BTreeMap<(i64, DateTime<Utc>), TileForecastRecord> = BTreeMap::new();

        for file in &files {
            let content = fs::read_to_string(file).await.map_err(|e| {
                ForecastError::ImportError(format!("Failed to read {}: {}", file.display(), e))
            })?;

            let mut lines = content.lines().filter(|l| !l.trim().is_empty());
            let header = lines.next().ok_or_else(|| {
                ForecastError::ImportError(format!("{} has no header", file.display()))
            })?;
            let cols = Columns::from_header(header).map_err(|e| {
                ForecastError::ImportError(format!("{}: {}", file.display(), e))
            })?;

            let mut skipped_here = 0u64;
            for line in lines {
                summary.rows_read += 1;
                let Some(obs) = parse_row(line, &cols) else {
                    skipped_here += 1;
                    continue;
                };
                merged
                    .entry((obs.tile_id, obs.forecast_datetime))
                    .or_insert_with(|| {
                        TileForecastRecord::new(*cycle, obs.tile_id, obs.forecast_datetime)
                    })
                    .variables
                    .insert(obs.parameter, obs.value);
            }

            if skipped_here > 0 {
                warn!(file = %file.display(), skipped = skipped_here, "Skipped malformed rows");
            }
            summary.rows_skipped += skipped_here;
            debug!(file = %file.display(), "Parsed normalized file");
        }

        let records: Vec<TileForecastRecord> = merged.into_values().collect();
        for batch in records.chunks(self.batch_size) {
            summary.records_written += self.store.upsert_records(batch).await?;
        }

        info!(
            files = summary.files,
            rows_read = summary.rows_read,
            rows_skipped = summary.rows_skipped,
            records = summary.records_written,
            "Import complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use storage::MemoryForecastStore;

    #[test]
    fn test_header_aliases() {
        let cols = Columns::from_header("tile_id,parameter,forecast_datetime,value").unwrap();
        assert_eq!(
            cols,
            Columns {
                tile: 0,
                datetime: 2,
                parameter: 1,
                value: 3
            }
        );

        let quoted = "\"cell_id\",\"forecast_datetime\",\"parameter_name\",\"value\"";
        let cols = Columns::from_header(quoted).unwrap();
        assert_eq!(cols.tile, 0);
        assert_eq!(cols.parameter, 2);
    }

    #[test]
    fn test_header_missing_column() {
        let err = Columns::from_header("cell_id,forecast_datetime,value").unwrap_err();
        assert!(err.contains("parameter"));
    }

    #[test]
    fn test_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_forecast_datetime("2024-01-01T09:00:00Z"), Some(expected));
        assert_eq!(parse_forecast_datetime("2024-01-01T11:00:00+02:00"), Some(expected));
        assert_eq!(parse_forecast_datetime("2024-01-01T09:00:00"), Some(expected));
        assert_eq!(parse_forecast_datetime("2024-01-01 09:00:00"), Some(expected));
        assert_eq!(parse_forecast_datetime("01/01/2024 09:00"), None);
    }

    #[test]
    fn test_parse_row_lowercases_parameter() {
        let cols = Columns::from_header("cell_id,forecast_datetime,parameter,value").unwrap();
        let obs = parse_row("12,2024-01-01 09:00:00,T_2M,281.5", &cols).unwrap();
        assert_eq!(obs.tile_id, 12);
        assert_eq!(obs.parameter, "t_2m");
        assert_eq!(obs.value, 281.5);

        assert!(parse_row("x,2024-01-01 09:00:00,T_2M,1", &cols).is_none());
        assert!(parse_row("12,yesterday,T_2M,1", &cols).is_none());
        assert!(parse_row("12,2024-01-01 09:00:00,T_2M,NaN", &cols).is_none());
        assert!(parse_row("12,2024-01-01 09:00:00", &cols).is_none());
    }

    #[tokio::test]
    async fn test_import_merges_variables_across_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("t_2m.csv"),
            "cell_id,forecast_datetime,parameter,value\n\
             1,2024-01-01 09:00:00,T_2M,280.0\n\
             2,2024-01-01 09:00:00,T_2M,281.0\n\
             bad,row,here,x\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("pmsl.csv"),
            "cell_id,forecast_datetime,parameter_name,value\n\
             1,2024-01-01T09:00:00Z,pmsl,101300\n",
        )
        .unwrap();

        let store = Arc::new(MemoryForecastStore::new());
        let importer = Importer::new(store.clone(), 1);
        let cycle = CycleId::parse("20240101_06").unwrap();
        let summary = importer.import_cycle(tmp.path(), &cycle).await.unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.records_written, 2);

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].variables.len(), 2);
        assert_eq!(records[0].variables["pmsl"], 101300.0);
        assert_eq!(records[1].variables.len(), 1);
    }

    #[tokio::test]
    async fn test_import_empty_directory_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let importer = Importer::new(Arc::new(MemoryForecastStore::new()), 10);
        let cycle = CycleId::parse("20240101_06").unwrap();
        assert!(matches!(
            importer.import_cycle(tmp.path(), &cycle).await,
            Err(ForecastError::ImportError(_))
        ));
    }

    #[tokio::test]
    async fn test_import_missing_header_column_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.csv"), "cell_id,value\n1,2\n").unwrap();
        let importer = Importer::new(Arc::new(MemoryForecastStore::new()), 10);
        let cycle = CycleId::parse("20240101_06").unwrap();
        assert!(matches!(
            importer.import_cycle(tmp.path(), &cycle).await,
            Err(ForecastError::ImportError(_))
        ));
    }
}
