//! Forecast table rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forecast_common::CycleId;

/// Unique identity of a forecast row.
///
/// Field order gives the natural sort: cycle, then tile, then valid time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub cycle: CycleId,
    pub tile_id: i64,
    pub forecast_datetime: DateTime<Utc>,
}

/// One tile's forecast for one valid time, from one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileForecastRecord {
    pub cycle: CycleId,
    pub tile_id: i64,
    /// Time the prediction describes, not the run time
    pub forecast_datetime: DateTime<Utc>,
    /// Variable name to value, e.g. `t_2m`
    pub variables: BTreeMap<String, f64>,
}

impl TileForecastRecord {
    pub fn new(cycle: CycleId, tile_id: i64, forecast_datetime: DateTime<Utc>) -> Self {
        Self {
            cycle,
            tile_id,
            forecast_datetime,
            variables: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            cycle: self.cycle,
            tile_id: self.tile_id,
            forecast_datetime: self.forecast_datetime,
        }
    }

    /// Variables as the JSON object stored in `forecast_data`.
    pub fn forecast_data(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.variables
                .iter()
                .filter_map(|(k, v)| {
                    serde_json::Number::from_f64(*v)
                        .map(|n| (k.clone(), serde_json::Value::Number(n)))
                })
                .collect(),
        )
    }
}

/// Row count of one cycle in the forecast table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleRows {
    pub cycle: CycleId,
    pub rows: u64,
}
