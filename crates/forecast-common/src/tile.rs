//! Regular tile grid over the configured region.
//!
//! Tiles are numbered row-major starting at the south-west corner. Both
//! edges of the box are grid lines, so a 1 degree box at 0.5 degree
//! resolution has 3 x 3 tiles.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// Tolerance for snapping coordinates onto grid lines.
const SNAP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub bbox: BoundingBox,
    pub resolution: f64,
    pub rows: u32,
    pub cols: u32,
}

impl TileGrid {
    /// Build the grid, or `None` if the resolution is not positive.
    pub fn new(bbox: BoundingBox, resolution: f64) -> Option<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return None;
        }
        let rows = (bbox.lat_span() / resolution + SNAP_EPSILON).floor() as u32 + 1;
        let cols = (bbox.lon_span() / resolution + SNAP_EPSILON).floor() as u32 + 1;
        Some(Self {
            bbox,
            resolution,
            rows,
            cols,
        })
    }

    pub fn tile_count(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    /// Tile containing the nearest grid point, or `None` outside the box.
    pub fn tile_id(&self, lat: f64, lon: f64) -> Option<u64> {
        if !self.bbox.contains(lat, lon) {
            return None;
        }
        let row = ((lat - self.bbox.min_lat) / self.resolution).round() as u64;
        let col = ((lon - self.bbox.min_lon) / self.resolution).round() as u64;
        let row = row.min(self.rows as u64 - 1);
        let col = col.min(self.cols as u64 - 1);
        Some(row * self.cols as u64 + col)
    }

    /// Grid point (lat, lon) of a tile.
    pub fn tile_center(&self, id: u64) -> Option<(f64, f64)> {
        if id >= self.tile_count() {
            return None;
        }
        let row = id / self.cols as u64;
        let col = id % self.cols as u64;
        Some((
            self.bbox.min_lat + row as f64 * self.resolution,
            self.bbox.min_lon + col as f64 * self.resolution,
        ))
    }
}
