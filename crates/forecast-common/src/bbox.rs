//! Geographic bounding box of the configured region.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in degrees (EPSG:4326).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Latitude span in degrees.
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Longitude span in degrees.
    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Check if a point lies inside the box (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Check the box is well-formed: finite, ordered, and within lat/lon range.
    pub fn validate(&self) -> Result<(), BboxError> {
        let values = [self.min_lat, self.max_lat, self.min_lon, self.max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BboxError::NotFinite);
        }
        if self.min_lat >= self.max_lat {
            return Err(BboxError::Inverted("latitude"));
        }
        if self.min_lon >= self.max_lon {
            return Err(BboxError::Inverted("longitude"));
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return Err(BboxError::OutOfRange("latitude"));
        }
        if self.min_lon < -180.0 || self.max_lon > 360.0 {
            return Err(BboxError::OutOfRange("longitude"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BboxError {
    #[error("Bounding box contains a non-finite coordinate")]
    NotFinite,

    #[error("Bounding box {0} minimum is not below its maximum")]
    Inverted(&'static str),

    #[error("Bounding box {0} is out of range")]
    OutOfRange(&'static str),
}
