//! Common types shared by the forecast-cycle crates.
//!
//! Holds the settings value and its loader, the cycle identity used to
//! correlate raw files, normalized files and database rows, the tile grid of
//! the configured region, and the pipeline error taxonomy.

pub mod bbox;
pub mod config;
pub mod cycle;
pub mod error;
pub mod tile;

pub use bbox::BoundingBox;
pub use config::{
    DatabaseConfig, ImportConfig, ProcessorConfig, RetentionPolicy, ServerConfig, Settings,
    SourceConfig, WeatherConfig,
};
pub use cycle::{latest_cycle, CycleId, CycleStatus, ForecastCycle};
pub use error::{ForecastError, ForecastResult};
pub use tile::TileGrid;
