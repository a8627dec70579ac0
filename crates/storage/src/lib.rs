//! Forecast table storage.
//!
//! Provides:
//! - The [`ForecastStore`] seam used by the import and retention stages
//! - A PostgreSQL implementation backed by sqlx
//! - An in-memory implementation with identical semantics

pub mod forecast_store;
pub mod memory;
pub mod postgres;
pub mod record;

pub use forecast_store::ForecastStore;
pub use memory::MemoryForecastStore;
pub use postgres::PgForecastStore;
pub use record::{CycleRows, RecordKey, TileForecastRecord};
