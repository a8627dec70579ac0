//! Process-wide settings and the loader that builds them.
//!
//! Settings are read from the environment exactly once, in the binary, via
//! [`Settings::from_env`]. Everything downstream receives the built value by
//! argument. [`Settings::from_lookup`] takes any key lookup so tests can
//! supply a map instead of touching the process environment.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{ForecastError, ForecastResult};
use crate::tile::TileGrid;

/// Complete, immutable settings for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub weather: WeatherConfig,
    pub source: SourceConfig,
    pub processor: ProcessorConfig,
    pub retention: RetentionPolicy,
    pub import: ImportConfig,
}

/// Relational store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode={}",
            self.user, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

/// Weather model and region settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub model: String,
    /// Grid resolution in degrees
    pub resolution: f64,
    /// Hours between model runs
    pub update_cycle_hours: u32,
    pub region: String,
    pub bbox: BoundingBox,
}

impl WeatherConfig {
    /// Tile grid covering the region at the model resolution.
    pub fn tile_grid(&self) -> ForecastResult<TileGrid> {
        TileGrid::new(self.bbox, self.resolution).ok_or_else(|| {
            ForecastError::ConfigError(format!(
                "WEATHER_RESOLUTION must be positive, got {}",
                self.resolution
            ))
        })
    }
}

/// Raw-tile source settings used by the acquisition adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// Lower-case variable names as published by the source
    pub variables: Vec<String>,
    /// Hours after run time before a cycle is published
    pub delay_hours: u32,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    /// Last forecast step published hourly
    pub hourly_until: u32,
    /// Last forecast step
    pub max_step: u32,
    /// Step spacing after `hourly_until`
    pub coarse_step: u32,
}

impl SourceConfig {
    /// Forecast steps to fetch: hourly, then coarse.
    pub fn forecast_steps(&self) -> Vec<u32> {
        let hourly_end = self.hourly_until.min(self.max_step);
        let mut steps: Vec<u32> = (0..=hourly_end).collect();
        let coarse = self.coarse_step.max(1) as usize;
        steps.extend((hourly_end + coarse as u32..=self.max_step).step_by(coarse));
        steps
    }
}

/// External tile-normalization processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Command template; `{raw_dir}`, `{output_dir}`, `{cycle}` and
    /// `{data_root}` are substituted per run.
    pub command: String,
}

/// Retention settings, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Cycles kept on disk
    pub max_cycles: usize,
    /// Also delete database rows of cycles removed from disk
    pub db_cleanup: bool,
    /// Keep only the latest completed cycle in the database
    pub keep_latest_only: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_cycles: 2,
            db_cleanup: true,
            keep_latest_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub batch_size: usize,
    /// Sanity floor for the forecast table row count after import
    pub min_rows: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            min_rows: 1,
        }
    }
}

const SSL_MODES: &[&str] = &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

pub const DEFAULT_PROCESSOR_COMMAND: &str =
    "python3 processor.py --input {raw_dir} --output {output_dir} --cycle {cycle}";

pub const DEFAULT_VARIABLES: &str = "t_2m,relhum_2m,u_10m,v_10m,pmsl,tot_prec,clct";

/// Key lookup with documented defaults. Empty values count as unset.
struct Source<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> ForecastResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e| {
                ForecastError::ConfigError(format!("{} has invalid value '{}': {}", key, v, e))
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> ForecastResult<bool> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => match v.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ForecastError::ConfigError(format!(
                    "{} has invalid boolean '{}'",
                    key, v
                ))),
            },
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> ForecastResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, then validate them.
    pub fn from_lookup<F>(lookup: F) -> ForecastResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source { lookup };

        let database = DatabaseConfig {
            host: src.string("POSTGRES_HOST", "localhost"),
            port: src.parsed("POSTGRES_PORT", 5432)?,
            user: src.string("POSTGRES_USER", "kairos"),
            password: src.string("POSTGRES_PASSWORD", ""),
            name: src.string("POSTGRES_DB", "kairosdb"),
            ssl_mode: src.string("POSTGRES_SSLMODE", "disable").to_lowercase(),
            max_connections: src.parsed("DB_MAX_CONNECTIONS", 5)?,
        };

        let server = ServerConfig {
            port: src.parsed("SERVER_PORT", 8080)?,
        };

        let weather = WeatherConfig {
            model: src.string("WEATHER_MODEL", "ICON-EU"),
            resolution: src.parsed("WEATHER_RESOLUTION", 0.0625)?,
            update_cycle_hours: src.parsed("WEATHER_UPDATE_CYCLE", 6)?,
            region: src.string("WEATHER_REGION", "Greece"),
            bbox: BoundingBox::new(
                src.parsed("REGION_MIN_LAT", 34.0)?,
                src.parsed("REGION_MAX_LAT", 42.0)?,
                src.parsed("REGION_MIN_LON", 19.0)?,
                src.parsed("REGION_MAX_LON", 30.0)?,
            ),
        };

        let source = SourceConfig {
            base_url: src
                .string(
                    "SOURCE_BASE_URL",
                    "https://opendata.dwd.de/weather/nwp/icon-eu/grib",
                )
                .trim_end_matches('/')
                .to_string(),
            variables: src
                .string("SOURCE_VARIABLES", DEFAULT_VARIABLES)
                .split(',')
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
            delay_hours: src.parsed("SOURCE_DELAY_HOURS", 3)?,
            max_concurrent: src.parsed("SOURCE_MAX_CONCURRENT", 4)?,
            timeout_secs: src.parsed("SOURCE_TIMEOUT_SECS", 300)?,
            hourly_until: src.parsed("SOURCE_HOURLY_UNTIL", 78)?,
            max_step: src.parsed("SOURCE_MAX_STEP", 120)?,
            coarse_step: src.parsed("SOURCE_COARSE_STEP", 3)?,
        };

        let processor = ProcessorConfig {
            command: src.string("PROCESSOR_COMMAND", DEFAULT_PROCESSOR_COMMAND),
        };

        let retention = RetentionPolicy {
            max_cycles: src.parsed("RETENTION_MAX_CYCLES", 2)?,
            db_cleanup: src.flag("RETENTION_DB_CLEANUP", true)?,
            keep_latest_only: src.flag("RETENTION_KEEP_LATEST_ONLY", false)?,
        };

        let import = ImportConfig {
            batch_size: src.parsed("IMPORT_BATCH_SIZE", 500)?,
            min_rows: src.parsed("IMPORT_MIN_ROWS", 1)?,
        };

        let settings = Self {
            database,
            server,
            weather,
            source,
            processor,
            retention,
            import,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make a run meaningless or unsafe.
    pub fn validate(&self) -> ForecastResult<()> {
        let invalid = |msg: String| Err(ForecastError::ConfigError(msg));

        if !SSL_MODES.contains(&self.database.ssl_mode.as_str()) {
            return invalid(format!(
                "POSTGRES_SSLMODE must be one of {:?}, got '{}'",
                SSL_MODES, self.database.ssl_mode
            ));
        }
        if self.database.max_connections == 0 {
            return invalid("DB_MAX_CONNECTIONS must be at least 1".to_string());
        }

        self.weather
            .bbox
            .validate()
            .map_err(|e| ForecastError::ConfigError(e.to_string()))?;
        self.weather.tile_grid()?;

        let hours = self.weather.update_cycle_hours;
        if hours == 0 || hours > 24 || 24 % hours != 0 {
            return invalid(format!(
                "WEATHER_UPDATE_CYCLE must divide 24, got {}",
                hours
            ));
        }

        if self.source.variables.is_empty() {
            return invalid("SOURCE_VARIABLES must name at least one variable".to_string());
        }
        if self.source.max_concurrent == 0 {
            return invalid("SOURCE_MAX_CONCURRENT must be at least 1".to_string());
        }
        if self.source.coarse_step == 0 {
            return invalid("SOURCE_COARSE_STEP must be at least 1".to_string());
        }

        if self.processor.command.split_whitespace().next().is_none() {
            return invalid("PROCESSOR_COMMAND must not be empty".to_string());
        }

        if self.retention.max_cycles == 0 {
            return invalid("RETENTION_MAX_CYCLES must be at least 1".to_string());
        }
        if self.import.batch_size == 0 {
            return invalid("IMPORT_BATCH_SIZE must be at least 1".to_string());
        }

        Ok(())
    }
}
