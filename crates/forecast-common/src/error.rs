//! Error types for the forecast-cycle pipeline.

use thiserror::Error;

/// Result type alias using ForecastError.
pub type ForecastResult<T> = Result<T, ForecastError>;

/// Primary error type for pipeline operations.
///
/// Every variant is fatal to the current invocation. Recovery is the
/// scheduler's job: it re-runs the whole pipeline on its next tick.
#[derive(Debug, Error)]
pub enum ForecastError {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === Stage Errors ===
    #[error("Acquisition failed: {0}")]
    AcquisitionError(String),

    #[error("Processing incomplete: {0}")]
    ProcessingIncomplete(String),

    #[error("Malformed cycle name: '{0}' (expected YYYYMMDDHH or YYYYMMDD_HH)")]
    MalformedCycleName(String),

    #[error("No cycles found in {0}")]
    NoCyclesFound(String),

    #[error("Import failed: {0}")]
    ImportError(String),

    #[error("Import verification failed for cycle {cycle}: {rows} rows, expected at least {floor}")]
    ImportVerificationFailed { cycle: String, rows: u64, floor: u64 },

    #[error("Retention cleanup failed: {0}")]
    RetentionCleanupError(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl ForecastError {
    /// Short, stable name of the error kind, used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::ConfigError(_) => "ConfigError",
            ForecastError::AcquisitionError(_) => "AcquisitionError",
            ForecastError::ProcessingIncomplete(_) => "ProcessingIncomplete",
            ForecastError::MalformedCycleName(_) => "MalformedCycleName",
            ForecastError::NoCyclesFound(_) => "NoCyclesFound",
            ForecastError::ImportError(_) => "ImportError",
            ForecastError::ImportVerificationFailed { .. } => "ImportVerificationFailed",
            ForecastError::RetentionCleanupError(_) => "RetentionCleanupError",
            ForecastError::DatabaseError(_) => "DatabaseError",
            ForecastError::IoError(_) => "IoError",
        }
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        ForecastError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_message_names_cycle_and_floor() {
        let err = ForecastError::ImportVerificationFailed {
            cycle: "20240101_06".to_string(),
            rows: 3,
            floor: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("20240101_06"));
        assert!(msg.contains("100"));
        assert_eq!(err.kind(), "ImportVerificationFailed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ForecastError = io.into();
        assert!(matches!(err, ForecastError::IoError(_)));
    }
}
