//! Error types for the telemetry registry.

use thiserror::Error;

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Error types for registry, collector and export operations
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Operation on a metric name that was never registered
    #[error("Metric not found: {0}")]
    NotFound(String),

    /// Re-registration of a name while the duplicate policy rejects it
    #[error("Metric already registered: {0}")]
    DuplicateMetric(String),

    /// Snapshot encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Periodic collector started twice
    #[error("Task already running: {0}")]
    AlreadyRunning(String),

    /// Periodic collector stopped while idle
    #[error("Task not running: {0}")]
    NotRunning(String),

    /// Export destination rejected the payload
    #[error("Export error: {0}")]
    Export(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A monitor failed to collect its samples
    #[error("Collection error: {0}")]
    Collection(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TelemetryError {
    /// True for errors a caller can resolve by registering the metric first
    pub fn is_not_found(&self) -> bool {
        matches!(self, TelemetryError::NotFound(_))
    }
}
