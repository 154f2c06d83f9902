//! # Error Types
//!
//! Custom error types for the ROV odometer using `thiserror`.

use thiserror::Error;

/// Main error type for the ROV odometer
#[derive(Debug, Error)]
pub enum OdometerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors (side tables, checkpoint, telemetry bodies)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding or decoding errors (ledger, maintenance log)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP transport errors talking to the telemetry source
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No candidate endpoint answered
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// A telemetry message was present but did not have the expected shape
    #[error("Malformed telemetry message: {0}")]
    MalformedMessage(String),

    /// On-disk data could not be mapped onto a known schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Rejected user input (missing field, out-of-range channel, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lookup by id found nothing
    #[error("Not found: {0}")]
    NotFound(String),
}

impl OdometerError {
    /// Whether the error was caused by the caller rather than by the daemon.
    ///
    /// The presentation layer maps these to client errors.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }
}

/// Result type alias for the ROV odometer
pub type Result<T> = std::result::Result<T, OdometerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(OdometerError::InvalidInput("channel".into()).is_client_error());
        assert!(OdometerError::NotFound("record 7".into()).is_client_error());
        assert!(!OdometerError::Schema("bad header".into()).is_client_error());
        assert!(!OdometerError::TelemetryUnavailable("all".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = OdometerError::InvalidInput("event_type is required".into());
        assert_eq!(err.to_string(), "Invalid input: event_type is required");
    }
}
