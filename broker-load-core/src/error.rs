//! Error types for the broker load pipeline.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Result alias used across the crate
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised while staging a batch or loading it into the database.
///
/// A load timeout is deliberately absent: timeouts are reported through
/// [`crate::LoadOutcome::Timeout`] and retried by the loader, never raised.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing or invalid configuration. Raised before any I/O happens.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A staging filesystem operation failed.
    #[error("Staging I/O error: {operation} failed for {path}: {source}")]
    StagingIo {
        operation: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// The database rejected the load command (not retried).
    #[error("Load failed for label {label}: {message}")]
    Load {
        label: String,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("Invalid loader state: {0}")]
    InvalidState(String),

    /// A record could not be encoded for staging.
    #[error("Invalid data: {message}")]
    InvalidData { message: String, payload: Vec<u8> },

    /// Unrecoverable infrastructure failure outside the load itself.
    #[error("Fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl ConnectorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn staging_io(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        Self::StagingIo {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn load(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            label: label.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn load_with_source<E>(label: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Load {
            label: label.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn invalid_data(message: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::InvalidData {
            message: message.into(),
            payload,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_staging_io(&self) -> bool {
        matches!(self, Self::StagingIo { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. })
    }

    /// Invalid records are skipped by the connector instead of failing the batch
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, Self::InvalidData { .. })
    }
}
