//! Error types for the exporter.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the local retry storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A file-system operation on a storage record failed.
    #[error("storage I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A batch could not be encoded, or a stored record could not be decoded.
    #[error("failed to encode or decode batch: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` when the record vanished underneath us, which happens
    /// when another reader claimed or deleted it first.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Errors raised while validating [`ExporterOptions`](crate::ExporterOptions).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("instrumentation key is missing (set APPINSIGHTS_INSTRUMENTATIONKEY)")]
    MissingInstrumentationKey,

    #[error("instrumentation key `{0}` is not a valid UUID")]
    InvalidInstrumentationKey(String),

    #[error("invalid duration for `{field}`: {reason}")]
    InvalidDuration {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors a transport reports instead of a classified [`ExportResult`](crate::ExportResult).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Transport-layer error (connection, TLS, HTTP client)
    #[error("network error: {0}")]
    Network(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Transmission timed out
    #[error("transmission timed out")]
    Timeout,
}

/// Errors raised while constructing an exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open retry storage: {0}")]
    Storage(#[from] StorageError),
}
