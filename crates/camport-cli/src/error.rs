//! Errors reported by the command line tool.

use std::path::PathBuf;

use thiserror::Error;

use crate::logging::LoggingError;

/// Result alias for CLI operations.
pub type CliResult<T> = std::result::Result<T, CliError>;

/// Top-level CLI error.
#[derive(Debug, Error)]
pub enum CliError {
    /// Error from the core library.
    #[error(transparent)]
    Core(#[from] camport_core::Error),

    /// Logging could not be set up.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// The device did not accept the connection.
    #[error("Could not connect to {}", .0.display())]
    ConnectionFailed(PathBuf),

    /// The worker thread stopped sending events.
    #[error("Device worker stopped unexpectedly")]
    WorkerGone,

    /// Local file operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Output could not be serialized.
    #[error("Failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Some files could not be processed.
    #[error("{failed} of {total} files failed")]
    Partial {
        /// Files that failed.
        failed: usize,
        /// Files attempted.
        total: usize,
    },
}
