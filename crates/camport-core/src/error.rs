//! Error types for Camport core operations.
//!
//! Errors are grouped by domain:
//! - [`DeviceError`] for failures reported by (or about) the capture device
//! - [`FileSystemError`] for local file operations on temp and destination files
//! - [`ConversionError`] for the lossless re-encode and RAW container stages
//! - [`ScriptError`] for the external post-process script
//!
//! Every backend capability returns [`Result`]; an `Err` is what the worker
//! treats as a failed device call.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a device backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The backend has not been connected yet, or the connection was lost.
    #[error("Device not connected: {name}")]
    NotConnected {
        /// Device title or path.
        name: String,
    },

    /// No backend exists for the requested driver.
    #[error("Unsupported device driver: {driver}")]
    UnsupportedDriver {
        /// Driver identifier (e.g. "ptp").
        driver: String,
    },

    /// The backend does not implement this capability.
    #[error("Operation not supported by device: {operation}")]
    Unsupported {
        /// Name of the capability.
        operation: &'static str,
    },

    /// The item does not exist on the device.
    #[error("Item not found on device: {folder}{file}")]
    ItemNotFound {
        /// Folder on the device.
        folder: String,
        /// File name inside the folder.
        file: String,
    },

    /// The device reported a failure.
    #[error("Device operation '{operation}' failed: {reason}")]
    OperationFailed {
        /// Name of the capability.
        operation: &'static str,
        /// Failure details.
        reason: String,
    },

    /// The operation was interrupted through the cancel token.
    #[error("Device operation cancelled")]
    Cancelled,
}

/// Errors raised by local file operations.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Reading a file or directory failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path that could not be read.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Writing a file failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path that could not be written.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Creating a directory or a temp file failed.
    #[error("Failed to create {path}: {reason}")]
    CreateFailed {
        /// Path that could not be created.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Removing a file failed.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// Path that could not be removed.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Changing permissions failed.
    #[error("Failed to change permissions of {path}: {reason}")]
    PermissionFailed {
        /// Path whose permissions could not be changed.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },
}

/// Errors raised by the conversion stages of the download pipeline.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The requested target format is not handled by the encoder.
    #[error("Unsupported conversion format: {0}")]
    UnsupportedFormat(String),

    /// Decoding the working file failed.
    #[error("Failed to decode {path}: {reason}")]
    DecodeFailed {
        /// Working file.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Encoding the converted file failed.
    #[error("Failed to encode {path}: {reason}")]
    EncodeFailed {
        /// Output file.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },
}

/// Errors raised while running the post-process script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script string contained no program name.
    #[error("Script command line is empty")]
    Empty,

    /// The process could not be started.
    #[error("Failed to start script '{program}': {reason}")]
    SpawnFailed {
        /// Program name.
        program: String,
        /// Failure details.
        reason: String,
    },

    /// The process did not finish in time and was killed.
    #[error("Script '{program}' timed out after {timeout_secs}s")]
    TimedOut {
        /// Program name.
        program: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// The process exited with a failure status.
    #[error("Script '{program}' exited with status {code:?}")]
    NonZeroExit {
        /// Program name.
        program: String,
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
    },
}

/// Errors that can occur in Camport core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Device error.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// File system error.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Conversion error.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Post-process script error.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Embedded metadata could not be read or written.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image codec error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Device or transport failure.
    Device,
    /// Local file system failure.
    FileSystem,
    /// Conversion stage failure.
    Conversion,
    /// Post-process script failure.
    Script,
    /// Metadata failure.
    Metadata,
    /// Configuration failure.
    Configuration,
    /// Operation cancelled by the user.
    Cancelled,
    /// Anything else (IO, serialization, codecs).
    Other,
}

impl Error {
    /// Get the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(DeviceError::Cancelled) => ErrorKind::Cancelled,
            Self::Device(_) => ErrorKind::Device,
            Self::FileSystem(_) => ErrorKind::FileSystem,
            Self::Conversion(_) => ErrorKind::Conversion,
            Self::Script(_) => ErrorKind::Script,
            Self::Metadata(_) => ErrorKind::Metadata,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) | Self::Serialization(_) | Self::Image(_) => ErrorKind::Other,
        }
    }

    /// Whether this error only reports a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled)
    }
}

/// Attach a path to IO failures.
pub trait ErrorContext<T> {
    /// Map an IO error into [`FileSystemError::ReadFailed`] for `path`.
    fn read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Map an IO error into [`FileSystemError::WriteFailed`] for `path`.
    fn write_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.into(),
                reason: e.to_string(),
            })
        })
    }

    fn write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.into(),
                reason: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = Error::Device(DeviceError::ItemNotFound {
            folder: "/DCIM/100CANON/".to_string(),
            file: "IMG_0001.JPG".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Item not found on device: /DCIM/100CANON/IMG_0001.JPG"
        );
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::FileSystem(FileSystemError::WriteFailed {
            path: PathBuf::from("/test/path"),
            reason: "permission denied".to_string(),
        });
        assert!(err.to_string().contains("/test/path"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::Device(DeviceError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            Error::Script(ScriptError::Empty).kind(),
            ErrorKind::Script
        );
        assert_eq!(
            Error::Configuration("bad".to_string()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Device(DeviceError::Cancelled).is_cancelled());
        assert!(
            !Error::Device(DeviceError::Unsupported {
                operation: "capture"
            })
            .is_cancelled()
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_read_context() {
        let res: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = res.read_context("/card/DCIM").unwrap_err();
        assert!(matches!(
            err,
            Error::FileSystem(FileSystemError::ReadFailed { ref path, .. }) if path == &PathBuf::from("/card/DCIM")
        ));
    }
}
