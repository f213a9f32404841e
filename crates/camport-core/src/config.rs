//! Controller configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::DEFAULT_COPY_CHUNK_SIZE;
use crate::error::{Error, FileSystemError, Result};
use crate::script::DEFAULT_SCRIPT_TIMEOUT_SECS;
use crate::temp::DEFAULT_TEMP_PREFIX;

/// Default thumbnail edge length in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Minimum copy chunk size (4 KB).
pub const MIN_COPY_CHUNK_SIZE: usize = 4 * 1024;

/// Maximum copy chunk size (1 MB).
pub const MAX_COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Default name of the worker thread.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "camport-worker";

/// Settings of a [`crate::DeviceController`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Seconds a post-process script may run before it is killed.
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,
    /// Longest edge of emitted thumbnails, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    /// Prefix of working file names. Must not contain a dot.
    #[serde(default = "default_temp_prefix")]
    pub temp_file_prefix: String,
    /// Name given to the worker thread.
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,
    /// Buffer size used by the mass-storage copy loop.
    #[serde(default = "default_copy_chunk_size")]
    pub copy_chunk_size: usize,
}

const fn default_script_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_SECS
}

const fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

fn default_temp_prefix() -> String {
    DEFAULT_TEMP_PREFIX.to_string()
}

fn default_worker_thread_name() -> String {
    DEFAULT_WORKER_THREAD_NAME.to_string()
}

const fn default_copy_chunk_size() -> usize {
    DEFAULT_COPY_CHUNK_SIZE
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            temp_file_prefix: default_temp_prefix(),
            worker_thread_name: default_worker_thread_name(),
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }
}

impl ControllerConfig {
    /// Clamp out-of-range values and repair unusable ones.
    pub fn validate(&mut self) {
        self.copy_chunk_size = self
            .copy_chunk_size
            .clamp(MIN_COPY_CHUNK_SIZE, MAX_COPY_CHUNK_SIZE);
        self.thumbnail_size = self.thumbnail_size.max(1);
        self.script_timeout_secs = self.script_timeout_secs.max(1);

        if self.temp_file_prefix.is_empty() || self.temp_file_prefix.contains(['.', '/', '\\']) {
            self.temp_file_prefix = default_temp_prefix();
        }
        if self.worker_thread_name.is_empty() {
            self.worker_thread_name = default_worker_thread_name();
        }
    }

    /// Script timeout as a [`Duration`].
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    /// Load from the default config file, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save to `path`, creating its parent directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }
}

/// Path of the default config file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("camport")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.script_timeout_secs, 60);
        assert_eq!(config.thumbnail_size, 256);
        assert_eq!(config.temp_file_prefix, "camport-");
        assert_eq!(config.copy_chunk_size, 32 * 1024);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = ControllerConfig {
            copy_chunk_size: 1,
            temp_file_prefix: "bad.prefix".to_string(),
            thumbnail_size: 0,
            ..ControllerConfig::default()
        };
        config.validate();
        assert_eq!(config.copy_chunk_size, MIN_COPY_CHUNK_SIZE);
        assert_eq!(config.temp_file_prefix, DEFAULT_TEMP_PREFIX);
        assert_eq!(config.thumbnail_size, 1);

        config.copy_chunk_size = usize::MAX;
        config.validate();
        assert_eq!(config.copy_chunk_size, MAX_COPY_CHUNK_SIZE);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"thumbnail_size":160}"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.thumbnail_size, 160);
        assert_eq!(config.script_timeout_secs, 60);
        assert_eq!(config.worker_thread_name, DEFAULT_WORKER_THREAD_NAME);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ControllerConfig {
            script_timeout_secs: 5,
            ..ControllerConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = ControllerConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded = ControllerConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, ControllerConfig::default());
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ControllerConfig::load_from(&path),
            Err(Error::Configuration(_))
        ));
    }
}
