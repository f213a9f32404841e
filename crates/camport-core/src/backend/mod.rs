//! Capture device backends.
//!
//! A [`DeviceBackend`] is owned by the worker thread for the life of the
//! controller; every call is made from that thread. The only thing other
//! threads touch is the backend's [`CancelToken`].

mod mass_storage;

pub use mass_storage::{DEFAULT_COPY_CHUNK_SIZE, MassStorageBackend};

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::DynamicImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ControllerConfig;
use crate::error::{DeviceError, Result};
use crate::item::ItemDescriptor;

/// Model string that selects the mass-storage driver.
pub const DIRECTORY_BROWSE_MODEL: &str = "directory browse";

/// Shared cancellation flag between the controller and its backend.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Operations a connected backend supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Thumbnails can be fetched.
    pub thumbnail: bool,
    /// Items can be deleted.
    pub delete: bool,
    /// Items can be uploaded.
    pub upload: bool,
    /// Folders can be created.
    pub mkdir: bool,
    /// Folders can be removed.
    pub deldir: bool,
    /// The device can capture an image.
    pub capture_image: bool,
    /// The device can stream a capture preview.
    pub capture_image_preview: bool,
}

impl BackendCapabilities {
    /// Drop capture preview support when capture itself is unsupported.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        self.capture_image_preview = self.capture_image && self.capture_image_preview;
        self
    }
}

/// Space on the device storage, in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSpace {
    /// Total capacity in KiB.
    pub total_kib: u64,
    /// Available capacity in KiB.
    pub available_kib: u64,
}

/// Driver description texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Device properties and supported operations.
    pub summary: String,
    /// Where to find more documentation.
    pub manual: String,
    /// Driver description.
    pub about: String,
}

/// Driver family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Camera or card reader mounted as a local directory.
    MassStorage,
    /// Camera driven over a picture transfer protocol.
    Ptp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MassStorage => write!(f, "ums"),
            Self::Ptp => write!(f, "ptp"),
        }
    }
}

/// How the caller identified the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Display title.
    pub title: String,
    /// Camera model, or [`DIRECTORY_BROWSE_MODEL`] for a mounted directory.
    pub model: String,
    /// Transport port (e.g. `usb:`).
    pub port: String,
    /// Mount path or `camera:/` URL.
    pub path: String,
}

impl DeviceSpec {
    /// Spec for a directory mounted at `path`.
    pub fn mounted(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            model: DIRECTORY_BROWSE_MODEL.to_string(),
            port: String::new(),
            path: path.into(),
        }
    }

    /// USB port named by a `camera:/` URL, e.g. `usb:001,005`.
    #[must_use]
    pub fn usb_port(&self) -> Option<String> {
        let url_re = Regex::new(r"^camera:/+(?:[^@/]*@)?(usb:[0-9,]*)").ok()?;
        url_re
            .captures(&self.path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Driver family selected for this device.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        if self.usb_port().is_some() {
            return BackendKind::Ptp;
        }
        if self.model.eq_ignore_ascii_case(DIRECTORY_BROWSE_MODEL) {
            BackendKind::MassStorage
        } else {
            BackendKind::Ptp
        }
    }
}

/// Capability interface over a physical capture device.
///
/// A failed call returns `Err`; the controller turns it into the matching
/// failure event.
///
/// The backend is owned by the worker thread, so [`DeviceController::cancel`]
/// cannot reach [`DeviceBackend::cancel`] while a call is in flight. Long
/// running calls must poll the token returned by
/// [`DeviceBackend::cancel_token`] and return [`DeviceError::Cancelled`] once
/// it is set; that token is the only cancellation signal a user cancel sends.
///
/// [`DeviceController::cancel`]: crate::DeviceController::cancel
/// [`DeviceError::Cancelled`]: crate::DeviceError::Cancelled
#[cfg_attr(test, mockall::automock)]
pub trait DeviceBackend: Send {
    /// Driver family.
    fn kind(&self) -> BackendKind;

    /// Display title.
    fn title(&self) -> String;

    /// Mount path or device URL.
    fn path(&self) -> String;

    /// Stable fingerprint of the storage medium.
    fn device_id(&self) -> String;

    /// Folder listing starts from.
    fn root_folder(&self) -> String;

    /// Handle used to interrupt in-flight calls from another thread.
    fn cancel_token(&self) -> CancelToken;

    /// Supported operations; only meaningful after a successful connect.
    fn capabilities(&self) -> BackendCapabilities;

    /// Open the device.
    fn connect(&mut self) -> Result<()>;

    /// Immediate sub-folders of `folder`.
    fn get_folders(&mut self, folder: &str) -> Result<Vec<String>>;

    /// Items of `folder`.
    fn get_items_info_list(
        &mut self,
        folder: &str,
        use_metadata: bool,
    ) -> Result<Vec<ItemDescriptor>>;

    /// Unscaled thumbnail of one item.
    fn get_thumbnail(&mut self, folder: &str, file: &str) -> Result<DynamicImage>;

    /// Raw embedded metadata of one item.
    fn get_metadata(&mut self, folder: &str, file: &str) -> Result<Vec<u8>>;

    /// Copy one item into the local file `dest`.
    fn download_item(&mut self, folder: &str, file: &str, dest: &Path) -> Result<()>;

    /// Copy the local file `src` onto the device.
    fn upload_item(&mut self, folder: &str, file: &str, src: &Path) -> Result<ItemDescriptor>;

    /// Remove one item.
    fn delete_item(&mut self, folder: &str, file: &str) -> Result<()>;

    /// Set or clear the write protection of one item.
    fn set_lock_item(&mut self, folder: &str, file: &str, locked: bool) -> Result<()>;

    /// Capacity of the device storage.
    fn get_free_space(&mut self) -> Result<FreeSpace>;

    /// Live preview frame.
    fn get_preview(&mut self) -> Result<DynamicImage>;

    /// Capture an image and describe the new item.
    fn capture(&mut self) -> Result<ItemDescriptor>;

    /// Driver description texts.
    fn camera_info(&mut self) -> CameraInfo;

    /// Set the cancel token from the worker thread.
    ///
    /// Only called after an abort decision; must have the same effect as
    /// cancelling the token directly.
    fn cancel(&self);
}

/// Create the backend matching `spec`.
///
/// Only the mass-storage driver ships with this crate. PTP devices need a
/// transport supplied through [`crate::DeviceController::with_backend`].
pub fn create_backend(
    spec: &DeviceSpec,
    config: &ControllerConfig,
) -> Result<Box<dyn DeviceBackend>> {
    let kind = spec.backend_kind();
    debug!("Selected {} driver for {}", kind, spec.path);

    match kind {
        BackendKind::MassStorage => Ok(Box::new(MassStorageBackend::new(
            spec.clone(),
            config.copy_chunk_size,
        ))),
        BackendKind::Ptp => Err(DeviceError::UnsupportedDriver {
            driver: kind.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_backend_kind_directory_browse() {
        let spec = DeviceSpec {
            title: "Card".to_string(),
            model: "Directory Browse".to_string(),
            port: String::new(),
            path: "/media/card".to_string(),
        };
        assert_eq!(spec.backend_kind(), BackendKind::MassStorage);
    }

    #[test]
    fn test_backend_kind_usb_url() {
        let spec = DeviceSpec {
            title: "Camera".to_string(),
            model: DIRECTORY_BROWSE_MODEL.to_string(),
            port: String::new(),
            path: "camera:/Canon%20EOS@usb:001,005/".to_string(),
        };
        assert_eq!(spec.usb_port().as_deref(), Some("usb:001,005"));
        assert_eq!(spec.backend_kind(), BackendKind::Ptp);
    }

    #[test]
    fn test_backend_kind_other_model() {
        let spec = DeviceSpec {
            title: "Camera".to_string(),
            model: "Nikon DSC D750".to_string(),
            port: "usb:".to_string(),
            path: "/".to_string(),
        };
        assert_eq!(spec.backend_kind(), BackendKind::Ptp);
    }

    #[test]
    fn test_create_backend_rejects_ptp() {
        let spec = DeviceSpec {
            model: "Nikon DSC D750".to_string(),
            ..DeviceSpec::default()
        };
        let result = create_backend(&spec, &ControllerConfig::default());
        assert!(matches!(
            result,
            Err(crate::Error::Device(DeviceError::UnsupportedDriver { .. }))
        ));
    }

    #[test]
    fn test_create_backend_mass_storage() {
        let spec = DeviceSpec::mounted("Card", "/media/card");
        let backend = create_backend(&spec, &ControllerConfig::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::MassStorage);
        assert_eq!(backend.title(), "Card");
    }

    #[test]
    fn test_capabilities_normalized() {
        let caps = BackendCapabilities {
            capture_image: false,
            capture_image_preview: true,
            ..BackendCapabilities::default()
        };
        assert!(!caps.normalized().capture_image_preview);
    }
}
