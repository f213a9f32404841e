//! `Camport` Core Library
//!
//! This crate drives digital cameras and card readers from a single worker
//! thread:
//! - A two-lane command queue (regular work first, thumbnails when idle)
//! - A mass-storage backend for cameras mounted as a directory
//! - A per-file download pipeline: EXIF patch, lossless re-encode,
//!   DNG conversion and a post-process script
//! - A continue-or-abort prompt after failed transfers
//!
//! # Error Handling
//!
//! Fallible operations return the crate [`Result`]. See the [`error`] module
//! for the typed error domains.
//!
//! ```rust,ignore
//! use camport_core::{ControllerConfig, ControllerEvent, DeviceController, DeviceSpec, PipelineTools};
//!
//! let spec = DeviceSpec::mounted("Card", "/media/card");
//! let (controller, mut events) =
//!     DeviceController::open(&spec, ControllerConfig::default(), PipelineTools::default())?;
//! controller.connect();
//! while let Some(event) = events.blocking_recv() {
//!     if let ControllerEvent::ConnectionResult(ok) = event {
//!         println!("connected: {ok}");
//!         break;
//!     }
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod controller;
pub mod convert;
pub mod dng_converter;
pub mod error;
pub mod event;
pub mod exif_editor;
mod gate;
pub mod item;
pub mod metadata;
pub mod pipeline;
pub mod queue;
pub mod script;
pub mod settings;
pub mod temp;
mod worker;

pub use backend::{
    BackendCapabilities, BackendKind, CameraInfo, CancelToken, DIRECTORY_BROWSE_MODEL,
    DeviceBackend, DeviceSpec, FreeSpace, MassStorageBackend, create_backend,
};
pub use command::{Command, CommandKind, ThumbnailTicket};
pub use config::{ControllerConfig, DEFAULT_THUMBNAIL_SIZE, config_file_path};
pub use controller::DeviceController;
pub use convert::{
    ImageLosslessEncoder, LosslessEncoder, LosslessFormat, PreviewMode, RawConversionOptions,
    RawConversionResult, RawConverter,
};
pub use dng_converter::DngConverter;
pub use error::{
    ConversionError, DeviceError, Error, ErrorContext, ErrorKind, FileSystemError, Result,
    ScriptError,
};
pub use event::{
    ControllerEvent, Decision, DownloadStatus, FailureKind, FailurePrompt, LogEntry, LogLevel,
};
pub use exif_editor::ExifEditor;
pub use item::{ItemDescriptor, JPEG_MIME, RAW_MIME};
pub use metadata::{MetadataEditor, MetadataPatch};
pub use pipeline::PipelineTools;
pub use queue::{CommandQueue, Lane};
pub use settings::{ColorLabel, DownloadSettings, PickLabel};
pub use temp::{DEFAULT_TEMP_PREFIX, final_name};
