//! Events delivered to the producer side.
//!
//! Everything is asynchronous except [`FailurePrompt`], which blocks the
//! worker until [`FailurePrompt::respond`] is called or the prompt is
//! dropped.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backend::{CameraInfo, FreeSpace};
use crate::item::ItemDescriptor;
use crate::queue::CommandQueue;

/// Severity of a user-facing log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Degraded but finished.
    Warning,
    /// Failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A user-facing history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Message text.
    pub message: String,
    /// Severity.
    pub level: LogLevel,
    /// Folder the entry refers to, empty if none.
    pub folder: String,
    /// File the entry refers to, empty if none.
    pub file: String,
}

/// Stage reached by one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// The transfer is starting.
    Started,
    /// The transfer failed; no temp file remains.
    Failed,
    /// The pipeline finished; the temp path is the final working file.
    Done,
}

/// Operation whose failure may pause the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Download failure.
    Download,
    /// Upload failure.
    Upload,
    /// Delete failure.
    Delete,
    /// Lock or unlock failure.
    Lock,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
            Self::Delete => write!(f, "delete"),
            Self::Lock => write!(f, "lock"),
        }
    }
}

/// Answer to a [`FailurePrompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Keep processing the remaining queue.
    Continue,
    /// Drop the remaining queue and cancel the device.
    Abort,
}

/// A blocking request for a [`Decision`].
///
/// Responding consumes the prompt, so it can be answered at most once.
/// Dropping it unanswered resolves to [`Decision::Abort`].
#[derive(Debug)]
pub struct FailurePrompt {
    /// Failed operation.
    pub kind: FailureKind,
    /// Folder on the device.
    pub folder: String,
    /// File name.
    pub file: String,
    responder: oneshot::Sender<Decision>,
}

impl FailurePrompt {
    pub(crate) fn new(
        kind: FailureKind,
        folder: impl Into<String>,
        file: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Decision>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                kind,
                folder: folder.into(),
                file: file.into(),
                responder,
            },
            rx,
        )
    }

    /// Answer the prompt and wake the worker.
    pub fn respond(self, decision: Decision) {
        // The worker may already be gone during shutdown.
        let _ = self.responder.send(decision);
    }
}

/// Result events emitted by the worker.
#[derive(Debug)]
pub enum ControllerEvent {
    /// Main-lane work started (`true`) or the worker went idle (`false`).
    Busy(bool),
    /// Outcome of a connect.
    ConnectionResult(bool),
    /// Sub-folders found by a folder listing; only sent when non-empty.
    FolderList(Vec<String>),
    /// Files found in a folder. Sent even when the listing failed.
    FileList {
        /// Listed folder.
        folder: String,
        /// Items with a known mime type.
        items: Vec<ItemDescriptor>,
    },
    /// A thumbnail was fetched.
    ThumbnailReady {
        /// Item the thumbnail belongs to.
        item: ItemDescriptor,
        /// Scaled thumbnail.
        image: DynamicImage,
    },
    /// A thumbnail could not be fetched.
    ThumbnailFailed {
        /// Item the thumbnail belongs to.
        item: ItemDescriptor,
    },
    /// Embedded metadata of one item; empty on failure.
    MetadataReady {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
        /// Raw metadata block.
        bytes: Vec<u8>,
    },
    /// Driver summary, manual and about texts.
    CameraInfo(CameraInfo),
    /// Download progress of one file.
    DownloadProgress {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
        /// Final working file, set only with [`DownloadStatus::Done`].
        temp_path: Option<PathBuf>,
        /// Stage reached.
        status: DownloadStatus,
    },
    /// An upload finished.
    UploadDone(ItemDescriptor),
    /// A delete finished.
    DeleteDone {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
        /// Whether the item was deleted.
        success: bool,
    },
    /// A lock change finished.
    LockDone {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
        /// Whether the lock state changed.
        success: bool,
    },
    /// Device free space; zero on failure.
    FreeSpace(FreeSpace),
    /// Live preview frame, `None` on failure.
    PreviewReady(Option<DynamicImage>),
    /// Captured item, `None` on failure.
    CaptureDone(Option<ItemDescriptor>),
    /// User-facing history entry.
    LogMessage(LogEntry),
    /// The worker is waiting for a decision.
    FailurePrompt(FailurePrompt),
}

/// Sending half of the event channel, as used by the worker.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<ControllerEvent>,
    queue: Arc<CommandQueue>,
}

impl EventSink {
    pub(crate) const fn new(
        tx: mpsc::UnboundedSender<ControllerEvent>,
        queue: Arc<CommandQueue>,
    ) -> Self {
        Self { tx, queue }
    }

    /// Send an event. Returns `false` once the receiver is gone.
    pub(crate) fn emit(&self, event: ControllerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the batch was canceled since the last enqueue.
    pub(crate) fn is_canceled(&self) -> bool {
        self.queue.is_canceled()
    }

    /// Record a user-facing log entry.
    ///
    /// Entries are mirrored to `tracing`; while the batch is canceled they
    /// only reach `tracing`, at debug level.
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>, folder: &str, file: &str) {
        let message = message.into();

        if self.is_canceled() {
            debug!("Suppressed {} log while canceled: {}", level, message);
            return;
        }

        match level {
            LogLevel::Info => info!("{} ({}{})", message, folder, file),
            LogLevel::Warning => warn!("{} ({}{})", message, folder, file),
            LogLevel::Error => error!("{} ({}{})", message, folder, file),
        }

        self.emit(ControllerEvent::LogMessage(LogEntry {
            message,
            level,
            folder: folder.to_string(),
            file: file.to_string(),
        }));
    }
}
