//! Public face of the crate: a non-blocking handle over one device.
//!
//! Every request is queued and executed in order on a dedicated worker
//! thread; results come back as [`ControllerEvent`]s on the channel returned
//! by [`DeviceController::open`]. Thumbnail batches sit in a separate
//! low-priority lane and only run while no other command is waiting.
//!
//! ```rust,ignore
//! use camport_core::{ControllerConfig, DeviceController, DeviceSpec, PipelineTools};
//!
//! let spec = DeviceSpec::mounted("Card", "/media/card");
//! let (controller, mut events) =
//!     DeviceController::open(&spec, ControllerConfig::default(), PipelineTools::default())?;
//! controller.connect();
//! controller.list_root_folder(true);
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, mpsc as std_mpsc};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::{
    BackendCapabilities, BackendKind, CancelToken, DeviceBackend, DeviceSpec, create_backend,
};
use crate::command::{Command, ThumbnailTicket};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::event::{ControllerEvent, EventSink};
use crate::item::ItemDescriptor;
use crate::pipeline::PipelineTools;
use crate::queue::CommandQueue;
use crate::settings::DownloadSettings;
use crate::worker::Worker;

/// Backend identity, read once before the worker takes the backend.
#[derive(Debug, Clone)]
struct Identity {
    title: String,
    path: String,
    kind: BackendKind,
    device_id: String,
    root_folder: String,
}

/// Handle to one capture device.
///
/// Dropping the controller cancels pending work and joins the worker.
#[derive(Debug)]
pub struct DeviceController {
    queue: Arc<CommandQueue>,
    capabilities: Arc<RwLock<BackendCapabilities>>,
    cancel_token: CancelToken,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    next_ticket: AtomicU64,
    identity: Identity,
}

impl DeviceController {
    /// Open the device described by `spec` with the built-in backends.
    pub fn open(
        spec: &DeviceSpec,
        config: ControllerConfig,
        tools: PipelineTools,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>)> {
        let backend = create_backend(spec, &config)?;
        Self::with_backend(backend, config, tools)
    }

    /// Drive a caller-supplied backend.
    pub fn with_backend(
        backend: Box<dyn DeviceBackend>,
        mut config: ControllerConfig,
        tools: PipelineTools,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>)> {
        config.validate();

        let identity = Identity {
            title: backend.title(),
            path: backend.path(),
            kind: backend.kind(),
            device_id: backend.device_id(),
            root_folder: backend.root_folder(),
        };
        let cancel_token = backend.cancel_token();

        let queue = Arc::new(CommandQueue::new());
        let capabilities = Arc::new(RwLock::new(BackendCapabilities::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let events = EventSink::new(tx, Arc::clone(&queue));

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let worker_queue = Arc::clone(&queue);
        let worker_caps = Arc::clone(&capabilities);
        let thread_name = config.worker_thread_name.clone();

        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            match Worker::new(
                backend,
                worker_queue,
                worker_caps,
                events,
                tools,
                config,
                shutdown_rx,
            ) {
                Ok(worker) => {
                    let _ = ready_tx.send(Ok(()));
                    worker.run();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::Configuration(
                    "worker thread exited during startup".to_string(),
                ));
            }
        }

        info!(
            "Opened {} device {} at {}",
            identity.kind, identity.title, identity.path
        );

        Ok((
            Self {
                queue,
                capabilities,
                cancel_token,
                shutdown,
                worker: Some(handle),
                next_ticket: AtomicU64::new(1),
                identity,
            },
            rx,
        ))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Display title of the device.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.identity.title
    }

    /// Mount path or device URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.identity.path
    }

    /// Driver family.
    #[must_use]
    pub const fn driver(&self) -> BackendKind {
        self.identity.kind
    }

    /// Stable fingerprint of the storage medium.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    /// Folder listing starts from.
    #[must_use]
    pub fn root_folder(&self) -> &str {
        &self.identity.root_folder
    }

    /// Operations supported by the device, as of the last successful connect.
    #[must_use]
    pub fn capabilities(&self) -> BackendCapabilities {
        *self
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Open the device. Answered by [`ControllerEvent::ConnectionResult`].
    pub fn connect(&self) {
        self.queue.enqueue(Command::Connect);
    }

    /// List sub-folders and files of the root folder.
    pub fn list_root_folder(&self, use_metadata: bool) {
        let folder = self.identity.root_folder.clone();
        self.queue.enqueue_all([
            Command::ListFolders {
                folder: folder.clone(),
            },
            Command::ListFiles {
                folder,
                use_metadata,
            },
        ]);
    }

    /// List sub-folders of `folder`.
    pub fn list_folders(&self, folder: impl Into<String>) {
        self.queue.enqueue(Command::ListFolders {
            folder: folder.into(),
        });
    }

    /// List files of `folder`.
    pub fn list_files(&self, folder: impl Into<String>, use_metadata: bool) {
        self.queue.enqueue(Command::ListFiles {
            folder: folder.into(),
            use_metadata,
        });
    }

    /// Queue a low-priority thumbnail batch.
    pub fn get_thumbnails(&self, items: Vec<ItemDescriptor>) -> ThumbnailTicket {
        let ticket = ThumbnailTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        debug!("Queueing {} thumbnails as {}", items.len(), ticket);
        self.queue.enqueue(Command::GetThumbnails { ticket, items });
        ticket
    }

    /// Move a pending thumbnail batch to the front of its lane.
    ///
    /// Returns `false` when the batch already ran or was dropped.
    pub fn promote_thumbnails(&self, ticket: ThumbnailTicket) -> bool {
        self.queue.promote(ticket)
    }

    /// Fetch the embedded metadata of one item.
    pub fn get_metadata(&self, folder: impl Into<String>, file: impl Into<String>) {
        self.queue.enqueue(Command::GetMetadata {
            folder: folder.into(),
            file: file.into(),
        });
    }

    /// Fetch the driver description texts.
    pub fn get_camera_info(&self) {
        self.queue.enqueue(Command::GetCameraInfo);
    }

    /// Fetch the storage capacity.
    pub fn get_free_space(&self) {
        self.queue.enqueue(Command::GetFreeSpace);
    }

    /// Fetch one live preview frame.
    pub fn get_preview(&self) {
        self.queue.enqueue(Command::GetPreview);
    }

    /// Trigger a capture.
    pub fn capture(&self) {
        self.queue.enqueue(Command::Capture);
    }

    /// Copy the local file `src` into `folder` as `file`.
    pub fn upload(&self, src: impl Into<PathBuf>, folder: impl Into<String>, file: impl Into<String>) {
        self.queue.enqueue(Command::Upload {
            folder: folder.into(),
            file: file.into(),
            src: src.into(),
        });
    }

    /// Download one file through the pipeline.
    pub fn download(&self, settings: DownloadSettings) {
        self.queue.enqueue(Command::Download(Box::new(settings)));
    }

    /// Download several files as one batch.
    pub fn download_all(&self, batch: impl IntoIterator<Item = DownloadSettings>) {
        self.queue
            .enqueue_all(batch.into_iter().map(|s| Command::Download(Box::new(s))));
    }

    /// Delete one item.
    pub fn delete_file(&self, folder: impl Into<String>, file: impl Into<String>) {
        self.queue.enqueue(Command::Delete {
            folder: folder.into(),
            file: file.into(),
        });
    }

    /// Set or clear the write protection of one item.
    pub fn lock_file(&self, folder: impl Into<String>, file: impl Into<String>, locked: bool) {
        self.queue.enqueue(Command::Lock {
            folder: folder.into(),
            file: file.into(),
            locked,
        });
    }

    /// Drop all pending commands and interrupt the in-flight one.
    ///
    /// The in-flight call is interrupted through the backend's cancel token
    /// only. User-facing log events stay muted until the next request is
    /// queued.
    pub fn cancel(&self) {
        let dropped = self.queue.cancel();
        self.cancel_token.cancel();
        debug!("Canceled, dropped {} pending commands", dropped);
    }

    /// Whether both lanes are empty.
    #[must_use]
    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.cancel();
        let _ = self.shutdown.send(true);
        self.queue.shutdown();

        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            warn!("Worker thread of {} panicked", self.identity.title);
        }
    }
}
