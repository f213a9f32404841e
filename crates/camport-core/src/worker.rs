//! The worker thread: drains the command queue and runs each command
//! against the backend.

use std::sync::{Arc, PoisonError, RwLock};

use image::imageops::FilterType;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::{BackendCapabilities, DeviceBackend, FreeSpace};
use crate::command::Command;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::event::{ControllerEvent, EventSink, FailureKind, LogLevel};
use crate::gate::RecoveryGate;
use crate::item::ItemDescriptor;
use crate::pipeline::{DownloadPipeline, PipelineOutcome, PipelineTools};
use crate::queue::{CommandQueue, Lane};
use crate::settings::DownloadSettings;

pub(crate) struct Worker {
    backend: Box<dyn DeviceBackend>,
    queue: Arc<CommandQueue>,
    capabilities: Arc<RwLock<BackendCapabilities>>,
    events: EventSink,
    tools: PipelineTools,
    config: ControllerConfig,
    runtime: Runtime,
    shutdown: watch::Receiver<bool>,
    busy: bool,
}

impl Worker {
    /// Build a worker; must be called on the thread that will run it.
    pub(crate) fn new(
        backend: Box<dyn DeviceBackend>,
        queue: Arc<CommandQueue>,
        capabilities: Arc<RwLock<BackendCapabilities>>,
        events: EventSink,
        tools: PipelineTools,
        config: ControllerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(Self {
            backend,
            queue,
            capabilities,
            events,
            tools,
            config,
            runtime,
            shutdown,
            busy: false,
        })
    }

    /// Process commands until the queue shuts down.
    pub(crate) fn run(mut self) {
        info!("Worker started for {}", self.backend.title());

        while let Some((cmd, lane)) = self.queue.dequeue_blocking() {
            self.set_busy(lane == Lane::Main);
            debug!("Executing {}", cmd.kind());
            self.execute(cmd);

            if self.queue.is_empty() {
                self.set_busy(false);
            }
        }

        self.set_busy(false);
        info!("Worker stopped for {}", self.backend.title());
    }

    fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            self.busy = busy;
            self.events.emit(ControllerEvent::Busy(busy));
        }
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.connect(),
            Command::ListFolders { folder } => self.list_folders(&folder),
            Command::ListFiles {
                folder,
                use_metadata,
            } => self.list_files(folder, use_metadata),
            Command::GetThumbnails { items, .. } => self.thumbnails(items),
            Command::GetMetadata { folder, file } => self.metadata(folder, file),
            Command::GetCameraInfo => {
                let info = self.backend.camera_info();
                self.events.emit(ControllerEvent::CameraInfo(info));
            }
            Command::GetFreeSpace => self.free_space(),
            Command::GetPreview => self.preview(),
            Command::Capture => self.capture(),
            Command::Download(settings) => self.download(&settings),
            Command::Upload { folder, file, src } => self.upload(&folder, &file, &src),
            Command::Delete { folder, file } => self.delete(folder, file),
            Command::Lock {
                folder,
                file,
                locked,
            } => self.lock(folder, file, locked),
        }
    }

    fn recover(&self, kind: FailureKind, folder: &str, file: &str) {
        RecoveryGate {
            queue: &self.queue,
            events: &self.events,
            runtime: &self.runtime,
            shutdown: &self.shutdown,
        }
        .route(self.backend.as_ref(), kind, folder, file);
    }

    // =========================================================================
    // Device and browsing
    // =========================================================================

    fn connect(&mut self) {
        self.events
            .log(LogLevel::Info, "Connecting to camera...", "", "");

        let result = self.backend.connect();
        self.events
            .emit(ControllerEvent::ConnectionResult(result.is_ok()));

        match result {
            Ok(()) => {
                let caps = self.backend.capabilities().normalized();
                *self
                    .capabilities
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = caps;
                self.events
                    .log(LogLevel::Info, "Connection established.", "", "");
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Connection failed: {e}"), "", "");
            }
        }
    }

    fn list_folders(&mut self, folder: &str) {
        match self.backend.get_folders(folder) {
            Ok(folders) if !folders.is_empty() => {
                self.events.emit(ControllerEvent::FolderList(folders));
            }
            Ok(_) => debug!("No sub-folders in {}", folder),
            Err(e) => self.events.log(
                LogLevel::Error,
                format!("Failed to list folder {folder}: {e}"),
                folder,
                "",
            ),
        }
    }

    fn list_files(&mut self, folder: String, use_metadata: bool) {
        let mut items = match self.backend.get_items_info_list(&folder, use_metadata) {
            Ok(items) => items,
            Err(e) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Failed to list files in {folder}: {e}"),
                    &folder,
                    "",
                );
                Vec::new()
            }
        };
        items.retain(|item| !item.mime.is_empty());

        self.events
            .emit(ControllerEvent::FileList { folder, items });
    }

    fn thumbnails(&mut self, items: Vec<ItemDescriptor>) {
        let size = self.config.thumbnail_size;

        for item in items {
            if self.queue.is_canceled() {
                debug!("Thumbnail batch canceled");
                break;
            }

            match self.backend.get_thumbnail(&item.folder, &item.name) {
                Ok(image) => {
                    let image = image.resize(size, size, FilterType::Lanczos3);
                    self.events
                        .emit(ControllerEvent::ThumbnailReady { item, image });
                }
                Err(e) => {
                    self.events.log(
                        LogLevel::Error,
                        format!("Failed to get thumbnail for {}: {e}", item.name),
                        &item.folder,
                        &item.name,
                    );
                    self.events.emit(ControllerEvent::ThumbnailFailed { item });
                }
            }
        }
    }

    fn metadata(&mut self, folder: String, file: String) {
        let bytes = self
            .backend
            .get_metadata(&folder, &file)
            .unwrap_or_else(|e| {
                self.events.log(
                    LogLevel::Error,
                    format!("Failed to get metadata for {file}: {e}"),
                    &folder,
                    &file,
                );
                Vec::new()
            });

        self.events
            .emit(ControllerEvent::MetadataReady { folder, file, bytes });
    }

    fn free_space(&mut self) {
        let space = self.backend.get_free_space().unwrap_or_else(|e| {
            self.events.log(
                LogLevel::Error,
                format!("Failed to get free space from camera: {e}"),
                "",
                "",
            );
            FreeSpace::default()
        });
        self.events.emit(ControllerEvent::FreeSpace(space));
    }

    fn preview(&mut self) {
        let preview = match self.backend.get_preview() {
            Ok(image) => Some(image),
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to get preview: {e}"), "", "");
                None
            }
        };
        self.events.emit(ControllerEvent::PreviewReady(preview));
    }

    fn capture(&mut self) {
        let item = match self.backend.capture() {
            Ok(item) => Some(item),
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to capture: {e}"), "", "");
                None
            }
        };
        self.events.emit(ControllerEvent::CaptureDone(item));
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    fn download(&mut self, settings: &DownloadSettings) {
        let outcome = DownloadPipeline {
            backend: self.backend.as_mut(),
            tools: &mut self.tools,
            config: &self.config,
            events: &self.events,
            runtime: &self.runtime,
        }
        .run(settings);

        if outcome == PipelineOutcome::Failed {
            self.recover(FailureKind::Download, &settings.folder, &settings.file);
        }
    }

    fn upload(&mut self, folder: &str, file: &str, src: &std::path::Path) {
        match self.backend.upload_item(folder, file, src) {
            Ok(item) => {
                self.events.emit(ControllerEvent::UploadDone(item));
            }
            Err(e) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Failed to upload {file}: {e}"),
                    folder,
                    file,
                );
                self.recover(FailureKind::Upload, folder, file);
            }
        }
    }

    fn delete(&mut self, folder: String, file: String) {
        let result = self.backend.delete_item(&folder, &file);
        let success = result.is_ok();

        self.events.emit(ControllerEvent::DeleteDone {
            folder: folder.clone(),
            file: file.clone(),
            success,
        });

        if let Err(e) = result {
            self.events.log(
                LogLevel::Error,
                format!("Failed to delete {file}: {e}"),
                &folder,
                &file,
            );
            self.recover(FailureKind::Delete, &folder, &file);
        }
    }

    fn lock(&mut self, folder: String, file: String, locked: bool) {
        let result = self.backend.set_lock_item(&folder, &file, locked);
        let success = result.is_ok();

        self.events.emit(ControllerEvent::LockDone {
            folder: folder.clone(),
            file: file.clone(),
            success,
        });

        if let Err(e) = result {
            let action = if locked { "lock" } else { "unlock" };
            self.events.log(
                LogLevel::Error,
                format!("Failed to {action} {file}: {e}"),
                &folder,
                &file,
            );
            self.recover(FailureKind::Lock, &folder, &file);
        }
    }
}
