//! Backend for cameras and card readers mounted as a local directory.
//!
//! Folders are absolute local paths ending with `/`. Item identities are the
//! full local path of the file.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use filetime::FileTime;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use sysinfo::Disks;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{
    BackendCapabilities, BackendKind, CameraInfo, CancelToken, DeviceBackend, DeviceSpec,
    FreeSpace,
};
use crate::error::{DeviceError, Error, ErrorContext, FileSystemError, Result};
use crate::item::{ItemDescriptor, mime_type_for_path, normalize_folder};
use crate::metadata::{capture_time, embedded_thumbnail, read_exif};

/// Default copy buffer size (32 KB).
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Name prefix of files being uploaded, renamed once complete.
const UPLOAD_TEMP_PREFIX: &str = ".camport-upload-";

/// [`DeviceBackend`] over a mounted directory.
#[derive(Debug)]
pub struct MassStorageBackend {
    spec: DeviceSpec,
    root: PathBuf,
    volume_name: String,
    capabilities: BackendCapabilities,
    cancel: CancelToken,
    chunk_size: usize,
}

impl MassStorageBackend {
    /// Create a backend for the directory named by `spec.path`.
    pub fn new(spec: DeviceSpec, chunk_size: usize) -> Self {
        let root = PathBuf::from(&spec.path);
        let volume_name = volume_for(&root)
            .map(|volume| volume.name)
            .unwrap_or_default();

        Self {
            spec,
            root,
            volume_name,
            capabilities: BackendCapabilities::default(),
            cancel: CancelToken::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    fn item_info(&self, folder: &str, name: &str, use_metadata: bool) -> Result<ItemDescriptor> {
        let path = item_path(folder, name);
        let meta = fs::metadata(&path).read_context(&path)?;

        let mut info = ItemDescriptor::new(folder, name);
        info.size = meta.len();
        info.readable = File::open(&path).is_ok();
        info.writable = !meta.permissions().readonly();
        info.mime = mime_type_for_path(&path).to_string();
        info.id = path.display().to_string();

        if !info.mime.is_empty() {
            if use_metadata {
                info.captured_at = metadata_capture_time(&path);
            }
            if info.captured_at.is_none() {
                info.captured_at = modification_time(&meta);
            }
        }

        info.preview_possible = info.mime.starts_with("image/");
        Ok(info)
    }

    /// Copy `src` into `dst` chunk by chunk, stopping on cancellation.
    fn copy_chunked(&self, src: &Path, dst: &Path) -> Result<u64> {
        let mut reader = File::open(src).read_context(src)?;
        let mut writer = BufWriter::new(File::create(dst).write_context(dst)?);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut copied = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Copy of {} cancelled after {} bytes", src.display(), copied);
                return Err(DeviceError::Cancelled.into());
            }

            let read = reader.read(&mut buffer).read_context(src)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).write_context(dst)?;
            copied += read as u64;
        }

        writer.flush().write_context(dst)?;
        Ok(copied)
    }
}

impl DeviceBackend for MassStorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MassStorage
    }

    fn title(&self) -> String {
        self.spec.title.clone()
    }

    fn path(&self) -> String {
        self.spec.path.clone()
    }

    fn device_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(BackendKind::MassStorage.to_string().as_bytes());
        hasher.update(self.spec.path.as_bytes());
        hasher.update(self.volume_name.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn root_folder(&self) -> String {
        normalize_folder(&self.spec.path)
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn connect(&mut self) -> Result<()> {
        let not_connected = |reason: &str| {
            Error::Device(DeviceError::NotConnected {
                name: format!("{} ({reason})", self.spec.path),
            })
        };

        let meta = fs::metadata(&self.root).map_err(|e| not_connected(&e.to_string()))?;
        if !meta.is_dir() {
            return Err(not_connected("not a directory"));
        }
        fs::read_dir(&self.root).map_err(|e| not_connected(&e.to_string()))?;

        let writable = tempfile::tempfile_in(&self.root).is_ok();
        debug!(
            "Mounted device {} is {}",
            self.root.display(),
            if writable { "writable" } else { "read-only" }
        );

        self.capabilities = BackendCapabilities {
            thumbnail: true,
            delete: writable,
            upload: writable,
            mkdir: writable,
            deldir: writable,
            capture_image: false,
            capture_image_preview: false,
        };
        Ok(())
    }

    fn get_folders(&mut self, folder: &str) -> Result<Vec<String>> {
        self.cancel.reset();
        let mut folders = Vec::new();

        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            if self.cancel.is_cancelled() {
                return Err(DeviceError::Cancelled.into());
            }
            let entry = entry.map_err(|e| FileSystemError::ReadFailed {
                path: PathBuf::from(folder),
                reason: e.to_string(),
            })?;
            if entry.file_type().is_dir() {
                folders.push(normalize_folder(&entry.path().display().to_string()));
            }
        }

        Ok(folders)
    }

    fn get_items_info_list(
        &mut self,
        folder: &str,
        use_metadata: bool,
    ) -> Result<Vec<ItemDescriptor>> {
        self.cancel.reset();
        let dir = Path::new(folder);
        if !dir.is_dir() {
            return Err(FileSystemError::ReadFailed {
                path: dir.to_path_buf(),
                reason: "folder does not exist".to_string(),
            }
            .into());
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            if self.cancel.is_cancelled() {
                break;
            }
            let entry = entry.map_err(|e| FileSystemError::ReadFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            match self.item_info(folder, &name, use_metadata) {
                Ok(info) => items.push(info),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        Ok(items)
    }

    fn get_thumbnail(&mut self, folder: &str, file: &str) -> Result<DynamicImage> {
        self.cancel.reset();
        let path = item_path(folder, file);

        if let Ok(Some(exif)) = read_exif(&path)
            && let Some(bytes) = embedded_thumbnail(&exif)
            && let Ok(thumbnail) = image::load_from_memory(bytes)
        {
            return Ok(thumbnail);
        }

        for sidecar in sidecars(&path) {
            if sidecar.is_file()
                && let Ok(thumbnail) = image::open(&sidecar)
            {
                return Ok(thumbnail);
            }
        }

        debug!("Decoding {} to get a thumbnail", path.display());
        Ok(image::open(&path)?)
    }

    fn get_metadata(&mut self, folder: &str, file: &str) -> Result<Vec<u8>> {
        let path = item_path(folder, file);
        let source = metadata_source(&path);

        read_exif(&source)?
            .map(|exif| exif.buf().to_vec())
            .ok_or_else(|| Error::Metadata(format!("No metadata found in {}", source.display())))
    }

    fn download_item(&mut self, folder: &str, file: &str, dest: &Path) -> Result<()> {
        self.cancel.reset();
        let src = item_path(folder, file);
        let src_meta = fs::metadata(&src).map_err(|_| DeviceError::ItemNotFound {
            folder: folder.to_string(),
            file: file.to_string(),
        })?;

        let copied = self.copy_chunked(&src, dest)?;

        fs::set_permissions(dest, src_meta.permissions()).map_err(|e| {
            FileSystemError::PermissionFailed {
                path: dest.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&src_meta))
            .write_context(dest)?;

        debug!("Downloaded {} ({} bytes) to {}", src.display(), copied, dest.display());
        Ok(())
    }

    fn upload_item(&mut self, folder: &str, file: &str, src: &Path) -> Result<ItemDescriptor> {
        self.cancel.reset();
        let dest = item_path(folder, file);
        let src_meta = fs::metadata(src).read_context(src)?;
        let target = dest.parent().unwrap_or(&self.root);

        // Partial copies stay under the temp name and are removed on drop.
        let partial = tempfile::Builder::new()
            .prefix(UPLOAD_TEMP_PREFIX)
            .tempfile_in(target)
            .map_err(|e| FileSystemError::CreateFailed {
                path: target.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.copy_chunked(src, partial.path())?;
        partial
            .persist(&dest)
            .map_err(|e| e.error)
            .write_context(&dest)?;
        filetime::set_file_mtime(&dest, FileTime::from_last_modification_time(&src_meta))
            .write_context(&dest)?;

        self.item_info(folder, file, true)
    }

    fn delete_item(&mut self, folder: &str, file: &str) -> Result<()> {
        self.cancel.reset();
        let path = item_path(folder, file);

        for sidecar in sidecars(&path) {
            if sidecar.is_file()
                && let Err(e) = fs::remove_file(&sidecar)
            {
                warn!("Failed to remove sidecar {}: {}", sidecar.display(), e);
            }
        }

        fs::remove_file(&path).map_err(|e| {
            FileSystemError::DeleteFailed {
                path: path.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn set_lock_item(&mut self, folder: &str, file: &str, locked: bool) -> Result<()> {
        let path = item_path(folder, file);
        let mut permissions = fs::metadata(&path).read_context(&path)?.permissions();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = permissions.mode();
            permissions.set_mode(if locked { mode & !0o222 } else { mode | 0o200 });
        }
        #[cfg(not(unix))]
        permissions.set_readonly(locked);

        fs::set_permissions(&path, permissions).map_err(|e| {
            FileSystemError::PermissionFailed {
                path: path.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn get_free_space(&mut self) -> Result<FreeSpace> {
        let volume = volume_for(&self.root).ok_or_else(|| DeviceError::OperationFailed {
            operation: "free space",
            reason: format!("no mounted volume contains {}", self.root.display()),
        })?;

        Ok(FreeSpace {
            total_kib: volume.total_bytes / 1024,
            available_kib: volume.available_bytes / 1024,
        })
    }

    fn get_preview(&mut self) -> Result<DynamicImage> {
        Err(DeviceError::Unsupported {
            operation: "preview",
        }
        .into())
    }

    fn capture(&mut self) -> Result<ItemDescriptor> {
        Err(DeviceError::Unsupported {
            operation: "capture",
        }
        .into())
    }

    fn camera_info(&mut self) -> CameraInfo {
        let yes_no = |supported: bool| if supported { "yes" } else { "no" };
        let caps = self.capabilities;

        let summary = format!(
            "\"Mounted Camera\" driver for USB/IEEE1394 mass storage cameras and \
             Flash disk card readers.\n\n\
             Title: \"{}\"\nModel: \"{}\"\nPort: \"{}\"\nPath: \"{}\"\nVolume: \"{}\"\n\n\
             Thumbnails: \"{}\"\nCapture image: \"{}\"\nDelete items: \"{}\"\n\
             Upload items: \"{}\"\nCreate directories: \"{}\"\nDelete directories: \"{}\"\n",
            self.spec.title,
            self.spec.model,
            self.spec.port,
            self.spec.path,
            self.volume_name,
            yes_no(caps.thumbnail),
            yes_no(caps.capture_image),
            yes_no(caps.delete),
            yes_no(caps.upload),
            yes_no(caps.mkdir),
            yes_no(caps.deldir),
        );

        CameraInfo {
            summary,
            manual: "The \"Mounted Camera\" driver reads any camera or card reader \
                     that the operating system mounts as a directory."
                .to_string(),
            about: "The \"Mounted Camera\" driver is a simple interface to a camera disk \
                    mounted locally on your system. It does not talk to the camera \
                    over a picture transfer protocol."
                .to_string(),
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Volume {
    name: String,
    total_bytes: u64,
    available_bytes: u64,
}

/// Mounted volume whose mount point is the longest prefix of `path`.
fn volume_for(path: &Path) -> Option<Volume> {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| Volume {
            name: disk.name().to_string_lossy().to_string(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
}

fn item_path(folder: &str, file: &str) -> PathBuf {
    Path::new(folder).join(file)
}

/// `.thm` and `.THM` thumbnail sidecars next to `path`.
fn sidecars(path: &Path) -> [PathBuf; 2] {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    [
        dir.join(format!("{stem}.thm")),
        dir.join(format!("{stem}.THM")),
    ]
}

/// File the metadata of `path` is read from: a sidecar if one exists.
fn metadata_source(path: &Path) -> PathBuf {
    sidecars(path)
        .into_iter()
        .find(|sidecar| sidecar.is_file())
        .unwrap_or_else(|| path.to_path_buf())
}

fn metadata_capture_time(path: &Path) -> Option<NaiveDateTime> {
    match read_exif(&metadata_source(path)) {
        Ok(exif) => exif.as_ref().and_then(capture_time),
        Err(e) => {
            debug!("No capture time for {}: {}", path.display(), e);
            None
        }
    }
}

fn modification_time(meta: &fs::Metadata) -> Option<NaiveDateTime> {
    meta.modified()
        .ok()
        .map(|time| DateTime::<Local>::from(time).naive_local())
}
