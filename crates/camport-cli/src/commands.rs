//! Implementation of each subcommand.

use std::path::{Path, PathBuf};

use camport_core::{
    BackendCapabilities, CameraInfo, ControllerConfig, ControllerEvent, Decision, DownloadSettings, DownloadStatus,
    FreeSpace, ItemDescriptor, LosslessFormat, PipelineTools, RawConversionOptions,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CliError, CliResult};
use crate::session::{FailurePolicy, Session, finalize};

/// Options of the `import` subcommand.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Folder to import from; the card root when unset.
    pub folder: Option<String>,
    /// Descend into sub-folders.
    pub recursive: bool,
    /// Re-encode JPEG files losslessly.
    pub lossless: Option<LosslessFormat>,
    /// Convert RAW files to DNG with these options.
    pub raw: Option<RawConversionOptions>,
    /// Stamp the original file name as document name.
    pub document_name: bool,
    /// Rating to stamp.
    pub rating: u8,
    /// Post-process script.
    pub script: Option<String>,
    /// Continue after every failed file without asking.
    pub yes: bool,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    title: String,
    device_id: String,
    info: CameraInfo,
    capabilities: BackendCapabilities,
    free_space: FreeSpace,
}

#[derive(Debug, Serialize)]
struct Listing {
    folder: String,
    folders: Vec<String>,
    files: Vec<ItemDescriptor>,
}

/// Print driver information and free space.
pub fn info(mount: &Path, config: ControllerConfig, json: bool) -> CliResult<()> {
    let mut session = Session::connect(
        mount,
        config,
        PipelineTools::default(),
        FailurePolicy::Always(Decision::Abort),
    )?;

    let mut info = CameraInfo::default();
    session.controller().get_camera_info();
    session.run_until_idle(|event| {
        if let ControllerEvent::CameraInfo(received) = event {
            info = received;
        }
    })?;

    let mut free_space = FreeSpace::default();
    session.controller().get_free_space();
    session.run_until_idle(|event| {
        if let ControllerEvent::FreeSpace(space) = event {
            free_space = space;
        }
    })?;

    let report = DeviceReport {
        title: session.controller().title().to_string(),
        device_id: session.controller().device_id().to_string(),
        info,
        capabilities: session.controller().capabilities(),
        free_space,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.info.summary);
        println!(
            "Free space: {} of {} MiB",
            report.free_space.available_kib / 1024,
            report.free_space.total_kib / 1024
        );
        println!("Device id: {}", report.device_id);
        println!("Capabilities: {}", capability_names(&report.capabilities).join(", "));
    }
    Ok(())
}

/// Print sub-folders and files of one folder.
pub fn list(
    mount: &Path,
    config: ControllerConfig,
    folder: Option<String>,
    use_metadata: bool,
    json: bool,
) -> CliResult<()> {
    let mut session = Session::connect(
        mount,
        config,
        PipelineTools::default(),
        FailurePolicy::Always(Decision::Abort),
    )?;
    let folder = folder.unwrap_or_else(|| session.controller().root_folder().to_string());
    let (folders, files) = browse(&mut session, &folder, use_metadata)?;

    let listing = Listing {
        folder,
        folders,
        files,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{}", listing.folder);
    for sub in &listing.folders {
        println!("  {sub}");
    }
    for item in &listing.files {
        let when = item
            .captured_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:<32} {:>12} {:<20} {}",
            item.name, item.size, item.mime, when
        );
    }
    Ok(())
}

/// Download every file of a folder into `dest`.
pub fn import(
    mount: &Path,
    dest: &Path,
    config: ControllerConfig,
    options: &ImportOptions,
) -> CliResult<()> {
    std::fs::create_dir_all(dest).map_err(|e| CliError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let prefix = config.temp_file_prefix.clone();
    let on_failure = if options.yes {
        FailurePolicy::Always(Decision::Continue)
    } else {
        FailurePolicy::Ask
    };
    let mut session = Session::connect(mount, config, PipelineTools::default(), on_failure)?;

    let folder = options
        .folder
        .clone()
        .unwrap_or_else(|| session.controller().root_folder().to_string());
    let items = collect_items(&mut session, &folder, options.recursive)?;
    if items.is_empty() {
        println!("Nothing to import from {folder}");
        return Ok(());
    }

    let batch: Vec<DownloadSettings> = items
        .iter()
        .map(|item| import_settings(item, dest, options))
        .collect();
    let total = batch.len();
    info!("Importing {} files into {}", total, dest.display());

    let mut finished: Vec<PathBuf> = Vec::new();
    let mut failed = 0;
    session.controller().download_all(batch);
    session.run_until_idle(|event| match event {
        ControllerEvent::DownloadProgress {
            status: DownloadStatus::Done,
            temp_path: Some(path),
            ..
        } => finished.push(path),
        ControllerEvent::DownloadProgress {
            file,
            status: DownloadStatus::Failed,
            ..
        } => {
            warn!("Failed to import {}", file);
            failed += 1;
        }
        _ => {}
    })?;

    for working in &finished {
        let target = finalize(working, &prefix)?;
        println!("{}", target.display());
    }

    let skipped = total - finished.len() - failed;
    if failed > 0 || skipped > 0 {
        return Err(CliError::Partial {
            failed: failed + skipped,
            total,
        });
    }
    Ok(())
}

/// Delete files from one folder.
pub fn delete(
    mount: &Path,
    config: ControllerConfig,
    folder: &str,
    files: &[String],
) -> CliResult<()> {
    let mut session = Session::connect(
        mount,
        config,
        PipelineTools::default(),
        FailurePolicy::Always(Decision::Continue),
    )?;
    let mut failed = 0;

    for file in files {
        session.controller().delete_file(folder, file.as_str());
        session.run_until_idle(|event| {
            if let ControllerEvent::DeleteDone { file, success, .. } = event {
                if success {
                    println!("deleted {file}");
                } else {
                    failed += 1;
                }
            }
        })?;
    }

    if failed > 0 {
        return Err(CliError::Partial {
            failed,
            total: files.len(),
        });
    }
    Ok(())
}

/// Set or clear write protection on files of one folder.
pub fn lock(
    mount: &Path,
    config: ControllerConfig,
    folder: &str,
    files: &[String],
    locked: bool,
) -> CliResult<()> {
    let mut session = Session::connect(
        mount,
        config,
        PipelineTools::default(),
        FailurePolicy::Always(Decision::Continue),
    )?;
    let mut failed = 0;
    let verb = if locked { "locked" } else { "unlocked" };

    for file in files {
        session.controller().lock_file(folder, file.as_str(), locked);
        session.run_until_idle(|event| {
            if let ControllerEvent::LockDone { file, success, .. } = event {
                if success {
                    println!("{verb} {file}");
                } else {
                    failed += 1;
                }
            }
        })?;
    }

    if failed > 0 {
        return Err(CliError::Partial {
            failed,
            total: files.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn browse(
    session: &mut Session,
    folder: &str,
    use_metadata: bool,
) -> CliResult<(Vec<String>, Vec<ItemDescriptor>)> {
    let mut folders = Vec::new();
    session.controller().list_folders(folder);
    session.run_until_idle(|event| {
        if let ControllerEvent::FolderList(found) = event {
            folders = found;
        }
    })?;

    let mut files = Vec::new();
    session.controller().list_files(folder, use_metadata);
    session.run_until_idle(|event| {
        if let ControllerEvent::FileList { items, .. } = event {
            files = items;
        }
    })?;

    Ok((folders, files))
}

fn collect_items(
    session: &mut Session,
    folder: &str,
    recursive: bool,
) -> CliResult<Vec<ItemDescriptor>> {
    let (folders, mut items) = browse(session, folder, false)?;

    if recursive {
        for sub in folders {
            items.extend(collect_items(session, &sub, true)?);
        }
    }
    Ok(items)
}

fn capability_names(caps: &BackendCapabilities) -> Vec<&'static str> {
    [
        (caps.thumbnail, "thumbnail"),
        (caps.delete, "delete"),
        (caps.upload, "upload"),
        (caps.mkdir, "mkdir"),
        (caps.deldir, "deldir"),
        (caps.capture_image, "capture-image"),
        (caps.capture_image_preview, "capture-preview"),
    ]
    .into_iter()
    .filter_map(|(supported, name)| supported.then_some(name))
    .collect()
}

fn import_settings(item: &ItemDescriptor, dest: &Path, options: &ImportOptions) -> DownloadSettings {
    let mut settings = DownloadSettings::new(&item.folder, &item.name, &item.mime, dest)
        .with_document_name(options.document_name)
        .with_rating(options.rating);

    if let Some(format) = options.lossless {
        settings = settings.with_lossless(format);
    }
    if let Some(raw) = options.raw {
        settings = settings.with_raw_conversion(
            raw.backup_original,
            raw.lossless_compression,
            raw.preview_mode,
        );
    }
    if let Some(script) = &options.script {
        settings = settings.with_script(script);
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use camport_core::{JPEG_MIME, PreviewMode};

    #[test]
    fn test_capability_names() {
        let caps = BackendCapabilities {
            delete: true,
            upload: true,
            ..BackendCapabilities::default()
        };
        assert_eq!(capability_names(&caps), vec!["delete", "upload"]);
        assert!(capability_names(&BackendCapabilities::default()).is_empty());
    }

    #[test]
    fn test_import_settings() {
        let mut item = ItemDescriptor::new("/card/DCIM/", "IMG_0001.JPG");
        item.mime = JPEG_MIME.to_string();
        let options = ImportOptions {
            lossless: Some(LosslessFormat::Tiff),
            rating: 9,
            script: Some("echo %file".to_string()),
            ..ImportOptions::default()
        };

        let settings = import_settings(&item, Path::new("/photos"), &options);

        assert_eq!(settings.folder, "/card/DCIM/");
        assert_eq!(settings.dest, Path::new("/photos"));
        assert!(settings.convert_jpeg);
        assert_eq!(settings.lossless_format, LosslessFormat::Tiff);
        assert_eq!(settings.rating, 5);
        assert_eq!(settings.script(), Some("echo %file"));
        assert!(!settings.convert_dng);
    }

    #[test]
    fn test_import_settings_with_dng() {
        let mut item = ItemDescriptor::new("/card/DCIM/", "IMG_0002.CR2");
        item.mime = camport_core::RAW_MIME.to_string();
        let options = ImportOptions {
            raw: Some(RawConversionOptions {
                backup_original: true,
                lossless_compression: false,
                preview_mode: PreviewMode::None,
            }),
            ..ImportOptions::default()
        };

        let settings = import_settings(&item, Path::new("/photos"), &options);

        assert!(settings.convert_dng);
        assert!(settings.backup_raw);
        assert!(!settings.compress_dng);
        assert_eq!(settings.preview_mode, PreviewMode::None);
    }
}
