//! Per-file download pipeline.
//!
//! One download runs these stages on the worker thread:
//!
//! 1. transfer into a fresh working file
//! 2. JPEG: metadata patch, then optional lossless re-encode
//! 3. RAW: optional conversion into the archival container
//! 4. optional post-process script
//!
//! Only the transfer can fail the download. Every later stage degrades to a
//! warning or error log and hands the previous working file on.

use std::path::{Path, PathBuf};

use tokio::runtime::Runtime;
use tracing::debug;

use crate::backend::DeviceBackend;
use crate::config::ControllerConfig;
use crate::convert::{
    ImageLosslessEncoder, LosslessEncoder, RAW_CONTAINER_EXTENSION, RawConversionOptions,
    RawConversionResult, RawConverter,
};
use crate::dng_converter::DngConverter;
use crate::error::{Error, ScriptError};
use crate::exif_editor::ExifEditor;
use crate::event::{ControllerEvent, DownloadStatus, EventSink, LogLevel};
use crate::item::{base_name_of, extension_of, is_jpeg_mime, is_raw_mime};
use crate::metadata::{MetadataEditor, MetadataPatch};
use crate::script::{self, ScriptContext};
use crate::settings::DownloadSettings;
use crate::temp::{create_temp_file, remove_temp_file};

/// Pluggable post-processing stages.
///
/// Defaults to [`ImageLosslessEncoder`], [`DngConverter`] and
/// [`ExifEditor`]. Clearing `raw` or `metadata` turns the matching stage into
/// a warning.
pub struct PipelineTools {
    /// JPEG re-encoder.
    pub lossless: Box<dyn LosslessEncoder>,
    /// RAW to archival container converter.
    pub raw: Option<Box<dyn RawConverter>>,
    /// Metadata editor used for JPEG patches.
    pub metadata: Option<Box<dyn MetadataEditor>>,
}

impl Default for PipelineTools {
    fn default() -> Self {
        Self {
            lossless: Box::new(ImageLosslessEncoder),
            raw: Some(Box::new(DngConverter::new())),
            metadata: Some(Box::new(ExifEditor::new())),
        }
    }
}

impl std::fmt::Debug for PipelineTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTools")
            .field("raw", &self.raw.is_some())
            .field("metadata", &self.metadata.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineTools {
    /// Replace the lossless encoder.
    #[must_use]
    pub fn with_lossless_encoder(mut self, encoder: impl LosslessEncoder + 'static) -> Self {
        self.lossless = Box::new(encoder);
        self
    }

    /// Enable RAW conversion through `converter`.
    #[must_use]
    pub fn with_raw_converter(mut self, converter: impl RawConverter + 'static) -> Self {
        self.raw = Some(Box::new(converter));
        self
    }

    /// Enable JPEG metadata patches through `editor`.
    #[must_use]
    pub fn with_metadata_editor(mut self, editor: impl MetadataEditor + 'static) -> Self {
        self.metadata = Some(Box::new(editor));
        self
    }
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PipelineOutcome {
    /// The pipeline finished with this working file.
    Done(PathBuf),
    /// The transfer failed; nothing is left on disk.
    Failed,
}

/// Borrowed view of the worker state one download needs.
pub(crate) struct DownloadPipeline<'a> {
    pub(crate) backend: &'a mut dyn DeviceBackend,
    pub(crate) tools: &'a mut PipelineTools,
    pub(crate) config: &'a ControllerConfig,
    pub(crate) events: &'a EventSink,
    pub(crate) runtime: &'a Runtime,
}

impl DownloadPipeline<'_> {
    /// Run every stage for one file and emit its progress events.
    pub(crate) fn run(&mut self, settings: &DownloadSettings) -> PipelineOutcome {
        let folder = settings.folder.as_str();
        let file = settings.file.as_str();

        self.progress(settings, None, DownloadStatus::Started);

        let Some(transferred) = self.transfer(settings) else {
            self.progress(settings, None, DownloadStatus::Failed);
            return PipelineOutcome::Failed;
        };

        let mut working = transferred;

        if is_jpeg_mime(&settings.mime) {
            self.patch_metadata(settings, &working);
            if settings.convert_jpeg {
                working = self.reencode_lossless(settings, working);
            }
        } else if settings.convert_dng && is_raw_mime(&settings.mime) {
            working = self.convert_raw(settings, working);
        }

        if let Some(script) = settings.script() {
            self.run_script(settings, script, &working);
        }

        debug!("Download of {}{} done: {}", folder, file, working.display());
        self.progress(settings, Some(working.clone()), DownloadStatus::Done);
        PipelineOutcome::Done(working)
    }

    fn progress(&self, settings: &DownloadSettings, temp_path: Option<PathBuf>, status: DownloadStatus) {
        self.events.emit(ControllerEvent::DownloadProgress {
            folder: settings.folder.clone(),
            file: settings.file.clone(),
            temp_path,
            status,
        });
    }

    fn working_file(&self, settings: &DownloadSettings, name: &str) -> crate::Result<PathBuf> {
        create_temp_file(&settings.dest, &self.config.temp_file_prefix, name)
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    fn transfer(&mut self, settings: &DownloadSettings) -> Option<PathBuf> {
        let folder = settings.folder.as_str();
        let file = settings.file.as_str();

        let temp = match self.working_file(settings, file) {
            Ok(path) => path,
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to download {file}: {e}"), folder, file);
                return None;
            }
        };

        debug!("Downloading {} using {}", file, temp.display());

        let result = self.backend.download_item(folder, file, &temp);
        if result.is_ok() && !self.events.is_canceled() {
            return Some(temp);
        }

        remove_temp_file(&temp);
        let message = match result {
            Err(e) => format!("Failed to download {file}: {e}"),
            Ok(()) => format!("Failed to download {file}: canceled"),
        };
        self.events.log(LogLevel::Error, message, folder, file);
        None
    }

    // =========================================================================
    // JPEG stages
    // =========================================================================

    fn patch_metadata(&mut self, settings: &DownloadSettings, working: &Path) {
        let patch = MetadataPatch::from_settings(settings);
        if patch.is_empty() {
            return;
        }

        let Some(editor) = self.tools.metadata.as_deref_mut() else {
            self.events.log(
                LogLevel::Warning,
                format!("Failed to update metadata of {}: no metadata editor", settings.file),
                &settings.folder,
                &settings.file,
            );
            return;
        };

        if let Err(e) = patch.apply(editor, working) {
            self.events.log(
                LogLevel::Warning,
                format!("Failed to update metadata of {}: {e}", settings.file),
                &settings.folder,
                &settings.file,
            );
        }
    }

    fn reencode_lossless(&mut self, settings: &DownloadSettings, working: PathBuf) -> PathBuf {
        let folder = settings.folder.as_str();
        let file = settings.file.as_str();
        let format = settings.lossless_format;
        let name = format!("{}.{}", base_name_of(file), format.extension());

        let converted = match self.working_file(settings, &name) {
            Ok(path) => path,
            Err(e) => {
                self.events.log(
                    LogLevel::Warning,
                    format!("Failed to convert {file} to {format}: {e}"),
                    folder,
                    file,
                );
                return working;
            }
        };

        match self.tools.lossless.reencode(&working, &converted, file, format) {
            Ok(()) => {
                remove_temp_file(&working);
                converted
            }
            Err(e) => {
                remove_temp_file(&converted);
                self.events.log(
                    LogLevel::Warning,
                    format!("Failed to convert {file} to {format}: {e}"),
                    folder,
                    file,
                );
                working
            }
        }
    }

    // =========================================================================
    // RAW stage
    // =========================================================================

    fn convert_raw(&self, settings: &DownloadSettings, working: PathBuf) -> PathBuf {
        let folder = settings.folder.as_str();
        let file = settings.file.as_str();

        let already_container = extension_of(file)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(RAW_CONTAINER_EXTENSION));
        if already_container {
            self.events.log(
                LogLevel::Warning,
                format!("Skipped converting {file} to DNG"),
                folder,
                file,
            );
            return working;
        }

        let Some(converter) = self.tools.raw.as_deref() else {
            self.events.log(
                LogLevel::Warning,
                format!(
                    "Failed to convert {file} to DNG: {}",
                    RawConversionResult::UnsupportedFile
                ),
                folder,
                file,
            );
            return working;
        };

        let name = format!("{}.{}", base_name_of(file), RAW_CONTAINER_EXTENSION);
        let converted = match self.working_file(settings, &name) {
            Ok(path) => path,
            Err(e) => {
                self.events.log(
                    LogLevel::Warning,
                    format!("Failed to convert {file} to DNG: {e}"),
                    folder,
                    file,
                );
                return working;
            }
        };

        let options = RawConversionOptions {
            backup_original: settings.backup_raw,
            lossless_compression: settings.compress_dng,
            preview_mode: settings.preview_mode,
        };

        debug!("Converting {} to DNG in {}", file, converted.display());

        match converter.convert(&working, &converted, &options) {
            RawConversionResult::Complete => {
                remove_temp_file(&working);
                converted
            }
            other => {
                remove_temp_file(&converted);
                self.events.log(
                    LogLevel::Warning,
                    format!("Failed to convert {file} to DNG: {other}"),
                    folder,
                    file,
                );
                working
            }
        }
    }

    // =========================================================================
    // Script stage
    // =========================================================================

    fn run_script(&self, settings: &DownloadSettings, script: &str, working: &Path) {
        let folder = settings.folder.as_str();
        let file = settings.file.as_str();

        let ctx = ScriptContext {
            original_file: file,
            original_folder: folder,
            working_file: working,
            dest: &settings.dest,
        };
        let cmdline = script::expand(script, &ctx);
        debug!("Running script for {}: {}", file, cmdline);

        let result = self
            .runtime
            .block_on(script::run(&cmdline, self.config.script_timeout()));

        match result {
            Ok(()) => {}
            Err(Error::Script(ScriptError::TimedOut { timeout_secs, .. })) => self.events.log(
                LogLevel::Error,
                format!("Timeout from script for {file} after {timeout_secs}s"),
                folder,
                file,
            ),
            Err(e) => self.events.log(
                LogLevel::Error,
                format!("Failed to run script for {file}: {e}"),
                folder,
                file,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDeviceBackend;
    use crate::convert::{LosslessFormat, PreviewMode};
    use crate::error::{ConversionError, DeviceError};
    use crate::event::LogEntry;
    use crate::item::{JPEG_MIME, RAW_MIME};
    use crate::queue::CommandQueue;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        dest: TempDir,
        events: EventSink,
        rx: mpsc::UnboundedReceiver<ControllerEvent>,
        runtime: Runtime,
        config: ControllerConfig,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                dest: TempDir::new().unwrap(),
                events: EventSink::new(tx, Arc::new(CommandQueue::new())),
                rx,
                runtime: tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap(),
                config: ControllerConfig::default(),
            }
        }

        fn run(
            &self,
            backend: &mut MockDeviceBackend,
            tools: &mut PipelineTools,
            settings: &DownloadSettings,
        ) -> PipelineOutcome {
            DownloadPipeline {
                backend,
                tools,
                config: &self.config,
                events: &self.events,
                runtime: &self.runtime,
            }
            .run(settings)
        }

        fn drain(&mut self) -> Vec<ControllerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn files(&self) -> Vec<PathBuf> {
            let mut files: Vec<PathBuf> = fs::read_dir(self.dest.path())
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .collect();
            files.sort();
            files
        }
    }

    fn warnings(events: &[ControllerEvent]) -> Vec<&LogEntry> {
        events
            .iter()
            .filter_map(|event| match event {
                ControllerEvent::LogMessage(entry) if entry.level == LogLevel::Warning => {
                    Some(entry)
                }
                _ => None,
            })
            .collect()
    }

    fn done_path(events: &[ControllerEvent]) -> Option<PathBuf> {
        events.iter().find_map(|event| match event {
            ControllerEvent::DownloadProgress {
                status: DownloadStatus::Done,
                temp_path,
                ..
            } => temp_path.clone(),
            _ => None,
        })
    }

    /// Backend whose transfer writes `content` and records the destination.
    fn writing_backend(
        content: impl AsRef<[u8]> + Send + 'static,
    ) -> (MockDeviceBackend, Arc<Mutex<Option<PathBuf>>>) {
        let seen = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&seen);
        let mut backend = MockDeviceBackend::new();
        backend
            .expect_download_item()
            .times(1)
            .returning(move |_, _, dest| {
                fs::write(dest, content.as_ref()).unwrap();
                *recorded.lock().unwrap() = Some(dest.to_path_buf());
                Ok(())
            });
        (backend, seen)
    }

    struct RecordingConverter {
        calls: Arc<Mutex<Vec<RawConversionOptions>>>,
        result: RawConversionResult,
    }

    impl RawConverter for RecordingConverter {
        fn convert(
            &self,
            _src: &Path,
            dst: &Path,
            options: &RawConversionOptions,
        ) -> RawConversionResult {
            self.calls.lock().unwrap().push(*options);
            if self.result == RawConversionResult::Complete {
                fs::write(dst, b"dng").unwrap();
            }
            self.result
        }
    }

    struct FailingEncoder;

    impl LosslessEncoder for FailingEncoder {
        fn reencode(&self, src: &Path, _dst: &Path, _name: &str, _format: LosslessFormat) -> crate::Result<()> {
            Err(ConversionError::DecodeFailed {
                path: src.to_path_buf(),
                reason: "corrupt".to_string(),
            }
            .into())
        }
    }

    #[test]
    fn test_raw_conversion_replaces_working_file() {
        let mut harness = Harness::new();
        let (mut backend, _) = writing_backend(b"raw");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut tools = PipelineTools::default().with_raw_converter(RecordingConverter {
            calls: Arc::clone(&calls),
            result: RawConversionResult::Complete,
        });

        let settings = DownloadSettings::new("/DCIM/", "img1.CR2", RAW_MIME, harness.dest.path())
            .with_raw_conversion(false, true, PreviewMode::FullSize);

        let outcome = harness.run(&mut backend, &mut tools, &settings);
        let PipelineOutcome::Done(path) = outcome else {
            panic!("download failed");
        };

        assert_eq!(path.extension().unwrap(), "dng");
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with(".img1.dng"));
        assert_eq!(harness.files(), vec![path.clone()]);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].lossless_compression);
        assert!(!calls[0].backup_original);
        assert_eq!(calls[0].preview_mode, PreviewMode::FullSize);

        let events = harness.drain();
        assert!(matches!(
            events.first(),
            Some(ControllerEvent::DownloadProgress {
                status: DownloadStatus::Started,
                ..
            })
        ));
        assert_eq!(done_path(&events), Some(path));
        assert!(warnings(&events).is_empty());
    }

    #[test]
    fn test_plain_jpeg_keeps_transfer_file() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"jpeg");
        let mut tools = PipelineTools::default();

        let settings = DownloadSettings::new("/DCIM/", "a.jpg", JPEG_MIME, harness.dest.path());
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred.clone()));
        assert_eq!(fs::read(&transferred).unwrap(), b"jpeg");

        let events = harness.drain();
        assert_eq!(done_path(&events), Some(transferred));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_failed_reencode_degrades_with_one_warning() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"jpeg");
        let mut tools = PipelineTools::default().with_lossless_encoder(FailingEncoder);

        let settings = DownloadSettings::new("/DCIM/", "a.jpg", JPEG_MIME, harness.dest.path())
            .with_lossless(LosslessFormat::Png);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred.clone()));
        assert_eq!(harness.files(), vec![transferred]);

        let events = harness.drain();
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("a.jpg"));
    }

    #[test]
    fn test_existing_container_is_not_converted() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"dng");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut tools = PipelineTools::default().with_raw_converter(RecordingConverter {
            calls: Arc::clone(&calls),
            result: RawConversionResult::Complete,
        });

        let settings = DownloadSettings::new("/DCIM/", "img1.DNG", RAW_MIME, harness.dest.path())
            .with_raw_conversion(false, false, PreviewMode::Medium);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred));
        assert!(calls.lock().unwrap().is_empty());

        let events = harness.drain();
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with("Skipped"));
    }

    #[test]
    fn test_raw_left_alone_without_conversion_flag() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"dng");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut tools = PipelineTools::default().with_raw_converter(RecordingConverter {
            calls: Arc::clone(&calls),
            result: RawConversionResult::Complete,
        });

        let settings = DownloadSettings::new("/DCIM/", "img1.DNG", RAW_MIME, harness.dest.path());
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred));
        assert!(calls.lock().unwrap().is_empty());
        assert!(warnings(&harness.drain()).is_empty());
    }

    #[test]
    fn test_failed_raw_conversion_removes_partial_output() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"raw");
        let mut tools = PipelineTools::default().with_raw_converter(RecordingConverter {
            calls: Arc::new(Mutex::new(Vec::new())),
            result: RawConversionResult::Failed,
        });

        let settings = DownloadSettings::new("/DCIM/", "img2.NEF", RAW_MIME, harness.dest.path())
            .with_raw_conversion(true, false, PreviewMode::None);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred.clone()));
        assert_eq!(harness.files(), vec![transferred]);
        assert_eq!(warnings(&harness.drain()).len(), 1);
    }

    #[test]
    fn test_transfer_failure_removes_temp_file() {
        let mut harness = Harness::new();
        let mut backend = MockDeviceBackend::new();
        backend.expect_download_item().times(1).returning(|folder, file, dest| {
            fs::write(dest, b"partial").unwrap();
            Err(DeviceError::ItemNotFound {
                folder: folder.to_string(),
                file: file.to_string(),
            }
            .into())
        });
        let mut tools = PipelineTools::default();

        let settings = DownloadSettings::new("/DCIM/", "gone.jpg", JPEG_MIME, harness.dest.path());
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        assert_eq!(outcome, PipelineOutcome::Failed);
        assert!(harness.files().is_empty());

        let events = harness.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            ControllerEvent::LogMessage(entry) if entry.level == LogLevel::Error
        ));
        assert!(matches!(
            &events[2],
            ControllerEvent::DownloadProgress {
                status: DownloadStatus::Failed,
                temp_path: None,
                ..
            }
        ));
    }

    #[test]
    fn test_patch_without_editor_warns() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"jpeg");
        let mut tools = PipelineTools {
            metadata: None,
            ..PipelineTools::default()
        };

        let settings = DownloadSettings::new("/DCIM/", "a.jpg", JPEG_MIME, harness.dest.path())
            .with_document_name(true);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred.clone()));
        assert_eq!(fs::read(&transferred).unwrap(), b"jpeg");

        let events = harness.drain();
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("no metadata editor"));
    }

    #[test]
    fn test_default_editor_stamps_document_name() {
        let mut harness = Harness::new();
        let mut jpeg = Vec::new();
        image::RgbImage::from_pixel(16, 16, image::Rgb([0, 90, 180]))
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let (mut backend, seen) = writing_backend(jpeg);
        let mut tools = PipelineTools::default();

        let settings = DownloadSettings::new("/DCIM/", "IMG_0042.JPG", JPEG_MIME, harness.dest.path())
            .with_document_name(true)
            .with_rating(3);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred.clone()));
        assert!(warnings(&harness.drain()).is_empty());

        let exif = crate::metadata::read_exif(&transferred).unwrap().unwrap();
        let name = exif
            .get_field(crate::exif_editor::DOCUMENT_NAME, exif::In::PRIMARY)
            .unwrap()
            .display_value()
            .to_string();
        assert!(name.contains("IMG_0042.JPG"));
    }

    #[test]
    fn test_cancel_during_transfer_skips_later_stages() {
        let mut harness = Harness::new();
        let queue = Arc::new(CommandQueue::new());
        let (tx, rx) = mpsc::unbounded_channel();
        harness.events = EventSink::new(tx, Arc::clone(&queue));
        harness.rx = rx;

        let mut backend = MockDeviceBackend::new();
        backend.expect_download_item().times(1).returning(move |_, _, dest| {
            fs::write(dest, b"complete but canceled").unwrap();
            queue.cancel();
            Ok(())
        });
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut tools = PipelineTools::default().with_raw_converter(RecordingConverter {
            calls: Arc::clone(&calls),
            result: RawConversionResult::Complete,
        });

        let settings = DownloadSettings::new("/DCIM/", "img3.CR2", RAW_MIME, harness.dest.path())
            .with_raw_conversion(false, false, PreviewMode::Medium);
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        assert_eq!(outcome, PipelineOutcome::Failed);
        assert!(harness.files().is_empty());
        assert!(calls.lock().unwrap().is_empty());

        let events = harness.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            ControllerEvent::DownloadProgress {
                status: DownloadStatus::Failed,
                temp_path: None,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_does_not_fail_download() {
        let mut harness = Harness::new();
        let (mut backend, seen) = writing_backend(b"jpeg");
        let mut tools = PipelineTools::default();

        let settings = DownloadSettings::new("/DCIM/", "a.jpg", JPEG_MIME, harness.dest.path())
            .with_script("false %file");
        let outcome = harness.run(&mut backend, &mut tools, &settings);

        let transferred = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome, PipelineOutcome::Done(transferred));

        let errors: Vec<_> = harness
            .drain()
            .into_iter()
            .filter(|event| {
                matches!(event, ControllerEvent::LogMessage(entry) if entry.level == LogLevel::Error)
            })
            .collect();
        assert_eq!(errors.len(), 1);
    }
}
