//! Per-file download settings.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::convert::{LosslessFormat, PreviewMode};

/// Highest rating that can be stamped on an item.
pub const MAX_RATING: u8 = 5;

/// Pick label stamped into embedded metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickLabel {
    /// Rejected item.
    Rejected = 1,
    /// Item pending review.
    Pending = 2,
    /// Accepted item.
    Accepted = 3,
}

/// Color label stamped into embedded metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorLabel {
    /// Red.
    Red = 1,
    /// Orange.
    Orange = 2,
    /// Yellow.
    Yellow = 3,
    /// Green.
    Green = 4,
    /// Blue.
    Blue = 5,
    /// Magenta.
    Magenta = 6,
    /// Gray.
    Gray = 7,
    /// Black.
    Black = 8,
    /// White.
    White = 9,
}

/// Everything the download pipeline needs to fetch and transform one file.
///
/// Immutable for the life of one download command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Folder on the device.
    pub folder: String,
    /// File name on the device.
    pub file: String,
    /// Mime type of the item.
    pub mime: String,
    /// Local destination directory; temp files are created inside it.
    pub dest: PathBuf,
    /// Stamp the original file name as the document name.
    #[serde(default)]
    pub document_name: bool,
    /// Override the capture timestamp with `new_date_time`.
    #[serde(default)]
    pub fix_date_time: bool,
    /// Timestamp used when `fix_date_time` is set.
    #[serde(default)]
    pub new_date_time: Option<NaiveDateTime>,
    /// Metadata template title to merge (or the removal marker).
    #[serde(default)]
    pub template: Option<String>,
    /// Re-encode JPEG files into a lossless format.
    #[serde(default)]
    pub convert_jpeg: bool,
    /// Target format for the lossless re-encode.
    #[serde(default)]
    pub lossless_format: LosslessFormat,
    /// Convert RAW files into the archival container.
    #[serde(default)]
    pub convert_dng: bool,
    /// Embed the original RAW file inside the container.
    #[serde(default)]
    pub backup_raw: bool,
    /// Use lossless compression inside the container.
    #[serde(default)]
    pub compress_dng: bool,
    /// Preview size embedded in the container.
    #[serde(default)]
    pub preview_mode: PreviewMode,
    /// External post-process command line.
    #[serde(default)]
    pub script: Option<String>,
    /// Pick label to stamp.
    #[serde(default)]
    pub pick_label: Option<PickLabel>,
    /// Color label to stamp.
    #[serde(default)]
    pub color_label: Option<ColorLabel>,
    /// Rating to stamp (1 to 5; 0 means none).
    #[serde(default)]
    pub rating: u8,
}

impl DownloadSettings {
    /// Create settings for a plain download with no transformations.
    pub fn new(
        folder: impl Into<String>,
        file: impl Into<String>,
        mime: impl Into<String>,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            folder: folder.into(),
            file: file.into(),
            mime: mime.into(),
            dest: dest.into(),
            document_name: false,
            fix_date_time: false,
            new_date_time: None,
            template: None,
            convert_jpeg: false,
            lossless_format: LosslessFormat::default(),
            convert_dng: false,
            backup_raw: false,
            compress_dng: false,
            preview_mode: PreviewMode::default(),
            script: None,
            pick_label: None,
            color_label: None,
            rating: 0,
        }
    }

    /// Stamp the original file name as document name.
    #[must_use]
    pub const fn with_document_name(mut self, enabled: bool) -> Self {
        self.document_name = enabled;
        self
    }

    /// Override the capture timestamp.
    #[must_use]
    pub const fn with_date_time(mut self, when: NaiveDateTime) -> Self {
        self.fix_date_time = true;
        self.new_date_time = Some(when);
        self
    }

    /// Merge (or remove) a metadata template.
    #[must_use]
    pub fn with_template(mut self, title: impl Into<String>) -> Self {
        self.template = Some(title.into());
        self
    }

    /// Re-encode JPEG files into `format`.
    #[must_use]
    pub const fn with_lossless(mut self, format: LosslessFormat) -> Self {
        self.convert_jpeg = true;
        self.lossless_format = format;
        self
    }

    /// Convert RAW files into the archival container.
    #[must_use]
    pub const fn with_raw_conversion(
        mut self,
        backup_raw: bool,
        compress: bool,
        preview_mode: PreviewMode,
    ) -> Self {
        self.convert_dng = true;
        self.backup_raw = backup_raw;
        self.compress_dng = compress;
        self.preview_mode = preview_mode;
        self
    }

    /// Run an external command on the downloaded file.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Stamp a pick label.
    #[must_use]
    pub const fn with_pick_label(mut self, label: PickLabel) -> Self {
        self.pick_label = Some(label);
        self
    }

    /// Stamp a color label.
    #[must_use]
    pub const fn with_color_label(mut self, label: ColorLabel) -> Self {
        self.color_label = Some(label);
        self
    }

    /// Stamp a rating, clamped to [`MAX_RATING`].
    #[must_use]
    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = rating.min(MAX_RATING);
        self
    }

    /// The script to run, if one is configured and not blank.
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        self.script
            .as_deref()
            .map(str::trim)
            .filter(|script| !script.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_settings_are_plain() {
        let settings = DownloadSettings::new("/DCIM/", "a.jpg", "image/jpeg", "/tmp/out");
        assert!(!settings.convert_jpeg);
        assert!(!settings.convert_dng);
        assert!(settings.script().is_none());
        assert_eq!(settings.rating, 0);
    }

    #[test]
    fn test_builder() {
        let settings = DownloadSettings::new("/DCIM/", "img1.CR2", "image/x-raw", "/tmp/out")
            .with_raw_conversion(false, true, PreviewMode::FullSize)
            .with_rating(9)
            .with_script("  ");

        assert!(settings.convert_dng);
        assert!(settings.compress_dng);
        assert!(!settings.backup_raw);
        assert_eq!(settings.preview_mode, PreviewMode::FullSize);
        assert_eq!(settings.rating, MAX_RATING);
        assert!(settings.script().is_none());
    }

    #[test]
    fn test_settings_deserialize_defaults() {
        let json = r#"{"folder":"/DCIM/","file":"a.jpg","mime":"image/jpeg","dest":"/tmp"}"#;
        let settings: DownloadSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.lossless_format, LosslessFormat::Png);
        assert_eq!(settings.preview_mode, PreviewMode::Medium);
        assert!(settings.pick_label.is_none());
    }
}
