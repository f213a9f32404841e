//! Descriptors for items stored on a capture device.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Mime type reported for JPEG items.
pub const JPEG_MIME: &str = "image/jpeg";

/// Mime type reported for vendor RAW items.
pub const RAW_MIME: &str = "image/x-raw";

/// Extensions classified as vendor RAW files.
const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "arw", "bay", "cr2", "cr3", "crw", "dcr", "dng", "erf", "iiq", "k25", "kdc", "mef",
    "mos", "mrw", "nef", "nrw", "orf", "pef", "raf", "raw", "rw2", "rwl", "sr2", "srf", "srw",
    "x3f",
];

/// Information about one item on the device, as produced by listing,
/// upload and capture operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Folder on the device, always ending with `/`.
    pub folder: String,
    /// File name inside the folder.
    pub name: String,
    /// Mime type; empty when the type is not recognised.
    pub mime: String,
    /// Size in bytes.
    pub size: u64,
    /// Identity assigned by the device.
    pub id: String,
    /// Whether the item is readable.
    pub readable: bool,
    /// Whether the item is writable (i.e. not locked).
    pub writable: bool,
    /// Capture time from metadata, or file time as fallback.
    pub captured_at: Option<NaiveDateTime>,
    /// Whether a preview can be generated for this item.
    pub preview_possible: bool,
}

impl ItemDescriptor {
    /// Create a descriptor carrying only the location of an item.
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: normalize_folder(&folder.into()),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Full device path of the item.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}{}", normalize_folder(&self.folder), self.name)
    }

    /// Whether the item is a JPEG file.
    #[must_use]
    pub fn is_jpeg(&self) -> bool {
        is_jpeg_mime(&self.mime)
    }

    /// Whether the item is a vendor RAW file.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        is_raw_mime(&self.mime)
    }
}

/// Ensure a device folder ends with a single `/`.
#[must_use]
pub fn normalize_folder(folder: &str) -> String {
    if folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{folder}/")
    }
}

/// Whether `mime` denotes a JPEG image.
#[must_use]
pub fn is_jpeg_mime(mime: &str) -> bool {
    mime.eq_ignore_ascii_case(JPEG_MIME)
}

/// Whether `mime` denotes a vendor RAW image.
#[must_use]
pub fn is_raw_mime(mime: &str) -> bool {
    mime.eq_ignore_ascii_case(RAW_MIME)
}

/// Map a lowercase or uppercase file extension to a mime type.
///
/// Returns an empty string for unknown extensions; such items are dropped
/// from file listings.
#[must_use]
pub fn mime_type_for_extension(extension: &str) -> &'static str {
    let ext = extension.to_ascii_lowercase();

    if RAW_EXTENSIONS.contains(&ext.as_str()) {
        return RAW_MIME;
    }

    match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => JPEG_MIME,
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heif",
        "mov" => "video/quicktime",
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mts" | "m2ts" => "video/mp2t",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        "wav" => "audio/x-wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        _ => "",
    }
}

/// Mime type of a path, based on its extension.
#[must_use]
pub fn mime_type_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or("", mime_type_for_extension)
}

/// Extension of a file name without the dot, if any.
#[must_use]
pub fn extension_of(file: &str) -> Option<&str> {
    Path::new(file).extension().and_then(|ext| ext.to_str())
}

/// File name without its last extension.
#[must_use]
pub fn base_name_of(file: &str) -> &str {
    Path::new(file)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_for_extension() {
        assert_eq!(mime_type_for_extension("JPG"), JPEG_MIME);
        assert_eq!(mime_type_for_extension("jpeg"), JPEG_MIME);
        assert_eq!(mime_type_for_extension("CR2"), RAW_MIME);
        assert_eq!(mime_type_for_extension("dng"), RAW_MIME);
        assert_eq!(mime_type_for_extension("MOV"), "video/quicktime");
        assert_eq!(mime_type_for_extension("txt"), "");
    }

    #[test]
    fn test_mime_type_for_path() {
        assert_eq!(mime_type_for_path(Path::new("/card/IMG_0001.NEF")), RAW_MIME);
        assert_eq!(mime_type_for_path(Path::new("/card/README")), "");
    }

    #[test]
    fn test_normalize_folder() {
        assert_eq!(normalize_folder("/DCIM"), "/DCIM/");
        assert_eq!(normalize_folder("/DCIM/"), "/DCIM/");
    }

    #[test]
    fn test_descriptor_path() {
        let item = ItemDescriptor::new("/DCIM/100CANON", "IMG_0001.JPG");
        assert_eq!(item.folder, "/DCIM/100CANON/");
        assert_eq!(item.path(), "/DCIM/100CANON/IMG_0001.JPG");
    }

    #[test]
    fn test_base_name_and_extension() {
        assert_eq!(base_name_of("img1.CR2"), "img1");
        assert_eq!(extension_of("img1.CR2"), Some("CR2"));
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn test_descriptor_kind() {
        let mut item = ItemDescriptor::new("/", "a.jpg");
        item.mime = JPEG_MIME.to_string();
        assert!(item.is_jpeg());
        assert!(!item.is_raw());
    }
}
