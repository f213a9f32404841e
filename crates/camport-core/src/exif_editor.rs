//! [`MetadataEditor`] that rewrites the EXIF block of JPEG files.
//!
//! The existing EXIF fields are read back, the queued changes replace the
//! matching primary-IFD tags, and the re-encoded block is spliced into the
//! file as a fresh `APP1` segment. Labels and templates live in XMP, which
//! this editor does not write; queueing one makes
//! [`MetadataEditor::apply_changes`] report an error after the EXIF changes
//! are committed.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Context, Exif, Field, In, Reader, Tag, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, ErrorContext, FileSystemError, Result};
use crate::metadata::{MetadataEditor, embedded_thumbnail};
use crate::settings::{ColorLabel, PickLabel};

/// TIFF `DocumentName`.
pub const DOCUMENT_NAME: Tag = Tag(Context::Tiff, 0x010d);

/// Windows star rating (0 to 5).
pub const RATING: Tag = Tag(Context::Tiff, 0x4746);

/// Windows rating in percent.
pub const RATING_PERCENT: Tag = Tag(Context::Tiff, 0x4749);

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const COM: u8 = 0xFE;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// EXIF editor for JPEG working files.
#[derive(Debug, Default)]
pub struct ExifEditor {
    path: Option<PathBuf>,
    pending: Vec<Field>,
    unsupported: Vec<&'static str>,
}

impl ExifEditor {
    /// Create an editor with no file loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, tag: Tag, value: Value) {
        self.pending.retain(|field| field.tag != tag);
        self.pending.push(Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        });
    }

    fn unsupported(&mut self, change: &'static str) {
        if !self.unsupported.contains(&change) {
            self.unsupported.push(change);
        }
    }
}

impl MetadataEditor for ExifEditor {
    fn load(&mut self, path: &Path) -> Result<()> {
        fs::metadata(path).read_context(path)?;
        self.path = Some(path.to_path_buf());
        self.pending.clear();
        self.unsupported.clear();
        Ok(())
    }

    fn set_document_name(&mut self, name: &str) {
        self.set(DOCUMENT_NAME, ascii(name));
    }

    fn set_captured_at(&mut self, when: NaiveDateTime) {
        let stamp = when.format("%Y:%m:%d %H:%M:%S").to_string();
        for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
            self.set(tag, ascii(&stamp));
        }
    }

    fn set_pick_label(&mut self, _label: PickLabel) {
        self.unsupported("pick label");
    }

    fn set_color_label(&mut self, _label: ColorLabel) {
        self.unsupported("color label");
    }

    fn set_rating(&mut self, rating: u8) {
        self.set(RATING, Value::Short(vec![u16::from(rating)]));
        self.set(RATING_PERCENT, Value::Short(vec![rating_percent(rating)]));
    }

    fn merge_template(&mut self, _title: &str) {
        self.unsupported("metadata template");
    }

    fn remove_template(&mut self) {
        self.unsupported("metadata template");
    }

    fn apply_changes(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::Metadata("No file loaded".to_string()))?;
        let pending = std::mem::take(&mut self.pending);
        let unsupported = std::mem::take(&mut self.unsupported);

        if !pending.is_empty() {
            let jpeg = fs::read(&path).read_context(&path)?;
            let tiff = encode_exif(&jpeg, &pending)?;
            let patched = splice_exif(&jpeg, &tiff)
                .map_err(|reason| Error::Metadata(format!("{}: {reason}", path.display())))?;
            replace_file(&path, &patched)?;
            debug!("Wrote {} EXIF change(s) to {}", pending.len(), path.display());
        }

        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(Error::Metadata(format!(
                "EXIF cannot store {}",
                unsupported.join(", ")
            )))
        }
    }
}

fn ascii(text: &str) -> Value {
    Value::Ascii(vec![text.as_bytes().to_vec()])
}

const fn rating_percent(rating: u8) -> u16 {
    match rating {
        0 => 0,
        1 => 1,
        2 => 25,
        3 => 50,
        4 => 75,
        _ => 99,
    }
}

/// Merge `pending` over the EXIF already in `jpeg` and encode a TIFF block.
fn encode_exif(jpeg: &[u8], pending: &[Field]) -> Result<Vec<u8>> {
    let existing = match Reader::new().read_from_container(&mut Cursor::new(jpeg)) {
        Ok(exif) => Some(exif),
        Err(
            exif::Error::NotFound(_)
            | exif::Error::NotSupported(_)
            | exif::Error::BlankValue(_)
            | exif::Error::InvalidFormat(_),
        ) => None,
        Err(e) => return Err(Error::Metadata(format!("Failed to parse EXIF: {e}"))),
    };

    let mut writer = Writer::new();
    let mut has_thumbnail_ifd = false;
    if let Some(exif) = &existing {
        for field in exif.fields() {
            let replaced =
                field.ifd_num == In::PRIMARY && pending.iter().any(|p| p.tag == field.tag);
            // Unknown values cannot be re-encoded.
            if replaced || matches!(field.value, Value::Unknown(..)) {
                continue;
            }
            has_thumbnail_ifd |= field.ifd_num == In::THUMBNAIL;
            writer.push_field(field);
        }
    }
    for field in pending {
        writer.push_field(field);
    }

    let thumbnail = existing.as_ref().and_then(|exif| embedded_thumbnail(exif));
    if has_thumbnail_ifd && let Some(bytes) = thumbnail {
        writer.set_jpeg(bytes, In::THUMBNAIL);
    }

    let little_endian = existing.as_ref().is_none_or(Exif::little_endian);
    let mut out = Cursor::new(Vec::new());
    writer
        .write(&mut out, little_endian)
        .map_err(|e| Error::Metadata(format!("Failed to encode EXIF: {e}")))?;
    Ok(out.into_inner())
}

/// Replace the EXIF `APP1` segment of `jpeg` with `tiff`.
///
/// The new segment goes right after any leading `APP0` (JFIF) segments.
fn splice_exif(jpeg: &[u8], tiff: &[u8]) -> std::result::Result<Vec<u8>, &'static str> {
    if !jpeg.starts_with(&SOI) {
        return Err("not a JPEG file");
    }
    let payload_len = 2 + EXIF_HEADER.len() + tiff.len();
    let segment_len = u16::try_from(payload_len).map_err(|_| "EXIF block too large")?;

    let mut kept: Vec<&[u8]> = Vec::new();
    let mut insert_at = 0;
    let mut pos = SOI.len();
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if !(APP0..=0xEF).contains(&marker) && marker != COM {
            break;
        }
        let len = usize::from(u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]));
        let end = pos + 2 + len;
        if len < 2 || end > jpeg.len() {
            return Err("truncated JPEG segment");
        }

        let segment = &jpeg[pos..end];
        if !(marker == APP1 && segment[4..].starts_with(EXIF_HEADER)) {
            if marker == APP0 && insert_at == kept.len() {
                insert_at += 1;
            }
            kept.push(segment);
        }
        pos = end;
    }

    let mut out = Vec::with_capacity(jpeg.len() + payload_len + 2);
    out.extend_from_slice(&SOI);
    for segment in &kept[..insert_at] {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    for segment in &kept[insert_at..] {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(&jpeg[pos..]);
    Ok(out)
}

/// Write `bytes` next to `path` and rename over it.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| FileSystemError::CreateFailed {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    temp.write_all(bytes).write_context(temp.path())?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions()).write_context(temp.path())?;
    }
    temp.persist(path).map_err(|e| e.error).write_context(path)?;
    Ok(())
}
