//! Embedded metadata: the editing collaborator used by the download pipeline
//! and the EXIF readers used by the mass-storage backend.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};
use tracing::debug;

use crate::error::{Error, ErrorContext, Result};
use crate::settings::{ColorLabel, DownloadSettings, MAX_RATING, PickLabel};

/// Template title that removes the embedded template instead of merging one.
pub const REMOVE_TEMPLATE_TITLE: &str = "_REMOVE_TEMPLATE_";

/// Writes embedded metadata of a local file.
///
/// Setters queue changes; nothing touches the file until
/// [`MetadataEditor::apply_changes`] commits them in one pass.
pub trait MetadataEditor: Send {
    /// Load the metadata of `path`, discarding any pending change.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Set the document name tag.
    fn set_document_name(&mut self, name: &str);

    /// Override every capture timestamp tag.
    fn set_captured_at(&mut self, when: NaiveDateTime);

    /// Set the pick label.
    fn set_pick_label(&mut self, label: PickLabel);

    /// Set the color label.
    fn set_color_label(&mut self, label: ColorLabel);

    /// Set the rating (1 to 5).
    fn set_rating(&mut self, rating: u8);

    /// Merge the named metadata template into the file's template.
    fn merge_template(&mut self, title: &str);

    /// Remove the embedded metadata template.
    fn remove_template(&mut self);

    /// Write all pending changes back to the loaded file.
    fn apply_changes(&mut self) -> Result<()>;
}

/// What to do with the metadata template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateAction {
    /// Merge the template with this title.
    Merge(String),
    /// Remove the embedded template.
    Remove,
}

/// The set of metadata changes requested by one download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    /// Document name to stamp.
    pub document_name: Option<String>,
    /// Capture timestamp override.
    pub captured_at: Option<NaiveDateTime>,
    /// Pick label.
    pub pick_label: Option<PickLabel>,
    /// Color label.
    pub color_label: Option<ColorLabel>,
    /// Rating.
    pub rating: Option<u8>,
    /// Template change.
    pub template: Option<TemplateAction>,
}

impl MetadataPatch {
    /// Build the patch requested by `settings`.
    #[must_use]
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        let template = settings
            .template
            .as_deref()
            .filter(|title| !title.is_empty())
            .map(|title| {
                if title == REMOVE_TEMPLATE_TITLE {
                    TemplateAction::Remove
                } else {
                    TemplateAction::Merge(title.to_string())
                }
            });

        Self {
            document_name: settings.document_name.then(|| settings.file.clone()),
            captured_at: if settings.fix_date_time {
                settings.new_date_time
            } else {
                None
            },
            pick_label: settings.pick_label,
            color_label: settings.color_label,
            rating: (settings.rating > 0).then(|| settings.rating.min(MAX_RATING)),
            template,
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Load `path` into `editor`, queue every change and commit once.
    ///
    /// Returns `Ok(false)` without touching the file when the patch is empty.
    pub fn apply(&self, editor: &mut dyn MetadataEditor, path: &Path) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        editor.load(path)?;

        if let Some(name) = &self.document_name {
            editor.set_document_name(name);
        }
        if let Some(when) = self.captured_at {
            editor.set_captured_at(when);
        }
        if let Some(label) = self.color_label {
            editor.set_color_label(label);
        }
        if let Some(label) = self.pick_label {
            editor.set_pick_label(label);
        }
        if let Some(rating) = self.rating {
            editor.set_rating(rating);
        }
        match &self.template {
            Some(TemplateAction::Merge(title)) => {
                debug!("Metadata template title: {}", title);
                editor.merge_template(title);
            }
            Some(TemplateAction::Remove) => editor.remove_template(),
            None => {}
        }

        editor.apply_changes()?;
        Ok(true)
    }
}

// =============================================================================
// EXIF reading
// =============================================================================

/// Read the EXIF block of `path`.
///
/// Files without EXIF data, or in a container the reader does not know,
/// yield `Ok(None)`.
pub fn read_exif(path: &Path) -> Result<Option<Exif>> {
    let file = File::open(path).read_context(path)?;
    let mut reader = BufReader::new(file);

    match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Ok(Some(exif)),
        Err(
            exif::Error::NotFound(_)
            | exif::Error::NotSupported(_)
            | exif::Error::BlankValue(_)
            | exif::Error::InvalidFormat(_),
        ) => Ok(None),
        Err(exif::Error::Io(e)) => Err(e).read_context(path),
        Err(e) => Err(Error::Metadata(format!(
            "Failed to parse EXIF of {}: {e}",
            path.display()
        ))),
    }
}

/// Capture time recorded in `exif`, preferring `DateTimeOriginal`.
#[must_use]
pub fn capture_time(exif: &Exif) -> Option<NaiveDateTime> {
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .find_map(|tag| {
            let field = exif.get_field(tag, In::PRIMARY)?;
            let Value::Ascii(ref parts) = field.value else {
                return None;
            };
            let dt = exif::DateTime::from_ascii(parts.first()?).ok()?;
            NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
                .and_hms_opt(
                    u32::from(dt.hour),
                    u32::from(dt.minute),
                    u32::from(dt.second),
                )
        })
}

/// Bytes of the JPEG thumbnail embedded in `exif`, if any.
#[must_use]
pub fn embedded_thumbnail(exif: &Exif) -> Option<&[u8]> {
    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let length = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;

    exif.buf().get(offset..offset.checked_add(length)?)
}
