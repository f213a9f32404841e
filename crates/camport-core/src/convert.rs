//! Conversion collaborators used by the download pipeline.
//!
//! - [`LosslessEncoder`] re-encodes a JPEG working file into a lossless
//!   container. [`ImageLosslessEncoder`] implements it with the `image` crate.
//! - [`RawConverter`] repackages a vendor RAW file into the archival
//!   container (DNG). [`crate::DngConverter`] is the default implementation.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConversionError, Error, Result};

/// Extension of the archival RAW container, compared case-insensitively.
pub const RAW_CONTAINER_EXTENSION: &str = "dng";

/// Lossless target format for re-encoded JPEG files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LosslessFormat {
    /// Portable Network Graphics.
    #[default]
    Png,
    /// Tagged Image File Format.
    Tiff,
}

impl LosslessFormat {
    /// File extension (lowercase, without dot).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Tiff => "tif",
        }
    }

    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Tiff => ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for LosslessFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "PNG"),
            Self::Tiff => write!(f, "TIFF"),
        }
    }
}

impl FromStr for LosslessFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "tif" | "tiff" => Ok(Self::Tiff),
            other => Err(Error::Conversion(ConversionError::UnsupportedFormat(
                other.to_string(),
            ))),
        }
    }
}

/// Size of the preview embedded in a RAW container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// No embedded preview.
    None,
    /// Medium size preview.
    #[default]
    Medium,
    /// Full size preview.
    FullSize,
}

/// Options for a RAW container conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawConversionOptions {
    /// Embed the original RAW file inside the container.
    pub backup_original: bool,
    /// Use lossless compression for the image data.
    pub lossless_compression: bool,
    /// Embedded preview size.
    pub preview_mode: PreviewMode,
}

/// Outcome of a RAW container conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawConversionResult {
    /// The container was written.
    Complete,
    /// The conversion failed.
    Failed,
    /// The conversion was cancelled.
    Canceled,
    /// The input is not a RAW file the converter understands.
    UnsupportedFile,
}

impl fmt::Display for RawConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::UnsupportedFile => write!(f, "unsupported file"),
        }
    }
}

/// Re-encodes a JPEG file into a lossless container.
pub trait LosslessEncoder: Send {
    /// Write `src` re-encoded as `format` into `dst`.
    ///
    /// `original_name` is the file name on the device.
    fn reencode(
        &self,
        src: &Path,
        dst: &Path,
        original_name: &str,
        format: LosslessFormat,
    ) -> Result<()>;
}

/// Repackages a vendor RAW file into the archival container.
pub trait RawConverter: Send {
    /// Convert `src` into `dst`.
    fn convert(&self, src: &Path, dst: &Path, options: &RawConversionOptions)
    -> RawConversionResult;
}

/// [`LosslessEncoder`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLosslessEncoder;

impl LosslessEncoder for ImageLosslessEncoder {
    fn reencode(
        &self,
        src: &Path,
        dst: &Path,
        original_name: &str,
        format: LosslessFormat,
    ) -> Result<()> {
        debug!(
            "Re-encoding {} as {}: {} -> {}",
            original_name,
            format,
            src.display(),
            dst.display()
        );

        // The working file keeps the device extension, but check the content anyway.
        let image = ImageReader::open(src)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| {
                Error::Conversion(ConversionError::DecodeFailed {
                    path: src.to_path_buf(),
                    reason: e.to_string(),
                })
            })?
            .decode()
            .map_err(|e| {
                Error::Conversion(ConversionError::DecodeFailed {
                    path: src.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;

        image
            .save_with_format(dst, format.image_format())
            .map_err(|e| {
                Error::Conversion(ConversionError::EncodeFailed {
                    path: dst.to_path_buf(),
                    reason: e.to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_lossless_format_parse() {
        assert_eq!("PNG".parse::<LosslessFormat>().unwrap(), LosslessFormat::Png);
        assert_eq!("tiff".parse::<LosslessFormat>().unwrap(), LosslessFormat::Tiff);
        assert!("jp2".parse::<LosslessFormat>().is_err());
    }

    #[test]
    fn test_lossless_format_extension() {
        assert_eq!(LosslessFormat::Png.extension(), "png");
        assert_eq!(LosslessFormat::Tiff.extension(), "tif");
    }

    #[test]
    fn test_image_encoder_converts_jpeg() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("camport-abc123.IMG_0001.JPG");
        let dst = dir.path().join("camport-def456.IMG_0001.png");

        let img = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        img.save_with_format(&src, ImageFormat::Jpeg).unwrap();

        ImageLosslessEncoder
            .reencode(&src, &dst, "IMG_0001.JPG", LosslessFormat::Png)
            .unwrap();

        let decoded = image::open(&dst).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn test_image_encoder_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("broken.jpg");
        std::fs::write(&src, b"not an image").unwrap();

        let result = ImageLosslessEncoder.reencode(
            &src,
            &dir.path().join("out.png"),
            "broken.jpg",
            LosslessFormat::Png,
        );
        assert!(matches!(
            result,
            Err(Error::Conversion(ConversionError::DecodeFailed { .. }))
        ));
    }
}
