//! [`RawConverter`] that repackages vendor RAW files as DNG.
//!
//! The sensor mosaic is decoded with `rawloader` and written unchanged as a
//! 16-bit CFA image, together with the black and white levels, the color
//! matrix and the as-shot white balance. Only 2x2 Bayer sensors with one
//! sample per pixel are supported; anything else is reported as
//! [`RawConversionResult::UnsupportedFile`].
//!
//! The preview, when requested, is a demosaiced RGB image in a second IFD.

use std::fs;
use std::io::{self, Cursor, Write};
use std::panic;
use std::path::Path;
use std::sync::Arc;

use dng::ifd::{Ifd, IfdValue, Offsets};
use dng::tags::ifd as tiff_tags;
use dng::tags::MaybeKnownIfdFieldDescriptor;
use dng::{DngWriter, FileType};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::convert::{PreviewMode, RawConversionOptions, RawConversionResult, RawConverter};
use crate::error::{ConversionError, Result};

/// Longest edge of a [`PreviewMode::Medium`] preview.
pub const MEDIUM_PREVIEW_EDGE: u32 = 1024;

/// DNG specification version written to `DNGVersion`.
const DNG_VERSION: [u8; 4] = [1, 4, 0, 0];

/// Fixed-point scale for rational color values.
const RATIONAL_SCALE: f32 = 10_000.0;

/// D65, the illuminant the color matrix refers to.
const ILLUMINANT_D65: u16 = 21;

const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_CFA: u16 = 32803;
const COMPRESSION_NONE: u16 = 1;

/// [`RawConverter`] backed by `rawloader` and the `dng` writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DngConverter;

impl DngConverter {
    /// Create the converter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RawConverter for DngConverter {
    fn convert(
        &self,
        src: &Path,
        dst: &Path,
        options: &RawConversionOptions,
    ) -> RawConversionResult {
        let image = match decode(src) {
            Ok(image) => image,
            Err(reason) => {
                debug!("Cannot convert {} to DNG: {}", src.display(), reason);
                return RawConversionResult::UnsupportedFile;
            }
        };

        let source_name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut bytes = Cursor::new(Vec::new());
        if let Err(e) = write_dng(&image, &source_name, options, &mut bytes) {
            warn!("Failed to encode {}: {}", dst.display(), e);
            return RawConversionResult::Failed;
        }
        if let Err(e) = fs::write(dst, bytes.into_inner()) {
            warn!("Failed to write {}: {}", dst.display(), e);
            return RawConversionResult::Failed;
        }

        debug!(
            "Converted {} ({}x{} {}) to {}",
            source_name,
            image.width,
            image.height,
            image.model,
            dst.display()
        );
        RawConversionResult::Complete
    }
}

/// Bayer mosaic decoded from a RAW file.
#[derive(Debug, Clone)]
pub(crate) struct SensorImage {
    pub(crate) make: String,
    pub(crate) model: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Color of each 2x2 cell, row major: 0 red, 1 green, 2 blue.
    pub(crate) cfa: [u8; 4],
    pub(crate) black_level: u16,
    pub(crate) white_level: u16,
    pub(crate) xyz_to_cam: [[f32; 3]; 3],
    /// White balance multipliers for red, green and blue.
    pub(crate) wb_coeffs: [f32; 3],
    pub(crate) data: Vec<u16>,
}

impl SensorImage {
    fn from_raw(raw: &rawloader::RawImage) -> std::result::Result<Self, String> {
        if raw.cpp != 1 {
            return Err(format!("{} samples per pixel", raw.cpp));
        }
        if raw.cfa.width != 2 || raw.cfa.height != 2 {
            return Err(format!("CFA pattern {} is not 2x2", raw.cfa.name));
        }

        let mut cfa = [0u8; 4];
        for (index, slot) in cfa.iter_mut().enumerate() {
            let color = raw.cfa.color_at(index / 2, index % 2);
            if color > 2 {
                return Err(format!("CFA pattern {} has a fourth color", raw.cfa.name));
            }
            *slot = color as u8;
        }

        let rawloader::RawImageData::Integer(data) = &raw.data else {
            return Err("floating point samples".to_string());
        };
        if data.len() != raw.width * raw.height {
            return Err(format!(
                "{} samples for a {}x{} sensor",
                data.len(),
                raw.width,
                raw.height
            ));
        }

        Ok(Self {
            make: raw.make.clone(),
            model: raw.model.clone(),
            width: u32::try_from(raw.width).map_err(|e| e.to_string())?,
            height: u32::try_from(raw.height).map_err(|e| e.to_string())?,
            cfa,
            black_level: raw.blacklevels[0],
            white_level: raw.whitelevels[0],
            xyz_to_cam: [raw.xyz_to_cam[0], raw.xyz_to_cam[1], raw.xyz_to_cam[2]],
            wb_coeffs: [raw.wb_coeffs[0], raw.wb_coeffs[1], raw.wb_coeffs[2]],
            data: data.clone(),
        })
    }

    /// Red and blue gains relative to green, 1.0 where unknown.
    fn gains(&self) -> [f32; 3] {
        let green = self.wb_coeffs[1];
        std::array::from_fn(|c| {
            let gain = self.wb_coeffs[c] / green;
            if gain.is_finite() && gain > 0.0 { gain } else { 1.0 }
        })
    }
}

fn decode(src: &Path) -> std::result::Result<SensorImage, String> {
    // Some decoders panic on truncated input.
    let raw = panic::catch_unwind(|| rawloader::decode_file(src))
        .map_err(|_| "decoder panicked".to_string())?
        .map_err(|e| format!("{e:?}"))?;
    SensorImage::from_raw(&raw)
}

/// Pixel data handed to the DNG writer as one strip.
struct StripData(Vec<u8>);

impl Offsets for StripData {
    fn size(&self) -> u32 {
        self.0.len() as u32
    }

    fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

fn strip(ifd: &mut Ifd, bytes: Vec<u8>) {
    let len = bytes.len() as u32;
    let data: Arc<dyn Offsets + Send + Sync> = Arc::new(StripData(bytes));
    ifd.insert(tiff_tags::StripOffsets, IfdValue::Offsets(data));
    ifd.insert(tiff_tags::StripByteCounts, IfdValue::Long(len));
}

fn rational(value: f32) -> IfdValue {
    IfdValue::Rational((value * RATIONAL_SCALE).round() as u32, RATIONAL_SCALE as u32)
}

fn srational(value: f32) -> IfdValue {
    IfdValue::SRational((value * RATIONAL_SCALE).round() as i32, RATIONAL_SCALE as i32)
}

/// Encode `image` as a DNG into `out`.
///
/// The sensor data is always stored uncompressed, which already satisfies
/// `lossless_compression`. `backup_original` records the source file name in
/// `OriginalRawFileName`; the vendor file itself is not embedded.
pub(crate) fn write_dng(
    image: &SensorImage,
    source_name: &str,
    options: &RawConversionOptions,
    out: &mut Cursor<Vec<u8>>,
) -> Result<()> {
    let mut raw = Ifd::default();
    raw.insert(tiff_tags::NewSubfileType, IfdValue::Long(0));
    raw.insert(tiff_tags::ImageWidth, IfdValue::Long(image.width));
    raw.insert(tiff_tags::ImageLength, IfdValue::Long(image.height));
    raw.insert(tiff_tags::BitsPerSample, IfdValue::Short(16));
    raw.insert(tiff_tags::Compression, IfdValue::Short(COMPRESSION_NONE));
    raw.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(PHOTOMETRIC_CFA));
    raw.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(1));
    raw.insert(tiff_tags::RowsPerStrip, IfdValue::Long(image.height));
    raw.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    raw.insert(
        tiff_tags::CFARepeatPatternDim,
        IfdValue::List(vec![IfdValue::Short(2), IfdValue::Short(2)]),
    );
    raw.insert(
        tiff_tags::CFAPattern,
        IfdValue::List(image.cfa.iter().copied().map(IfdValue::Byte).collect()),
    );
    raw.insert(
        tiff_tags::DNGVersion,
        IfdValue::List(DNG_VERSION.iter().copied().map(IfdValue::Byte).collect()),
    );
    raw.insert(tiff_tags::BlackLevel, IfdValue::Short(image.black_level));
    raw.insert(tiff_tags::WhiteLevel, IfdValue::Short(image.white_level));
    raw.insert(
        tiff_tags::ColorMatrix1,
        IfdValue::List(color_matrix(image).into_iter().map(srational).collect()),
    );
    raw.insert(tiff_tags::CalibrationIlluminant1, IfdValue::Short(ILLUMINANT_D65));
    raw.insert(
        tiff_tags::AsShotNeutral,
        IfdValue::List(image.gains().into_iter().map(|gain| rational(1.0 / gain)).collect()),
    );
    raw.insert(tiff_tags::Make, IfdValue::Ascii(image.make.clone()));
    raw.insert(tiff_tags::Model, IfdValue::Ascii(image.model.clone()));
    raw.insert(
        tiff_tags::UniqueCameraModel,
        IfdValue::Ascii(format!("{} {}", image.make, image.model)),
    );
    raw.insert(
        tiff_tags::Software,
        IfdValue::Ascii(format!("camport {}", env!("CARGO_PKG_VERSION"))),
    );
    if options.backup_original && !source_name.is_empty() {
        raw.insert(
            // OriginalRawFileName (DNG tag 50827); not named by the dng crate.
            MaybeKnownIfdFieldDescriptor::Unknown(0xC68B),
            IfdValue::Ascii(source_name.to_string()),
        );
    }
    strip(
        &mut raw,
        image.data.iter().flat_map(|sample| sample.to_le_bytes()).collect(),
    );

    let mut ifds = vec![raw];
    if let Some(preview) = preview(image, options.preview_mode) {
        ifds.push(preview_ifd(preview));
    }

    DngWriter::write_dng(out, true, FileType::Dng, ifds).map_err(|e| {
        ConversionError::EncodeFailed {
            path: source_name.into(),
            reason: format!("{e:?}"),
        }
    })?;
    Ok(())
}

/// XYZ to camera matrix, row major. Identity when the decoder has none.
fn color_matrix(image: &SensorImage) -> Vec<f32> {
    let values: Vec<f32> = image.xyz_to_cam.iter().flatten().copied().collect();
    if values.iter().all(|v| *v == 0.0 || !v.is_finite()) {
        return vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    }
    values
}

fn preview_ifd(preview: RgbImage) -> Ifd {
    let (width, height) = preview.dimensions();
    let mut ifd = Ifd::default();
    ifd.insert(tiff_tags::NewSubfileType, IfdValue::Long(1));
    ifd.insert(tiff_tags::ImageWidth, IfdValue::Long(width));
    ifd.insert(tiff_tags::ImageLength, IfdValue::Long(height));
    ifd.insert(
        tiff_tags::BitsPerSample,
        IfdValue::List(vec![
            IfdValue::Short(8),
            IfdValue::Short(8),
            IfdValue::Short(8),
        ]),
    );
    ifd.insert(tiff_tags::Compression, IfdValue::Short(COMPRESSION_NONE));
    ifd.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(PHOTOMETRIC_RGB));
    ifd.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(3));
    ifd.insert(tiff_tags::RowsPerStrip, IfdValue::Long(height));
    ifd.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    strip(&mut ifd, preview.into_raw());
    ifd
}

/// Render the RGB preview for `mode`, `None` for [`PreviewMode::None`].
///
/// Each 2x2 cell becomes one pixel; the result is then scaled to the target
/// size.
pub(crate) fn preview(image: &SensorImage, mode: PreviewMode) -> Option<RgbImage> {
    if mode == PreviewMode::None {
        return None;
    }
    let (width, height) = (image.width / 2, image.height / 2);
    if width == 0 || height == 0 {
        return None;
    }

    let range = f32::from(image.white_level.saturating_sub(image.black_level).max(1));
    let gains = image.gains();
    let stride = image.width as usize;

    let mut half = RgbImage::new(width, height);
    for (x, y, pixel) in half.enumerate_pixels_mut() {
        let mut sum = [0.0f32; 3];
        let mut count = [0.0f32; 3];
        for (cell, color) in image.cfa.iter().enumerate() {
            let row = y as usize * 2 + cell / 2;
            let col = x as usize * 2 + cell % 2;
            let sample = image.data[row * stride + col].saturating_sub(image.black_level);
            sum[usize::from(*color)] += f32::from(sample) / range;
            count[usize::from(*color)] += 1.0;
        }
        *pixel = Rgb(std::array::from_fn(|c| {
            let linear = (sum[c] / count[c].max(1.0) * gains[c]).clamp(0.0, 1.0);
            (linear.powf(1.0 / 2.2) * 255.0).round() as u8
        }));
    }

    Some(match mode {
        PreviewMode::Medium if width.max(height) > MEDIUM_PREVIEW_EDGE => {
            DynamicImage::ImageRgb8(half)
                .thumbnail(MEDIUM_PREVIEW_EDGE, MEDIUM_PREVIEW_EDGE)
                .to_rgb8()
        }
        PreviewMode::FullSize => {
            imageops::resize(&half, image.width, image.height, FilterType::Triangle)
        }
        _ => half,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::{Context, In, Reader, Tag, Value};
    use tempfile::TempDir;

    const DNG_VERSION_TAG: Tag = Tag(Context::Tiff, 0xC612);
    const ORIGINAL_RAW_FILE_NAME: Tag = Tag(Context::Tiff, 0xC68B);

    /// RGGB mosaic where every cell reads red, green, green, blue levels.
    fn sensor(width: u32, height: u32) -> SensorImage {
        let data = (0..height)
            .flat_map(|row| {
                (0..width).map(move |col| match (row % 2, col % 2) {
                    (0, 0) => 3000,
                    (1, 1) => 1000,
                    _ => 2000,
                })
            })
            .collect();
        SensorImage {
            make: "Canon".to_string(),
            model: "EOS Test".to_string(),
            width,
            height,
            cfa: [0, 1, 1, 2],
            black_level: 0,
            white_level: 4095,
            xyz_to_cam: [[0.0; 3]; 3],
            wb_coeffs: [2.0, 1.0, 1.5],
            data,
        }
    }

    fn options(preview_mode: PreviewMode, backup_original: bool) -> RawConversionOptions {
        RawConversionOptions {
            backup_original,
            lossless_compression: true,
            preview_mode,
        }
    }

    fn encode(image: &SensorImage, options: &RawConversionOptions) -> exif::Exif {
        let mut out = Cursor::new(Vec::new());
        write_dng(image, "IMG_0002.CR2", options, &mut out).unwrap();
        Reader::new().read_raw(out.into_inner()).unwrap()
    }

    #[test]
    fn test_dng_carries_sensor_layout() {
        let exif = encode(&sensor(8, 6), &options(PreviewMode::None, false));

        let width = exif.get_field(Tag::ImageWidth, In::PRIMARY).unwrap();
        assert_eq!(width.value.get_uint(0), Some(8));
        let photometric = exif
            .get_field(Tag::PhotometricInterpretation, In::PRIMARY)
            .unwrap();
        assert_eq!(photometric.value.get_uint(0), Some(u32::from(PHOTOMETRIC_CFA)));

        let version = exif.get_field(DNG_VERSION_TAG, In::PRIMARY).unwrap();
        assert!(matches!(&version.value, Value::Byte(bytes) if bytes == &DNG_VERSION));

        assert!(exif.get_field(Tag::ImageWidth, In::THUMBNAIL).is_none());
        assert!(exif.get_field(ORIGINAL_RAW_FILE_NAME, In::PRIMARY).is_none());
    }

    #[test]
    fn test_preview_ifd_follows_mode() {
        let exif = encode(&sensor(8, 6), &options(PreviewMode::Medium, true));

        let width = exif.get_field(Tag::ImageWidth, In::THUMBNAIL).unwrap();
        assert_eq!(width.value.get_uint(0), Some(4));
        assert!(exif.get_field(ORIGINAL_RAW_FILE_NAME, In::PRIMARY).is_some());
    }

    #[test]
    fn test_preview_sizes() {
        let small = sensor(8, 6);
        assert!(preview(&small, PreviewMode::None).is_none());
        assert_eq!(
            preview(&small, PreviewMode::FullSize).unwrap().dimensions(),
            (8, 6)
        );

        let large = sensor(2400, 1600);
        let medium = preview(&large, PreviewMode::Medium).unwrap();
        assert_eq!(medium.width().max(medium.height()), MEDIUM_PREVIEW_EDGE);
    }

    #[test]
    fn test_preview_applies_white_balance() {
        let pixel = *preview(&sensor(4, 4), PreviewMode::Medium)
            .unwrap()
            .get_pixel(0, 0);
        // Red and blue are scaled up by their multipliers, green is not.
        assert!(pixel[0] > pixel[1]);
        assert_eq!(pixel[0], 255);
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("IMG_0002.CR2");
        let dst = dir.path().join("IMG_0002.dng");
        fs::write(&src, b"raw sensor data").unwrap();

        let result = DngConverter::new().convert(&src, &dst, &options(PreviewMode::Medium, false));

        assert_eq!(result, RawConversionResult::UnsupportedFile);
        assert!(!dst.exists());
    }
}
