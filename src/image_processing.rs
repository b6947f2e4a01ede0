use std::io::Cursor;

use anyhow::{Result, anyhow};
use exif::{In, Tag};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, imageops};

/// Longest side an uploaded photo is allowed to keep.
pub const MAX_SIDE: u32 = 1536;
const JPEG_QUALITY: u8 = 92;

/// An upload after validation: re-encoded JPEG with all ancillary
/// metadata gone and dimensions bounded by [`MAX_SIDE`].
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes, orientation-corrects, resizes and re-encodes an uploaded
/// photo. The round trip through decoded pixels drops EXIF and every
/// other embedded segment, which is the privacy guarantee the stored
/// artifact relies on.
pub fn prepare_upload(bytes: &[u8], mime_type: &str) -> Result<ProcessedImage> {
    let format = mime_to_format(mime_type)?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| anyhow!("decode image failed: {err}"))?;

    let oriented = apply_orientation(decoded, read_orientation(bytes));
    let resized = resize_max(oriented, MAX_SIDE);
    let (width, height) = resized.dimensions();

    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut output), JPEG_QUALITY);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|err| anyhow!("encode jpeg failed: {err}"))?;

    Ok(ProcessedImage {
        bytes: output,
        width,
        height,
    })
}

/// Scales the image down so its longest side is at most `max_side`,
/// preserving aspect ratio. Images already within the bound pass through.
fn resize_max(image: DynamicImage, max_side: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_side {
        return image;
    }
    let scale = max_side as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    image.resize_exact(new_width, new_height, imageops::FilterType::Lanczos3)
}

/// EXIF orientation value (1..=8) from the raw upload, 1 when absent.
fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Normalizes pixel data according to the EXIF orientation tag, so the
/// re-encoded upload displays upright everywhere.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    // Mirror-vertical (4) decomposes into rotate 180 + mirror horizontal.
    let (rotate, flip_horizontal) = match orientation {
        2 => (None, true),
        3 => (Some(180), false),
        4 => (Some(180), true),
        5 => (Some(270), true),
        6 => (Some(90), false),
        7 => (Some(90), true),
        8 => (Some(270), false),
        _ => (None, false),
    };

    let mut image = match rotate {
        Some(90) => image.rotate90(),
        Some(180) => image.rotate180(),
        Some(270) => image.rotate270(),
        _ => image,
    };
    if flip_horizontal {
        image = image.fliph();
    }
    image
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Result<ImageFormat> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        "image/bmp" => Ok(ImageFormat::Bmp),
        _ => Err(anyhow!("unsupported mime type: {mime_type}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 40, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 160, 90]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .expect("encode jpeg");
        bytes
    }

    /// Splices a minimal EXIF APP1 segment (just an orientation tag)
    /// right after the JPEG SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let mut tiff: Vec<u8> = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&orientation.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let payload_len = 6 + tiff.len();
        let mut out = Vec::with_capacity(jpeg.len() + payload_len + 4);
        out.extend_from_slice(&jpeg[..2]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(&tiff);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn contains_exif_marker(bytes: &[u8]) -> bool {
        bytes.windows(4).any(|window| window == b"Exif")
    }

    #[test]
    fn large_upload_is_bounded_with_aspect_preserved() {
        let input = encode_png(3072, 2048);
        let processed = prepare_upload(&input, "image/png").expect("process");
        assert_eq!(processed.width, MAX_SIDE);
        assert_eq!(processed.height, 1024);
        let decoded = image::load_from_memory_with_format(&processed.bytes, ImageFormat::Jpeg)
            .expect("output decodes as jpeg");
        assert_eq!(decoded.dimensions(), (MAX_SIDE, 1024));
    }

    #[test]
    fn small_upload_keeps_its_dimensions() {
        let input = encode_jpeg(640, 480);
        let processed = prepare_upload(&input, "image/jpeg").expect("process");
        assert_eq!((processed.width, processed.height), (640, 480));
    }

    #[test]
    fn exif_segment_does_not_survive_processing() {
        let input = with_exif_orientation(&encode_jpeg(64, 48), 1);
        assert!(contains_exif_marker(&input));
        let processed = prepare_upload(&input, "image/jpeg").expect("process");
        assert!(!contains_exif_marker(&processed.bytes));
    }

    #[test]
    fn orientation_six_swaps_dimensions() {
        let input = with_exif_orientation(&encode_jpeg(64, 48), 6);
        let processed = prepare_upload(&input, "image/jpeg").expect("process");
        assert_eq!((processed.width, processed.height), (48, 64));
    }

    #[test]
    fn orientation_is_read_from_spliced_segment() {
        let input = with_exif_orientation(&encode_jpeg(8, 8), 6);
        assert_eq!(read_orientation(&input), 6);
        assert_eq!(read_orientation(&encode_jpeg(8, 8)), 1);
    }

    #[test]
    fn junk_bytes_are_rejected() {
        assert!(detect_mime_type(b"not an image at all").is_none());
        assert!(prepare_upload(b"not an image at all", "image/jpeg").is_err());
    }

    #[test]
    fn mime_sniffing_recognizes_the_supported_set() {
        assert_eq!(detect_mime_type(&encode_png(4, 4)), Some("image/png"));
        assert_eq!(detect_mime_type(&encode_jpeg(4, 4)), Some("image/jpeg"));
        assert_eq!(detect_mime_type(b"GIF89a\x01"), Some("image/gif"));
        assert_eq!(detect_mime_type(b"BM\x00\x00"), Some("image/bmp"));
    }

    #[test]
    fn unsupported_mime_is_an_error() {
        assert!(mime_to_format("image/tiff").is_err());
        assert!(mime_to_format("text/html").is_err());
    }
}
