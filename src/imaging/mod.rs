// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image loading, validation, and re-encoding shared by the detection and
//! masking pipelines.

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Maximum image size (10MB)
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// JPEG quality for re-encoded frames
const JPEG_QUALITY: u8 = 95;

/// Custom error types for image processing
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,
}

/// Image information extracted during loading
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Detected format
    pub format: ImageFormat,
    /// Size in bytes
    pub size_bytes: usize,
}

/// Decode raw image bytes, validating size and format first.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge(bytes.len(), MAX_IMAGE_SIZE));
    }

    // Detect format from magic bytes
    let format = detect_format(bytes)?;

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    let info = ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        size_bytes: bytes.len(),
    };

    Ok((img, info))
}

/// Detect image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47 (0x89 P N G)
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF: GIF87a or GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        // TIFF: II (little-endian) or MM (big-endian)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Ok(ImageFormat::Tiff),

        _ => Err(ImageError::UnsupportedFormat),
    }
}

/// Encode an image as JPEG at the pipeline's fixed quality.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Resize to the pipeline's fixed reference resolution and re-encode as
/// JPEG. All downstream box coordinates are normalized against this frame,
/// which keeps coordinate systems and model latency stable regardless of
/// the input size.
pub fn resize_to_reference(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ImageError> {
    let (img, _) = decode_image_bytes(bytes)?;
    let resized = img.resize_exact(width, height, FilterType::Triangle);
    encode_jpeg(&resized)
}

/// Re-encode through a fresh pixel buffer, discarding every auxiliary
/// metadata chunk (EXIF, GPS, XMP) the source carried.
pub fn strip_metadata(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let (img, info) = decode_image_bytes(bytes)?;
    let clean = DynamicImage::ImageRgb8(img.to_rgb8());

    match info.format {
        ImageFormat::Png => {
            let mut buffer = Cursor::new(Vec::new());
            clean
                .write_to(&mut buffer, ImageFormat::Png)
                .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
            Ok(buffer.into_inner())
        }
        // Everything else re-encodes as JPEG, the pipeline's working format
        _ => encode_jpeg(&clean),
    }
}
