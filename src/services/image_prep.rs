//! Upload validation and compression.
//!
//! Two ceilings apply independently: anything above `raw_ceiling` is refused
//! outright, and whatever is stored must fit in `target_ceiling`.

use std::io::Cursor;

use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageFormat, ImageReader, Limits};

pub const MAX_RAW_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_STORED_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ImagePolicy {
    pub raw_ceiling: usize,
    pub target_ceiling: usize,
    pub max_dimension: u32,
    /// Decoder refuses images wider or taller than this.
    pub max_decode_dimension: u32,
    /// Decoder allocation cap in bytes.
    pub max_decode_alloc: u64,
    /// JPEG qualities tried in order until the output fits.
    pub qualities: Vec<u8>,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            raw_ceiling: MAX_RAW_BYTES,
            target_ceiling: MAX_STORED_BYTES,
            max_dimension: 1920,
            max_decode_dimension: 12_000,
            max_decode_alloc: 256 * 1024 * 1024,
            qualities: vec![85, 70, 55, 40],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl PreparedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("content type {0:?} is not an image")]
    NotAnImage(String),

    #[error("image is {size} bytes, above the {limit} byte upload ceiling")]
    RawTooLarge { size: usize, limit: usize },

    #[error("image could not be decoded: {0}")]
    Undecodable(#[from] image::ImageError),

    #[error("image too large even after compression ({size} bytes)")]
    TooLargeAfterCompression { size: usize },
}

/// Validate an upload and bring it under the target ceiling.
///
/// Small JPEG/PNG/WebP uploads pass through untouched. Everything else is
/// decoded, downscaled to `max_dimension` and re-encoded as JPEG.
pub fn prepare_image(
    raw: &[u8],
    content_type: &str,
    policy: &ImagePolicy,
) -> Result<PreparedImage, ImageError> {
    if !content_type.starts_with("image/") {
        return Err(ImageError::NotAnImage(content_type.to_string()));
    }

    if raw.len() > policy.raw_ceiling {
        return Err(ImageError::RawTooLarge {
            size: raw.len(),
            limit: policy.raw_ceiling,
        });
    }

    if raw.len() <= policy.target_ceiling {
        if let Ok(format) = image::guess_format(raw) {
            if matches!(
                format,
                ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP
            ) {
                return Ok(PreparedImage {
                    bytes: Bytes::copy_from_slice(raw),
                    mime_type: format.to_mime_type().to_string(),
                });
            }
        }
    }

    let decoded = decode_bounded(raw, policy)?;
    let resized = if decoded.width() > policy.max_dimension
        || decoded.height() > policy.max_dimension
    {
        decoded.resize(policy.max_dimension, policy.max_dimension, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = resized.to_rgb8();

    let mut smallest = usize::MAX;
    for &quality in &policy.qualities {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
        let encoded = out.into_inner();

        tracing::debug!(
            quality = quality,
            size = encoded.len(),
            "Re-encoded image"
        );

        if encoded.len() <= policy.target_ceiling {
            return Ok(PreparedImage {
                bytes: Bytes::from(encoded),
                mime_type: "image/jpeg".to_string(),
            });
        }
        smallest = smallest.min(encoded.len());
    }

    Err(ImageError::TooLargeAfterCompression { size: smallest })
}

fn decode_bounded(raw: &[u8], policy: &ImagePolicy) -> Result<image::DynamicImage, ImageError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(policy.max_decode_dimension);
    limits.max_image_height = Some(policy.max_decode_dimension);
    limits.max_alloc = Some(policy.max_decode_alloc);

    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    reader.limits(limits);

    Ok(reader.decode()?)
}
