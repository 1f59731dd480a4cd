//! crates/mri_core/src/codec.rs
//!
//! Converts images to and from the base64 JPEG text embedded in scan records.
//! JPEG is lossy, so a round trip preserves dimensions and channel count but not
//! exact pixel values.

use base64::{engine::general_purpose, Engine as _};
use image::{codecs::jpeg::JpegEncoder, DynamicImage};

use crate::error::CodecError;

/// JPEG quality used for every stored and embedded image.
pub const JPEG_QUALITY: u8 = 90;

/// Encodes `image` as JPEG and returns the base64 text.
pub fn encode(image: &DynamicImage) -> Result<String, CodecError> {
    let bytes = encode_jpeg(image)?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Decodes base64 text produced by [`encode`] back into an image.
pub fn decode(text: &str) -> Result<DynamicImage, CodecError> {
    let bytes = general_purpose::STANDARD.decode(text.trim())?;
    load(&bytes)
}

/// Loads an uploaded image file (any supported format) from raw bytes.
pub fn load(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    Ok(image::load_from_memory(bytes)?)
}

/// JPEG-encodes `image`. Grayscale images stay single-channel; everything else
/// is flattened to RGB since JPEG has no alpha channel.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let flattened = match image.color().channel_count() {
        1 | 2 => DynamicImage::ImageLuma8(image.to_luma8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };
    let mut bytes = Vec::new();
    flattened.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;
    Ok(bytes)
}

/// JPEG-encodes `image` as three-channel RGB, whatever its source color type.
pub fn encode_jpeg_rgb(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    encode_jpeg(&DynamicImage::ImageRgb8(image.to_rgb8()))
}
