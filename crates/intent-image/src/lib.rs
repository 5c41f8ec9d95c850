//! Image decoding for the intent pipeline.
//!
//! Every decoded image is normalised to 8-bit RGB in HWC layout
//! (`[height, width, 3]`), whatever the source colour mode. Resizing is
//! left to the transform stage.

pub mod error;
pub mod types;

pub use error::ImageError;
pub use types::ImageBuffer;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder},
};

/// Decodes encoded image bytes (format auto-detected) into RGB8.
///
/// Grayscale, grayscale+alpha, RGBA, palette, 16-bit and float sources are
/// all converted; alpha is dropped.
///
/// # Errors
///
/// Returns `ImageError::Decode` if the bytes are not a supported image.
pub fn decode_image(data: &[u8]) -> Result<ImageBuffer, ImageError> {
    let img = image::load_from_memory(data)?;
    let color = img.color();
    let rgb = img.into_rgb8();
    let (width, height) = rgb.dimensions();
    log::debug!("decoded {width}x{height} image from {color:?}");
    ImageBuffer::from_rgb(width as usize, height as usize, rgb.into_raw())
}

/// Decodes a base64 payload, optionally prefixed with a data URI
/// (`data:image/png;base64,...`).
pub fn decode_base64(encoded: &str) -> Result<ImageBuffer, ImageError> {
    let payload = strip_data_uri(encoded)?;
    let bytes = STANDARD.decode(payload)?;
    decode_image(&bytes)
}

/// Whether `encoded` is base64 (optionally behind a data URI) of a decodable image.
pub fn validate_base64(encoded: &str) -> bool {
    match decode_base64(encoded) {
        Ok(_) => true,
        Err(err) => {
            log::debug!("rejected base64 image: {err}");
            false
        }
    }
}

/// Removes a leading `data:...,` scheme marker and surrounding whitespace.
pub fn strip_data_uri(encoded: &str) -> Result<&str, ImageError> {
    let encoded = encoded.trim();
    if !encoded.starts_with("data:") {
        return Ok(encoded);
    }
    match encoded.split_once(',') {
        Some((_, payload)) => Ok(payload.trim()),
        None => Err(ImageError::Decode(
            "data URI without a ',' separator".to_string(),
        )),
    }
}

/// Encodes an image as PNG bytes.
pub fn encode_png(image: &ImageBuffer) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(
            image.as_bytes(),
            image.width() as u32,
            image.height() as u32,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Encodes an image as base64 PNG, without a data URI prefix.
pub fn encode_base64_png(image: &ImageBuffer) -> Result<String, ImageError> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// A `width` x `height` image filled with one colour.
pub fn solid_color(width: usize, height: usize, rgb: [u8; 3]) -> Result<ImageBuffer, ImageError> {
    let data = rgb.iter().copied().cycle().take(width * height * 3).collect();
    ImageBuffer::from_rgb(width, height, data)
}
