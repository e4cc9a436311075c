//! Conversions between uploaded bytes, the fixed generation canvas and PNG output.

use std::io::Cursor;

use image::{ImageFormat, RgbImage, imageops::FilterType};

use crate::error::ServiceError;

/// Side length of the square canvas every input is resized to.
pub const CANVAS_SIZE: u32 = 512;

/// Decodes an uploaded image and stretches it onto the RGB generation canvas.
pub fn prepare_input(bytes: &[u8]) -> Result<RgbImage, ServiceError> {
    if bytes.is_empty() {
        return Err(ServiceError::ImageDecode("image data is empty".into()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ServiceError::ImageDecode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    if rgb.dimensions() == (CANVAS_SIZE, CANVAS_SIZE) {
        return Ok(rgb);
    }
    Ok(image::imageops::resize(
        &rgb,
        CANVAS_SIZE,
        CANVAS_SIZE,
        FilterType::CatmullRom,
    ))
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ServiceError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ServiceError::ImageEncode(e.to_string()))?;
    Ok(bytes)
}
