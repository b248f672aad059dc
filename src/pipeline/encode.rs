//! Preview encoding: masked page image → base64 PNG wrapped in `ImageData`.
//!
//! The field detector gets the rendered segment next to the OCR text so the
//! model can see underlines, boxes and checkboxes that OCR never reports.
//! PNG keeps thin rules and small glyphs crisp where JPEG would smear them.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered segment preview for a multimodal chat message.
///
/// `detail: "high"` keeps the provider from downscaling the page to a single
/// low-resolution tile, which would hide small input boxes.
pub fn encode_preview(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded preview {}x{} → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
