//! Image encoding: rendered page → base64 PNG [`PageImage`].
//!
//! PNG keeps stamp impressions, handwritten diary numbers and small
//! letterhead print crisp; JPEG artefacts around those are read as noise.
//! `detail: "high"` lets GPT-4-class models tile the full page instead of
//! a single 512 px overview.

use crate::engine::client::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as base64 PNG `ImageData`.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(wrap_png(&buf))
}

/// Wrap already-encoded PNG bytes, e.g. a page image scanned outside pdfium.
pub fn page_from_png(png: &[u8], page_num: usize, pdf_page: usize) -> PageImage {
    PageImage {
        page_num,
        pdf_page,
        image: wrap_png(png),
    }
}

fn wrap_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded page image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
