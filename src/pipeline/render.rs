//! PDF rasterisation and document facts via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and is CPU-bound, so nothing in here is
//! async. The orchestrator runs the whole pdfium stage (masking, preview
//! rendering, page sizes) inside one `spawn_blocking` call; [`extract_metadata`]
//! does the same for the standalone inspect path.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_pixels` caps the longest edge regardless of
//! physical size, keeping memory bounded and the image inside the range
//! vision models handle well.

use crate::error::FormSegError;
use crate::output::{DocumentMetadata, PageSize};
use crate::pipeline::pdf::{bind_pdfium, load_document};
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Render page 0 of a masked single-page PDF.
///
/// `segment` is only used to label errors.
pub fn render_first_page(
    pdfium: &Pdfium,
    pdf_bytes: &[u8],
    max_pixels: u32,
    segment: usize,
) -> Result<DynamicImage, FormSegError> {
    let fail = |e: PdfiumError| FormSegError::RasterisationFailed {
        segment,
        detail: format!("{:?}", e),
    };

    let document = load_document(pdfium, pdf_bytes)?;
    let page = document.pages().get(0).map_err(fail)?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let image = page.render_with_config(&render_config).map_err(fail)?.as_image();
    debug!(
        "Rendered segment {} → {}x{} px",
        segment,
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Page sizes in points, in page order.
pub fn page_sizes(document: &PdfDocument) -> Vec<PageSize> {
    document
        .pages()
        .iter()
        .map(|page| PageSize {
            width_pt: page.width().value as f64,
            height_pt: page.height().value as f64,
        })
        .collect()
}

/// Metadata of an already loaded document.
pub fn document_metadata(document: &PdfDocument) -> DocumentMetadata {
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let page_sizes = page_sizes(document);
    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: page_sizes.len(),
        page_sizes,
        pdf_version: format!("{:?}", document.version()),
    }
}

/// Extract document metadata from PDF bytes without rendering pages.
pub async fn extract_metadata(pdf_bytes: Vec<u8>) -> Result<DocumentMetadata, FormSegError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &pdf_bytes)?;
        let metadata = document_metadata(&document);
        info!("PDF loaded: {} pages", metadata.page_count);
        Ok(metadata)
    })
    .await
    .map_err(|e| FormSegError::Internal(format!("Metadata task panicked: {}", e)))?
}
