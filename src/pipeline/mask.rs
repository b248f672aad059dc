//! Segment masking: one single-page PDF per segment with everything outside
//! the segment painted over.
//!
//! The OCR engine only ever sees whole pages. Rather than cropping (which
//! would change page dimensions and break coordinate mapping), each segment
//! gets a copy of its page with four opaque white rectangles covering the
//! area around it. The page keeps its original size, so normalized boxes the
//! engine reports on the masked page are already in the original page's
//! frame.
//!
//! ```text
//!  ┌──────────────────────┐
//!  │        above         │
//!  ├──────┬───────┬───────┤
//!  │ left │ [seg] │ right │
//!  ├──────┴───────┴───────┤
//!  │        below         │
//!  └──────────────────────┘
//! ```
//!
//! PDF user space has its origin at the bottom-left corner, segments at the
//! top-left, so the segment's vertical position is flipped before the
//! rectangles are computed. The rectangles are then shifted to the origin of
//! the page's visible box, which is not always `(0, 0)`.
//!
//! Rotated pages (`/Rotate`) are masked in unrotated user space, so segments
//! on such pages must be given in that frame.

use crate::error::FormSegError;
use crate::pipeline::pdf::load_document;
use crate::segment::SegmentSpec;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

/// A rectangle in PDF points, bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskRect {
    pub bottom: f64,
    pub left: f64,
    pub top: f64,
    pub right: f64,
}

impl MaskRect {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// The same rectangle moved by `(dx, dy)` points.
    pub fn shifted(self, dx: f64, dy: f64) -> Self {
        Self {
            bottom: self.bottom + dy,
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
        }
    }

    fn to_pdf_rect(self) -> PdfRect {
        PdfRect::new_from_values(
            self.bottom as f32,
            self.left as f32,
            self.top as f32,
            self.right as f32,
        )
    }
}

/// Rectangles that cover everything on a `page_w × page_h` page outside
/// `segment`, in the order above, below, left, right.
///
/// Rectangles with no width or height are omitted, so a full-page segment
/// yields none.
pub fn mask_rects(page_w: f64, page_h: f64, segment: &SegmentSpec) -> Vec<MaskRect> {
    let seg_x = segment.x * page_w;
    let seg_y = segment.y * page_h;
    let seg_w = segment.w * page_w;
    let seg_h = segment.h * page_h;

    // Bottom edge of the segment in PDF space.
    let flipped_y = page_h - seg_y - seg_h;
    let seg_top = flipped_y + seg_h;

    let candidates = [
        // above
        MaskRect {
            bottom: seg_top,
            left: 0.0,
            top: page_h,
            right: page_w,
        },
        // below
        MaskRect {
            bottom: 0.0,
            left: 0.0,
            top: flipped_y,
            right: page_w,
        },
        // left
        MaskRect {
            bottom: flipped_y,
            left: 0.0,
            top: seg_top,
            right: seg_x,
        },
        // right
        MaskRect {
            bottom: flipped_y,
            left: seg_x + seg_w,
            top: seg_top,
            right: page_w,
        },
    ];

    candidates
        .into_iter()
        .filter(|r| r.width() > 0.0 && r.height() > 0.0)
        .collect()
}

/// Build one masked single-page PDF per segment, in input order.
///
/// `is_pdf` is the caller's verdict on the document's MIME type; images
/// cannot be masked and fail before pdfium is touched.
pub fn build_masked_pdf_segments(
    pdfium: &Pdfium,
    document: &[u8],
    segments: &[SegmentSpec],
    is_pdf: bool,
    mime: &str,
) -> Result<Vec<Vec<u8>>, FormSegError> {
    if !is_pdf {
        return Err(FormSegError::UnsupportedMaskingInput {
            mime: mime.to_string(),
        });
    }

    let source = load_document(pdfium, document)?;
    let total = source.pages().len() as usize;

    if let Some(bad) = segments.iter().find(|s| s.page_index >= total) {
        return Err(FormSegError::PageOutOfRange {
            page: bad.page_index,
            total,
        });
    }

    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| mask_segment(pdfium, &source, i, seg))
        .collect()
}

/// Copy the segment's page into a fresh document and paint over the rest.
fn mask_segment(
    pdfium: &Pdfium,
    source: &PdfDocument,
    index: usize,
    segment: &SegmentSpec,
) -> Result<Vec<u8>, FormSegError> {
    let fail = |e: PdfiumError| FormSegError::MaskingFailed {
        segment: index,
        detail: format!("{e:?}"),
    };

    let mut target = pdfium.create_new_pdf().map_err(fail)?;
    target
        .pages_mut()
        .copy_page_from_document(source, segment.page_index as PdfPageIndex, 0)
        .map_err(fail)?;

    let mut page = target.pages().get(0).map_err(fail)?;
    let page_w = page.width().value as f64;
    let page_h = page.height().value as f64;

    let (origin_x, origin_y) = page_origin(&page);
    if !matches!(page.rotation(), Ok(PdfPageRenderRotation::None)) {
        warn!(
            "Segment {}: page {} is rotated; masking in unrotated page space",
            index, segment.page_index
        );
    }

    let rects: Vec<MaskRect> = mask_rects(page_w, page_h, segment)
        .into_iter()
        .map(|r| r.shifted(origin_x, origin_y))
        .collect();
    for rect in &rects {
        page.objects_mut()
            .create_path_object_rect(rect.to_pdf_rect(), None, None, Some(PdfColor::WHITE))
            .map_err(fail)?;
    }
    drop(page);

    debug!(
        "Segment {}: page {} ({:.0}×{:.0} pt) masked with {} rects",
        index,
        segment.page_index,
        page_w,
        page_h,
        rects.len()
    );

    target.save_to_bytes().map_err(fail)
}

/// Bottom-left corner of the page's visible box (crop box, else media box)
/// in user space.
fn page_origin(page: &PdfPage) -> (f64, f64) {
    let boundaries = page.boundaries();
    match boundaries.crop().or_else(|_| boundaries.media()) {
        Ok(b) => (b.bounds.left().value as f64, b.bounds.bottom().value as f64),
        Err(_) => (0.0, 0.0),
    }
}
