//! OCR normalization: raw engine output → page-normalized coordinates.
//!
//! Every box in the result (blocks, lines, tokens, tables, cells, figures)
//! is converted with [`crate::geometry::to_normalized`] and then clamped
//! into the unit square. Order and content are preserved; pages are never
//! dropped.

use crate::geometry::{clamp_normalized_bbox, to_normalized, NormalizedBBox, PixelBBox};
use crate::pipeline::ocr::{RawBlock, RawOcrResponse, RawPage};
use serde::Serialize;
use thiserror::Error;

/// Units of the boxes in a [`RawOcrResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateUnits {
    /// Pixels on a `widthPx × heightPx` page.
    Pixels,
    /// Already fractions of the page; only clamped.
    Normalized,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("page {page_index} has zero size ({width}×{height} px)")]
    ZeroSizedPage {
        page_index: usize,
        width: u32,
        height: u32,
    },
}

/// Normalized result of one OCR call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOcr {
    pub pages: Vec<NormalizedPage>,
    /// "pdf", "png" or "jpeg". Diagnostic only.
    pub source_format: String,
    /// Engine model name. Diagnostic only.
    pub model: String,
}

impl NormalizedOcr {
    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|p| p.blocks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.block_count() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPage {
    pub page_index: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
    /// Text blocks in engine order, then tables, then figures.
    pub blocks: Vec<OcrBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_order: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrBlock {
    pub bbox: NormalizedBBox,
    #[serde(flatten)]
    pub content: BlockContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockContent {
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        block_type: String,
        lines: Vec<OcrLine>,
    },
    Table {
        rows: u32,
        cols: u32,
        cells: Vec<OcrCell>,
    },
    #[serde(rename_all = "camelCase")]
    Figure { figure_type: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrLine {
    pub text: String,
    pub bbox: NormalizedBBox,
    pub tokens: Vec<OcrToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: NormalizedBBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrCell {
    pub row: u32,
    pub col: u32,
    pub row_span: u32,
    pub col_span: u32,
    pub text: String,
    pub bbox: NormalizedBBox,
}

/// Normalize a raw OCR response.
///
/// Fails only when a page reports a zero width or height.
pub fn normalize_ocr(
    raw: &RawOcrResponse,
    units: CoordinateUnits,
    source_format: &str,
) -> Result<NormalizedOcr, NormalizeError> {
    let pages = raw
        .pages
        .iter()
        .map(|page| normalize_page(page, units))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NormalizedOcr {
        pages,
        source_format: source_format.to_string(),
        model: raw.model.clone(),
    })
}

fn normalize_page(page: &RawPage, units: CoordinateUnits) -> Result<NormalizedPage, NormalizeError> {
    if page.width_px == 0 || page.height_px == 0 {
        return Err(NormalizeError::ZeroSizedPage {
            page_index: page.page_index,
            width: page.width_px,
            height: page.height_px,
        });
    }

    let (w, h) = (page.width_px as f64, page.height_px as f64);
    let norm = |b: &PixelBBox| -> NormalizedBBox {
        let n = match units {
            CoordinateUnits::Pixels => to_normalized(b, w, h),
            CoordinateUnits::Normalized => NormalizedBBox::new(b.x, b.y, b.w, b.h),
        };
        clamp_normalized_bbox(&n)
    };

    let mut blocks: Vec<OcrBlock> = page.blocks.iter().map(|b| text_block(b, &norm)).collect();

    for table in page.tables.iter().flatten() {
        blocks.push(OcrBlock {
            bbox: norm(&table.bbox),
            content: BlockContent::Table {
                rows: table.rows,
                cols: table.cols,
                cells: table
                    .cells
                    .iter()
                    .map(|c| OcrCell {
                        row: c.row_index,
                        col: c.col_index,
                        row_span: c.row_span,
                        col_span: c.col_span,
                        text: c.text.clone(),
                        bbox: norm(&c.bbox),
                    })
                    .collect(),
            },
        });
    }

    for figure in page.figures.iter().flatten() {
        blocks.push(OcrBlock {
            bbox: norm(&figure.bbox),
            content: BlockContent::Figure {
                figure_type: figure.figure_type.clone(),
            },
        });
    }

    Ok(NormalizedPage {
        page_index: page.page_index,
        width_px: page.width_px,
        height_px: page.height_px,
        dpi: page.dpi,
        blocks,
        reading_order: page.reading_order.clone(),
    })
}

fn text_block(block: &RawBlock, norm: &impl Fn(&PixelBBox) -> NormalizedBBox) -> OcrBlock {
    OcrBlock {
        bbox: norm(&block.bbox),
        content: BlockContent::Text {
            text: block.text.clone(),
            block_type: block.block_type.clone(),
            lines: block
                .lines
                .iter()
                .map(|l| OcrLine {
                    text: l.text.clone(),
                    bbox: norm(&l.bbox),
                    tokens: l
                        .tokens
                        .iter()
                        .map(|t| OcrToken {
                            text: t.text.clone(),
                            bbox: norm(&t.bbox),
                            confidence: t.confidence,
                        })
                        .collect(),
                })
                .collect(),
        },
    }
}
