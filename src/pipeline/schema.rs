//! Conversion of detected fields into text-schema objects for the form
//! renderer.
//!
//! The renderer positions inputs in millimetres from the top-left corner of
//! the page, so each normalized box is scaled by the page size in points and
//! converted at 25.4 mm per 72 pt. Pages whose size is unknown are treated as
//! A4 portrait.

use crate::output::{DetectedField, PageSize};
use serde::{Deserialize, Serialize};

const MM_PER_POINT: f64 = 25.4 / 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single text input as understood by the renderer. All lengths in mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub width: f64,
    pub height: f64,
}

/// Build one schema list per page.
///
/// The result has `max(page_count, highest field page + 1)` entries; pages
/// without fields get an empty list. Field order within a page is preserved.
pub fn to_text_schemas(
    fields: &[DetectedField],
    page_sizes: &[PageSize],
    page_count: usize,
) -> Vec<Vec<TextSchema>> {
    let pages = fields
        .iter()
        .map(|f| f.page_index + 1)
        .max()
        .unwrap_or(0)
        .max(page_count);
    let mut out: Vec<Vec<TextSchema>> = vec![Vec::new(); pages];

    for f in fields {
        let size = page_sizes
            .get(f.page_index)
            .copied()
            .unwrap_or(PageSize::A4);
        let page_w_mm = size.width_pt * MM_PER_POINT;
        let page_h_mm = size.height_pt * MM_PER_POINT;
        let b = &f.bbox_normalized;

        out[f.page_index].push(TextSchema {
            name: f.name.clone(),
            kind: "text".to_string(),
            position: Position {
                x: round2(b.x * page_w_mm),
                y: round2(b.y * page_h_mm),
            },
            width: round2(b.w * page_w_mm),
            height: round2(b.h * page_h_mm),
        });
    }
    out
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBBox;
    use crate::output::FieldType;

    fn field(page: usize, bbox: NormalizedBBox) -> DetectedField {
        DetectedField {
            name: format!("f{page}"),
            label: "L".into(),
            field_type: FieldType::Text,
            bbox_normalized: bbox,
            page_index: page,
            confidence: None,
        }
    }

    #[test]
    fn converts_to_millimetres_on_a4() {
        let schemas = to_text_schemas(
            &[field(0, NormalizedBBox::new(0.5, 0.5, 0.25, 0.1))],
            &[PageSize::A4],
            1,
        );
        let s = &schemas[0][0];
        assert_eq!(s.kind, "text");
        assert!((s.position.x - 105.0).abs() < 0.05, "got {}", s.position.x);
        assert!((s.position.y - 148.5).abs() < 0.05, "got {}", s.position.y);
        assert!((s.width - 52.5).abs() < 0.05);
        assert!((s.height - 29.7).abs() < 0.05);
    }

    #[test]
    fn unknown_page_size_falls_back_to_a4() {
        let letter = PageSize {
            width_pt: 612.0,
            height_pt: 792.0,
        };
        let schemas = to_text_schemas(
            &[
                field(0, NormalizedBBox::FULL_PAGE),
                field(2, NormalizedBBox::FULL_PAGE),
            ],
            &[letter],
            1,
        );
        assert_eq!(schemas.len(), 3);
        assert!(schemas[1].is_empty());
        assert!((schemas[0][0].width - 215.9).abs() < 0.05);
        assert!((schemas[2][0].width - 210.0).abs() < 0.05);
    }

    #[test]
    fn serializes_type_key() {
        let schemas = to_text_schemas(&[field(0, NormalizedBBox::FULL_PAGE)], &[], 1);
        let v = serde_json::to_value(&schemas[0][0]).unwrap();
        assert_eq!(v["type"], "text");
        assert!(v["position"]["x"].is_number());
    }
}
