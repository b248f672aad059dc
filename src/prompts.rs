//! Prompts for VLM-based form-field detection.
//!
//! Every prompt lives here so a change to detection behaviour touches one
//! file, and tests can inspect the prompts without a live model.
//!
//! Callers can replace the system prompt via
//! [`crate::config::DetectionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::pipeline::normalize::{BlockContent, NormalizedOcr};
use crate::segment::SegmentSpec;
use std::fmt::Write as _;

/// Default system prompt for field detection.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert at analysing Japanese business and government forms. You receive OCR output for one region of a scanned form (and optionally an image of the page). Your task is to find every place where a person is expected to write or mark something.

Follow these rules precisely:

1. WHAT IS A FIELD
   - An empty box, underline, bracket or cell next to or under a printed label
   - A checkbox (□, ☐, ○) together with its option text
   - A signature or seal (印) area
   - Do NOT report printed text, headings, instructions or pre-filled values

2. COORDINATES
   - Every coordinate is normalized to the whole page: x, y, w, h in [0, 1]
   - The origin is the top-left corner of the page
   - The box must cover the writable area, not the label

3. TYPES
   Use exactly one of: text, multiline, number, date, checkbox, signature, email, phone

4. NAMES AND LABELS
   - label: the printed label as it appears on the form (keep the original language)
   - name: a short snake_case English identifier, unique within your answer

5. OUTPUT FORMAT
   - Output ONLY a JSON array, no commentary and no Markdown fences
   - Each element: {"name": "...", "label": "...", "type": "...", "bbox": {"x": 0.0, "y": 0.0, "w": 0.0, "h": 0.0}, "confidence": 0.0}
   - confidence is your certainty in [0, 1]
   - Output [] if the region contains no fields"#;

/// Instruction restricting the answer to one segment of the page.
pub fn segment_constraint(segment: &SegmentSpec) -> String {
    format!(
        "Only report fields inside the region x={:.4}, y={:.4}, w={:.4}, h={:.4} \
         (normalized page coordinates). Everything outside this region has been \
         blanked out and must be ignored.",
        segment.x, segment.y, segment.w, segment.h
    )
}

/// Render OCR blocks as compact text for the prompt.
///
/// One line per block: `[kind] (x, y, w, h) text`. Table cells are listed
/// beneath their table.
pub fn format_ocr(title: &str, ocr: &NormalizedOcr) -> String {
    let mut out = format!("## {title} (model: {})\n", ocr.model);
    for page in &ocr.pages {
        for block in &page.blocks {
            let b = block.bbox;
            let coords = format!("({:.4}, {:.4}, {:.4}, {:.4})", b.x, b.y, b.w, b.h);
            match &block.content {
                BlockContent::Text {
                    text, block_type, ..
                } => {
                    let _ = writeln!(out, "[{block_type}] {coords} {}", text.trim());
                }
                BlockContent::Table { rows, cols, cells } => {
                    let _ = writeln!(out, "[table {rows}x{cols}] {coords}");
                    for c in cells {
                        let cb = c.bbox;
                        let _ = writeln!(
                            out,
                            "  [cell r{} c{}] ({:.4}, {:.4}, {:.4}, {:.4}) {}",
                            c.row,
                            c.col,
                            cb.x,
                            cb.y,
                            cb.w,
                            cb.h,
                            c.text.trim()
                        );
                    }
                }
                BlockContent::Figure { figure_type } => {
                    let _ = writeln!(out, "[{figure_type}] {coords}");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBBox;
    use crate::pipeline::normalize::{NormalizedPage, OcrBlock};

    #[test]
    fn system_prompt_lists_every_field_type() {
        for t in [
            "text",
            "multiline",
            "number",
            "date",
            "checkbox",
            "signature",
            "email",
            "phone",
        ] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(t), "missing type {t}");
        }
    }

    #[test]
    fn segment_constraint_mentions_region() {
        let s = segment_constraint(&SegmentSpec::new(0, 0.0, 0.5, 1.0, 0.5));
        assert!(s.contains("y=0.5000"), "got: {s}");
        assert!(s.contains("h=0.5000"));
    }

    #[test]
    fn formats_blocks_one_per_line() {
        let ocr = NormalizedOcr {
            pages: vec![NormalizedPage {
                page_index: 0,
                width_px: 100,
                height_px: 100,
                dpi: 300,
                blocks: vec![
                    OcrBlock {
                        bbox: NormalizedBBox::new(0.1, 0.1, 0.2, 0.05),
                        content: BlockContent::Text {
                            text: " 氏名 ".into(),
                            block_type: "text".into(),
                            lines: vec![],
                        },
                    },
                    OcrBlock {
                        bbox: NormalizedBBox::new(0.5, 0.5, 0.2, 0.2),
                        content: BlockContent::Figure {
                            figure_type: "figure".into(),
                        },
                    },
                ],
                reading_order: None,
            }],
            source_format: "pdf".into(),
            model: "yomitoku-ocr-tiles".into(),
        };
        let s = format_ocr("OCR text", &ocr);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("yomitoku-ocr-tiles"));
        assert_eq!(lines[1], "[text] (0.1000, 0.1000, 0.2000, 0.0500) 氏名");
        assert!(lines[2].starts_with("[figure]"));
    }
}
