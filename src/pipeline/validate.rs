//! Final filtering and reading-order sort.

use crate::geometry::{bbox_center, is_valid_normalized_bbox};
use crate::output::{DetectedField, FieldType};
use tracing::debug;

/// Two fields whose vertical centers differ by at most this much (in page
/// heights) are on the same row.
pub const ROW_TOLERANCE: f64 = 0.015;

/// Drop fields that cannot be used downstream.
///
/// Removed: invalid or zero-area boxes, unknown types, blank names or
/// labels, and confidences below `min_confidence` (fields without a
/// confidence are kept). Never fails.
pub fn validate_fields(fields: Vec<DetectedField>, min_confidence: f64) -> Vec<DetectedField> {
    let before = fields.len();
    let kept: Vec<DetectedField> = fields
        .into_iter()
        .filter(|f| {
            let b = &f.bbox_normalized;
            is_valid_normalized_bbox(b)
                && b.w > 0.0
                && b.h > 0.0
                && f.field_type != FieldType::Unknown
                && !f.name.trim().is_empty()
                && !f.label.trim().is_empty()
                && f.confidence.map_or(true, |c| c >= min_confidence)
        })
        .collect();
    if kept.len() < before {
        debug!("Validation dropped {} of {} fields", before - kept.len(), before);
    }
    kept
}

/// Sort into natural reading order: page, then row, then left to right.
///
/// Rows are built greedily top to bottom: a field joins the current row when
/// its y-center is within [`ROW_TOLERANCE`] of the row's first field.
pub fn sort_fields_by_reading_order(mut fields: Vec<DetectedField>) -> Vec<DetectedField> {
    let center_y = |f: &DetectedField| bbox_center(&f.bbox_normalized).1;

    fields.sort_by(|a, b| {
        a.page_index
            .cmp(&b.page_index)
            .then(center_y(a).total_cmp(&center_y(b)))
    });

    let mut out = Vec::with_capacity(fields.len());
    let mut row: Vec<DetectedField> = Vec::new();
    let mut anchor: Option<(usize, f64)> = None;

    for f in fields {
        let cy = center_y(&f);
        let same_row = matches!(anchor, Some((page, y)) if page == f.page_index && (cy - y).abs() <= ROW_TOLERANCE);
        if !same_row {
            flush_row(&mut row, &mut out);
            anchor = Some((f.page_index, cy));
        }
        row.push(f);
    }
    flush_row(&mut row, &mut out);
    out
}

fn flush_row(row: &mut Vec<DetectedField>, out: &mut Vec<DetectedField>) {
    row.sort_by(|a, b| a.bbox_normalized.x.total_cmp(&b.bbox_normalized.x));
    out.append(row);
}
