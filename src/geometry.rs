//! Bounding-box geometry in device-independent coordinates.
//!
//! Every box that crosses a stage boundary in this crate is a
//! [`NormalizedBBox`]: fractions of the page width and height with the origin
//! at the top-left corner. The OCR engine reports pixels at whatever DPI it
//! rasterised at, and pdfium speaks PDF points with a bottom-left origin;
//! normalising at the edges lets the merge and sort stages compare boxes
//! from different segments, passes and resolutions directly.
//!
//! All functions here are pure and allocation-free (except [`merge_bboxes`]
//! which only reads its input).

use serde::{Deserialize, Serialize};

/// Tolerance applied to the `x + w ≤ 1` / `y + h ≤ 1` invariants.
///
/// Upstream producers (the OCR service, the LLM, browser UIs) round-trip
/// coordinates through pixels and JSON, which routinely yields `1.0000004`.
pub const BBOX_EPSILON: f64 = 0.001;

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f64 = 72.0;

/// A bounding box in normalized page coordinates, all components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedBBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl NormalizedBBox {
    pub const FULL_PAGE: NormalizedBBox = NormalizedBBox {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }
}

/// A bounding box in absolute pixel (or point) units, top-left origin.
///
/// The unit is whatever the producer used; [`pixel_to_point`] and
/// [`point_to_pixel`] convert between pixels at a given DPI and PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelBBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl PixelBBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// Convert a pixel box on a `width_px × height_px` page to normalized coordinates.
///
/// A zero dimension yields a zero component rather than `NaN`/`inf`; callers
/// that care (the OCR normalizer) reject zero-sized pages before calling this.
pub fn to_normalized(bbox: &PixelBBox, width_px: f64, height_px: f64) -> NormalizedBBox {
    let sx = if width_px > 0.0 { 1.0 / width_px } else { 0.0 };
    let sy = if height_px > 0.0 { 1.0 / height_px } else { 0.0 };
    NormalizedBBox {
        x: bbox.x * sx,
        y: bbox.y * sy,
        w: bbox.w * sx,
        h: bbox.h * sy,
    }
}

/// Inverse of [`to_normalized`] for the same page dimensions.
pub fn from_normalized(bbox: &NormalizedBBox, width_px: f64, height_px: f64) -> PixelBBox {
    PixelBBox {
        x: bbox.x * width_px,
        y: bbox.y * height_px,
        w: bbox.w * width_px,
        h: bbox.h * height_px,
    }
}

/// Scale a pixel box rendered at `dpi` into PDF points (1/72 inch).
pub fn pixel_to_point(bbox: &PixelBBox, dpi: f64) -> PixelBBox {
    let s = POINTS_PER_INCH / dpi;
    PixelBBox {
        x: bbox.x * s,
        y: bbox.y * s,
        w: bbox.w * s,
        h: bbox.h * s,
    }
}

/// Scale a box in PDF points into pixels at `dpi`.
pub fn point_to_pixel(bbox: &PixelBBox, dpi: f64) -> PixelBBox {
    let s = dpi / POINTS_PER_INCH;
    PixelBBox {
        x: bbox.x * s,
        y: bbox.y * s,
        w: bbox.w * s,
        h: bbox.h * s,
    }
}

/// `true` iff the x-intervals and the y-intervals of `a` and `b` both intersect.
///
/// Touching edges count as overlapping.
pub fn bboxes_overlap(a: &NormalizedBBox, b: &NormalizedBBox) -> bool {
    a.x <= b.right() && b.x <= a.right() && a.y <= b.bottom() && b.y <= a.bottom()
}

/// Intersection over union of two boxes, in `[0, 1]`.
pub fn calculate_iou(a: &NormalizedBBox, b: &NormalizedBBox) -> f64 {
    let ix = (a.right().min(b.right()) - a.x.max(b.x)).max(0.0);
    let iy = (a.bottom().min(b.bottom()) - a.y.max(b.y)).max(0.0);
    let intersection = ix * iy;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    (intersection / union).clamp(0.0, 1.0)
}

pub fn bbox_center(bbox: &NormalizedBBox) -> (f64, f64) {
    (bbox.x + bbox.w / 2.0, bbox.y + bbox.h / 2.0)
}

/// Euclidean distance between the centers of two boxes.
pub fn bbox_distance(a: &NormalizedBBox, b: &NormalizedBBox) -> f64 {
    let (ax, ay) = bbox_center(a);
    let (bx, by) = bbox_center(b);
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

/// Grow every side of `bbox` by `margin`, never leaving the unit square.
pub fn expand_bbox(bbox: &NormalizedBBox, margin: f64) -> NormalizedBBox {
    let x0 = (bbox.x - margin).max(0.0);
    let y0 = (bbox.y - margin).max(0.0);
    let x1 = (bbox.right() + margin).min(1.0);
    let y1 = (bbox.bottom() + margin).min(1.0);
    NormalizedBBox {
        x: x0,
        y: y0,
        w: (x1 - x0).max(0.0),
        h: (y1 - y0).max(0.0),
    }
}

/// Minimal box enclosing every input box; `None` for an empty slice.
pub fn merge_bboxes(boxes: &[NormalizedBBox]) -> Option<NormalizedBBox> {
    let first = boxes.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.right(), first.bottom());
    for b in &boxes[1..] {
        x0 = x0.min(b.x);
        y0 = y0.min(b.y);
        x1 = x1.max(b.right());
        y1 = y1.max(b.bottom());
    }
    Some(NormalizedBBox {
        x: x0,
        y: y0,
        w: x1 - x0,
        h: y1 - y0,
    })
}

/// Whether `bbox` satisfies the normalized-box invariant within [`BBOX_EPSILON`].
pub fn is_valid_normalized_bbox(bbox: &NormalizedBBox) -> bool {
    let parts = [bbox.x, bbox.y, bbox.w, bbox.h];
    if parts.iter().any(|v| !v.is_finite()) {
        return false;
    }
    bbox.x >= 0.0
        && bbox.y >= 0.0
        && bbox.w >= 0.0
        && bbox.h >= 0.0
        && bbox.right() <= 1.0 + BBOX_EPSILON
        && bbox.bottom() <= 1.0 + BBOX_EPSILON
}

/// Force `bbox` into the unit square.
///
/// `x`/`y` are clamped first, then `w`/`h` are shrunk so the box ends at or
/// before the page edge.
pub fn clamp_normalized_bbox(bbox: &NormalizedBBox) -> NormalizedBBox {
    let x = bbox.x.clamp(0.0, 1.0);
    let y = bbox.y.clamp(0.0, 1.0);
    NormalizedBBox {
        x,
        y,
        w: bbox.w.clamp(0.0, 1.0 - x),
        h: bbox.h.clamp(0.0, 1.0 - y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = NormalizedBBox::new(0.1, 0.2, 0.3, 0.05);
        assert!(approx(calculate_iou(&a, &a), 1.0));
    }

    #[test]
    fn iou_is_symmetric() {
        let a = NormalizedBBox::new(0.1, 0.1, 0.2, 0.05);
        let b = NormalizedBBox::new(0.11, 0.1, 0.2, 0.05);
        assert!(approx(calculate_iou(&a, &b), calculate_iou(&b, &a)));
        // 0.19 × 0.05 intersection over 0.0105 union
        assert!(approx(calculate_iou(&a, &b), 0.0095 / 0.0105));
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = NormalizedBBox::new(0.0, 0.0, 0.1, 0.1);
        let b = NormalizedBBox::new(0.5, 0.5, 0.1, 0.1);
        assert_eq!(calculate_iou(&a, &b), 0.0);
        assert!(!bboxes_overlap(&a, &b));
    }

    #[test]
    fn iou_of_degenerate_boxes_is_zero() {
        let a = NormalizedBBox::new(0.3, 0.3, 0.0, 0.0);
        assert_eq!(calculate_iou(&a, &a), 0.0);
    }

    #[test]
    fn overlap_includes_touching_edges() {
        let a = NormalizedBBox::new(0.0, 0.0, 0.5, 0.5);
        let b = NormalizedBBox::new(0.5, 0.0, 0.5, 0.5);
        assert!(bboxes_overlap(&a, &b));
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }

    #[test]
    fn normalize_round_trip_is_lossless() {
        let px = PixelBBox::new(123.0, 456.5, 78.25, 19.0);
        let n = to_normalized(&px, 2480.0, 3508.0);
        let back = from_normalized(&n, 2480.0, 3508.0);
        assert!(approx(back.x, px.x));
        assert!(approx(back.y, px.y));
        assert!(approx(back.w, px.w));
        assert!(approx(back.h, px.h));
    }

    #[test]
    fn point_pixel_round_trip_is_identity() {
        let px = PixelBBox::new(300.0, 150.0, 600.0, 42.0);
        let back = point_to_pixel(&pixel_to_point(&px, 300.0), 300.0);
        assert!(approx(back.x, px.x));
        assert!(approx(back.w, px.w));
        let pt = pixel_to_point(&px, 300.0);
        assert!(approx(pt.x, 72.0));
    }

    #[test]
    fn to_normalized_zero_page_does_not_produce_nan() {
        let n = to_normalized(&PixelBBox::new(1.0, 1.0, 1.0, 1.0), 0.0, 0.0);
        assert!(n.x.is_finite() && n.w.is_finite());
    }

    #[test]
    fn center_and_distance() {
        let a = NormalizedBBox::new(0.0, 0.0, 0.2, 0.2);
        let b = NormalizedBBox::new(0.3, 0.4, 0.2, 0.2);
        assert_eq!(bbox_center(&a), (0.1, 0.1));
        assert!(approx(bbox_distance(&a, &b), 0.5));
    }

    #[test]
    fn expand_is_clamped_to_unit_square() {
        let b = expand_bbox(&NormalizedBBox::new(0.01, 0.5, 0.98, 0.2), 0.05);
        assert!(approx(b.x, 0.0));
        assert!(approx(b.right(), 1.0));
        assert!(approx(b.y, 0.45));
        assert!(approx(b.h, 0.3));
        assert!(is_valid_normalized_bbox(&b));
    }

    #[test]
    fn merge_encloses_all_inputs() {
        assert_eq!(merge_bboxes(&[]), None);
        let m = merge_bboxes(&[
            NormalizedBBox::new(0.1, 0.2, 0.1, 0.1),
            NormalizedBBox::new(0.5, 0.05, 0.2, 0.1),
        ])
        .unwrap();
        assert!(approx(m.x, 0.1));
        assert!(approx(m.y, 0.05));
        assert!(approx(m.right(), 0.7));
        assert!(approx(m.bottom(), 0.3));
    }

    #[test]
    fn validity_honours_epsilon() {
        assert!(is_valid_normalized_bbox(&NormalizedBBox::FULL_PAGE));
        assert!(is_valid_normalized_bbox(&NormalizedBBox::new(0.5, 0.0, 0.5005, 1.0)));
        assert!(!is_valid_normalized_bbox(&NormalizedBBox::new(0.5, 0.0, 0.6, 0.5)));
        assert!(!is_valid_normalized_bbox(&NormalizedBBox::new(-0.1, 0.0, 0.2, 0.2)));
        assert!(!is_valid_normalized_bbox(&NormalizedBBox::new(f64::NAN, 0.0, 0.2, 0.2)));
    }

    #[test]
    fn clamp_fixes_position_then_extent() {
        let c = clamp_normalized_bbox(&NormalizedBBox::new(1.2, -0.1, 0.3, 1.5));
        assert_eq!(c, NormalizedBBox::new(1.0, 0.0, 0.0, 1.0));
        let c = clamp_normalized_bbox(&NormalizedBBox::new(0.8, 0.1, 0.4, 0.2));
        assert!(approx(c.w, 0.2));
        assert!(is_valid_normalized_bbox(&c));
    }
}
