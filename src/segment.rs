//! Caller-declared regions of interest.
//!
//! A [`SegmentSpec`] names one rectangle on one page, in normalized
//! coordinates. Segments are drawn by a human in a UI (or written by hand on
//! the command line), so they are validated once, up front, before any
//! masking or network work happens. After validation a spec is never
//! mutated; it only drives masking and the segment-of-interest hint sent to
//! the field detector.

use crate::error::FormSegError;
use crate::geometry::{NormalizedBBox, BBOX_EPSILON};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A rectangular region of interest on one page, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    /// 0-indexed page the segment lives on.
    pub page_index: usize,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl SegmentSpec {
    pub fn new(page_index: usize, x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            page_index,
            x,
            y,
            w,
            h,
        }
    }

    /// A segment covering the whole of `page_index`.
    pub fn full_page(page_index: usize) -> Self {
        Self::new(page_index, 0.0, 0.0, 1.0, 1.0)
    }

    /// Whether the segment covers its whole page (within [`BBOX_EPSILON`]).
    pub fn is_full_page(&self) -> bool {
        self.x <= BBOX_EPSILON
            && self.y <= BBOX_EPSILON
            && self.x + self.w >= 1.0 - BBOX_EPSILON
            && self.y + self.h >= 1.0 - BBOX_EPSILON
    }

    pub fn bbox(&self) -> NormalizedBBox {
        NormalizedBBox::new(self.x, self.y, self.w, self.h)
    }
}

/// Parse the CLI shorthand `PAGE:X,Y,W,H`, e.g. `0:0,0,1,0.5`.
impl FromStr for SegmentSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (page, rect) = s
            .split_once(':')
            .ok_or_else(|| format!("expected PAGE:X,Y,W,H, got '{s}'"))?;
        let page_index: usize = page
            .trim()
            .parse()
            .map_err(|_| format!("invalid page index '{}'", page.trim()))?;
        let values = rect
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("invalid coordinate '{}'", v.trim()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            [x, y, w, h] => Ok(SegmentSpec::new(page_index, *x, *y, *w, *h)),
            _ => Err(format!(
                "expected 4 coordinates (X,Y,W,H), got {}",
                values.len()
            )),
        }
    }
}

/// Wire form of a segment, before the page index is known to be non-negative.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    page_index: i64,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// Parse a JSON array of segments as sent by the UI.
///
/// Negative page indices are reported as [`FormSegError::InvalidSegment`]
/// (a validation failure) rather than as a JSON error.
pub fn parse_segments_json(json: &str) -> Result<Vec<SegmentSpec>, FormSegError> {
    if json.trim().is_empty() {
        return Err(FormSegError::MissingSegments {
            detail: "segment list is empty".into(),
        });
    }
    let raw: Vec<RawSegment> =
        serde_json::from_str(json).map_err(|e| FormSegError::MissingSegments {
            detail: e.to_string(),
        })?;
    raw.into_iter()
        .enumerate()
        .map(|(index, r)| {
            let page_index = usize::try_from(r.page_index).map_err(|_| {
                FormSegError::InvalidSegment {
                    index,
                    reason: format!("pageIndex must be ≥ 0, got {}", r.page_index),
                }
            })?;
            Ok(SegmentSpec::new(page_index, r.x, r.y, r.w, r.h))
        })
        .collect()
}

/// Check every segment before any masking happens.
///
/// Fails on the first offending segment with a message naming it.
pub fn validate_segments(segments: &[SegmentSpec]) -> Result<(), FormSegError> {
    if segments.is_empty() {
        return Err(FormSegError::MissingSegments {
            detail: "at least one segment is required".into(),
        });
    }

    for (index, s) in segments.iter().enumerate() {
        let invalid = |reason: String| FormSegError::InvalidSegment { index, reason };

        for (name, v) in [("x", s.x), ("y", s.y)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(format!("{name} must be within [0, 1], got {v}")));
            }
        }
        for (name, v) in [("w", s.w), ("h", s.h)] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(invalid(format!("{name} must be within (0, 1], got {v}")));
            }
        }
        if s.x + s.w > 1.0 + BBOX_EPSILON {
            return Err(invalid(format!(
                "x + w must not exceed 1, got {}",
                s.x + s.w
            )));
        }
        if s.y + s.h > 1.0 + BBOX_EPSILON {
            return Err(invalid(format!(
                "y + h must not exceed 1, got {}",
                s.y + s.h
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_rejected() {
        let err = validate_segments(&[]).unwrap_err();
        assert_eq!(err.code(), "MISSING_SEGMENTS");
    }

    #[test]
    fn full_page_is_accepted() {
        assert!(validate_segments(&[SegmentSpec::new(0, 0.0, 0.0, 1.0, 1.0)]).is_ok());
    }

    #[test]
    fn full_page_detection_tolerates_rounding() {
        assert!(SegmentSpec::full_page(3).is_full_page());
        assert!(SegmentSpec::new(0, 0.0005, 0.0, 0.9997, 1.0).is_full_page());
        assert!(!SegmentSpec::new(0, 0.0, 0.0, 1.0, 0.5).is_full_page());
    }

    #[test]
    fn overflowing_width_is_rejected() {
        let err = validate_segments(&[SegmentSpec::new(0, 0.5, 0.0, 0.6, 0.5)]).unwrap_err();
        match err {
            FormSegError::InvalidSegment { index, reason } => {
                assert_eq!(index, 0);
                assert!(reason.contains("x + w"), "got: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn round_trip_noise_within_epsilon_is_accepted() {
        let s = SegmentSpec::new(1, 0.25, 0.5, 0.7505, 0.5004);
        assert!(validate_segments(&[s]).is_ok());
    }

    #[test]
    fn zero_extent_is_rejected() {
        let err = validate_segments(&[
            SegmentSpec::full_page(0),
            SegmentSpec::new(0, 0.1, 0.1, 0.0, 0.2),
        ])
        .unwrap_err();
        assert!(matches!(err, FormSegError::InvalidSegment { index: 1, .. }));
    }

    #[test]
    fn out_of_range_origin_is_rejected() {
        assert!(validate_segments(&[SegmentSpec::new(0, 1.2, 0.0, 0.1, 0.1)]).is_err());
        assert!(validate_segments(&[SegmentSpec::new(0, 0.0, -0.01, 0.1, 0.1)]).is_err());
        assert!(validate_segments(&[SegmentSpec::new(0, f64::NAN, 0.0, 0.1, 0.1)]).is_err());
    }

    #[test]
    fn parses_json_segments() {
        let segs =
            parse_segments_json(r#"[{"pageIndex":0,"x":0,"y":0,"w":1,"h":0.5}]"#).unwrap();
        assert_eq!(segs, vec![SegmentSpec::new(0, 0.0, 0.0, 1.0, 0.5)]);
    }

    #[test]
    fn negative_page_index_is_a_validation_error() {
        let err = parse_segments_json(r#"[{"pageIndex":-1,"x":0,"y":0,"w":1,"h":1}]"#)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SEGMENT");
    }

    #[test]
    fn malformed_json_is_missing_segments() {
        assert_eq!(
            parse_segments_json("not json").unwrap_err().code(),
            "MISSING_SEGMENTS"
        );
        assert_eq!(parse_segments_json("  ").unwrap_err().code(), "MISSING_SEGMENTS");
    }

    #[test]
    fn parses_cli_shorthand() {
        let s: SegmentSpec = "2:0.1, 0.2,0.3,0.4".parse().unwrap();
        assert_eq!(s, SegmentSpec::new(2, 0.1, 0.2, 0.3, 0.4));
        assert!("0:0.1,0.2,0.3".parse::<SegmentSpec>().is_err());
        assert!("0.1,0.2,0.3,0.4".parse::<SegmentSpec>().is_err());
    }
}
