//! Result types returned by the detection pipeline.
//!
//! Everything here is `Serialize` so the CLI can print a
//! [`DetectionOutput`] as JSON verbatim, and field names are camelCase to
//! match what the UI and the OCR service already speak.

use crate::error::SegmentError;
use crate::geometry::NormalizedBBox;
use crate::pipeline::schema::TextSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of form field the detector recognised.
///
/// Anything the model invents outside this list deserializes as
/// [`FieldType::Unknown`] and is discarded by
/// [`crate::pipeline::validate::validate_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Multiline,
    Number,
    Date,
    Checkbox,
    Signature,
    Email,
    Phone,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Text => "text",
            FieldType::Multiline => "multiline",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
            FieldType::Signature => "signature",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One form field found by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedField {
    /// Identifier, unique within its segment (segment-prefixed after detection).
    pub name: String,
    /// Human-readable label printed next to the field on the form.
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(alias = "bbox")]
    pub bbox_normalized: NormalizedBBox,
    #[serde(default)]
    pub page_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Per-segment bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetadata {
    /// Blocks across all OCR passes for this segment.
    pub ocr_block_count: usize,
    /// OCR passes that ran ("text", "layout").
    pub passes: Vec<String>,
    /// Model identifier reported by the detector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Outcome of one segment. Failures are recorded here, never propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentResult {
    pub segment_index: usize,
    pub fields: Vec<DetectedField>,
    pub metadata: SegmentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SegmentError>,
}

impl SegmentResult {
    /// A failed segment: no fields, the error recorded in place.
    pub fn failed(segment_index: usize, metadata: SegmentMetadata, error: SegmentError) -> Self {
        Self {
            segment_index,
            fields: Vec::new(),
            metadata,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One entry of `metadata.errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentErrorEntry {
    pub segment_index: usize,
    pub error: String,
}

/// Aggregate statistics for a detection request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMetadata {
    pub segment_count: usize,
    pub successful_segments: usize,
    pub page_count: usize,
    pub total_fields: usize,
    pub processing_time_ms: u64,
    /// Per-segment failures; omitted entirely when every segment succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<SegmentErrorEntry>>,
}

/// Where the side-channel artifacts for this request were written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub request_id: String,
    pub directory: String,
}

/// Complete result of a detection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionOutput {
    /// Merged, validated fields in reading order.
    pub fields: Vec<DetectedField>,
    /// Text-schema objects for the downstream renderer, one list per page.
    pub schemas: Vec<Vec<TextSchema>>,
    /// Raw per-segment results, in segment order.
    pub segments: Vec<SegmentResult>,
    pub metadata: DetectionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

/// Page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageSize {
    /// ISO A4 portrait, used when a page size is unknown.
    pub const A4: PageSize = PageSize {
        width_pt: 595.28,
        height_pt: 841.89,
    };
}

/// Document-level facts extracted without OCR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub page_sizes: Vec<PageSize>,
    pub pdf_version: String,
}
