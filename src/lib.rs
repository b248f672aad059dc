//! # formseg
//!
//! Detect fillable form fields inside caller-chosen regions of a scanned or
//! digital form.
//!
//! A caller draws one or more rectangles ("segments") over a document. For
//! each segment the crate builds a copy of the page with everything outside
//! the rectangle painted white, sends it to an OCR service, and hands the
//! recognised text (plus, optionally, an image of the masked page) to a
//! vision-capable language model that names the fields it sees. Results
//! from all segments are deduplicated, validated, put into reading order and
//! converted into text schemas a form renderer can place on the page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + segments
//!  │
//!  ├─ 1. Input     load file or URL, sniff MIME, enforce 10 MB
//!  ├─ 2. Mask      one white-masked single-page PDF per segment (pdfium)
//!  ├─ 3. OCR       text pass (+ layout pass) per segment, concurrently
//!  ├─ 4. Detect    LLM turns OCR (+ preview image) into fields
//!  ├─ 5. Merge     cross-segment dedup by IoU, union-find clusters
//!  ├─ 6. Validate  drop unusable fields, reading-order sort
//!  └─ 7. Output    fields + per-page text schemas + per-segment results
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formseg::{detect, DetectionConfig, SegmentSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = DetectionConfig::builder()
//!         .ocr_url("http://localhost:8000")
//!         .build()?;
//!     let segments = [SegmentSpec::new(0, 0.0, 0.0, 1.0, 0.5)];
//!     let output = detect("application.pdf", &segments, &config).await?;
//!     for field in &output.fields {
//!         println!("{} ({}) {:?}", field.label, field.field_type, field.bbox_normalized);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formseg` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod segment;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CancellationPolicy, DetectionConfig, DetectionConfigBuilder};
pub use detect::{
    check_ocr_health, detect, detect_from_bytes, detect_sync, inspect, Detector, MaskedDocument,
    MaskedSegment,
};
pub use error::{FormSegError, SegmentError};
pub use geometry::{NormalizedBBox, PixelBBox};
pub use output::{
    DetectedField, DetectionMetadata, DetectionOutput, DocumentMetadata, FieldType, PageSize,
    SegmentResult,
};
pub use pipeline::fields::{FieldDetector, LlmFieldDetector};
pub use pipeline::ocr::{Device, OcrClient, OcrService};
pub use progress::{DetectionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use segment::{parse_segments_json, validate_segments, SegmentSpec};
