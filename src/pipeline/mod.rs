//! Pipeline stages for segment-scoped form-field detection.
//!
//! Each submodule implements one step; the orchestrator in
//! [`crate::detect`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ mask ──▶ ocr ──▶ normalize ──▶ fields ──▶ merge ──▶ validate ──▶ schema
//!          (pdfium)  (HTTP)               (LLM)
//!            └──▶ render ──▶ encode ──────┘
//! ```
//!
//! 1. [`input`]     — load and sniff the upload, enforce size and type
//! 2. [`mask`]      — one single-page PDF per segment with everything
//!    outside the segment painted white
//! 3. [`render`] / [`encode`] — optional preview image of each masked page
//! 4. [`ocr`]       — text and layout passes against the OCR service
//! 5. [`normalize`] — pixel or normalized boxes → one normalized shape
//! 6. [`fields`]    — language-model field detection
//! 7. [`merge`]     — cross-segment deduplication
//! 8. [`validate`]  — drop unusable fields, sort into reading order
//! 9. [`schema`]    — renderer text schemas in millimetres
//!
//! [`pdf`] binds the pdfium library; [`debug`] writes per-request artifacts.

pub mod debug;
pub mod encode;
pub mod fields;
pub mod input;
pub mod mask;
pub mod merge;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod render;
pub mod schema;
pub mod validate;
