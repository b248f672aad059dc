//! Error types for the formseg library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FormSegError`] — **Fatal**: the request cannot proceed at all
//!   (oversized upload, invalid segments, OCR service unreachable). Returned
//!   as `Err(FormSegError)` from the top-level `detect*` functions.
//!
//! * [`SegmentError`] — **Non-fatal**: one segment failed (OCR returned
//!   nothing, the LLM call failed) but the other segments are fine. Stored
//!   inside [`crate::output::SegmentResult`] and echoed in
//!   `metadata.errors` so callers see partial success instead of losing the
//!   whole document to one bad region.
//!
//! Fatal errors carry a machine-readable [`FormSegError::code`] and an
//! HTTP-style [`FormSegError::status_code`] so a transport layer can map them
//! without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the formseg library.
#[derive(Debug, Error)]
pub enum FormSegError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No document bytes were supplied.
    #[error("No file was provided")]
    NoFile,

    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The document exceeds the upload ceiling.
    #[error("File is too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },

    /// The document is not a PDF, PNG or JPEG.
    #[error("Unsupported file type: {mime}. Allowed: PDF, PNG, JPEG")]
    UnsupportedMimeType { mime: String },

    // ── Segment errors ────────────────────────────────────────────────────
    /// The request carried no segment list, or it could not be parsed.
    #[error("Missing or malformed segment list: {detail}")]
    MissingSegments { detail: String },

    /// A segment failed validation.
    #[error("Segment {index} is invalid: {reason}")]
    InvalidSegment { index: usize, reason: String },

    /// Masking only works on PDF input.
    #[error("Segment masking requires a PDF document, got {mime}")]
    UnsupportedMaskingInput { mime: String },

    /// A segment references a page the document does not have.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// pdfium failed while building the masked copy of a segment.
    #[error("Masking failed for segment {segment}: {detail}")]
    MaskingFailed { segment: usize, detail: String },

    /// pdfium could not render a masked segment to an image.
    #[error("Failed to rasterise segment {segment}: {detail}")]
    RasterisationFailed { segment: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The OCR service refused connections on every attempt.
    #[error("OCR service at '{url}' is unreachable after {attempts} attempts: {detail}")]
    OcrServiceUnavailable {
        url: String,
        attempts: u32,
        detail: String,
    },

    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The whole request ran past its configured deadline.
    #[error("Detection did not finish within {secs}s")]
    DeadlineExceeded { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormSegError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FormSegError::NoFile => "NO_FILE",
            FormSegError::FileNotFound { .. } => "FILE_NOT_FOUND",
            FormSegError::PermissionDenied { .. } => "PERMISSION_DENIED",
            FormSegError::InvalidInput { .. } => "INVALID_INPUT",
            FormSegError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            FormSegError::DownloadTimeout { .. } => "DOWNLOAD_TIMEOUT",
            FormSegError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            FormSegError::UnsupportedMimeType { .. } => "UNSUPPORTED_MIME_TYPE",
            FormSegError::MissingSegments { .. } => "MISSING_SEGMENTS",
            FormSegError::InvalidSegment { .. } => "INVALID_SEGMENT",
            FormSegError::UnsupportedMaskingInput { .. } => "UNSUPPORTED_MASKING_INPUT",
            FormSegError::PageOutOfRange { .. } => "PAGE_OUT_OF_RANGE",
            FormSegError::CorruptPdf { .. } => "CORRUPT_PDF",
            FormSegError::MaskingFailed { .. } => "MASKING_FAILED",
            FormSegError::RasterisationFailed { .. } => "RASTERISATION_FAILED",
            FormSegError::PdfiumBindingFailed(_) => "PDFIUM_UNAVAILABLE",
            FormSegError::OcrServiceUnavailable { .. } => "OCR_SERVICE_UNAVAILABLE",
            FormSegError::ProviderNotConfigured { .. } => "PROVIDER_NOT_CONFIGURED",
            FormSegError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            FormSegError::InvalidConfig(_) => "INVALID_CONFIG",
            FormSegError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP-style status class for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            FormSegError::NoFile
            | FormSegError::FileNotFound { .. }
            | FormSegError::PermissionDenied { .. }
            | FormSegError::InvalidInput { .. }
            | FormSegError::DownloadFailed { .. }
            | FormSegError::DownloadTimeout { .. }
            | FormSegError::FileTooLarge { .. }
            | FormSegError::UnsupportedMimeType { .. }
            | FormSegError::MissingSegments { .. }
            | FormSegError::InvalidSegment { .. }
            | FormSegError::UnsupportedMaskingInput { .. }
            | FormSegError::PageOutOfRange { .. }
            | FormSegError::CorruptPdf { .. } => 400,
            FormSegError::OcrServiceUnavailable { .. } => 503,
            FormSegError::DeadlineExceeded { .. } => 504,
            FormSegError::MaskingFailed { .. }
            | FormSegError::RasterisationFailed { .. }
            | FormSegError::PdfiumBindingFailed(_)
            | FormSegError::ProviderNotConfigured { .. }
            | FormSegError::InvalidConfig(_)
            | FormSegError::Internal(_) => 500,
        }
    }

    /// Message suitable for showing to an end user.
    ///
    /// For an unreachable OCR service this is a localized "try again later"
    /// notice rather than the technical detail carried by `Display`.
    pub fn user_message(&self) -> String {
        match self {
            FormSegError::OcrServiceUnavailable { .. } => {
                "OCRサービスに接続できませんでした。サービスの起動中の可能性があります。しばらく待ってから再度お試しください。"
                    .to_string()
            }
            FormSegError::DeadlineExceeded { .. } => {
                "処理がタイムアウトしました。領域を減らすか、しばらく待ってから再度お試しください。"
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

/// A non-fatal error for a single segment.
///
/// Stored in [`crate::output::SegmentResult::error`]. The overall request
/// continues with the remaining segments.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentError {
    /// The OCR service answered with an error (HTTP status, timeout, bad body).
    #[error("Segment {segment}: OCR {pass} pass failed: {detail}")]
    OcrFailed {
        segment: usize,
        pass: String,
        detail: String,
    },

    /// OCR succeeded but found no text at all inside the segment.
    #[error("Segment {segment}: OCR returned no blocks")]
    EmptyOcr { segment: usize },

    /// The raw OCR response could not be normalized.
    #[error("Segment {segment}: OCR normalization failed: {detail}")]
    NormalizationFailed { segment: usize, detail: String },

    /// Field detection failed after retries.
    #[error("Segment {segment}: field detection failed after {retries} retries: {detail}")]
    DetectionFailed {
        segment: usize,
        retries: u32,
        detail: String,
    },

    /// The segment task panicked or was aborted.
    #[error("Segment {segment}: task failed: {detail}")]
    TaskFailed { segment: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        let e = FormSegError::FileTooLarge {
            size: 11 * 1024 * 1024,
            limit: 10 * 1024 * 1024,
        };
        assert_eq!(e.status_code(), 400);
        assert_eq!(e.code(), "FILE_TOO_LARGE");

        let e = FormSegError::InvalidSegment {
            index: 2,
            reason: "x + w exceeds 1".into(),
        };
        assert!(e.to_string().contains("Segment 2"), "got: {e}");
        assert_eq!(e.status_code(), 400);
    }

    #[test]
    fn unavailable_has_distinct_user_message() {
        let e = FormSegError::OcrServiceUnavailable {
            url: "http://localhost:8000".into(),
            attempts: 4,
            detail: "connection refused".into(),
        };
        assert_eq!(e.status_code(), 503);
        assert!(e.to_string().contains("4 attempts"));
        assert!(e.to_string().contains("localhost:8000"));
        assert_ne!(e.user_message(), e.to_string());
    }

    #[test]
    fn other_errors_use_display_as_user_message() {
        let e = FormSegError::UnsupportedMimeType {
            mime: "image/gif".into(),
        };
        assert_eq!(e.user_message(), e.to_string());
    }

    #[test]
    fn segment_error_serializes_with_kind() {
        let e = SegmentError::EmptyOcr { segment: 1 };
        assert!(e.to_string().contains("no blocks"));

        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "empty_ocr");
        assert_eq!(json["segment"], 1);
    }
}
