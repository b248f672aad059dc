//! Input resolution and upload checks.
//!
//! Everything downstream works on bytes in memory: pdfium loads from a byte
//! slice and the OCR client uploads a multipart body. A [`Document`] is
//! therefore just the bytes plus the filename and the MIME type sniffed
//! from the content. The declared extension is never trusted.

use crate::error::FormSegError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Upload ceiling in bytes.
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// MIME types accepted for upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

/// A document held in memory.
#[derive(Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Sniffed from the content; `application/octet-stream` when unknown.
    pub mime: String,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl Document {
    pub fn from_bytes(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self {
            bytes,
            filename: filename.into(),
            mime,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.mime == "application/pdf"
    }
}

/// Reject empty, oversized and unsupported uploads.
pub fn validate_document(document: &Document) -> Result<(), FormSegError> {
    if document.bytes.is_empty() {
        return Err(FormSegError::NoFile);
    }
    if document.bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(FormSegError::FileTooLarge {
            size: document.bytes.len(),
            limit: MAX_DOCUMENT_BYTES,
        });
    }
    if !ALLOWED_MIME_TYPES.contains(&document.mime.as_str()) {
        return Err(FormSegError::UnsupportedMimeType {
            mime: document.mime.clone(),
        });
    }
    Ok(())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Document, FormSegError> {
    if input.trim().is_empty() {
        return Err(FormSegError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

fn too_large(size: u64) -> FormSegError {
    FormSegError::FileTooLarge {
        size: usize::try_from(size).unwrap_or(usize::MAX),
        limit: MAX_DOCUMENT_BYTES,
    }
}

async fn read_local(path_str: &str) -> Result<Document, FormSegError> {
    let path = PathBuf::from(path_str);
    let io_error = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FormSegError::PermissionDenied { path: path.clone() },
        _ => FormSegError::FileNotFound { path: path.clone() },
    };

    let size = tokio::fs::metadata(&path).await.map_err(io_error)?.len();
    if size > MAX_DOCUMENT_BYTES as u64 {
        return Err(too_large(size));
    }
    let bytes = tokio::fs::read(&path).await.map_err(io_error)?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let document = Document::from_bytes(bytes, filename);
    debug!("Loaded {} ({}, {} bytes)", path.display(), document.mime, document.bytes.len());
    Ok(document)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, FormSegError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FormSegError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            FormSegError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FormSegError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let mut response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(FormSegError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    if let Some(len) = response.content_length() {
        if len > MAX_DOCUMENT_BYTES as u64 {
            return Err(too_large(len));
        }
    }

    // Content-Length is optional and may lie, so the limit is enforced on
    // the bytes actually received too.
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(to_error)? {
        if bytes.len() + chunk.len() > MAX_DOCUMENT_BYTES {
            return Err(too_large((bytes.len() + chunk.len()) as u64));
        }
        bytes.extend_from_slice(&chunk);
    }
    let document = Document::from_bytes(bytes, filename_from_url(url));
    info!("Downloaded {} bytes ({})", document.bytes.len(), document.mime);
    Ok(document)
}

/// Last path segment of the URL when it looks like a filename.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}
