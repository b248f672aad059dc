//! HTTP client for the OCR service.
//!
//! The service rasterises an uploaded document and runs a Japanese OCR
//! engine over it. It is a separate process (usually a GPU container), so
//! this module is the only place that knows its endpoints, form fields and
//! response shape. Everything downstream works on [`RawOcrResponse`], which
//! [`crate::pipeline::normalize`] turns into normalized coordinates.
//!
//! ## Endpoints
//!
//! | Path                 | Use                                                 |
//! |----------------------|-----------------------------------------------------|
//! | `/ocr`               | full analysis (text + layout); `lite` model option  |
//! | `/ocr/ocr-only`      | text recognition only                               |
//! | `/ocr/ocr-only/tiles`| text recognition restricted to tiles; boxes come back normalized |
//! | `/ocr/layout`        | layout analysis only (tables, figures, paragraphs)  |
//! | `/health`            | device and model status                             |
//!
//! ## Retries
//!
//! Only "connection refused" is retried by default (see [`crate::retry`]),
//! because that is what a service still loading its models looks like. When
//! the retries run out the error becomes [`OcrError::Unavailable`], which the
//! orchestrator treats as fatal for the whole request.

use crate::geometry::{NormalizedBBox, PixelBBox};
use crate::retry::{is_connection_refused, RetryError, RetryPolicy};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

// ── Wire types ───────────────────────────────────────────────────────────

/// Response body of every recognition endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOcrResponse {
    pub pages: Vec<RawPage>,
    /// Server-side processing time in seconds.
    #[serde(default)]
    pub processing_time: f64,
    /// Engine model identifier, e.g. `yomitoku-ocr-tiles`.
    #[serde(default)]
    pub model: String,
}

/// One page as reported by the engine.
///
/// Box units depend on the endpoint: pixels at `dpi` for most, page-normalized
/// fractions for the tile endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPage {
    pub page_index: usize,
    pub dpi: u32,
    pub width_px: u32,
    pub height_px: u32,
    #[serde(default)]
    pub blocks: Vec<RawBlock>,
    #[serde(default)]
    pub tables: Option<Vec<RawTable>>,
    #[serde(default)]
    pub figures: Option<Vec<RawFigure>>,
    #[serde(default)]
    pub reading_order: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub text: String,
    pub bbox: PixelBBox,
    #[serde(default = "default_block_type")]
    pub block_type: String,
    #[serde(default)]
    pub lines: Vec<RawLine>,
}

fn default_block_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLine {
    pub text: String,
    pub bbox: PixelBBox,
    #[serde(default)]
    pub tokens: Vec<RawToken>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawToken {
    pub text: String,
    pub bbox: PixelBBox,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub bbox: PixelBBox,
    pub rows: u32,
    pub cols: u32,
    #[serde(default)]
    pub cells: Vec<RawCell>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCell {
    #[serde(default)]
    pub row_index: u32,
    #[serde(default)]
    pub col_index: u32,
    #[serde(default = "one")]
    pub row_span: u32,
    #[serde(default = "one")]
    pub col_span: u32,
    #[serde(default)]
    pub text: String,
    pub bbox: PixelBBox,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFigure {
    pub bbox: PixelBBox,
    #[serde(default)]
    pub figure_type: String,
}

impl RawOcrResponse {
    /// Blocks, tables and figures across all pages.
    pub fn element_count(&self) -> usize {
        self.pages
            .iter()
            .map(|p| {
                p.blocks.len()
                    + p.tables.as_ref().map_or(0, Vec::len)
                    + p.figures.as_ref().map_or(0, Vec::len)
            })
            .sum()
    }
}

/// `GET /health` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrHealth {
    pub status: String,
    #[serde(default)]
    pub devices: DeviceAvailability,
    #[serde(default)]
    pub models_loaded: ModelsLoaded,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceAvailability {
    pub cuda_available: bool,
    pub mps_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsLoaded {
    pub standard: bool,
    pub lite: bool,
    pub ocr_module: bool,
    pub layout_analyzer: bool,
}

// ── Request types ────────────────────────────────────────────────────────

/// Compute device requested from the OCR engine. The service falls back to
/// whatever is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    #[default]
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            other => Err(format!("unknown device '{other}' (expected cpu, cuda or mps)")),
        }
    }
}

/// Which OCR service endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrEndpoint {
    /// `/ocr`: full document analysis.
    Full,
    /// `/ocr/ocr-only`: text recognition over whole pages.
    TextOnly,
    /// `/ocr/ocr-only/tiles`: text recognition inside tiles.
    TextTiles,
    /// `/ocr/layout`: layout analysis only.
    Layout,
}

impl OcrEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            OcrEndpoint::Full => "/ocr",
            OcrEndpoint::TextOnly => "/ocr/ocr-only",
            OcrEndpoint::TextTiles => "/ocr/ocr-only/tiles",
            OcrEndpoint::Layout => "/ocr/layout",
        }
    }

    /// Whether response boxes are already normalized to the page.
    pub fn returns_normalized_boxes(&self) -> bool {
        matches!(self, OcrEndpoint::TextTiles)
    }
}

/// A region for the tile endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSpec {
    pub page_index: usize,
    pub bbox_normalized: NormalizedBBox,
    pub overlap: f64,
}

/// The document sent to the OCR service.
#[derive(Debug, Clone)]
pub struct OcrUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: String,
}

impl OcrUpload {
    pub fn pdf(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            mime: "application/pdf".to_string(),
        }
    }

    /// Short format tag recorded with normalized OCR output.
    pub fn source_format(&self) -> &'static str {
        match self.mime.as_str() {
            "application/pdf" => "pdf",
            "image/png" => "png",
            "image/jpeg" => "jpeg",
            _ => "unknown",
        }
    }
}

/// Endpoint plus form parameters for one recognition call.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub endpoint: OcrEndpoint,
    pub dpi: u32,
    pub device: Device,
    /// Only sent to [`OcrEndpoint::Full`].
    pub lite: bool,
    /// Only sent to [`OcrEndpoint::TextTiles`].
    pub tiles: Vec<TileSpec>,
}

impl OcrRequest {
    pub fn new(endpoint: OcrEndpoint, dpi: u32, device: Device) -> Self {
        Self {
            endpoint,
            dpi,
            device,
            lite: false,
            tiles: Vec::new(),
        }
    }

    pub fn lite(mut self, lite: bool) -> Self {
        self.lite = lite;
        self
    }

    pub fn tiles(mut self, tiles: Vec<TileSpec>) -> Self {
        self.tiles = tiles;
        self
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OcrError {
    /// Could not reach the service or the connection broke mid-request.
    #[error("OCR transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("OCR service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body was not the expected JSON.
    #[error("Malformed OCR response: {0}")]
    Decode(String),

    /// Transient failures on every attempt.
    #[error("OCR service at {url} unavailable after {attempts} attempts: {detail}")]
    Unavailable {
        url: String,
        attempts: u32,
        detail: String,
    },
}

/// Retry classifier: retry only when the connection was refused.
pub fn is_refused(err: &OcrError) -> bool {
    match err {
        OcrError::Transport(e) => is_connection_refused(e),
        _ => false,
    }
}

// ── Service contract ─────────────────────────────────────────────────────

/// Anything that can turn a document into a [`RawOcrResponse`].
///
/// [`OcrClient`] is the HTTP implementation; tests supply in-process fakes.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(
        &self,
        upload: &OcrUpload,
        request: &OcrRequest,
    ) -> Result<RawOcrResponse, OcrError>;
}

/// reqwest-backed [`OcrService`].
#[derive(Clone)]
pub struct OcrClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl fmt::Debug for OcrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OcrClient {
    /// Client for the service at `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Query `GET /health`. Not retried.
    pub async fn health(&self) -> Result<OcrHealth, OcrError> {
        let response = self.http.get(self.url("/health")).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OcrError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| OcrError::Decode(e.to_string()))
    }

    /// Multipart form for one attempt. Rebuilt every attempt because
    /// reqwest consumes it on send.
    fn build_form(upload: &OcrUpload, request: &OcrRequest) -> Result<Form, OcrError> {
        let file = Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone())
            .mime_str(&upload.mime)?;

        let mut form = Form::new()
            .part("file", file)
            .text("dpi", request.dpi.to_string())
            .text("device", request.device.as_str());

        match request.endpoint {
            OcrEndpoint::Full => {
                form = form.text("lite", request.lite.to_string());
            }
            OcrEndpoint::TextTiles => {
                let tiles = serde_json::to_string(&request.tiles)
                    .map_err(|e| OcrError::Decode(format!("tiles: {e}")))?;
                form = form.text("tiles", tiles);
            }
            OcrEndpoint::TextOnly | OcrEndpoint::Layout => {}
        }
        Ok(form)
    }

    async fn send_once(
        &self,
        upload: &OcrUpload,
        request: &OcrRequest,
    ) -> Result<RawOcrResponse, OcrError> {
        let form = Self::build_form(upload, request)?;
        let response = self
            .http
            .post(self.url(request.endpoint.path()))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OcrError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| OcrError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OcrService for OcrClient {
    async fn recognize(
        &self,
        upload: &OcrUpload,
        request: &OcrRequest,
    ) -> Result<RawOcrResponse, OcrError> {
        let start = Instant::now();
        let result = self
            .retry
            .run(is_refused, |_| self.send_once(upload, request))
            .await;

        match result {
            Ok(response) => {
                debug!(
                    "OCR {} → {} pages, {} elements in {:?} (model {})",
                    request.endpoint.path(),
                    response.pages.len(),
                    response.element_count(),
                    start.elapsed(),
                    response.model
                );
                Ok(response)
            }
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(OcrError::Unavailable {
                url: self.base_url.clone(),
                attempts,
                detail: last.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILES_RESPONSE: &str = r#"{
        "pages": [{
            "pageIndex": 0, "dpi": 300, "widthPx": 2480, "heightPx": 3508,
            "blocks": [{
                "text": "氏名", "bbox": {"x": 0.1, "y": 0.1, "w": 0.05, "h": 0.02},
                "blockType": "text",
                "lines": [{"text": "氏名", "bbox": {"x": 0.1, "y": 0.1, "w": 0.05, "h": 0.02},
                           "tokens": [{"text": "氏名", "bbox": {"x": 0.1, "y": 0.1, "w": 0.05, "h": 0.02}, "confidence": 0.98}]}]
            }],
            "tables": null, "figures": null, "readingOrder": null
        }],
        "processingTime": 1.25,
        "model": "yomitoku-ocr-tiles"
    }"#;

    #[test]
    fn decodes_service_response() {
        let r: RawOcrResponse = serde_json::from_str(TILES_RESPONSE).unwrap();
        assert_eq!(r.model, "yomitoku-ocr-tiles");
        assert_eq!(r.pages[0].width_px, 2480);
        assert_eq!(r.pages[0].blocks[0].lines[0].tokens[0].confidence, Some(0.98));
        assert_eq!(r.element_count(), 1);
    }

    #[test]
    fn decodes_table_cells_with_default_spans() {
        let t: RawTable = serde_json::from_str(
            r#"{"bbox":{"x":0,"y":0,"w":10,"h":10},"rows":1,"cols":2,
                "cells":[{"rowIndex":0,"colIndex":1,"text":"円","bbox":{"x":5,"y":0,"w":5,"h":10}}]}"#,
        )
        .unwrap();
        assert_eq!(t.cells[0].row_span, 1);
        assert_eq!(t.cells[0].col_index, 1);
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(OcrEndpoint::Full.path(), "/ocr");
        assert_eq!(OcrEndpoint::TextTiles.path(), "/ocr/ocr-only/tiles");
        assert_eq!(OcrEndpoint::Layout.path(), "/ocr/layout");
        assert!(OcrEndpoint::TextTiles.returns_normalized_boxes());
        assert!(!OcrEndpoint::Layout.returns_normalized_boxes());
    }

    #[test]
    fn http_errors_are_not_transient() {
        let e = OcrError::Http {
            status: 500,
            body: "boom".into(),
        };
        assert!(!is_refused(&e));
        assert!(!is_refused(&OcrError::Decode("eof".into())));
    }

    #[test]
    fn device_parses_case_insensitively() {
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("mps".parse::<Device>().unwrap(), Device::Mps);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::default().to_string(), "cuda");
    }

    #[test]
    fn health_decodes_snake_case() {
        let h: OcrHealth = serde_json::from_str(
            r#"{"status":"ok","devices":{"cuda_available":false,"mps_available":true},
                "models_loaded":{"standard":true,"lite":false,"ocr_module":true,"layout_analyzer":false}}"#,
        )
        .unwrap();
        assert_eq!(h.status, "ok");
        assert!(h.devices.mps_available);
        assert!(h.models_loaded.ocr_module);
    }

    #[test]
    fn upload_reports_source_format() {
        assert_eq!(OcrUpload::pdf(Vec::new(), "a.pdf").source_format(), "pdf");
        let png = OcrUpload {
            bytes: Vec::new(),
            filename: "a.png".into(),
            mime: "image/png".into(),
        };
        assert_eq!(png.source_format(), "png");
    }

    #[test]
    fn client_trims_trailing_slash() {
        let c = OcrClient::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(c.base_url(), "http://localhost:8000");
        assert_eq!(c.url("/health"), "http://localhost:8000/health");
    }
}
