//! Detection entry points and the segment orchestrator.
//!
//! One request runs in three phases:
//!
//! 1. **Prepare** (blocking): validate the upload and the segments, then in
//!    a single `spawn_blocking` task bind pdfium, build one masked PDF per
//!    segment, render optional previews and read the page sizes.
//! 2. **Fan out** (async): every segment is its own tokio task, at most
//!    `concurrency` in flight. A task runs the OCR pass (or the text and
//!    layout passes side by side), normalizes the result and asks the
//!    [`FieldDetector`] for fields. A failing segment is recorded in its
//!    [`SegmentResult`] and the others carry on. The only thing that stops
//!    the whole request is an OCR service that never accepted a connection.
//! 3. **Join**: results are put back into segment order, deduplicated across
//!    segments, validated, sorted into reading order and converted to
//!    renderer schemas.

use crate::config::{CancellationPolicy, DetectionConfig};
use crate::error::{FormSegError, SegmentError};
use crate::geometry::{bbox_center, expand_bbox};
use crate::output::{
    DetectedField, DetectionMetadata, DetectionOutput, DocumentMetadata, PageSize,
    SegmentErrorEntry, SegmentMetadata, SegmentResult,
};
use crate::pipeline::debug::DebugSink;
use crate::pipeline::encode::encode_preview;
use crate::pipeline::fields::{DetectionInput, DetectionRequest, FieldDetector, LlmFieldDetector};
use crate::pipeline::input::{self, Document};
use crate::pipeline::mask::build_masked_pdf_segments;
use crate::pipeline::merge::{merge_detected_fields_across_segments, MERGE_IOU_THRESHOLD};
use crate::pipeline::normalize::{normalize_ocr, CoordinateUnits, NormalizedOcr};
use crate::pipeline::ocr::{
    OcrClient, OcrEndpoint, OcrError, OcrHealth, OcrRequest, OcrService, OcrUpload, TileSpec,
};
use crate::pipeline::pdf::{bind_pdfium, load_document};
use crate::pipeline::render::{self, render_first_page};
use crate::pipeline::schema::to_text_schemas;
use crate::pipeline::validate::{sort_fields_by_reading_order, validate_fields};
use crate::segment::{validate_segments, SegmentSpec};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Detect form fields inside `segments` of a PDF file or URL.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(FormSegError)` only for fatal errors: bad input, invalid
/// segments, an unreachable OCR service, a missing LLM provider or an
/// exceeded deadline. Individual segment failures are reported inside
/// `output.segments` and `output.metadata.errors`.
pub async fn detect(
    input_str: impl AsRef<str>,
    segments: &[SegmentSpec],
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormSegError> {
    let input_str = input_str.as_ref();
    info!("Starting detection: {} ({} segments)", input_str, segments.len());

    validate_segments(segments)?;
    let document = input::load_document(input_str, config.download_timeout_secs).await?;
    input::validate_document(&document)?;

    let detector = Detector::from_config(config.clone()).await?;
    detector.detect_checked(&document, segments).await
}

/// Detect form fields in a document held in memory.
pub async fn detect_from_bytes(
    bytes: &[u8],
    filename: &str,
    segments: &[SegmentSpec],
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormSegError> {
    let document = Document::from_bytes(bytes.to_vec(), filename);
    check_request(&document, segments)?;

    let detector = Detector::from_config(config.clone()).await?;
    detector.detect_checked(&document, segments).await
}

/// Synchronous wrapper around [`detect`].
///
/// Creates a temporary tokio runtime internally.
pub fn detect_sync(
    input_str: impl AsRef<str>,
    segments: &[SegmentSpec],
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormSegError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormSegError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(detect(input_str, segments, config))
}

/// Query the OCR service's `/health` endpoint.
///
/// Any failure (refused, HTTP error, bad body) is reported as
/// [`FormSegError::OcrServiceUnavailable`] after a single attempt.
pub async fn check_ocr_health(config: &DetectionConfig) -> Result<OcrHealth, FormSegError> {
    let client = ocr_client(config)?;
    client
        .health()
        .await
        .map_err(|e| FormSegError::OcrServiceUnavailable {
            url: client.base_url().to_string(),
            attempts: 1,
            detail: e.to_string(),
        })
}

/// Extract PDF metadata without OCR or an LLM provider.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, FormSegError> {
    let document = input::load_document(input_str.as_ref(), 120).await?;
    input::validate_document(&document)?;
    if !document.is_pdf() {
        return Err(FormSegError::UnsupportedMaskingInput {
            mime: document.mime.clone(),
        });
    }
    render::extract_metadata(document.bytes).await
}

// ── Detector ─────────────────────────────────────────────────────────────

/// A masked segment ready for OCR.
#[derive(Debug, Clone)]
pub struct MaskedSegment {
    pub segment_index: usize,
    pub spec: SegmentSpec,
    /// Single-page PDF with everything outside `spec` painted white.
    pub pdf: Vec<u8>,
    /// Rendered image of `pdf` for the vision model.
    pub preview: Option<ImageData>,
}

/// Output of the blocking pdfium stage.
#[derive(Debug, Clone)]
pub struct MaskedDocument {
    pub segments: Vec<MaskedSegment>,
    /// Size of every page of the source document, in page order.
    pub page_sizes: Vec<PageSize>,
}

/// Runs detection requests against an OCR service and a field detector.
///
/// Cheap to clone; both services are shared behind `Arc`.
#[derive(Clone)]
pub struct Detector {
    ocr: Arc<dyn OcrService>,
    fields: Arc<dyn FieldDetector>,
    config: DetectionConfig,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Detector {
    /// Wire explicit services, e.g. in-process fakes.
    pub fn new(
        ocr: Arc<dyn OcrService>,
        fields: Arc<dyn FieldDetector>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            ocr,
            fields,
            config,
        }
    }

    /// Build the HTTP OCR client and the LLM field detector from `config`.
    pub async fn from_config(config: DetectionConfig) -> Result<Self, FormSegError> {
        let ocr = ocr_client(&config)?;
        let provider = resolve_provider(&config).await?;
        let fields = LlmFieldDetector::new(provider, config.llm_options());
        Ok(Self::new(Arc::new(ocr), Arc::new(fields), config))
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run a full request: validate, mask, fan out, join.
    pub async fn detect(
        &self,
        document: &Document,
        segments: &[SegmentSpec],
    ) -> Result<DetectionOutput, FormSegError> {
        check_request(document, segments)?;
        self.detect_checked(document, segments).await
    }

    /// [`Detector::detect`] for a request whose upload and segments have
    /// already passed [`check_request`].
    async fn detect_checked(
        &self,
        document: &Document,
        segments: &[SegmentSpec],
    ) -> Result<DetectionOutput, FormSegError> {
        let started = Instant::now();
        self.with_deadline(async {
            if !document.is_pdf() {
                return Err(FormSegError::UnsupportedMaskingInput {
                    mime: document.mime.clone(),
                });
            }
            let masked = self.prepare(document, segments).await?;
            self.run_masked(masked, started).await
        })
        .await
    }

    /// Run the async phases on segments that are already masked.
    pub async fn detect_masked(
        &self,
        masked: MaskedDocument,
    ) -> Result<DetectionOutput, FormSegError> {
        let started = Instant::now();
        self.with_deadline(self.run_masked(masked, started)).await
    }

    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, FormSegError>>,
    ) -> Result<T, FormSegError> {
        match self.config.deadline_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| FormSegError::DeadlineExceeded { secs })?,
            None => fut.await,
        }
    }

    /// All pdfium work for the request, on one blocking thread.
    async fn prepare(
        &self,
        document: &Document,
        segments: &[SegmentSpec],
    ) -> Result<MaskedDocument, FormSegError> {
        let bytes = document.bytes.clone();
        let mime = document.mime.clone();
        let is_pdf = document.is_pdf();
        let specs = segments.to_vec();
        let preview_pixels = self
            .config
            .attach_page_image
            .then_some(self.config.max_rendered_pixels);

        let prep_start = Instant::now();
        let masked = tokio::task::spawn_blocking(move || {
            prepare_blocking(&bytes, &specs, is_pdf, &mime, preview_pixels)
        })
        .await
        .map_err(|e| FormSegError::Internal(format!("Masking task panicked: {}", e)))??;

        info!(
            "Masked {} segments over {} pages in {}ms",
            masked.segments.len(),
            masked.page_sizes.len(),
            prep_start.elapsed().as_millis()
        );
        Ok(masked)
    }

    async fn run_masked(
        &self,
        masked: MaskedDocument,
        started: Instant,
    ) -> Result<DetectionOutput, FormSegError> {
        let MaskedDocument {
            segments,
            page_sizes,
        } = masked;
        let total = segments.len();
        let page_count = page_sizes.len();
        let cfg = &self.config;

        let sink = DebugSink::create(cfg.debug_dir.as_deref()).await;
        if sink.is_enabled() {
            let specs: Vec<SegmentSpec> = segments.iter().map(|s| s.spec).collect();
            let params = serde_json::json!({
                "config": cfg.debug_params(),
                "segments": specs,
            });
            sink.write_json("params.json", &params).await;
        }

        if let Some(ref cb) = cfg.progress_callback {
            cb.on_detection_start(total);
        }

        let ctx = Arc::new(SegmentContext {
            ocr: Arc::clone(&self.ocr),
            fields: Arc::clone(&self.fields),
            config: cfg.clone(),
            debug: sink.clone(),
            total,
        });
        let policy = cfg.cancellation;

        // The first fatal error ends the request without waiting for the
        // remaining segments.
        let mut results: Vec<SegmentResult> = stream::iter(segments.into_iter().map(|segment| {
            let ctx = Arc::clone(&ctx);
            let index = segment.segment_index;
            async move {
                let task = SegmentTask::spawn(process_segment(ctx, segment), policy);
                match task.await {
                    Ok(result) => result,
                    Err(e) => Ok(SegmentResult::failed(
                        index,
                        SegmentMetadata::default(),
                        SegmentError::TaskFailed {
                            segment: index,
                            detail: e.to_string(),
                        },
                    )),
                }
            }
        }))
        .buffer_unordered(cfg.concurrency)
        .try_collect()
        .await?;
        results.sort_by_key(|r| r.segment_index);

        let successful = results.iter().filter(|r| r.is_success()).count();
        // Unusable fields are dropped before merging so they never win a
        // cluster over a usable duplicate.
        let per_segment: Vec<Vec<DetectedField>> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| validate_fields(r.fields.clone(), cfg.min_confidence))
            .collect();

        let merged = merge_detected_fields_across_segments(per_segment, MERGE_IOU_THRESHOLD);
        let fields = sort_fields_by_reading_order(merged);
        let schemas = to_text_schemas(&fields, &page_sizes, page_count);

        let errors: Vec<SegmentErrorEntry> = results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| SegmentErrorEntry {
                    segment_index: r.segment_index,
                    error: e.to_string(),
                })
            })
            .collect();

        let metadata = DetectionMetadata {
            segment_count: total,
            successful_segments: successful,
            page_count,
            total_fields: fields.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            errors: (!errors.is_empty()).then_some(errors),
        };

        info!(
            "Detection complete: {}/{} segments, {} fields, {}ms",
            successful, total, metadata.total_fields, metadata.processing_time_ms
        );

        if let Some(ref cb) = cfg.progress_callback {
            cb.on_detection_complete(total, successful);
        }

        Ok(DetectionOutput {
            fields,
            schemas,
            segments: results,
            metadata,
            debug: sink.info(),
        })
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Upload and segment checks shared by every entry point.
fn check_request(document: &Document, segments: &[SegmentSpec]) -> Result<(), FormSegError> {
    input::validate_document(document)?;
    validate_segments(segments)
}

fn ocr_client(config: &DetectionConfig) -> Result<OcrClient, FormSegError> {
    OcrClient::new(
        config.ocr_url.clone(),
        Duration::from_secs(config.ocr_timeout_secs),
    )
    .map(|client| client.with_retry(config.retry_policy()))
    .map_err(|e| FormSegError::Internal(format!("OCR client: {e}")))
}

fn prepare_blocking(
    bytes: &[u8],
    specs: &[SegmentSpec],
    is_pdf: bool,
    mime: &str,
    preview_pixels: Option<u32>,
) -> Result<MaskedDocument, FormSegError> {
    if !is_pdf {
        return Err(FormSegError::UnsupportedMaskingInput {
            mime: mime.to_string(),
        });
    }
    let pdfium = bind_pdfium()?;
    let pdfs = build_masked_pdf_segments(&pdfium, bytes, specs, is_pdf, mime)?;
    let page_sizes = render::page_sizes(&load_document(&pdfium, bytes)?);

    let segments = pdfs
        .into_iter()
        .zip(specs)
        .enumerate()
        .map(|(segment_index, (pdf, spec))| {
            let preview = preview_pixels.and_then(|px| preview_for(&pdfium, &pdf, px, segment_index));
            MaskedSegment {
                segment_index,
                spec: *spec,
                pdf,
                preview,
            }
        })
        .collect();

    Ok(MaskedDocument {
        segments,
        page_sizes,
    })
}

/// Render and encode a preview. A missing preview only costs accuracy, so
/// failures are logged and the segment continues on OCR alone.
fn preview_for(
    pdfium: &pdfium_render::prelude::Pdfium,
    pdf: &[u8],
    max_pixels: u32,
    segment: usize,
) -> Option<ImageData> {
    let image = match render_first_page(pdfium, pdf, max_pixels, segment) {
        Ok(image) => image,
        Err(e) => {
            warn!("Segment {}: no preview: {}", segment, e);
            return None;
        }
    };
    match encode_preview(&image) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!("Segment {}: preview encoding failed: {}", segment, e);
            None
        }
    }
}

/// Map detector output back onto the source document.
///
/// The masked document has a single page, so every field is moved to the
/// segment's page and its name prefixed with `seg{N}_`. With `clip_margin`
/// set, fields whose center lies outside the segment (grown by the margin)
/// are dropped.
pub fn scope_fields_to_segment(
    segment_index: usize,
    spec: &SegmentSpec,
    fields: Vec<DetectedField>,
    clip_margin: Option<f64>,
) -> Vec<DetectedField> {
    let region = clip_margin.map(|margin| expand_bbox(&spec.bbox(), margin));
    fields
        .into_iter()
        .filter_map(|mut f| {
            if let Some(region) = &region {
                let (cx, cy) = bbox_center(&f.bbox_normalized);
                if cx < region.x || cx > region.right() || cy < region.y || cy > region.bottom() {
                    debug!("Segment {}: dropping '{}' outside segment", segment_index, f.name);
                    return None;
                }
            }
            f.page_index = spec.page_index;
            f.name = format!("seg{}_{}", segment_index, f.name);
            Some(f)
        })
        .collect()
}

/// Shared, immutable state for every segment task of one request.
struct SegmentContext {
    ocr: Arc<dyn OcrService>,
    fields: Arc<dyn FieldDetector>,
    config: DetectionConfig,
    debug: DebugSink,
    total: usize,
}

/// Why a segment stopped.
enum SegmentFailure {
    /// Ends the whole request.
    Fatal(FormSegError),
    /// Recorded on the segment only.
    Soft(SegmentError),
}

impl SegmentContext {
    /// Text pass for `spec`: the lite full-analysis model when `lite` is set,
    /// otherwise plain text recognition, tiled to the segment unless the
    /// segment is the whole page.
    fn text_request(&self, spec: &SegmentSpec) -> (&'static str, OcrRequest) {
        let cfg = &self.config;
        if cfg.lite {
            ("lite", OcrRequest::new(OcrEndpoint::Full, cfg.dpi, cfg.device).lite(true))
        } else if spec.is_full_page() {
            ("text", OcrRequest::new(OcrEndpoint::TextOnly, cfg.dpi, cfg.device))
        } else {
            // The masked document has exactly one page.
            let tile = TileSpec {
                page_index: 0,
                bbox_normalized: spec.bbox(),
                overlap: 0.0,
            };
            let request = OcrRequest::new(OcrEndpoint::TextTiles, cfg.dpi, cfg.device);
            ("text", request.tiles(vec![tile]))
        }
    }

    async fn ocr_pass(
        &self,
        segment: usize,
        pass: &str,
        upload: &OcrUpload,
        request: &OcrRequest,
    ) -> Result<NormalizedOcr, SegmentFailure> {
        let raw = self
            .ocr
            .recognize(upload, request)
            .await
            .map_err(|e| match e {
                OcrError::Unavailable {
                    url,
                    attempts,
                    detail,
                } => SegmentFailure::Fatal(FormSegError::OcrServiceUnavailable {
                    url,
                    attempts,
                    detail,
                }),
                other => SegmentFailure::Soft(SegmentError::OcrFailed {
                    segment,
                    pass: pass.to_string(),
                    detail: other.to_string(),
                }),
            })?;

        self.debug
            .write_json(&format!("segment-{}/ocr-{}.json", segment, pass), &raw)
            .await;

        let units = if request.endpoint.returns_normalized_boxes() {
            CoordinateUnits::Normalized
        } else {
            CoordinateUnits::Pixels
        };
        normalize_ocr(&raw, units, upload.source_format()).map_err(|e| {
            SegmentFailure::Soft(SegmentError::NormalizationFailed {
                segment,
                detail: e.to_string(),
            })
        })
    }

    async fn run(
        &self,
        segment: MaskedSegment,
        metadata: &mut SegmentMetadata,
    ) -> Result<Vec<DetectedField>, SegmentFailure> {
        let MaskedSegment {
            segment_index: idx,
            spec,
            pdf,
            preview,
        } = segment;
        let cfg = &self.config;

        self.debug
            .write_bytes(&format!("segment-{}/masked.pdf", idx), &pdf)
            .await;
        let upload = OcrUpload::pdf(pdf, format!("segment-{}.pdf", idx));

        let (text_pass, text_request) = self.text_request(&spec);

        let input = if cfg.two_source {
            let layout_request = OcrRequest::new(OcrEndpoint::Layout, cfg.dpi, cfg.device);
            metadata.passes = vec![text_pass.to_string(), "layout".to_string()];
            let passes = tokio::join!(
                self.ocr_pass(idx, text_pass, &upload, &text_request),
                self.ocr_pass(idx, "layout", &upload, &layout_request),
            );
            // An unreachable service outranks a soft failure of the other pass.
            match passes {
                (Ok(text), Ok(layout)) => DetectionInput::TwoSource { text, layout },
                (Err(SegmentFailure::Fatal(e)), _) | (_, Err(SegmentFailure::Fatal(e))) => {
                    return Err(SegmentFailure::Fatal(e))
                }
                (Err(e), _) | (_, Err(e)) => return Err(e),
            }
        } else {
            metadata.passes = vec![text_pass.to_string()];
            DetectionInput::Single(self.ocr_pass(idx, text_pass, &upload, &text_request).await?)
        };

        metadata.ocr_block_count = input.block_count();
        if metadata.ocr_block_count == 0 {
            return Err(SegmentFailure::Soft(SegmentError::EmptyOcr { segment: idx }));
        }
        debug!(
            "Segment {}: {} OCR blocks over {:?}",
            idx, metadata.ocr_block_count, metadata.passes
        );

        let request = DetectionRequest {
            input,
            page_image: preview,
            segment: Some(spec),
            model: cfg.model.clone(),
        };
        let response = self.fields.detect_fields(request).await.map_err(|e| {
            SegmentFailure::Soft(SegmentError::DetectionFailed {
                segment: idx,
                retries: e.retries(),
                detail: e.to_string(),
            })
        })?;

        self.debug
            .write_text(
                &format!("segment-{}/llm-raw.txt", idx),
                &response.metadata.raw_output,
            )
            .await;
        metadata.model = Some(response.metadata.model);
        metadata.input_tokens = response.metadata.input_tokens;
        metadata.output_tokens = response.metadata.output_tokens;

        let clip = cfg.clip_to_segment.then_some(cfg.segment_margin);
        Ok(scope_fields_to_segment(idx, &spec, response.fields, clip))
    }
}

async fn process_segment(
    ctx: Arc<SegmentContext>,
    segment: MaskedSegment,
) -> Result<SegmentResult, FormSegError> {
    let start = Instant::now();
    let idx = segment.segment_index;
    let total = ctx.total;
    let cb = ctx.config.progress_callback.clone();

    if let Some(ref cb) = cb {
        cb.on_segment_start(idx, total);
    }

    let mut metadata = SegmentMetadata::default();
    let outcome = ctx.run(segment, &mut metadata).await;
    metadata.duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(fields) => {
            debug!("Segment {}: {} fields in {}ms", idx, fields.len(), metadata.duration_ms);
            if let Some(ref cb) = cb {
                cb.on_segment_complete(idx, total, fields.len());
            }
            Ok(SegmentResult {
                segment_index: idx,
                fields,
                metadata,
                error: None,
            })
        }
        Err(SegmentFailure::Soft(err)) => {
            warn!("{}", err);
            if let Some(ref cb) = cb {
                cb.on_segment_error(idx, total, &err.to_string());
            }
            Ok(SegmentResult::failed(idx, metadata, err))
        }
        Err(SegmentFailure::Fatal(err)) => {
            if let Some(ref cb) = cb {
                cb.on_segment_error(idx, total, &err.to_string());
            }
            Err(err)
        }
    }
}

/// A spawned segment task that honours the cancellation policy when the
/// request future is dropped.
struct SegmentTask<T> {
    handle: JoinHandle<T>,
    abort_on_drop: bool,
}

impl<T: Send + 'static> SegmentTask<T> {
    fn spawn<F>(fut: F, policy: CancellationPolicy) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
            abort_on_drop: policy == CancellationPolicy::Abort,
        }
    }
}

impl<T> Future for SegmentTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl<T> Drop for SegmentTask<T> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.handle.abort();
        }
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FormSegError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormSegError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. `ProviderFactory::from_env` auto-detection.
async fn resolve_provider(config: &DetectionConfig) -> Result<Arc<dyn LLMProvider>, FormSegError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FormSegError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBBox;
    use crate::output::FieldType;

    fn field(name: &str, x: f64, y: f64) -> DetectedField {
        DetectedField {
            name: name.into(),
            label: name.into(),
            field_type: FieldType::Text,
            bbox_normalized: NormalizedBBox::new(x, y, 0.1, 0.04),
            page_index: 0,
            confidence: None,
        }
    }

    #[tokio::test]
    async fn segments_are_checked_before_the_input_is_loaded() {
        let config = DetectionConfig::default();
        let err = detect("/definitely/not/here.pdf", &[], &config)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_SEGMENTS");

        let bad = [SegmentSpec::new(0, 0.5, 0.0, 0.6, 0.5)];
        let err = detect("https://unreachable.invalid/form.pdf", &bad, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FormSegError::InvalidSegment { index: 0, .. }));
    }

    #[test]
    fn scoping_prefixes_and_remaps() {
        let spec = SegmentSpec::new(3, 0.0, 0.0, 1.0, 0.5);
        let out = scope_fields_to_segment(1, &spec, vec![field("name", 0.1, 0.1)], None);
        assert_eq!(out[0].name, "seg1_name");
        assert_eq!(out[0].page_index, 3);
    }

    #[test]
    fn clipping_drops_fields_outside_segment() {
        let spec = SegmentSpec::new(0, 0.0, 0.0, 1.0, 0.5);
        let out = scope_fields_to_segment(
            0,
            &spec,
            vec![
                field("inside", 0.1, 0.1),
                // center y = 0.51, inside the 0.02 margin
                field("edge", 0.1, 0.49),
                field("outside", 0.1, 0.8),
            ],
            Some(0.02),
        );
        let names: Vec<&str> = out.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["seg0_inside", "seg0_edge"]);
    }

    #[tokio::test]
    async fn aborting_task_is_cancelled_on_drop() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = SegmentTask::spawn(
            async move {
                let _tx = tx;
                tokio::time::sleep(Duration::from_secs(60)).await;
            },
            CancellationPolicy::Abort,
        );
        drop(task);
        // The sender is dropped once the aborted task is torn down.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn detached_task_keeps_running() {
        let (tx, rx) = tokio::sync::oneshot::channel::<u8>();
        let task = SegmentTask::spawn(
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = tx.send(7);
            },
            CancellationPolicy::Detach,
        );
        drop(task);
        assert_eq!(rx.await.unwrap(), 7);
    }
}
