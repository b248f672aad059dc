//! Field detection: OCR (and optionally the page image) → form fields.
//!
//! [`FieldDetector`] is the seam between the orchestrator and the language
//! model. [`LlmFieldDetector`] is the production implementation over an
//! `edgequake_llm` provider; tests plug in deterministic fakes.
//!
//! ## Retry Strategy
//!
//! Same as any other VLM call: exponential backoff
//! (`retry_backoff_ms * 2^attempt`). An answer that cannot be parsed as a
//! field list counts as a failed attempt, since sampling a second time
//! usually fixes a truncated or chatty reply.

use crate::output::DetectedField;
use crate::pipeline::normalize::NormalizedOcr;
use crate::prompts::{format_ocr, segment_constraint, DEFAULT_SYSTEM_PROMPT};
use crate::segment::SegmentSpec;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// OCR evidence handed to the detector.
#[derive(Debug, Clone)]
pub enum DetectionInput {
    /// One OCR pass (text recognition).
    Single(NormalizedOcr),
    /// Text recognition and layout analysis of the same region.
    TwoSource {
        text: NormalizedOcr,
        layout: NormalizedOcr,
    },
}

impl DetectionInput {
    pub fn block_count(&self) -> usize {
        match self {
            DetectionInput::Single(ocr) => ocr.block_count(),
            DetectionInput::TwoSource { text, layout } => {
                text.block_count() + layout.block_count()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub input: DetectionInput,
    /// Rendered image of the masked page.
    pub page_image: Option<ImageData>,
    /// Region the answer must stay inside.
    pub segment: Option<SegmentSpec>,
    /// Model label for reporting; the provider decides what actually runs.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorMetadata {
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// The model's answer before parsing.
    pub raw_output: String,
}

#[derive(Debug, Clone)]
pub struct DetectionResponse {
    pub fields: Vec<DetectedField>,
    pub metadata: DetectorMetadata,
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("LLM call failed after {retries} retries: {detail}")]
    Llm { retries: u32, detail: String },

    #[error("Unparseable detector output: {0}")]
    Parse(String),
}

impl DetectionError {
    pub fn retries(&self) -> u32 {
        match self {
            DetectionError::Llm { retries, .. } => *retries,
            DetectionError::Parse(_) => 0,
        }
    }
}

#[async_trait]
pub trait FieldDetector: Send + Sync {
    async fn detect_fields(
        &self,
        request: DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError>;
}

/// Sampling and retry knobs for [`LlmFieldDetector`].
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub system_prompt: Option<String>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

/// [`FieldDetector`] backed by a vision-capable chat model.
pub struct LlmFieldDetector {
    provider: Arc<dyn LLMProvider>,
    options: LlmOptions,
}

impl LlmFieldDetector {
    pub fn new(provider: Arc<dyn LLMProvider>, options: LlmOptions) -> Self {
        Self { provider, options }
    }

    fn build_messages(&self, request: &DetectionRequest) -> Vec<ChatMessage> {
        let system = self
            .options
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let mut text = String::new();
        if let Some(segment) = &request.segment {
            text.push_str(&segment_constraint(segment));
            text.push_str("\n\n");
        }
        match &request.input {
            DetectionInput::Single(ocr) => text.push_str(&format_ocr("OCR text", ocr)),
            DetectionInput::TwoSource {
                text: ocr_text,
                layout,
            } => {
                text.push_str(&format_ocr("OCR text", ocr_text));
                text.push('\n');
                text.push_str(&format_ocr("Layout analysis", layout));
            }
        }

        let user = match &request.page_image {
            Some(image) => ChatMessage::user_with_images(text, vec![image.clone()]),
            None => ChatMessage::user(text),
        };
        vec![ChatMessage::system(system), user]
    }
}

#[async_trait]
impl FieldDetector for LlmFieldDetector {
    async fn detect_fields(
        &self,
        request: DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError> {
        let start = Instant::now();
        let messages = self.build_messages(&request);
        let options = CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        };
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.model().to_string());
        let max_retries = self.options.max_retries;

        let mut last_err: Option<String> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self.options.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Field detection: retry {}/{} after {}ms",
                    attempt, max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self.provider.chat(&messages, Some(&options)).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Field detection: attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e.to_string());
                    continue;
                }
            };

            match parse_fields(&response.content) {
                Ok(fields) => {
                    debug!(
                        "Field detection: {} fields, {} in / {} out tokens, {:?}",
                        fields.len(),
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(DetectionResponse {
                        fields,
                        metadata: DetectorMetadata {
                            model,
                            input_tokens: response.prompt_tokens,
                            output_tokens: response.completion_tokens,
                            raw_output: response.content,
                        },
                    });
                }
                Err(e) => {
                    warn!("Field detection: attempt {} unparseable: {}", attempt + 1, e);
                    last_err = Some(e.to_string());
                }
            }
        }

        Err(DetectionError::Llm {
            retries: max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

// ── Output parsing ───────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?\s*```").unwrap());

/// Parse a model answer into fields.
///
/// Tolerates Markdown fences, prose around the JSON, a `{"fields": [...]}`
/// wrapper and individual malformed entries (which are skipped). Fails only
/// when no JSON array can be found at all.
pub fn parse_fields(raw: &str) -> Result<Vec<DetectedField>, DetectionError> {
    let body = match RE_FENCE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };
    let body = body.trim();

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            let (start, end) = match (body.find('['), body.rfind(']')) {
                (Some(s), Some(e)) if s < e => (s, e),
                _ => {
                    return Err(DetectionError::Parse(format!(
                        "no JSON array in {} chars of output",
                        body.len()
                    )))
                }
            };
            serde_json::from_str(&body[start..=end])
                .map_err(|e| DetectionError::Parse(e.to_string()))?
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("fields") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(DetectionError::Parse(
                    "expected an array or an object with a \"fields\" array".into(),
                ))
            }
        },
        _ => return Err(DetectionError::Parse("expected a JSON array".into())),
    };

    let total = items.len();
    let fields: Vec<DetectedField> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<DetectedField>(item) {
            Ok(f) => Some(f),
            Err(e) => {
                debug!("Skipping malformed field entry: {}", e);
                None
            }
        })
        .collect();

    if fields.len() < total {
        warn!("Skipped {} malformed field entries", total - fields.len());
    }
    Ok(fields)
}
