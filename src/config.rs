//! Configuration types for segment-based field detection.
//!
//! Every knob lives in [`DetectionConfig`], built via
//! [`DetectionConfigBuilder`]. Setters clamp obviously out-of-range values;
//! [`DetectionConfigBuilder::build`] rejects the rest.

use crate::error::FormSegError;
use crate::pipeline::fields::LlmOptions;
use crate::pipeline::ocr::Device;
use crate::progress::ProgressCallback;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What happens to in-flight segment tasks when the caller drops the
/// request future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Spawned segment tasks run to completion; their results are discarded.
    #[default]
    Detach,
    /// Spawned segment tasks are aborted.
    Abort,
}

/// Configuration for one detection request.
///
/// # Example
/// ```rust
/// use formseg::DetectionConfig;
///
/// let config = DetectionConfig::builder()
///     .ocr_url("http://ocr.internal:8000")
///     .dpi(200)
///     .two_source(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct DetectionConfig {
    // ── OCR service ──────────────────────────────────────────────────────
    /// Base URL of the OCR service. Default: `http://localhost:8000`.
    pub ocr_url: String,

    /// Per-request OCR timeout in seconds. Default: 300.
    ///
    /// Full analysis on a cold GPU can take minutes for a dense page.
    pub ocr_timeout_secs: u64,

    /// Rendering DPI the OCR service uses. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Inference device requested from the OCR service. Default: CUDA.
    pub device: Device,

    /// Run text recognition and layout analysis and give the detector both.
    /// Default: false.
    pub two_source: bool,

    /// Use the lightweight full-analysis model for the text pass.
    /// Default: false.
    pub lite: bool,

    /// Retries after a refused connection. Default: 3 (4 attempts in all).
    pub ocr_max_retries: u32,

    /// Fixed delay between OCR retries in milliseconds. Default: 2000.
    pub ocr_retry_delay_ms: u64,

    // ── Field detection ─────────────────────────────────────────────────
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens per detection answer. Default: 4096.
    pub max_tokens: usize,

    /// Retries after a failed or unparseable LLM answer. Default: 2.
    pub max_retries: u32,

    /// Initial LLM retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Send a rendered image of each masked page along with the OCR text.
    /// Default: true.
    pub attach_page_image: bool,

    /// Longest edge of the rendered preview in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    // ── Post-processing ─────────────────────────────────────────────────
    /// Drop fields whose center falls outside their segment. Default: true.
    pub clip_to_segment: bool,

    /// Slack around the segment for `clip_to_segment`, in page units.
    /// Default: 0.02.
    pub segment_margin: f64,

    /// Fields with a confidence below this are dropped. Default: 0.0.
    pub min_confidence: f64,

    // ── Execution ───────────────────────────────────────────────────────
    /// Segments processed at the same time. Default: 8.
    pub concurrency: usize,

    /// Behaviour of in-flight segment tasks when the request is dropped.
    pub cancellation: CancellationPolicy,

    /// Overall request deadline in seconds. Default: none.
    pub deadline_secs: Option<u64>,

    /// Root directory for per-request debug artifacts. Default: none.
    pub debug_dir: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ocr_url: "http://localhost:8000".to_string(),
            ocr_timeout_secs: 300,
            dpi: 300,
            device: Device::default(),
            two_source: false,
            lite: false,
            ocr_max_retries: DEFAULT_MAX_RETRIES,
            ocr_retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            attach_page_image: true,
            max_rendered_pixels: 2000,
            clip_to_segment: true,
            segment_margin: 0.02,
            min_confidence: 0.0,
            concurrency: 8,
            cancellation: CancellationPolicy::default(),
            deadline_secs: None,
            debug_dir: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DetectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionConfig")
            .field("ocr_url", &self.ocr_url)
            .field("dpi", &self.dpi)
            .field("device", &self.device)
            .field("two_source", &self.two_source)
            .field("lite", &self.lite)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("attach_page_image", &self.attach_page_image)
            .field("clip_to_segment", &self.clip_to_segment)
            .field("min_confidence", &self.min_confidence)
            .field("concurrency", &self.concurrency)
            .field("cancellation", &self.cancellation)
            .field("deadline_secs", &self.deadline_secs)
            .field("debug_dir", &self.debug_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DetectionProgressCallback>"),
            )
            .finish()
    }
}

impl DetectionConfig {
    /// Create a new builder for `DetectionConfig`.
    pub fn builder() -> DetectionConfigBuilder {
        DetectionConfigBuilder {
            config: Self::default(),
        }
    }

    /// OCR retry policy (connection-refused retries).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ocr_max_retries,
            Duration::from_millis(self.ocr_retry_delay_ms),
        )
    }

    /// Options for [`crate::pipeline::fields::LlmFieldDetector`].
    pub fn llm_options(&self) -> LlmOptions {
        LlmOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            system_prompt: self.system_prompt.clone(),
        }
    }

    /// Request parameters worth recording next to debug artifacts.
    pub fn debug_params(&self) -> serde_json::Value {
        serde_json::json!({
            "ocrUrl": self.ocr_url,
            "dpi": self.dpi,
            "device": self.device.as_str(),
            "twoSource": self.two_source,
            "lite": self.lite,
            "model": self.model,
            "provider": self.provider_name,
            "attachPageImage": self.attach_page_image,
            "clipToSegment": self.clip_to_segment,
            "minConfidence": self.min_confidence,
        })
    }
}

/// Builder for [`DetectionConfig`].
pub struct DetectionConfigBuilder {
    config: DetectionConfig,
}

impl fmt::Debug for DetectionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl DetectionConfigBuilder {
    pub fn ocr_url(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_url = url.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn two_source(mut self, v: bool) -> Self {
        self.config.two_source = v;
        self
    }

    pub fn lite(mut self, v: bool) -> Self {
        self.config.lite = v;
        self
    }

    pub fn ocr_max_retries(mut self, n: u32) -> Self {
        self.config.ocr_max_retries = n;
        self
    }

    pub fn ocr_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.ocr_retry_delay_ms = ms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn attach_page_image(mut self, v: bool) -> Self {
        self.config.attach_page_image = v;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn clip_to_segment(mut self, v: bool) -> Self {
        self.config.clip_to_segment = v;
        self
    }

    pub fn segment_margin(mut self, margin: f64) -> Self {
        self.config.segment_margin = margin.clamp(0.0, 1.0);
        self
    }

    pub fn min_confidence(mut self, c: f64) -> Self {
        self.config.min_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn cancellation(mut self, policy: CancellationPolicy) -> Self {
        self.config.cancellation = policy;
        self
    }

    pub fn deadline_secs(mut self, secs: u64) -> Self {
        self.config.deadline_secs = Some(secs);
        self
    }

    pub fn debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.debug_dir = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DetectionConfig, FormSegError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(FormSegError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(FormSegError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.ocr_url.trim().is_empty() {
            return Err(FormSegError::InvalidConfig("OCR URL must not be empty".into()));
        }
        if !(c.ocr_url.starts_with("http://") || c.ocr_url.starts_with("https://")) {
            return Err(FormSegError::InvalidConfig(format!(
                "OCR URL must be http(s), got '{}'",
                c.ocr_url
            )));
        }
        if c.deadline_secs == Some(0) {
            return Err(FormSegError::InvalidConfig("Deadline must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DetectionConfig::default();
        assert_eq!(c.ocr_url, "http://localhost:8000");
        assert_eq!(c.dpi, 300);
        assert_eq!(c.device, Device::Cuda);
        assert_eq!(c.concurrency, 8);
        assert_eq!(c.retry_policy().attempts(), 4);
        assert_eq!(c.cancellation, CancellationPolicy::Detach);
        assert!(c.attach_page_image);
        assert!(c.clip_to_segment);
    }

    #[test]
    fn setters_clamp() {
        let c = DetectionConfig::builder()
            .dpi(10_000)
            .concurrency(0)
            .min_confidence(3.0)
            .temperature(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 600);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.min_confidence, 1.0);
        assert_eq!(c.temperature, 0.0);
    }

    #[test]
    fn build_rejects_bad_url_and_deadline() {
        let err = DetectionConfig::builder().ocr_url("ftp://x").build().unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(DetectionConfig::builder().deadline_secs(0).build().is_err());
    }

    #[test]
    fn llm_options_follow_config() {
        let c = DetectionConfig::builder()
            .max_retries(5)
            .system_prompt("custom")
            .build()
            .unwrap();
        let o = c.llm_options();
        assert_eq!(o.max_retries, 5);
        assert_eq!(o.system_prompt.as_deref(), Some("custom"));
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", DetectionConfig::default());
        assert!(s.contains("DetectionConfig"));
        assert!(s.contains("localhost:8000"));
    }
}
