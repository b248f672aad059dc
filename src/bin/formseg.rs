//! CLI binary for formseg.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DetectionConfig`, reads the segment list and prints the result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use formseg::{
    check_ocr_health, detect, inspect, parse_segments_json, CancellationPolicy, DetectionConfig,
    DetectionOutput, DetectionProgressCallback, Device, ProgressCallback, SegmentSpec,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished segment. Segments finish
/// out of order, so start times are kept per segment.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Masking segments…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} segments  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Detecting");
    }

    fn elapsed_secs(&self, segment: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&segment))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl DetectionProgressCallback for CliProgressCallback {
    fn on_detection_start(&self, total_segments: usize) {
        self.activate_bar(total_segments);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Detecting fields in {total_segments} segments…"))
        ));
    }

    fn on_segment_start(&self, segment: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(segment, Instant::now());
        }
        self.bar.set_message(format!("segment {segment}"));
    }

    fn on_segment_complete(&self, segment: usize, total: usize, field_count: usize) {
        let secs = self.elapsed_secs(segment);
        self.bar.println(format!(
            "  {} Segment {:>2}/{:<2}  {:<10}  {}",
            green("✓"),
            segment,
            total,
            dim(&format!("{field_count:>3} fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_segment_error(&self, segment: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(segment);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Segment {:>2}/{:<2}  {}  {}",
            red("✗"),
            segment,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_detection_complete(&self, total_segments: usize, success_count: usize) {
        let failed = total_segments.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} segments processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} segments processed  ({} failed)",
                if failed == total_segments {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_segments,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Top half of page 1 (pages are 0-indexed)
  formseg application.pdf --segment 0:0,0,1,0.5

  # Two segments, result to a file
  formseg form.pdf --segment 0:0,0,1,0.5 --segment 0:0,0.5,1,0.5 -o fields.json

  # Segments as JSON (file or literal), as sent by the editor UI
  formseg form.pdf --segments segments.json
  formseg form.pdf --segments '[{"pageIndex":0,"x":0,"y":0,"w":1,"h":1}]'

  # Text + layout passes, keep debug artifacts
  formseg form.pdf --segment 0:0,0,1,1 --two-source --debug-dir ./debug

  # Only the renderer schemas
  formseg form.pdf --segment 0:0,0,1,1 --schemas-only

  # Is the OCR service up?
  formseg --health-only

  # Inspect PDF metadata (no OCR, no API key)
  formseg --inspect-only form.pdf

ENVIRONMENT VARIABLES:
  FORMSEG_OCR_URL         OCR service base URL (default http://localhost:8000)
  FORMSEG_DEVICE          cpu, cuda or mps
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Detect form fields inside regions of a PDF using OCR and a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "formseg",
    version,
    about = "Detect form fields inside regions of a PDF using OCR and a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "health_only")]
    input: Option<String>,

    /// Segment as PAGE:X,Y,W,H in normalized coordinates. Repeatable.
    #[arg(long = "segment", value_name = "PAGE:X,Y,W,H")]
    segment: Vec<SegmentSpec>,

    /// Segment list as JSON: a file path or a literal array.
    #[arg(long, env = "FORMSEG_SEGMENTS", conflicts_with = "segment")]
    segments: Option<String>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "FORMSEG_OUTPUT")]
    output: Option<PathBuf>,

    /// Print only the per-page renderer schemas.
    #[arg(long)]
    schemas_only: bool,

    /// OCR service base URL.
    #[arg(long, env = "FORMSEG_OCR_URL", default_value = "http://localhost:8000")]
    ocr_url: String,

    /// Per-request OCR timeout in seconds.
    #[arg(long, env = "FORMSEG_OCR_TIMEOUT", default_value_t = 300)]
    ocr_timeout: u64,

    /// OCR rendering DPI (72–600).
    #[arg(long, env = "FORMSEG_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// OCR device: cpu, cuda, mps.
    #[arg(long, env = "FORMSEG_DEVICE", default_value = "cuda")]
    device: Device,

    /// Run text and layout OCR passes and give the model both.
    #[arg(long, env = "FORMSEG_TWO_SOURCE")]
    two_source: bool,

    /// Use the lightweight OCR model for the text pass.
    #[arg(long, env = "FORMSEG_LITE")]
    lite: bool,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "FORMSEG_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FORMSEG_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per segment on LLM failure.
    #[arg(long, env = "FORMSEG_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Segments processed at the same time.
    #[arg(short, long, env = "FORMSEG_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Drop fields with a confidence below this (0.0–1.0).
    #[arg(long, env = "FORMSEG_MIN_CONFIDENCE", default_value_t = 0.0)]
    min_confidence: f64,

    /// Keep fields whose center lies outside their segment.
    #[arg(long)]
    no_clip: bool,

    /// Do not send a rendered page image to the model.
    #[arg(long, env = "FORMSEG_NO_PAGE_IMAGE")]
    no_page_image: bool,

    /// Give up after this many seconds.
    #[arg(long, env = "FORMSEG_DEADLINE")]
    deadline: Option<u64>,

    /// Abort in-flight segment work when the deadline hits or on Ctrl-C.
    #[arg(long)]
    abort_on_cancel: bool,

    /// Write per-request debug artifacts under this directory.
    #[arg(long, env = "FORMSEG_DEBUG_DIR")]
    debug_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "FORMSEG_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Query the OCR service health endpoint and exit.
    #[arg(long)]
    health_only: bool,

    /// Print PDF metadata only, no detection.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "FORMSEG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORMSEG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORMSEG_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.health_only && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Health-only mode ─────────────────────────────────────────────────
    if cli.health_only {
        let config = DetectionConfig::builder()
            .ocr_url(cli.ocr_url.clone())
            .ocr_timeout_secs(cli.ocr_timeout)
            .build()
            .context("Invalid configuration")?;
        let health = check_ocr_health(&config)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()).context(e.to_string()))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&health).context("Failed to serialize health")?
        );
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input file or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&input).await.context("Failed to inspect PDF")?;
        println!("File:         {}", input);
        if let Some(ref t) = meta.title {
            println!("Title:        {}", t);
        }
        if let Some(ref a) = meta.author {
            println!("Author:       {}", a);
        }
        println!("Pages:        {}", meta.page_count);
        for (i, size) in meta.page_sizes.iter().enumerate() {
            println!(
                "  page {:<3}    {:.1} × {:.1} pt",
                i, size.width_pt, size.height_pt
            );
        }
        println!("PDF Version:  {}", meta.pdf_version);
        if let Some(ref p) = meta.producer {
            println!("Producer:     {}", p);
        }
        if let Some(ref c) = meta.creator {
            println!("Creator:      {}", c);
        }
        return Ok(());
    }

    // ── Segments ─────────────────────────────────────────────────────────
    let segments = read_segments(&cli).await?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn DetectionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run detection ────────────────────────────────────────────────────
    // Ctrl-C drops the request; --abort-on-cancel decides what happens to
    // segment tasks already in flight.
    let output = tokio::select! {
        result = detect(&input, &segments, &config) => result.map_err(|e| {
            anyhow::anyhow!("{} [{}]", e.user_message(), e.code()).context("Detection failed")
        })?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted"),
    };

    let json = if cli.schemas_only {
        serde_json::to_string_pretty(&output.schemas)
    } else {
        serde_json::to_string_pretty(&output)
    }
    .context("Failed to serialise output")?;

    match cli.output {
        Some(ref path) => write_atomic(path, &json).await?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
    }

    if !cli.quiet {
        print_summary(&output, cli.output.as_deref());
    }
    Ok(())
}

fn print_summary(output: &DetectionOutput, path: Option<&Path>) {
    let m = &output.metadata;
    let tokens_in: usize = output.segments.iter().map(|s| s.metadata.input_tokens).sum();
    let tokens_out: usize = output.segments.iter().map(|s| s.metadata.output_tokens).sum();
    eprintln!(
        "{}  {} fields  {}/{} segments  {}ms{}",
        if m.errors.is_none() {
            green("✔")
        } else {
            cyan("⚠")
        },
        bold(&m.total_fields.to_string()),
        m.successful_segments,
        m.segment_count,
        m.processing_time_ms,
        path.map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&tokens_in.to_string()),
        dim(&tokens_out.to_string()),
    );
    if let Some(ref debug) = output.debug {
        eprintln!("   debug artifacts: {}", dim(&debug.directory));
    }
}

/// Segments from `--segment` flags or `--segments` (file path or literal JSON).
async fn read_segments(cli: &Cli) -> Result<Vec<SegmentSpec>> {
    if !cli.segment.is_empty() {
        return Ok(cli.segment.clone());
    }
    let Some(ref raw) = cli.segments else {
        anyhow::bail!("No segments given. Use --segment PAGE:X,Y,W,H or --segments <json>");
    };
    let json = if raw.trim_start().starts_with('[') {
        raw.clone()
    } else {
        tokio::fs::read_to_string(raw)
            .await
            .with_context(|| format!("Failed to read segments from {:?}", raw))?
    };
    parse_segments_json(&json).context("Invalid segment list")
}

/// Map CLI args to `DetectionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DetectionConfig> {
    let mut builder = DetectionConfig::builder()
        .ocr_url(cli.ocr_url.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .dpi(cli.dpi)
        .device(cli.device)
        .two_source(cli.two_source)
        .lite(cli.lite)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .concurrency(cli.concurrency)
        .min_confidence(cli.min_confidence)
        .clip_to_segment(!cli.no_clip)
        .attach_page_image(!cli.no_page_image)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(secs) = cli.deadline {
        builder = builder.deadline_secs(secs);
    }
    if cli.abort_on_cancel {
        builder = builder.cancellation(CancellationPolicy::Abort);
    }
    if let Some(ref dir) = cli.debug_dir {
        builder = builder.debug_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write via a temp file and rename so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn env_of(arg: &str) -> Option<String> {
        Cli::command()
            .get_arguments()
            .find(|a| a.get_id() == arg)
            .and_then(|a| a.get_env())
            .map(|e| e.to_string_lossy().into_owned())
    }

    #[test]
    fn provider_flags_share_the_library_env_names() {
        assert_eq!(env_of("provider").as_deref(), Some("EDGEQUAKE_LLM_PROVIDER"));
        assert_eq!(env_of("model").as_deref(), Some("EDGEQUAKE_MODEL"));
    }

    #[test]
    fn segments_parse_from_flags() {
        let cli = Cli::try_parse_from([
            "formseg",
            "form.pdf",
            "--segment",
            "0:0,0,1,0.5",
            "--segment",
            "1:0.1,0.2,0.3,0.4",
            "--abort-on-cancel",
        ])
        .unwrap();
        assert_eq!(cli.segment.len(), 2);
        assert_eq!(cli.segment[1].page_index, 1);
        assert!(cli.abort_on_cancel);
    }
}
