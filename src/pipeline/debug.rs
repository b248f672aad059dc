//! Best-effort debug artifacts.
//!
//! With a debug directory configured, every request gets its own
//! subdirectory `<UTC timestamp>-<uuid>` holding the request parameters,
//! each masked PDF, every raw OCR response and every raw model answer:
//!
//! ```text
//! debug/20261016T101500-3f2a…/
//!   params.json
//!   segment-0/masked.pdf
//!   segment-0/ocr-text.json
//!   segment-0/ocr-layout.json
//!   segment-0/llm-raw.txt
//! ```
//!
//! Nothing here can fail a request: write errors are logged and dropped.

use crate::output::DebugInfo;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DebugSink {
    dir: Option<PathBuf>,
    request_id: String,
}

impl DebugSink {
    /// A sink that writes nothing.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            request_id: String::new(),
        }
    }

    /// Create the per-request directory under `root`.
    ///
    /// Returns a disabled sink when `root` is `None` or the directory cannot
    /// be created.
    pub async fn create(root: Option<&Path>) -> Self {
        let Some(root) = root else {
            return Self::disabled();
        };
        let request_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        let dir = root.join(&request_id);
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => {
                debug!("Debug artifacts → {}", dir.display());
                Self {
                    dir: Some(dir),
                    request_id,
                }
            }
            Err(e) => {
                warn!("Debug sink disabled, cannot create {}: {}", dir.display(), e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn info(&self) -> Option<DebugInfo> {
        self.dir.as_ref().map(|dir| DebugInfo {
            request_id: self.request_id.clone(),
            directory: dir.display().to_string(),
        })
    }

    pub async fn write_bytes(&self, relative: &str, bytes: &[u8]) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Debug write {} failed: {}", path.display(), e);
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            warn!("Debug write {} failed: {}", path.display(), e);
        }
    }

    pub async fn write_text(&self, relative: &str, text: &str) {
        self.write_bytes(relative, text.as_bytes()).await;
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, relative: &str, value: &T) {
        if !self.is_enabled() {
            return;
        }
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.write_bytes(relative, &bytes).await,
            Err(e) => warn!("Debug serialise {} failed: {}", relative, e),
        }
    }
}
