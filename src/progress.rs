//! Progress-callback trait for per-segment detection events.
//!
//! Inject an [`Arc<dyn DetectionProgressCallback>`] via
//! [`crate::config::DetectionConfigBuilder::progress_callback`]. Segments run
//! concurrently on spawned tasks, so callbacks may fire from several threads
//! at once and in any segment order.
//!
//! # Example
//!
//! ```rust
//! use formseg::{DetectionConfig, DetectionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FieldCounter(AtomicUsize);
//!
//! impl DetectionProgressCallback for FieldCounter {
//!     fn on_segment_complete(&self, _segment: usize, _total: usize, field_count: usize) {
//!         self.0.fetch_add(field_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = DetectionConfig::builder()
//!     .progress_callback(Arc::new(FieldCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each segment.
///
/// Segment indices are 0-based, matching `SegmentResult::segment_index`.
/// All methods default to no-ops.
pub trait DetectionProgressCallback: Send + Sync {
    /// Called once after validation and masking, before any OCR call.
    fn on_detection_start(&self, total_segments: usize) {
        let _ = total_segments;
    }

    /// Called when a segment's first OCR request is about to be sent.
    fn on_segment_start(&self, segment: usize, total_segments: usize) {
        let _ = (segment, total_segments);
    }

    /// Called when field detection for a segment succeeded.
    ///
    /// `field_count` is the number of fields kept for the segment before
    /// cross-segment merging.
    fn on_segment_complete(&self, segment: usize, total_segments: usize, field_count: usize) {
        let _ = (segment, total_segments, field_count);
    }

    /// Called when a segment failed without failing the request.
    fn on_segment_error(&self, segment: usize, total_segments: usize, error: &str) {
        let _ = (segment, total_segments, error);
    }

    /// Called once after every segment has been attempted.
    fn on_detection_complete(&self, total_segments: usize, success_count: usize) {
        let _ = (total_segments, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DetectionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DetectionConfig`].
pub type ProgressCallback = Arc<dyn DetectionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        completes: AtomicUsize,
        errors: Mutex<Vec<(usize, String)>>,
        success: AtomicUsize,
    }

    impl DetectionProgressCallback for Recorder {
        fn on_segment_complete(&self, _segment: usize, _total: usize, _fields: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_segment_error(&self, segment: usize, _total: usize, error: &str) {
            self.errors.lock().unwrap().push((segment, error.to_string()));
        }

        fn on_detection_complete(&self, _total: usize, success_count: usize) {
            self.success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_detection_start(2);
        cb.on_segment_start(0, 2);
        cb.on_segment_complete(0, 2, 7);
        cb.on_segment_error(1, 2, "empty OCR");
        cb.on_detection_complete(2, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_detection_start(2);
        cb.on_segment_complete(0, 2, 3);
        cb.on_segment_error(1, 2, "OCR returned no blocks");
        cb.on_detection_complete(2, 1);

        assert_eq!(rec.completes.load(Ordering::SeqCst), 1);
        assert_eq!(rec.errors.lock().unwrap()[0].0, 1);
        assert_eq!(rec.success.load(Ordering::SeqCst), 1);
    }
}
