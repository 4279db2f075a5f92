//! Progress-callback trait for per-document and per-segment events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! run as it happens. The status store already records the same milestones
//! durably; callbacks are for live consumers such as a terminal progress bar
//! or a push channel to a web client.
//!
//! # Example
//!
//! ```rust
//! use docsplit::{PipelineConfig, PipelineProgress};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingProgress {
//!     segments: AtomicUsize,
//! }
//!
//! impl PipelineProgress for CountingProgress {
//!     fn on_segment_complete(&self, file: &str, segment: &str, index: usize, total: usize, markdown_len: usize) {
//!         let done = self.segments.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{file}: {segment} ({index}/{total}) {markdown_len} bytes, {done} so far");
//!     }
//! }
//!
//! let progress = Arc::new(CountingProgress { segments: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(progress as Arc<dyn PipelineProgress>)
//!     .build()
//!     .unwrap();
//! ```

use crate::status::{Stage, StageStatus};
use std::sync::Arc;

/// Called by the orchestrators as they process documents and segments.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Indices are 1-based.
pub trait PipelineProgress: Send + Sync {
    /// Called once before the first document of a stage.
    fn on_stage_start(&self, stage: Stage, total_documents: usize) {
        let _ = (stage, total_documents);
    }

    fn on_document_start(&self, stage: Stage, file: &str, index: usize, total: usize) {
        let _ = (stage, file, index, total);
    }

    /// Mirrors every `processing` message written to the status store.
    fn on_document_status(&self, stage: Stage, file: &str, message: &str) {
        let _ = (stage, file, message);
    }

    /// Called once per document with its terminal status.
    ///
    /// `segments` is the number of segments found (split) or parsed
    /// successfully (parse).
    fn on_document_complete(&self, stage: Stage, file: &str, status: StageStatus, segments: usize) {
        let _ = (stage, file, status, segments);
    }

    /// A segment was parsed; `markdown_len` is the byte length of its markdown.
    fn on_segment_complete(
        &self,
        file: &str,
        segment: &str,
        index: usize,
        total: usize,
        markdown_len: usize,
    ) {
        let _ = (file, segment, index, total, markdown_len);
    }

    /// A segment failed to extract or parse.
    fn on_segment_error(&self, file: &str, segment: &str, index: usize, total: usize, error: &str) {
        let _ = (file, segment, index, total, error);
    }

    /// Called once after every document of a stage has been attempted.
    fn on_stage_complete(&self, stage: Stage, succeeded: usize, failed: usize) {
        let _ = (stage, succeeded, failed);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingProgress {
        documents: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        failed_total: AtomicUsize,
        statuses: Mutex<Vec<String>>,
    }

    impl PipelineProgress for TrackingProgress {
        fn on_document_start(&self, _stage: Stage, _file: &str, _index: usize, _total: usize) {
            self.documents.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_status(&self, _stage: Stage, file: &str, message: &str) {
            self.statuses
                .lock()
                .unwrap()
                .push(format!("{file}: {message}"));
        }

        fn on_segment_complete(&self, _f: &str, _s: &str, _i: usize, _t: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_segment_error(&self, _f: &str, _s: &str, _i: usize, _t: usize, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _succeeded: usize, failed: usize) {
            self.failed_total.store(failed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_progress_does_not_panic() {
        let cb = NoopProgress;
        cb.on_stage_start(Stage::Split, 2);
        cb.on_document_start(Stage::Split, "a.pdf", 1, 2);
        cb.on_document_status(Stage::Split, "a.pdf", "Uploading file...");
        cb.on_document_complete(Stage::Split, "a.pdf", StageStatus::Completed, 3);
        cb.on_segment_complete("a.pdf", "invoice_1", 1, 3, 42);
        cb.on_segment_error("a.pdf", "invoice_2", 2, 3, "boom");
        cb.on_stage_complete(Stage::Parse, 1, 1);
    }

    #[test]
    fn tracking_progress_receives_events() {
        let tracker = TrackingProgress::default();

        tracker.on_document_start(Stage::Parse, "a.pdf", 1, 1);
        tracker.on_document_status(Stage::Parse, "a.pdf", "Segment 1/2 parsed: invoice_1");
        tracker.on_segment_complete("a.pdf", "invoice_1", 1, 2, 100);
        tracker.on_segment_error("a.pdf", "invoice_2", 2, 2, "no pages");
        tracker.on_stage_complete(Stage::Parse, 1, 0);

        assert_eq!(tracker.documents.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failed_total.load(Ordering::SeqCst), 0);
        assert_eq!(
            tracker.statuses.lock().unwrap().as_slice(),
            ["a.pdf: Segment 1/2 parsed: invoice_1".to_string()]
        );
    }

    #[test]
    fn arc_dyn_progress_works() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_stage_start(Stage::Split, 10);
        cb.on_document_start(Stage::Split, "x.pdf", 1, 10);
    }
}
