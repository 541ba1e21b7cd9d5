//! Progress-callback trait for annotation events.
//!
//! Inject an [`Arc<dyn AnnotationProgressCallback>`] via
//! [`crate::config::AnnotationConfigBuilder::progress_callback`] to receive
//! events as regions and page batches are annotated.
//!
//! # Example
//!
//! ```rust
//! use medpdf_instruct::{AnnotationConfig, AnnotationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl AnnotationProgressCallback for Counter {
//!     fn on_region_complete(&self, _paper_id: &str, _done: usize, _total: usize, _confidence: f64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = AnnotationConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the annotator as it works through a paper.
///
/// Region events may arrive concurrently from several tasks; all methods
/// default to no-ops.
pub trait AnnotationProgressCallback: Send + Sync {
    /// Called once per paper before any VLM call.
    fn on_paper_start(&self, paper_id: &str, total_regions: usize, total_batches: usize) {
        let _ = (paper_id, total_regions, total_batches);
    }

    /// Called when a region annotation finished (possibly as a fallback stub).
    ///
    /// `done` counts finished regions so far, in completion order.
    fn on_region_complete(&self, paper_id: &str, done: usize, total: usize, confidence: f64) {
        let _ = (paper_id, done, total, confidence);
    }

    /// Called when a region call failed after every retry.
    fn on_region_error(&self, paper_id: &str, region: usize, error: &str) {
        let _ = (paper_id, region, error);
    }

    /// Called after each document page batch, successful or not.
    fn on_batch_complete(&self, paper_id: &str, batch: usize, total: usize, ok: bool) {
        let _ = (paper_id, batch, total, ok);
    }

    /// Called once per paper after all calls were attempted.
    fn on_paper_complete(&self, paper_id: &str, regions: usize, failed_regions: usize) {
        let _ = (paper_id, regions, failed_regions);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl AnnotationProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::AnnotationConfig`].
pub type ProgressCallback = Arc<dyn AnnotationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        regions: AtomicUsize,
        errors: AtomicUsize,
        batches_ok: AtomicUsize,
    }

    impl AnnotationProgressCallback for Tracking {
        fn on_region_complete(&self, _: &str, _: usize, _: usize, _: f64) {
            self.regions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_region_error(&self, _: &str, _: usize, _: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _: &str, _: usize, _: usize, ok: bool) {
            if ok {
                self.batches_ok.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_paper_start("PMC1", 3, 2);
        cb.on_region_complete("PMC1", 1, 3, 0.9);
        cb.on_region_error("PMC1", 2, "timeout");
        cb.on_batch_complete("PMC1", 1, 2, true);
        cb.on_paper_complete("PMC1", 3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Arc::new(Tracking::default());
        let cb: ProgressCallback = t.clone();
        cb.on_region_complete("PMC1", 1, 2, 0.8);
        cb.on_region_error("PMC1", 1, "429");
        cb.on_region_complete("PMC1", 2, 2, 0.0);
        cb.on_batch_complete("PMC1", 1, 2, true);
        cb.on_batch_complete("PMC1", 2, 2, false);

        assert_eq!(t.regions.load(Ordering::SeqCst), 2);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.batches_ok.load(Ordering::SeqCst), 1);
    }
}
