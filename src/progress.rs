//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the extractor walks the document. Pages are processed strictly
//! in order, so events for page `n + 1` never precede the completion or
//! failure event of page `n`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_letter2json::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     merged: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_merged(&self, page_num: usize, total_pages: usize, confidence: Option<f64>) {
//!         self.merged.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} merged (confidence {:?})", page_num, total_pages, confidence);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { merged: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the sequential extractor as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after rendering, before the first page is sent to the model.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after a page's result has been folded into the record.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the run
    /// * `confidence`  — sender confidence the model reported for this page
    fn on_page_merged(&self, page_num: usize, total_pages: usize, confidence: Option<f64>) {
        let _ = (page_num, total_pages, confidence);
    }

    /// Called when a page fails. The run continues with the next page.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the last page (or on cancellation).
    ///
    /// # Arguments
    /// * `total_pages`  — pages in the run
    /// * `merged_count` — pages whose extraction reached the record
    fn on_extraction_complete(&self, total_pages: usize, merged_count: usize) {
        let _ = (total_pages, merged_count);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        errors: AtomicUsize,
        confidences: Mutex<Vec<Option<f64>>>,
        merged_total: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_merged(&self, _page_num: usize, _total_pages: usize, confidence: Option<f64>) {
            self.confidences.lock().unwrap().push(confidence);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _total_pages: usize, merged_count: usize) {
            self.merged_total.store(merged_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_merged(1, 5, Some(0.9));
        cb.on_page_error(2, 5, "some error");
        cb.on_extraction_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_page_start(1, 2);
        tracker.on_page_merged(1, 2, Some(0.8));
        tracker.on_page_start(2, 2);
        tracker.on_page_error(2, 2, "VLM timeout");
        tracker.on_extraction_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.confidences.lock().unwrap(), vec![Some(0.8)]);
        assert_eq!(tracker.merged_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_extraction_start(10);
        cb.on_page_merged(1, 10, None);
    }
}
