//! Progress-callback trait for per-page print events.
//!
//! Inject an [`Arc<dyn PrintProgressCallback>`] via
//! [`crate::config::PrintConfigBuilder::progress_callback`] to observe a job
//! as pages are rasterised and handed to the device.
//!
//! Events are advisory. A slow or panicking observer never changes which
//! pages are printed or in what order.
//!
//! # Example
//!
//! ```rust
//! use rasterprint::{PrintConfig, PrintProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct Counter(AtomicU32);
//!
//! impl PrintProgressCallback for Counter {
//!     fn on_page_emitted(&self, page: u32, emitted: u32, total: u32) {
//!         self.0.store(emitted, Ordering::SeqCst);
//!         eprintln!("printed page {page} ({emitted}/{total})");
//!     }
//! }
//!
//! let config = PrintConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicU32::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::JobReport;
use std::sync::Arc;
use std::time::Duration;

/// Called by the print pipeline as a job advances.
///
/// `on_page_converted` and `on_page_failed` come from conversion workers and
/// may fire concurrently, in any page order. `on_page_emitted` comes from the
/// single emission path and always fires in ascending page order.
///
/// Page numbers passed to every method are document page numbers.
pub trait PrintProgressCallback: Send + Sync {
    /// Called once before any page is rasterised.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages selected for printing
    fn on_job_start(&self, total_pages: u32) {
        let _ = total_pages;
    }

    /// Called when a page has been rasterised.
    ///
    /// # Arguments
    /// * `page`: document page number
    /// * `converted`: pages finished so far, successful or not
    /// * `elapsed`: time since the job started
    fn on_page_converted(&self, page: u32, converted: u32, total_pages: u32, elapsed: Duration) {
        let _ = (page, converted, total_pages, elapsed);
    }

    /// Called when a page could not be rasterised. It will be skipped.
    fn on_page_failed(&self, page: u32, total_pages: u32, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called after the device accepted a page.
    fn on_page_emitted(&self, page: u32, emitted: u32, total_pages: u32) {
        let _ = (page, emitted, total_pages);
    }

    /// Called once the job reached a terminal phase.
    fn on_job_complete(&self, report: &JobReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PrintProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PrintConfig`].
pub type ProgressCallback = Arc<dyn PrintProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicU32,
        converted: AtomicU32,
        failed: Mutex<Vec<u32>>,
        emitted: Mutex<Vec<u32>>,
    }

    impl PrintProgressCallback for TrackingCallback {
        fn on_job_start(&self, total_pages: u32) {
            self.total.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_converted(&self, _page: u32, converted: u32, _total: u32, _elapsed: Duration) {
            self.converted.store(converted, Ordering::SeqCst);
        }

        fn on_page_failed(&self, page: u32, _total: u32, _error: &str) {
            self.failed.lock().unwrap().push(page);
        }

        fn on_page_emitted(&self, page: u32, _emitted: u32, _total: u32) {
            self.emitted.lock().unwrap().push(page);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start(5);
        cb.on_page_converted(1, 1, 5, Duration::from_millis(3));
        cb.on_page_failed(2, 5, "bad page");
        cb.on_page_emitted(1, 1, 5);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_job_start(3);
        tracker.on_page_converted(2, 1, 3, Duration::ZERO);
        tracker.on_page_failed(3, 3, "timeout");
        tracker.on_page_converted(1, 3, 3, Duration::ZERO);
        tracker.on_page_emitted(1, 1, 3);
        tracker.on_page_emitted(2, 2, 3);

        assert_eq!(tracker.total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.converted.load(Ordering::SeqCst), 3);
        assert_eq!(*tracker.failed.lock().unwrap(), vec![3]);
        assert_eq!(*tracker.emitted.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_start(10);
        cb.on_page_emitted(1, 1, 10);
    }
}
