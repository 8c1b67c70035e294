//! Progress-callback trait for generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::GenerationConfigBuilder::progress_callback`] to receive
//! events as the pipeline transcribes pages and works down the synthesis
//! ladder. The CLI renders these as a progress bar; a web backend can forward
//! them to a socket.
//!
//! # Example
//!
//! ```rust
//! use cramfast::{GenerationConfig, GenerationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Dropped(AtomicUsize);
//!
//! impl GenerationProgressCallback for Dropped {
//!     fn on_page_dropped(&self, page_num: usize, _total: usize, reason: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num} skipped: {reason}");
//!     }
//! }
//!
//! let config = GenerationConfig::builder()
//!     .progress_callback(Arc::new(Dropped(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::synthesize::SynthesisStrategy;
use std::sync::Arc;

/// Called by the pipeline as it processes a session.
///
/// Pages are transcribed concurrently, so the page-level methods may be
/// called from several tasks at once. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once, after the session entered `generating`.
    fn on_generation_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before the first transcription attempt of a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page yielded meaningful text.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page is dropped after exhausting its attempts.
    fn on_page_dropped(&self, page_num: usize, total_pages: usize, reason: &str) {
        let _ = (page_num, total_pages, reason);
    }

    /// Called before a synthesis strategy runs.
    fn on_strategy_start(&self, strategy: SynthesisStrategy) {
        let _ = strategy;
    }

    /// Called when a strategy did not pass its quality gate.
    fn on_strategy_rejected(&self, strategy: SynthesisStrategy, reason: &str) {
        let _ = (strategy, reason);
    }

    /// Called once when a deck has been committed.
    fn on_generation_complete(&self, card_count: usize) {
        let _ = card_count;
    }

    /// Called once when a run ends with an error, including precondition
    /// failures that happen before [`on_generation_start`](Self::on_generation_start).
    fn on_generation_failed(&self, code: &str, message: &str) {
        let _ = (code, message);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        dropped: AtomicUsize,
        strategies: Mutex<Vec<SynthesisStrategy>>,
    }

    impl GenerationProgressCallback for Tracking {
        fn on_page_complete(&self, _page: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_dropped(&self, _page: usize, _total: usize, _reason: &str) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_strategy_start(&self, strategy: SynthesisStrategy) {
            self.strategies.lock().unwrap().push(strategy);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 42);
        cb.on_page_dropped(2, 3, "blurry");
        cb.on_strategy_start(SynthesisStrategy::Structured);
        cb.on_strategy_rejected(SynthesisStrategy::Structured, "3 cards");
        cb.on_generation_complete(7);
        cb.on_generation_failed("OCR_FAILED", "no page could be read");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        t.on_page_complete(1, 2, 100);
        t.on_page_dropped(2, 2, "no text found");
        t.on_strategy_start(SynthesisStrategy::Structured);
        t.on_strategy_start(SynthesisStrategy::Fallback);

        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(
            *t.strategies.lock().unwrap(),
            vec![SynthesisStrategy::Structured, SynthesisStrategy::Fallback]
        );
    }

    #[test]
    fn arc_dyn_callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn GenerationProgressCallback>();
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_generation_start(1);
    }
}
