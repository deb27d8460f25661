//! Progress-callback trait for task lifecycle and per-unit events.
//!
//! Inject an [`Arc<dyn TaskProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! task as it moves through OCR and translation.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides where events go (a progress bar, a log line, a metrics
//! counter) without the library knowing. Page and chunk events fire from
//! concurrent workers, so implementations must be `Send + Sync`.
//!
//! For status alone, [`crate::task::TaskHandle::status_updates`] offers a
//! stream instead.
//!
//! # Example
//!
//! ```rust
//! use transflate::{PipelineConfig, TaskProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl TaskProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _task_id: &str, page: usize, total: usize, chars: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {}/{} ({} chars), {} done", page, total, chars, done);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::task::status::TaskStatus;
use std::sync::Arc;

/// Receives task events. Every method defaults to a no-op.
///
/// Page and chunk numbers are 1-indexed.
pub trait TaskProgressCallback: Send + Sync {
    /// The task's status changed (including the initial `Received`).
    fn on_status_change(&self, task_id: &str, status: TaskStatus) {
        let _ = (task_id, status);
    }

    /// Rasterisation finished and OCR is about to start.
    fn on_ocr_start(&self, task_id: &str, total_pages: usize) {
        let _ = (task_id, total_pages);
    }

    fn on_page_complete(&self, task_id: &str, page: usize, total_pages: usize, chars: usize) {
        let _ = (task_id, page, total_pages, chars);
    }

    /// A page failed OCR. Its text will be empty.
    fn on_page_error(&self, task_id: &str, page: usize, total_pages: usize, error: &str) {
        let _ = (task_id, page, total_pages, error);
    }

    /// Chunking finished and translation is about to start.
    fn on_translation_start(&self, task_id: &str, total_chunks: usize) {
        let _ = (task_id, total_chunks);
    }

    fn on_chunk_complete(&self, task_id: &str, chunk: usize, total_chunks: usize, chars: usize) {
        let _ = (task_id, chunk, total_chunks, chars);
    }

    /// A chunk failed translation. Its slot in the output will be empty.
    fn on_chunk_error(&self, task_id: &str, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (task_id, chunk, total_chunks, error);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl TaskProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn TaskProgressCallback>;
