//! Error types for the transflate library.
//!
//! Two kinds of failure flow through the pipeline:
//!
//! * [`TaskError`]: **Fatal**: the task cannot proceed (PDF cannot be
//!   rasterised, the ledger refused the debit, every chunk failed to
//!   translate, the artifact could not be published) or a request was
//!   rejected before it touched the state store (bad upload, malformed or
//!   foreign task id). The orchestrator turns these into a single terminal
//!   `Error` status write.
//!
//! * [`PageError`] / [`ChunkError`]: **Non-fatal**: one page failed OCR or
//!   one chunk failed translation. They are stored in
//!   [`crate::pipeline::ocr::PageResult`] and
//!   [`crate::pipeline::translate::ChunkResult`], logged, and the slot is
//!   left empty so the rest of the document still goes through.
//!
//! The remaining enums describe failures reported by the collaborators
//! (OCR engines, translator, state store, ledger, publisher, pools).

use crate::task::status::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the transflate library.
#[derive(Debug, Error)]
pub enum TaskError {
    // ── Request validation ────────────────────────────────────────────────
    /// The uploaded file was rejected before a task was created.
    #[error("Invalid upload '{filename}': {reason}")]
    InvalidUpload { filename: String, reason: String },

    /// A task id did not have the `username-token` shape.
    #[error("Invalid task id '{id}'")]
    InvalidTaskId { id: String },

    /// The task id belongs to another user.
    #[error("Not authorized to access task '{id}'")]
    NotAuthorized { id: String },

    /// No live record exists for the task (never created, or TTL elapsed).
    #[error("Task '{id}' not found or expired")]
    TaskNotFound { id: String },

    // ── Input errors (CLI) ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF cannot be parsed at all.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// The PDF parsed but produced no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// A page could not be rasterised.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rasteriser backend (pdfium library, pdftoppm binary) is missing.
    #[error("Page rasteriser unavailable: {0}")]
    RasterizerUnavailable(String),

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The OCR engine pool could not be built.
    #[error("OCR engines unavailable: {0}")]
    OcrUnavailable(String),

    /// The ledger refused to debit the page count.
    #[error("Balance debit failed: {0}")]
    Ledger(#[from] LedgerError),

    /// Every chunk failed; there is nothing to publish.
    #[error("All {total} chunks failed to translate.\nFirst error: {first_error}")]
    TranslationFailed { total: usize, first_error: String },

    /// The translation provider is not initialised (missing API key etc.).
    #[error("Translation provider '{provider}' is not configured.\n{hint}")]
    TranslatorNotConfigured { provider: String, hint: String },

    /// The artifact could not be published.
    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),

    /// A whole-stage call ran past its deadline.
    #[error("{stage} timed out after {secs}s")]
    StageTimeout { stage: &'static str, secs: u64 },

    // ── State errors ──────────────────────────────────────────────────────
    /// The task state store failed.
    #[error("Task state store error: {0}")]
    Store(#[from] StoreError),

    /// The lifecycle refused a status change.
    #[error("Illegal status transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// The task was cancelled through its handle.
    #[error("Task cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal OCR failure for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The engine rejected the image or failed to recognise it.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The engine call exceeded its deadline.
    #[error("Page {page}: OCR timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// A non-fatal translation failure for a single chunk.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The translator returned an error.
    #[error("Chunk {chunk}: translation failed: {detail}")]
    TranslateFailed { chunk: usize, detail: String },

    /// The translator call exceeded its deadline.
    #[error("Chunk {chunk}: translation timed out after {secs}s")]
    Timeout { chunk: usize, secs: u64 },
}

/// Errors reported by an OCR engine client.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image not found: '{path}'")]
    MissingImage { path: PathBuf },

    #[error("no image set on engine")]
    NoImage,

    #[error("language '{lang}' rejected: {detail}")]
    Language { lang: String, detail: String },

    #[error("engine failure: {0}")]
    Engine(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("no engine available: {0}")]
    Unavailable(String),
}

/// Errors reported by a [`crate::pipeline::translate::Translator`].
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend returned an empty translation")]
    EmptyResponse,

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors reported by a [`crate::task::store::TaskStateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{task_id}' of user '{username}' does not exist")]
    NotFound { username: String, task_id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors reported by a [`crate::task::ledger::BalanceLedger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance for '{username}': need {required}, have {available}")]
    InsufficientBalance {
        username: String,
        required: u64,
        available: u64,
    },

    #[error("user '{username}' not found")]
    UserNotFound { username: String },

    #[error("invalid debit amount {0}")]
    InvalidAmount(u64),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Errors reported by a [`crate::pipeline::publish::ArtifactPublisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors reported by [`crate::pool::ResourcePool`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was closed while waiting for an instance.
    #[error("resource pool is closed")]
    Closed,

    /// A permit was granted but no idle instance was present.
    #[error("resource pool has no idle instance")]
    Exhausted,

    /// The requested size does not fit the pool's permit counter.
    #[error("resource pool size {size} exceeds the limit of {} instances", u32::MAX)]
    TooLarge { size: usize },
}

impl From<PoolError> for OcrError {
    fn from(e: PoolError) -> Self {
        OcrError::Unavailable(e.to_string())
    }
}
