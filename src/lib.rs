//! # transflate
//!
//! Translate scanned PDF documents: rasterise pages, OCR them, translate the
//! text in context-carrying chunks, and publish a downloadable artifact.
//!
//! ## Why this crate?
//!
//! Scanned documents have no text layer, and a whole book does not fit in one
//! model request. This crate OCRs every page concurrently with a bounded pool
//! of engines, splits the merged text into word-bounded chunks, and translates
//! those concurrently too. Each chunk carries the tail of its predecessor's
//! source text as context, so parallelism costs no narrative continuity.
//!
//! ## Task Lifecycle
//!
//! ```text
//! submit ─► Received ─► Translating ─► Uploading ─► Done
//!              │             │              │
//!              └─────────────┴──────────────┴─────► Error
//!
//! Translating:  1. Render     PDF → page images (pdfium / pdftoppm)
//!               2. OCR        pooled engines, C = CPUs + 1 pages at a time
//!               3. Merge      page order, clean, collapse whitespace
//!               4. Debit      balance -= page count
//!               5. Translate  ≤ 2000-word chunks, C = max(CPUs × 2, 10)
//! Uploading:    6. Publish    artifact → download link
//! ```
//!
//! A failed page or chunk leaves an empty slot and the task carries on; a
//! failed stage, ledger refusal, or cancel ends the task in `Error`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transflate::pipeline::ocr::TesseractFactory;
//! use transflate::pipeline::publish::LocalDirPublisher;
//! use transflate::pipeline::render::PdftoppmRasterizer;
//! use transflate::pipeline::translate::LlmTranslator;
//! use transflate::{MemoryLedger, MemoryTaskStore, PipelineConfig, Services, TaskManager, TranslatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Services {
//!         store: Arc::new(MemoryTaskStore::new()),
//!         ledger: Arc::new(MemoryLedger::new().with_user("alice", 100)),
//!         rasterizer: Arc::new(PdftoppmRasterizer::new()),
//!         ocr: Arc::new(TesseractFactory::default()),
//!         // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!         translator: Arc::new(LlmTranslator::from_config(&TranslatorConfig::default())?),
//!         publisher: Arc::new(LocalDirPublisher::new("./out", "http://localhost:8080")),
//!     };
//!     let manager = TaskManager::new(services, PipelineConfig::default());
//!
//!     let pdf = std::fs::read("scan.pdf")?;
//!     let handle = manager.submit("alice", pdf, "scan.pdf", "eng").await?;
//!     let task_id = handle.task_id();
//!     let link = handle.wait().await?;
//!     println!("{link}");
//!     println!("{:?}", manager.get_status("alice", &task_id).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `transflate` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! transflate = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod prompts;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, TranslatorConfig};
pub use error::{
    ChunkError, LedgerError, OcrError, PageError, PoolError, PublishError, StoreError, TaskError,
    TranslateError,
};
pub use pipeline::ocr::{OcrEngine, OcrEngineFactory, OcrOutput, OcrStage, PageResult};
pub use pipeline::publish::ArtifactPublisher;
pub use pipeline::render::{PageImage, PageRasterizer, RasterizedDocument};
pub use pipeline::text::{last_n_words, split_chunks, Chunk};
pub use pipeline::translate::{ChunkResult, TranslationStage, Translator};
pub use pool::{BatchOutcome, ResourcePool, UnitError, WorkerPool};
pub use progress::{NoopProgressCallback, ProgressCallback, TaskProgressCallback};
pub use task::{
    BalanceLedger, MemoryLedger, MemoryTaskStore, Services, TaskHandle, TaskId, TaskManager,
    TaskRecord, TaskStateStore, TaskStatus, TaskView,
};
