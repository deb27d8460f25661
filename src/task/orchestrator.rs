//! Task orchestration: accept a document, then drive it off the request path.
//!
//! ## Entry points
//!
//! [`TaskManager`] is the surface an HTTP layer (or the CLI) talks to:
//!
//! * [`TaskManager::submit`] validates the upload, records the task as
//!   `Received`, spawns a [`TaskOrchestrator`], and returns a [`TaskHandle`]
//!   immediately.
//! * [`TaskManager::get_status`] / [`TaskManager::list_tasks`] read the state
//!   store; task ids are parsed and checked against the caller before any
//!   read.
//!
//! ## Driving sequence
//!
//! ```text
//! Received ─► Translating: rasterise ─► OCR ─► merge ─► debit ─► translate
//!          ─► Uploading:   publish ─► record link
//!          ─► Done
//! ```
//!
//! Any fatal error, a panic inside the pipeline, or a cancel request ends the
//! task with a single best-effort `Error` write. If even that write fails the
//! record is left as-is until its TTL runs out.

use crate::config::PipelineConfig;
use crate::error::{StoreError, TaskError};
use crate::pipeline::input::validate_upload;
use crate::pipeline::ocr::{OcrEngineFactory, OcrStage};
use crate::pipeline::publish::ArtifactPublisher;
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::translate::{TranslationStage, Translator};
use crate::pool::WorkerPool;
use crate::progress::ProgressCallback;
use crate::task::ledger::BalanceLedger;
use crate::task::status::{TaskId, TaskStatus};
use crate::task::store::{TaskRecord, TaskStateStore};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

/// External collaborators a task needs. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TaskStateStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub ocr: Arc<dyn OcrEngineFactory>,
    pub translator: Arc<dyn Translator>,
    pub publisher: Arc<dyn ArtifactPublisher>,
}

/// What a polling client sees about a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub status: TaskStatus,
    pub status_code: u8,
    pub filename: String,
    /// Set once the task is `Done`.
    pub download_link: Option<String>,
}

impl TaskView {
    fn from_record(task_id: String, record: TaskRecord) -> Self {
        Self {
            task_id,
            status: record.status,
            status_code: record.status.code(),
            filename: record.filename,
            download_link: (!record.link.is_empty()).then_some(record.link),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────────

/// Accepts tasks and answers status queries.
#[derive(Clone)]
pub struct TaskManager {
    services: Services,
    config: Arc<PipelineConfig>,
}

impl TaskManager {
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        Self {
            services,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Accept a document and start processing it in the background.
    ///
    /// An empty `lang` uses the configured default OCR language. Returns once
    /// the task is recorded as `Received`; validation failures leave the
    /// store untouched.
    pub async fn submit(
        &self,
        username: &str,
        file: Vec<u8>,
        filename: &str,
        lang: &str,
    ) -> Result<TaskHandle, TaskError> {
        if username.is_empty() {
            return Err(TaskError::InvalidUpload {
                filename: filename.to_string(),
                reason: "username must not be empty".to_string(),
            });
        }
        validate_upload(filename, &file)?;
        if username.contains('-') {
            warn!(
                "Username '{}' contains '-'; its task ids will not parse back for status queries",
                username
            );
        }

        let id = TaskId::generate(username);
        self.services
            .store
            .create(username, id.token(), filename, self.config.task_ttl())
            .await?;

        let task_id = id.to_string();
        info!("[{}] Accepted '{}' ({} bytes)", task_id, filename, file.len());

        let (status_tx, status_rx) = watch::channel(TaskStatus::Received);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_status_change(&task_id, TaskStatus::Received);
        }

        let language = if lang.trim().is_empty() {
            self.config.default_language.clone()
        } else {
            lang.to_string()
        };

        let orchestrator = TaskOrchestrator {
            services: self.services.clone(),
            config: Arc::clone(&self.config),
            lifecycle: Lifecycle {
                store: Arc::clone(&self.services.store),
                username: username.to_string(),
                token: id.token().to_string(),
                task_id,
                current: TaskStatus::Received,
                status_tx,
                progress: self.config.progress_callback.clone(),
            },
            pdf: file,
            language,
        };
        let join = tokio::spawn(orchestrator.run(cancel_rx));

        Ok(TaskHandle {
            id,
            status: status_rx,
            cancel: cancel_tx,
            join,
        })
    }

    /// Status of one task owned by `username`.
    pub async fn get_status(&self, username: &str, task_id: &str) -> Result<TaskView, TaskError> {
        let id = TaskId::authorize(task_id, username)?;
        let record = self
            .services
            .store
            .get(id.username(), id.token())
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => TaskError::TaskNotFound {
                    id: task_id.to_string(),
                },
                other => TaskError::Store(other),
            })?;
        Ok(TaskView::from_record(id.to_string(), record))
    }

    /// Every live task of `username`, ordered by task id.
    pub async fn list_tasks(&self, username: &str) -> Result<Vec<TaskView>, TaskError> {
        let records = self.services.store.list_all(username).await?;
        let mut views: Vec<TaskView> = records
            .into_iter()
            .map(|(token, record)| TaskView::from_record(format!("{username}-{token}"), record))
            .collect();
        views.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(views)
    }
}

// ── Handle ───────────────────────────────────────────────────────────────

/// Owner's view of a running task.
///
/// Dropping the handle detaches the task; it keeps running and its state
/// stays queryable through [`TaskManager::get_status`].
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    status: watch::Receiver<TaskStatus>,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<String, TaskError>>,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// `"{username}-{token}"`, as returned to clients.
    pub fn task_id(&self) -> String {
        self.id.to_string()
    }

    /// Latest status published by the orchestrator.
    pub fn current_status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Stream of statuses, starting with the current one.
    pub fn status_updates(&self) -> WatchStream<TaskStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Ask the task to stop. It ends in `Error` at its next suspension point.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the task to finish. Returns the download link on success.
    pub async fn wait(self) -> Result<String, TaskError> {
        self.join
            .await
            .map_err(|e| TaskError::Internal(format!("Task runner failed: {e}")))?
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Status bookkeeping for one task: checked transitions, store writes,
/// handle notifications, and progress events.
struct Lifecycle {
    store: Arc<dyn TaskStateStore>,
    username: String,
    token: String,
    task_id: String,
    current: TaskStatus,
    status_tx: watch::Sender<TaskStatus>,
    progress: Option<ProgressCallback>,
}

impl Lifecycle {
    async fn advance(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        self.current.transition(next)?;
        self.store
            .update_status(&self.username, &self.token, next)
            .await?;
        self.set(next);
        debug!("[{}] → {}", self.task_id, next);
        Ok(())
    }

    /// Best-effort terminal `Error`. The handle is told even if the store
    /// write fails.
    async fn fail(&mut self, err: &TaskError) {
        error!("[{}] Task failed: {}", self.task_id, err);
        if self.current.is_terminal() {
            return;
        }
        if let Err(e) = self
            .store
            .update_status(&self.username, &self.token, TaskStatus::Error)
            .await
        {
            error!(
                "[{}] Could not record Error status ({}); record stays until it expires",
                self.task_id, e
            );
        }
        self.set(TaskStatus::Error);
    }

    fn set(&mut self, status: TaskStatus) {
        self.current = status;
        self.status_tx.send_replace(status);
        if let Some(ref cb) = self.progress {
            cb.on_status_change(&self.task_id, status);
        }
    }
}

/// Drives one task from `Received` to `Done` or `Error`.
pub struct TaskOrchestrator {
    services: Services,
    config: Arc<PipelineConfig>,
    lifecycle: Lifecycle,
    pdf: Vec<u8>,
    language: String,
}

impl TaskOrchestrator {
    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<String, TaskError> {
        let start = Instant::now();
        let pdf = std::mem::take(&mut self.pdf);

        let outcome = {
            let driven = AssertUnwindSafe(self.drive(pdf)).catch_unwind();
            tokio::select! {
                r = driven => r.unwrap_or_else(|_| Err(TaskError::Internal("pipeline panicked".into()))),
                _ = cancelled(&mut cancel) => Err(TaskError::Cancelled),
            }
        };

        match outcome {
            Ok(link) => {
                info!(
                    "[{}] Done in {:?}: {}",
                    self.lifecycle.task_id,
                    start.elapsed(),
                    link
                );
                Ok(link)
            }
            Err(e) => {
                self.lifecycle.fail(&e).await;
                Err(e)
            }
        }
    }

    async fn drive(&mut self, pdf: Vec<u8>) -> Result<String, TaskError> {
        let config = Arc::clone(&self.config);
        let task_id = self.lifecycle.task_id.clone();
        let progress = config.progress_callback.clone();

        self.lifecycle.advance(TaskStatus::Translating).await?;

        let secs = config.rasterize_timeout_secs;
        let document = tokio::time::timeout(
            config.rasterize_timeout(),
            self.services.rasterizer.rasterize(&pdf),
        )
        .await
        .map_err(|_| TaskError::StageTimeout {
            stage: "rasterize",
            secs,
        })??;
        drop(pdf);

        let ocr = OcrStage::new(
            Arc::clone(&self.services.ocr),
            WorkerPool::new(config.ocr_concurrency),
        )
        .with_page_timeout(config.ocr_timeout())
        .with_progress(progress.clone())
        .process_pages(&task_id, &document.pages, &self.language)
        .await?;
        drop(document);

        let merged = ocr.merged_text();
        debug!(
            "[{}] Merged text: {} chars from {} pages",
            task_id,
            merged.len(),
            ocr.page_count
        );

        self.services
            .ledger
            .decrease_balance(&self.lifecycle.username, ocr.page_count as u64)
            .await?;
        info!("[{}] Debited {} pages", task_id, ocr.page_count);

        let translated = TranslationStage::new(
            Arc::clone(&self.services.translator),
            WorkerPool::new(config.translation_concurrency),
        )
        .with_max_words(config.max_words_per_chunk)
        .with_context_words(config.context_words)
        .with_chunk_timeout(config.translate_timeout())
        .with_progress(progress)
        .translate(&task_id, &merged)
        .await?;

        self.lifecycle.advance(TaskStatus::Uploading).await?;

        let secs = config.publish_timeout_secs;
        let link = tokio::time::timeout(
            config.publish_timeout(),
            self.services.publisher.publish(&translated),
        )
        .await
        .map_err(|_| TaskError::StageTimeout {
            stage: "publish",
            secs,
        })??;

        self.lifecycle
            .store
            .update_link(&self.lifecycle.username, &self.lifecycle.token, &link)
            .await?;
        self.lifecycle.advance(TaskStatus::Done).await?;
        Ok(link)
    }
}

/// Resolves once cancellation is requested. Never resolves if the handle
/// was dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}
