//! End-to-end task tests with in-process fakes.
//!
//! Every collaborator that would touch pdfium, tesseract, an LLM or remote
//! storage is replaced: the rasteriser writes each page's intended OCR text
//! into its "image" file, and the OCR engine reads it back. Pages containing
//! `FAIL` fail OCR; chunks containing `bad` fail translation.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use transflate::error::{LedgerError, OcrError, PublishError, TaskError, TranslateError};
use transflate::{
    BalanceLedger, MemoryLedger, MemoryTaskStore, OcrEngine, OcrEngineFactory, PageImage,
    PageRasterizer, PipelineConfig, RasterizedDocument, Services, TaskManager,
    TaskProgressCallback, TaskStateStore, TaskStatus, Translator,
};

const PDF: &[u8] = b"%PDF-1.4\n%fake body\n";

// ── Fakes ────────────────────────────────────────────────────────────────────

struct TextPages {
    pages: Vec<String>,
}

#[async_trait]
impl PageRasterizer for TextPages {
    async fn rasterize(&self, _pdf: &[u8]) -> Result<RasterizedDocument, TaskError> {
        let dir = tempfile::tempdir().map_err(|e| TaskError::Internal(e.to_string()))?;
        let mut pages = Vec::new();
        for (index, body) in self.pages.iter().enumerate() {
            let path = dir.path().join(format!("page-{:04}.png", index + 1));
            std::fs::write(&path, body).map_err(|e| TaskError::Internal(e.to_string()))?;
            pages.push(PageImage { index, path });
        }
        Ok(RasterizedDocument::in_dir(pages, dir))
    }
}

/// Never finishes rasterising.
struct Stuck;

#[async_trait]
impl PageRasterizer for Stuck {
    async fn rasterize(&self, _pdf: &[u8]) -> Result<RasterizedDocument, TaskError> {
        std::future::pending().await
    }
}

struct ReadBack {
    image: Option<PathBuf>,
}

#[async_trait]
impl OcrEngine for ReadBack {
    fn set_language(&mut self, _lang: &str) -> Result<(), OcrError> {
        Ok(())
    }

    fn set_image(&mut self, path: &Path) -> Result<(), OcrError> {
        self.image = Some(path.to_path_buf());
        Ok(())
    }

    async fn text(&mut self) -> Result<String, OcrError> {
        let path = self.image.take().ok_or(OcrError::NoImage)?;
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| OcrError::Engine(e.to_string()))?;
        if body.contains("FAIL") {
            return Err(OcrError::Engine("page unreadable".into()));
        }
        Ok(body)
    }
}

struct ReadBackFactory;

impl OcrEngineFactory for ReadBackFactory {
    fn create(&self) -> Result<Box<dyn OcrEngine>, OcrError> {
        Ok(Box::new(ReadBack { image: None }))
    }
}

/// Upper-cases its input and remembers every `(context, text)` pair.
#[derive(Default)]
struct Shouting {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Translator for Shouting {
    async fn translate(&self, context: &str, text: &str) -> Result<String, TranslateError> {
        self.calls.lock().push((context.to_string(), text.to_string()));
        if text.contains("bad") {
            return Err(TranslateError::Backend("model refused".into()));
        }
        Ok(text.to_uppercase())
    }
}

#[derive(Default)]
struct Capture {
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl transflate::ArtifactPublisher for Capture {
    async fn publish(&self, content: &str) -> Result<String, PublishError> {
        let mut published = self.published.lock();
        published.push(content.to_string());
        Ok(format!("https://dl.test/mds/{}.md", published.len()))
    }
}

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<TaskStatus>>,
    page_errors: Mutex<Vec<usize>>,
    chunk_errors: Mutex<Vec<usize>>,
    pages_done: AtomicUsize,
}

impl TaskProgressCallback for Recorder {
    fn on_status_change(&self, _task_id: &str, status: TaskStatus) {
        self.statuses.lock().push(status);
    }

    fn on_page_complete(&self, _task_id: &str, _page: usize, _total: usize, _chars: usize) {
        self.pages_done.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _task_id: &str, page: usize, _total: usize, _error: &str) {
        self.page_errors.lock().push(page);
    }

    fn on_chunk_error(&self, _task_id: &str, chunk: usize, _total: usize, _error: &str) {
        self.chunk_errors.lock().push(chunk);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    manager: TaskManager,
    store: Arc<MemoryTaskStore>,
    ledger: Arc<MemoryLedger>,
    translator: Arc<Shouting>,
    publisher: Arc<Capture>,
    recorder: Arc<Recorder>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(
    rasterizer: Arc<dyn PageRasterizer>,
    balance: u64,
    max_words: usize,
    context_words: usize,
) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryTaskStore::new());
    let ledger = Arc::new(MemoryLedger::new().with_user("alice", balance));
    let translator = Arc::new(Shouting::default());
    let publisher = Arc::new(Capture::default());
    let recorder = Arc::new(Recorder::default());

    let services = Services {
        store: store.clone(),
        ledger: ledger.clone(),
        rasterizer,
        ocr: Arc::new(ReadBackFactory),
        translator: translator.clone(),
        publisher: publisher.clone(),
    };
    let config = PipelineConfig::builder()
        .ocr_concurrency(2)
        .translation_concurrency(3)
        .max_words_per_chunk(max_words)
        .context_words(context_words)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    Harness {
        manager: TaskManager::new(services, config),
        store,
        ledger,
        translator,
        publisher,
        recorder,
    }
}

fn harness(pages: &[&str], balance: u64) -> Harness {
    let rasterizer = Arc::new(TextPages {
        pages: pages.iter().map(|p| p.to_string()).collect(),
    });
    harness_with(rasterizer, balance, 2000, 50)
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn document_is_translated_and_published() {
    let h = harness(&["hello world", "second page"], 10);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let task_id = handle.task_id();
    assert!(task_id.starts_with("alice-"));

    let link = handle.wait().await.unwrap();
    assert_eq!(link, "https://dl.test/mds/1.md");
    assert_eq!(
        h.publisher.published.lock().clone(),
        vec!["HELLO WORLD SECOND PAGE".to_string()]
    );

    let view = h.manager.get_status("alice", &task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Done);
    assert_eq!(view.status_code, 3);
    assert_eq!(view.filename, "scan.pdf");
    assert_eq!(view.download_link.as_deref(), Some(link.as_str()));

    assert_eq!(h.ledger.balance("alice").await.unwrap(), 8);
    assert_eq!(
        h.recorder.statuses.lock().clone(),
        vec![
            TaskStatus::Received,
            TaskStatus::Translating,
            TaskStatus::Uploading,
            TaskStatus::Done
        ]
    );
}

#[tokio::test]
async fn failed_page_does_not_fail_the_task() {
    let h = harness(&["page1 text", "FAIL", "page3 text"], 10);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    handle.wait().await.unwrap();

    assert_eq!(h.recorder.page_errors.lock().clone(), vec![2]);
    assert_eq!(h.recorder.pages_done.load(Ordering::SeqCst), 2);
    // The empty page's separators collapse into one space.
    assert_eq!(
        h.publisher.published.lock().clone(),
        vec!["PAGE1 TEXT PAGE3 TEXT".to_string()]
    );
    // Every page is billed, readable or not.
    assert_eq!(h.ledger.balance("alice").await.unwrap(), 7);
}

#[tokio::test]
async fn insufficient_balance_stops_before_translation() {
    let h = harness(&["one", "two", "three"], 2);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let task_id = handle.task_id();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(
        err,
        TaskError::Ledger(LedgerError::InsufficientBalance { required: 3, .. })
    ));
    assert!(h.translator.calls.lock().is_empty());
    assert!(h.publisher.published.lock().is_empty());
    assert_eq!(h.ledger.balance("alice").await.unwrap(), 2);

    let view = h.manager.get_status("alice", &task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Error);
    assert_eq!(view.status_code, 9);
    assert_eq!(view.download_link, None);
}

#[tokio::test]
async fn unknown_account_ends_in_error() {
    let h = harness(&["one"], 5);
    let handle = h.manager.submit("bob", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Ledger(LedgerError::UserNotFound { .. })));
}

// ── Translation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_chunk_leaves_blank_line() {
    let rasterizer = Arc::new(TextPages {
        pages: vec!["alpha beta".into(), "bad gamma".into(), "delta".into()],
    });
    let h = harness_with(rasterizer, 10, 2, 1);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    handle.wait().await.unwrap();

    assert_eq!(
        h.publisher.published.lock().clone(),
        vec!["ALPHA BETA\n\nDELTA".to_string()]
    );
    assert_eq!(h.recorder.chunk_errors.lock().clone(), vec![2]);

    let mut calls = h.translator.calls.lock().clone();
    calls.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        calls,
        vec![
            ("".to_string(), "alpha beta".to_string()),
            ("beta".to_string(), "bad gamma".to_string()),
            ("gamma".to_string(), "delta".to_string()),
        ]
    );
}

#[tokio::test]
async fn all_chunks_failing_fails_the_task() {
    let rasterizer = Arc::new(TextPages {
        pages: vec!["bad one bad two".into()],
    });
    let h = harness_with(rasterizer, 10, 2, 1);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let task_id = handle.task_id();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, TaskError::TranslationFailed { total: 2, .. }));
    assert!(h.publisher.published.lock().is_empty());
    let view = h.manager.get_status("alice", &task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Error);
}

#[tokio::test]
async fn blank_document_publishes_empty_artifact() {
    let h = harness(&["   ", ""], 10);
    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    handle.wait().await.unwrap();

    assert!(h.translator.calls.lock().is_empty());
    assert_eq!(h.publisher.published.lock().clone(), vec![String::new()]);
}

// ── Control ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_ends_task_in_error() {
    let h = harness_with(Arc::new(Stuck), 10, 2000, 50);

    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let task_id = handle.task_id();

    let mut updates = handle.status_updates();
    while let Some(status) = updates.next().await {
        if status == TaskStatus::Translating {
            break;
        }
    }
    handle.cancel();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
    let view = h.manager.get_status("alice", &task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Error);
}

#[tokio::test]
async fn status_stream_ends_at_terminal_state() {
    let h = harness(&["some words"], 10);
    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();

    let mut seen = Vec::new();
    let mut updates = handle.status_updates();
    while let Some(status) = updates.next().await {
        seen.push(status);
        if status.is_terminal() {
            break;
        }
    }

    assert_eq!(seen.last(), Some(&TaskStatus::Done));
    assert!(seen.windows(2).all(|w| w[0].code() < w[1].code()));
    assert_eq!(handle.current_status(), TaskStatus::Done);
}

// ── Queries ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_queries_are_scoped_to_the_owner() {
    let h = harness(&["text"], 10);
    let handle = h.manager.submit("alice", PDF.to_vec(), "scan.pdf", "eng").await.unwrap();
    let task_id = handle.task_id();
    handle.wait().await.unwrap();

    assert!(matches!(
        h.manager.get_status("bob", &task_id).await,
        Err(TaskError::NotAuthorized { .. })
    ));
    assert!(matches!(
        h.manager.get_status("alice", "garbage").await,
        Err(TaskError::InvalidTaskId { .. })
    ));
    assert!(matches!(
        h.manager.get_status("alice", "alice-0000").await,
        Err(TaskError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn hyphenated_username_ids_do_not_parse() {
    let h = harness(&["text"], 10);
    h.ledger.credit("jean-luc", 10);

    let handle = h
        .manager
        .submit("jean-luc", PDF.to_vec(), "scan.pdf", "eng")
        .await
        .unwrap();
    let task_id = handle.task_id();
    handle.wait().await.unwrap();

    assert!(matches!(
        h.manager.get_status("jean-luc", &task_id).await,
        Err(TaskError::InvalidTaskId { .. })
    ));
}

#[tokio::test]
async fn invalid_upload_is_rejected_without_a_record() {
    let h = harness(&["text"], 10);

    let err = h
        .manager
        .submit("alice", PDF.to_vec(), "notes.txt", "eng")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidUpload { .. }));

    let err = h
        .manager
        .submit("alice", b"plain text".to_vec(), "scan.pdf", "eng")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidUpload { .. }));

    let err = h
        .manager
        .submit("", PDF.to_vec(), "scan.pdf", "eng")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidUpload { .. }));

    assert!(h.store.is_empty());
    assert!(h.manager.list_tasks("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn list_tasks_returns_every_owned_task_in_order() {
    let h = harness(&["text"], 10);

    let first = h.manager.submit("alice", PDF.to_vec(), "a.pdf", "eng").await.unwrap();
    let second = h.manager.submit("alice", PDF.to_vec(), "b.PDF", "").await.unwrap();
    let mut ids = vec![first.task_id(), second.task_id()];
    first.wait().await.unwrap();
    second.wait().await.unwrap();

    let views = h.manager.list_tasks("alice").await.unwrap();
    ids.sort();
    assert_eq!(views.iter().map(|v| v.task_id.clone()).collect::<Vec<_>>(), ids);
    assert!(views.iter().all(|v| v.status == TaskStatus::Done));
    assert!(h.manager.list_tasks("bob").await.unwrap().is_empty());

    let records = h.store.list_all("alice").await.unwrap();
    assert_eq!(records.len(), 2);
}
