//! OCR stage: page images → text, one pooled engine per in-flight page.
//!
//! ## Flow
//!
//! ```text
//! pages ──► WorkerPool (ceiling C) ──► acquire engine ──► set_image ──► text()
//!                                        ▲                                 │
//!                                        └──── guard drop returns it ◄─────┘
//! ```
//!
//! [`OcrStage::process_pages`] builds a [`ResourcePool`] of `C` engines, each
//! already set to the task's language, runs one unit per page, then closes
//! the pool. Engine construction failure is fatal (`OcrUnavailable`). A page
//! that fails or times out is logged and yields empty text; the batch always
//! completes.
//!
//! Two engines ship with the crate: [`TesseractEngine`] (local `tesseract`
//! binary) and [`VisionOcrEngine`] (vision LLM via `edgequake-llm`).

use crate::error::{OcrError, PageError, TaskError};
use crate::pipeline::encode::{encode_page_file, require_page_file};
use crate::pipeline::render::PageImage;
use crate::pipeline::text;
use crate::pool::{ResourcePool, UnitError, WorkerPool};
use crate::progress::ProgressCallback;
use crate::prompts::ocr_system_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

// ── Engine seam ──────────────────────────────────────────────────────────

/// A stateful OCR client. One instance serves one page at a time.
#[async_trait]
pub trait OcrEngine: Send {
    fn set_language(&mut self, lang: &str) -> Result<(), OcrError>;

    /// Point the engine at a page image. A missing file surfaces from `text`.
    fn set_image(&mut self, path: &Path) -> Result<(), OcrError>;

    /// Recognise the current image.
    async fn text(&mut self) -> Result<String, OcrError>;

    /// Release backend resources. Called once, when the pool closes or is
    /// abandoned.
    fn close(self: Box<Self>) {}
}

/// Builds engines for the stage's pool.
pub trait OcrEngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn OcrEngine>, OcrError>;
}

// ── Results ──────────────────────────────────────────────────────────────

/// OCR outcome for one page. `text` is empty when `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-indexed page number.
    pub index: usize,
    pub text: String,
    pub error: Option<PageError>,
}

#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    /// One entry per input page, in page order.
    pub pages: Vec<PageResult>,
    pub page_count: usize,
}

impl OcrOutput {
    pub fn texts(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.text.as_str()).collect()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_some()).count()
    }

    /// Page texts merged in order and cleaned.
    pub fn merged_text(&self) -> String {
        text::merge_pages(&self.texts())
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

pub struct OcrStage {
    factory: Arc<dyn OcrEngineFactory>,
    workers: WorkerPool,
    page_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl OcrStage {
    pub fn new(factory: Arc<dyn OcrEngineFactory>, workers: WorkerPool) -> Self {
        Self {
            factory,
            workers,
            page_timeout: Duration::from_secs(120),
            progress: None,
        }
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// OCR every page with engines configured for `language`.
    ///
    /// Returns `Err` only when the engine pool cannot be built.
    pub async fn process_pages(
        &self,
        task_id: &str,
        pages: &[PageImage],
        language: &str,
    ) -> Result<OcrOutput, TaskError> {
        let total = pages.len();
        if total == 0 {
            return Ok(OcrOutput::default());
        }
        let start = Instant::now();

        let factory = Arc::clone(&self.factory);
        let pool = ResourcePool::new(self.workers.limit(), |_| {
            let mut engine = factory.create()?;
            engine.set_language(language)?;
            Ok::<_, OcrError>(engine)
        })
        .map_err(|e| {
            error!("[{}] Cannot build OCR engines: {}", task_id, e);
            TaskError::OcrUnavailable(e.to_string())
        })?
        // Engines are closed even if this future is dropped mid-stage.
        .with_disposer(|engine: Box<dyn OcrEngine>| engine.close());

        info!(
            "[{}] OCR of {} pages ({} engines, lang={})",
            task_id,
            total,
            pool.size(),
            language
        );
        if let Some(ref cb) = self.progress {
            cb.on_ocr_start(task_id, total);
        }

        let unit_pool = pool.clone();
        let timeout = self.page_timeout;
        let progress = self.progress.clone();
        let tid = task_id.to_string();

        let outcome = self
            .workers
            .run(pages.to_vec(), move |index, page: PageImage| {
                let pool = unit_pool.clone();
                let progress = progress.clone();
                let tid = tid.clone();
                async move {
                    let result = recognise(&pool, &page.path, timeout).await;
                    let page_num = index + 1;
                    match &result {
                        Ok(text) => {
                            debug!("[{}] Page {} → {} chars", tid, page_num, text.len());
                            if let Some(cb) = progress {
                                cb.on_page_complete(&tid, page_num, total, text.len());
                            }
                        }
                        Err(e) => {
                            warn!("[{}] Page {} OCR failed: {}", tid, page_num, e);
                            if let Some(cb) = progress {
                                cb.on_page_error(&tid, page_num, total, &e.to_string());
                            }
                        }
                    }
                    result
                }
            })
            .await;

        if let Err(e) = pool.close().await {
            warn!("[{}] OCR engine pool did not close cleanly: {}", task_id, e);
        }

        let results: Vec<PageResult> = outcome
            .results
            .into_iter()
            .zip(outcome.errors)
            .enumerate()
            .map(|(index, (text, err))| {
                let error = err.map(|e| {
                    // Failed units reported themselves; panics and aborts did not.
                    if !matches!(e, UnitError::Failed(_)) {
                        warn!("[{}] Page {} lost: {}", task_id, index + 1, e);
                        if let Some(ref cb) = self.progress {
                            cb.on_page_error(task_id, index + 1, total, &e.to_string());
                        }
                    }
                    page_error(index + 1, e)
                });
                PageResult { index, text, error }
            })
            .collect();

        let out = OcrOutput {
            page_count: total,
            pages: results,
        };
        info!(
            "[{}] OCR finished: {}/{} pages ok in {:?}",
            task_id,
            total - out.failed_pages(),
            total,
            start.elapsed()
        );
        Ok(out)
    }
}

/// One unit of OCR work. The engine goes back to the pool when the guard
/// drops, on every path out of this function.
async fn recognise(
    pool: &ResourcePool<Box<dyn OcrEngine>>,
    image: &Path,
    timeout: Duration,
) -> Result<String, OcrError> {
    let mut engine = pool.acquire().await?;
    engine.set_image(image)?;
    match tokio::time::timeout(timeout, engine.text()).await {
        Ok(result) => result,
        Err(_) => Err(OcrError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

fn page_error(page: usize, err: UnitError<OcrError>) -> PageError {
    match err {
        UnitError::Failed(OcrError::Timeout { secs }) => PageError::Timeout { page, secs },
        UnitError::Failed(e) => PageError::OcrFailed {
            page,
            detail: e.to_string(),
        },
        other => PageError::OcrFailed {
            page,
            detail: other.to_string(),
        },
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Runs the `tesseract` CLI once per page: `tesseract <img> stdout -l <lang>`.
#[derive(Debug)]
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
    image: Option<PathBuf>,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: "eng".to_string(),
            image: None,
        }
    }
}

/// Tesseract language specs look like `eng`, `chi_sim` or `eng+deu`.
fn valid_language(lang: &str) -> bool {
    !lang.is_empty()
        && lang
            .split('+')
            .all(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn set_language(&mut self, lang: &str) -> Result<(), OcrError> {
        if !valid_language(lang) {
            return Err(OcrError::Language {
                lang: lang.to_string(),
                detail: "expected codes like 'eng' or 'eng+deu'".to_string(),
            });
        }
        self.language = lang.to_string();
        Ok(())
    }

    fn set_image(&mut self, path: &Path) -> Result<(), OcrError> {
        self.image = Some(path.to_path_buf());
        Ok(())
    }

    async fn text(&mut self) -> Result<String, OcrError> {
        let image = self.image.as_ref().ok_or(OcrError::NoImage)?;
        require_page_file(image).await?;
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Unavailable(format!("{}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            return Err(OcrError::Engine(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Builds [`TesseractEngine`]s after checking the binary can be found.
#[derive(Debug, Clone)]
pub struct TesseractFactory {
    pub binary: PathBuf,
}

impl Default for TesseractFactory {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
        }
    }
}

impl TesseractFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl OcrEngineFactory for TesseractFactory {
    fn create(&self) -> Result<Box<dyn OcrEngine>, OcrError> {
        if !binary_available(&self.binary) {
            return Err(OcrError::Unavailable(format!(
                "'{}' not found; install tesseract-ocr or pass its path",
                self.binary.display()
            )));
        }
        Ok(Box::new(TesseractEngine::new(self.binary.clone())))
    }
}

/// Whether `binary` is an existing path, or a bare name found on `PATH`.
fn binary_available(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

// ── Vision LLM ───────────────────────────────────────────────────────────

/// Transcribes a page by sending its image to a vision-capable LLM.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    language: String,
    image: Option<PathBuf>,
    temperature: f32,
    max_tokens: usize,
}

#[async_trait]
impl OcrEngine for VisionOcrEngine {
    fn set_language(&mut self, lang: &str) -> Result<(), OcrError> {
        if lang.trim().is_empty() {
            return Err(OcrError::Language {
                lang: lang.to_string(),
                detail: "empty language".to_string(),
            });
        }
        self.language = lang.to_string();
        Ok(())
    }

    fn set_image(&mut self, path: &Path) -> Result<(), OcrError> {
        self.image = Some(path.to_path_buf());
        Ok(())
    }

    async fn text(&mut self) -> Result<String, OcrError> {
        let image = self.image.as_ref().ok_or(OcrError::NoImage)?;
        let image_data = encode_page_file(image).await?;

        let messages = vec![
            ChatMessage::system(ocr_system_prompt(&self.language)),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| OcrError::Engine(e.to_string()))?;
        debug!(
            "Vision OCR: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Builds [`VisionOcrEngine`]s sharing one provider.
#[derive(Clone)]
pub struct VisionOcrFactory {
    provider: Arc<dyn LLMProvider>,
    /// Default: 0.1.
    pub temperature: f32,
    /// Default: 4096.
    pub max_tokens: usize,
}

impl VisionOcrFactory {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

impl OcrEngineFactory for VisionOcrFactory {
    fn create(&self) -> Result<Box<dyn OcrEngine>, OcrError> {
        Ok(Box::new(VisionOcrEngine {
            provider: Arc::clone(&self.provider),
            language: "eng".to_string(),
            image: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }))
    }
}
