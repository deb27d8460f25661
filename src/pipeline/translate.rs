//! Translation stage: chunk the merged text and translate chunks in parallel.
//!
//! ## Context without ordering
//!
//! Each chunk is sent with the last `context_words` words of the previous
//! chunk's **source** text. Because the context never depends on another
//! chunk's translation, all chunks run concurrently under the worker
//! ceiling and are re-assembled by index.
//!
//! ## Partial failure
//!
//! A chunk that fails or times out contributes an empty string, which shows
//! up as a blank line in the joined output. Only when every chunk fails does
//! the stage return [`TaskError::TranslationFailed`].

use crate::config::TranslatorConfig;
use crate::error::{ChunkError, TaskError, TranslateError};
use crate::pipeline::text::{chunk_contexts, split_chunks, Chunk};
use crate::pool::{UnitError, WorkerPool};
use crate::progress::ProgressCallback;
use crate::prompts::{context_message, text_message, translation_system_prompt};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Translates one chunk given the tail of the previous chunk's source.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, context: &str, text: &str) -> Result<String, TranslateError>;
}

// ── LLM translator ───────────────────────────────────────────────────────

/// [`Translator`] backed by any `edgequake-llm` chat provider.
pub struct LlmTranslator {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmTranslator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &TranslatorConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| translation_system_prompt(&config.target_language)),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from `config` (see
    /// [`TranslatorConfig::resolve_provider`]) and wrap it.
    pub fn from_config(config: &TranslatorConfig) -> Result<Self, TaskError> {
        let provider = config.resolve_provider()?;
        Ok(Self::new(provider, config))
    }
}

/// System prompt, then the context (only when there is one), then the text.
fn build_messages(system_prompt: &str, context: &str, text: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if !context.is_empty() {
        messages.push(ChatMessage::user(context_message(context)));
    }
    messages.push(ChatMessage::user(text_message(text)));
    messages
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, context: &str, text: &str) -> Result<String, TranslateError> {
        let messages = build_messages(&self.system_prompt, context, text);
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| TranslateError::Backend(e.to_string()))?;
        debug!(
            "Translation: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(TranslateError::EmptyResponse);
        }
        Ok(response.content)
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

/// Translation outcome for one chunk. `text` is empty when `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub index: usize,
    pub text: String,
    pub error: Option<ChunkError>,
}

pub struct TranslationStage {
    translator: Arc<dyn Translator>,
    workers: WorkerPool,
    max_words: usize,
    context_words: usize,
    chunk_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl TranslationStage {
    pub fn new(translator: Arc<dyn Translator>, workers: WorkerPool) -> Self {
        Self {
            translator,
            workers,
            max_words: 2000,
            context_words: 50,
            chunk_timeout: Duration::from_secs(60),
            progress: None,
        }
    }

    pub fn with_max_words(mut self, n: usize) -> Self {
        self.max_words = n.max(1);
        self
    }

    pub fn with_context_words(mut self, n: usize) -> Self {
        self.context_words = n;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Split `text`, translate every chunk, and join the results with `"\n"`
    /// in chunk order.
    ///
    /// Empty text yields an empty translation without calling the backend.
    pub async fn translate(&self, task_id: &str, text: &str) -> Result<String, TaskError> {
        let chunks = split_chunks(text, self.max_words);
        if chunks.is_empty() {
            info!("[{}] Nothing to translate", task_id);
            return Ok(String::new());
        }

        let total = chunks.len();
        let results = self.translate_chunks(task_id, chunks).await;

        let failed: Vec<&ChunkError> = results.iter().filter_map(|r| r.error.as_ref()).collect();
        if failed.len() == total {
            let first_error = failed
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default();
            error!("[{}] All {} chunks failed to translate", task_id, total);
            return Err(TaskError::TranslationFailed { total, first_error });
        }

        Ok(results
            .into_iter()
            .map(|r| r.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Translate pre-split chunks. Always returns one result per chunk, in
    /// chunk order.
    pub async fn translate_chunks(&self, task_id: &str, chunks: Vec<Chunk>) -> Vec<ChunkResult> {
        let total = chunks.len();
        let start = Instant::now();
        let contexts = chunk_contexts(&chunks, self.context_words);
        let units: Vec<(String, String)> = contexts
            .into_iter()
            .zip(chunks.into_iter().map(|c| c.text))
            .collect();

        info!(
            "[{}] Translating {} chunks (concurrency {})",
            task_id,
            total,
            self.workers.limit()
        );
        if let Some(ref cb) = self.progress {
            cb.on_translation_start(task_id, total);
        }

        let translator = Arc::clone(&self.translator);
        let timeout = self.chunk_timeout;
        let progress = self.progress.clone();
        let tid = task_id.to_string();

        let outcome = self
            .workers
            .run(units, move |index, (context, text): (String, String)| {
                let translator = Arc::clone(&translator);
                let progress = progress.clone();
                let tid = tid.clone();
                async move {
                    let result = match tokio::time::timeout(
                        timeout,
                        translator.translate(&context, &text),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(TranslateError::Timeout {
                            secs: timeout.as_secs(),
                        }),
                    };
                    let chunk_num = index + 1;
                    match &result {
                        Ok(out) => {
                            debug!("[{}] Chunk {} → {} chars", tid, chunk_num, out.len());
                            if let Some(cb) = progress {
                                cb.on_chunk_complete(&tid, chunk_num, total, out.len());
                            }
                        }
                        Err(e) => {
                            warn!("[{}] Chunk {} translation failed: {}", tid, chunk_num, e);
                            if let Some(cb) = progress {
                                cb.on_chunk_error(&tid, chunk_num, total, &e.to_string());
                            }
                        }
                    }
                    result
                }
            })
            .await;

        let results: Vec<ChunkResult> = outcome
            .results
            .into_iter()
            .zip(outcome.errors)
            .enumerate()
            .map(|(index, (text, err))| {
                let error = err.map(|e| {
                    if !matches!(e, UnitError::Failed(_)) {
                        warn!("[{}] Chunk {} lost: {}", task_id, index + 1, e);
                        if let Some(ref cb) = self.progress {
                            cb.on_chunk_error(task_id, index + 1, total, &e.to_string());
                        }
                    }
                    chunk_error(index + 1, e)
                });
                ChunkResult { index, text, error }
            })
            .collect();

        let ok = results.iter().filter(|r| r.error.is_none()).count();
        info!(
            "[{}] Translation finished: {}/{} chunks ok in {:?}",
            task_id,
            ok,
            total,
            start.elapsed()
        );
        results
    }
}

fn chunk_error(chunk: usize, err: UnitError<TranslateError>) -> ChunkError {
    match err {
        UnitError::Failed(TranslateError::Timeout { secs }) => ChunkError::Timeout { chunk, secs },
        UnitError::Failed(e) => ChunkError::TranslateFailed {
            chunk,
            detail: e.to_string(),
        },
        other => ChunkError::TranslateFailed {
            chunk,
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Upper-cases the text. Fails on chunks containing `bad`, hangs on
    /// chunks containing `hang`.
    #[derive(Default)]
    struct Upper {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Translator for Upper {
        async fn translate(&self, context: &str, text: &str) -> Result<String, TranslateError> {
            self.calls.lock().push((context.to_string(), text.to_string()));
            if text.contains("bad") {
                return Err(TranslateError::Backend("503".into()));
            }
            if text.contains("hang") {
                std::future::pending::<()>().await;
            }
            Ok(text.to_uppercase())
        }
    }

    fn stage(t: &Arc<Upper>, max_words: usize) -> TranslationStage {
        TranslationStage::new(t.clone(), WorkerPool::new(3)).with_max_words(max_words)
    }

    #[tokio::test]
    async fn chunks_get_previous_source_as_context() {
        let t = Arc::new(Upper::default());
        let out = stage(&t, 2).translate("u-t", "w1 w2 w3 w4 w5").await.unwrap();
        assert_eq!(out, "W1 W2\nW3 W4\nW5");

        let mut calls = t.calls.lock().clone();
        calls.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            calls,
            vec![
                (String::new(), "w1 w2".to_string()),
                ("w1 w2".to_string(), "w3 w4".to_string()),
                ("w3 w4".to_string(), "w5".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_chunk_becomes_blank_line() {
        let t = Arc::new(Upper::default());
        let out = stage(&t, 2).translate("u-t", "ok one bad two fine").await.unwrap();
        assert_eq!(out, "OK ONE\n\nFINE");
    }

    #[tokio::test]
    async fn every_chunk_failing_is_fatal() {
        let t = Arc::new(Upper::default());
        let err = stage(&t, 1).translate("u-t", "bad bad").await.unwrap_err();
        assert!(matches!(err, TaskError::TranslationFailed { total: 2, .. }));
    }

    #[tokio::test]
    async fn empty_text_skips_backend() {
        let t = Arc::new(Upper::default());
        assert_eq!(stage(&t, 5).translate("u-t", "  \n ").await.unwrap(), "");
        assert!(t.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_chunk_times_out() {
        let t = Arc::new(Upper::default());
        let results = stage(&t, 1)
            .with_chunk_timeout(Duration::from_secs(2))
            .translate_chunks("u-t", split_chunks("hang fine", 1))
            .await;
        assert!(matches!(results[0].error, Some(ChunkError::Timeout { chunk: 1, secs: 2 })));
        assert_eq!(results[1].text, "FINE");
    }

    #[test]
    fn context_message_only_when_present() {
        assert_eq!(build_messages("sys", "", "text").len(), 2);
        assert_eq!(build_messages("sys", "ctx", "text").len(), 3);
    }
}
