//! Configuration types for the translation pipeline.
//!
//! Task-level knobs (concurrency, chunking, deadlines, TTL) live in
//! [`PipelineConfig`], built via [`PipelineConfigBuilder`]. How to reach the
//! translation model lives in [`TranslatorConfig`].
//!
//! # Design choice: builder over constructor
//! Most callers change one or two values and rely on the defaults for the
//! rest; a builder keeps that readable and lets `build()` validate.

use crate::error::TaskError;
use crate::pool::host_parallelism;
use crate::progress::ProgressCallback;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for running tasks through the pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use transflate::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_words_per_chunk(1500)
///     .translation_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.context_words, 50);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Concurrent OCR workers, and the number of engine instances pooled for
    /// them. Default: CPU count + 1.
    ///
    /// OCR engines are CPU-heavy; more workers than cores only adds
    /// contention.
    pub ocr_concurrency: usize,

    /// Concurrent translation calls. Default: `max(CPU count * 2, 10)`.
    ///
    /// Translation is network-bound, hence the floor. Lower it if the backend
    /// starts answering `429`.
    pub translation_concurrency: usize,

    /// Maximum words per translation chunk. Default: 2000.
    pub max_words_per_chunk: usize,

    /// Words of the previous chunk's source passed as context. Default: 50.
    pub context_words: usize,

    /// Sliding lifetime of a task record, in seconds. Default: 43 200 (12 h).
    pub task_ttl_secs: u64,

    /// Deadline for one page's OCR call. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Deadline for one chunk's translation call. Default: 60.
    pub translate_timeout_secs: u64,

    /// Deadline for rasterising the whole document. Default: 300.
    pub rasterize_timeout_secs: u64,

    /// Deadline for publishing the artifact. Default: 60.
    pub publish_timeout_secs: u64,

    /// OCR language used when a submission does not name one. Default: "eng".
    pub default_language: String,

    /// Optional observer for status and per-unit events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cpus = host_parallelism();
        Self {
            ocr_concurrency: cpus + 1,
            translation_concurrency: (cpus * 2).max(10),
            max_words_per_chunk: 2000,
            context_words: 50,
            task_ttl_secs: 12 * 60 * 60,
            ocr_timeout_secs: 120,
            translate_timeout_secs: 60,
            rasterize_timeout_secs: 300,
            publish_timeout_secs: 60,
            default_language: "eng".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("translation_concurrency", &self.translation_concurrency)
            .field("max_words_per_chunk", &self.max_words_per_chunk)
            .field("context_words", &self.context_words)
            .field("task_ttl_secs", &self.task_ttl_secs)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("translate_timeout_secs", &self.translate_timeout_secs)
            .field("rasterize_timeout_secs", &self.rasterize_timeout_secs)
            .field("publish_timeout_secs", &self.publish_timeout_secs)
            .field("default_language", &self.default_language)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn TaskProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_secs(self.translate_timeout_secs)
    }

    pub fn rasterize_timeout(&self) -> Duration {
        Duration::from_secs(self.rasterize_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn translation_concurrency(mut self, n: usize) -> Self {
        self.config.translation_concurrency = n.max(1);
        self
    }

    pub fn max_words_per_chunk(mut self, n: usize) -> Self {
        self.config.max_words_per_chunk = n;
        self
    }

    pub fn context_words(mut self, n: usize) -> Self {
        self.config.context_words = n;
        self
    }

    pub fn task_ttl_secs(mut self, secs: u64) -> Self {
        self.config.task_ttl_secs = secs;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn translate_timeout_secs(mut self, secs: u64) -> Self {
        self.config.translate_timeout_secs = secs.max(1);
        self
    }

    pub fn rasterize_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rasterize_timeout_secs = secs.max(1);
        self
    }

    pub fn publish_timeout_secs(mut self, secs: u64) -> Self {
        self.config.publish_timeout_secs = secs.max(1);
        self
    }

    pub fn default_language(mut self, lang: impl Into<String>) -> Self {
        self.config.default_language = lang.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, TaskError> {
        let c = &self.config;
        if c.ocr_concurrency == 0 || c.translation_concurrency == 0 {
            return Err(TaskError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_words_per_chunk == 0 {
            return Err(TaskError::InvalidConfig(
                "max_words_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.task_ttl_secs == 0 {
            return Err(TaskError::InvalidConfig("task TTL must be > 0".into()));
        }
        if c.default_language.trim().is_empty() {
            return Err(TaskError::InvalidConfig(
                "default OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Translator ───────────────────────────────────────────────────────────

/// Model fallback when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// How to reach the translation model.
#[derive(Clone)]
pub struct TranslatorConfig {
    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Model identifier. If None, [`DEFAULT_MODEL`] or the provider default.
    pub model: Option<String>,

    /// Language the text is translated into. Default: "Chinese".
    pub target_language: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Translation should be faithful, not creative.
    pub temperature: f32,

    /// Completion token cap per chunk. Default: 3000.
    pub max_tokens: usize,

    /// Custom system prompt. If None, built from `target_language`.
    pub system_prompt: Option<String>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_name: None,
            model: None,
            target_language: "Chinese".to_string(),
            temperature: 0.1,
            max_tokens: 3000,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for TranslatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorConfig")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("target_language", &self.target_language)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl TranslatorConfig {
    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_target_language(mut self, lang: impl Into<String>) -> Self {
        self.target_language = lang.into();
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n.max(1);
        self
    }

    /// Resolve the LLM provider, from most-specific to least-specific:
    ///
    /// 1. **Pre-built provider** (`provider`), used as-is.
    /// 2. **Named provider + model** (`provider_name`), through
    ///    [`ProviderFactory::create_llm_provider`], which reads that
    ///    provider's API key from the environment.
    /// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
    ///    both non-empty.
    /// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
    /// 5. **Full auto-detection** (`ProviderFactory::from_env`).
    pub fn resolve_provider(&self) -> Result<Arc<dyn LLMProvider>, TaskError> {
        if let Some(ref provider) = self.provider {
            return Ok(Arc::clone(provider));
        }

        if let Some(ref name) = self.provider_name {
            let model = self.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider(name, model);
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return create_provider(&prov, &model);
            }
        }

        if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
            if !openai_key.is_empty() {
                let model = self.model.as_deref().unwrap_or(DEFAULT_MODEL);
                return create_provider("openai", model);
            }
        }

        let (llm_provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| TaskError::TranslatorNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                    Error: {}",
                    e
                ),
            })?;

        Ok(llm_provider)
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, TaskError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TaskError::TranslatorNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
