//! CLI binary for transflate.
//!
//! Runs one document through the full task pipeline in-process: an
//! in-memory task store and ledger, a local-directory publisher, and the
//! selected rasteriser, OCR engine and translation provider.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transflate::pipeline::input::load_document;
use transflate::pipeline::ocr::{TesseractFactory, VisionOcrFactory};
use transflate::pipeline::publish::LocalDirPublisher;
use transflate::pipeline::render::{PdfiumRasterizer, PdftoppmRasterizer};
use transflate::pipeline::translate::LlmTranslator;
use transflate::{
    BalanceLedger, MemoryLedger, MemoryTaskStore, OcrEngineFactory, PageRasterizer,
    PipelineConfig, ProgressCallback, Services, TaskManager, TaskProgressCallback, TaskStatus,
    TranslatorConfig,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar, reused for the OCR phase and then the translation phase.
struct CliProgress {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Received");
        bar.set_message("waiting for worker…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn phase(&self, prefix: &'static str, unit: &str, total: usize) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
        );
        self.bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
        );
        self.bar.set_prefix(prefix);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.reset_eta();
    }

    fn report_failure(&self, what: &str, n: usize, total: usize, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {} {:>3}/{:<3}  {}",
            red("✗"),
            what,
            n,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }
}

impl TaskProgressCallback for CliProgress {
    fn on_status_change(&self, task_id: &str, status: TaskStatus) {
        match status {
            TaskStatus::Done | TaskStatus::Error => self.bar.finish_and_clear(),
            TaskStatus::Uploading => {
                self.bar.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_strings(TICKS),
                );
                self.bar.set_prefix("Uploading");
                self.bar.set_message("publishing artifact…");
            }
            _ => {
                self.bar
                    .println(format!("{} {} {}", cyan("◆"), dim(task_id), bold(&status.to_string())));
            }
        }
    }

    fn on_ocr_start(&self, _task_id: &str, total_pages: usize) {
        self.phase("OCR", "pages", total_pages);
    }

    fn on_page_complete(&self, _task_id: &str, _page: usize, _total: usize, _chars: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, _task_id: &str, page: usize, total: usize, error: &str) {
        self.report_failure("Page", page, total, error);
    }

    fn on_translation_start(&self, _task_id: &str, total_chunks: usize) {
        self.phase("Translating", "chunks", total_chunks);
    }

    fn on_chunk_complete(&self, _task_id: &str, _chunk: usize, _total: usize, _chars: usize) {
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, _task_id: &str, chunk: usize, total: usize, error: &str) {
        self.report_failure("Chunk", chunk, total, error);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Translate a scanned PDF into Chinese (default), OCR with tesseract
  transflate scan.pdf

  # Vision-LLM OCR, pdftoppm rasteriser, French output
  transflate --ocr-engine vision --rasterizer pdftoppm --target-language French scan.pdf

  # German source text, smaller chunks
  transflate --lang deu --max-words 800 bericht.pdf

  # From a URL, JSON task view on stdout
  transflate --json https://example.com/paper.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium (pdfium rasteriser)
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrEngineArg {
    /// Local `tesseract` binary.
    Tesseract,
    /// Vision LLM through the configured provider.
    Vision,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterizerArg {
    /// In-process pdfium library.
    Pdfium,
    /// poppler's `pdftoppm` binary.
    Pdftoppm,
}

/// OCR and translate scanned PDF documents with LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "transflate",
    version,
    about = "OCR and translate scanned PDF documents with LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// OCR language code(s), e.g. eng, deu, eng+fra.
    #[arg(short, long, env = "TRANSFLATE_LANG", default_value = "eng")]
    lang: String,

    /// Language to translate into.
    #[arg(short, long, env = "TRANSFLATE_TARGET_LANGUAGE", default_value = "Chinese")]
    target_language: String,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// OCR engine.
    #[arg(long, env = "TRANSFLATE_OCR_ENGINE", value_enum, default_value = "tesseract")]
    ocr_engine: OcrEngineArg,

    /// Path or name of the tesseract binary.
    #[arg(long, env = "TRANSFLATE_TESSERACT", default_value = "tesseract")]
    tesseract_bin: PathBuf,

    /// Page rasteriser.
    #[arg(long, env = "TRANSFLATE_RASTERIZER", value_enum, default_value = "pdfium")]
    rasterizer: RasterizerArg,

    /// Directory the artifact is written to (under `mds/`).
    #[arg(short, long, env = "TRANSFLATE_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Base URL for download links. Defaults to file:// links.
    #[arg(long, env = "TRANSFLATE_BASE_URL")]
    base_url: Option<String>,

    /// Account the task runs under.
    #[arg(long, env = "TRANSFLATE_USERNAME", default_value = "local")]
    username: String,

    /// Starting page balance of the in-memory ledger.
    #[arg(long, env = "TRANSFLATE_BALANCE", default_value_t = 10_000)]
    balance: u64,

    /// Maximum words per translation chunk.
    #[arg(long, env = "TRANSFLATE_MAX_WORDS", default_value_t = 2000)]
    max_words: usize,

    /// Words of the previous chunk passed as context.
    #[arg(long, env = "TRANSFLATE_CONTEXT_WORDS", default_value_t = 50)]
    context_words: usize,

    /// Concurrent OCR workers (default: CPUs + 1).
    #[arg(long, env = "TRANSFLATE_OCR_CONCURRENCY")]
    ocr_concurrency: Option<usize>,

    /// Concurrent translation calls (default: max(CPUs × 2, 10)).
    #[arg(long, env = "TRANSFLATE_TRANSLATION_CONCURRENCY")]
    translation_concurrency: Option<usize>,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "TRANSFLATE_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "TRANSFLATE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "TRANSFLATE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the final task view as JSON.
    #[arg(long, env = "TRANSFLATE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "TRANSFLATE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TRANSFLATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TRANSFLATE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Input ────────────────────────────────────────────────────────────
    let document = load_document(&cli.input, Duration::from_secs(cli.download_timeout))
        .await
        .with_context(|| format!("Failed to load '{}'", cli.input))?;

    // ── Collaborators ────────────────────────────────────────────────────
    let translator_config = build_translator_config(&cli);
    let provider = translator_config
        .resolve_provider()
        .context("No translation provider available")?;

    let ocr: Arc<dyn OcrEngineFactory> = match cli.ocr_engine {
        OcrEngineArg::Tesseract => Arc::new(TesseractFactory::new(cli.tesseract_bin.clone())),
        OcrEngineArg::Vision => Arc::new(VisionOcrFactory::new(Arc::clone(&provider))),
    };
    let rasterizer: Arc<dyn PageRasterizer> = match cli.rasterizer {
        RasterizerArg::Pdfium => Arc::new(PdfiumRasterizer::new()),
        RasterizerArg::Pdftoppm => Arc::new(PdftoppmRasterizer::new()),
    };
    let publisher = match cli.base_url {
        Some(ref base) => LocalDirPublisher::new(&cli.output_dir, base.clone()),
        None => {
            let root = std::fs::canonicalize(&cli.output_dir).with_context(|| {
                format!("Output directory {:?} does not exist", cli.output_dir)
            })?;
            LocalDirPublisher::file_urls(root)
        }
    };
    let ledger = Arc::new(MemoryLedger::new().with_user(cli.username.clone(), cli.balance));
    let store = MemoryTaskStore::new();
    let _sweeper = store.spawn_sweeper(Duration::from_secs(600));

    let services = Services {
        store: Arc::new(store),
        ledger: ledger.clone(),
        rasterizer,
        ocr,
        translator: Arc::new(LlmTranslator::new(provider, &translator_config)),
        publisher: Arc::new(publisher),
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn TaskProgressCallback>)
    } else {
        None
    };
    let config = build_pipeline_config(&cli, progress)?;
    let manager = TaskManager::new(services, config);

    // ── Run ──────────────────────────────────────────────────────────────
    let handle = manager
        .submit(&cli.username, document.bytes, &document.filename, &cli.lang)
        .await
        .context("Task rejected")?;
    let task_id = handle.task_id();
    let outcome = handle.wait().await;

    let view = manager
        .get_status(&cli.username, &task_id)
        .await
        .context("Failed to read task status")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("Failed to serialise task view")?
        );
    }

    let link = outcome.with_context(|| format!("Task {task_id} failed"))?;
    if !cli.json {
        println!("{link}");
    }
    if !cli.quiet && !cli.json {
        let remaining = ledger.balance(&cli.username).await.unwrap_or_default();
        eprintln!(
            "{} {}  {}  {}",
            green("✔"),
            bold(&view.filename),
            dim(&task_id),
            dim(&format!("{remaining} pages of balance left")),
        );
    }

    Ok(())
}

fn build_translator_config(cli: &Cli) -> TranslatorConfig {
    let mut config = TranslatorConfig::default()
        .with_target_language(cli.target_language.clone())
        .with_temperature(cli.temperature)
        .with_max_tokens(cli.max_tokens);
    if let Some(ref name) = cli.provider {
        config = config.with_provider_name(name.clone());
    }
    if let Some(ref model) = cli.model {
        config = config.with_model(model.clone());
    }
    config
}

/// Map CLI args to `PipelineConfig`.
fn build_pipeline_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_words_per_chunk(cli.max_words)
        .context_words(cli.context_words)
        .default_language(cli.lang.clone());
    if let Some(n) = cli.ocr_concurrency {
        builder = builder.ocr_concurrency(n);
    }
    if let Some(n) = cli.translation_concurrency {
        builder = builder.translation_concurrency(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}
