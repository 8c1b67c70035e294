//! CLI binary for cramfast.
//!
//! A thin shim over the library crate: creates an in-memory session, appends
//! the given photos, runs generation and prints the deck.

use anyhow::{Context, Result};
use clap::Parser;
use cramfast::{
    write_markdown, FlashcardGenerator, GenerationConfig, GenerationProgressCallback,
    InMemorySessionStore, ProgressCallback, SessionStore, SynthesisStrategy,
    MAX_IMAGES_PER_SESSION,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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

/// Renders a live progress bar over the transcription pages, then a spinner
/// while the synthesis ladder runs. Pages may complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    dropped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening session…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            dropped: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Transcribing");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} page(s) of notes…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_dropped(&self, page_num: usize, total: usize, reason: &str) {
        let secs = self.elapsed_secs(page_num);
        self.dropped.fetch_add(1, Ordering::SeqCst);

        let msg: String = if reason.chars().count() > 80 {
            let head: String = reason.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            reason.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_strategy_start(&self, strategy: SynthesisStrategy) {
        self.bar.set_prefix("Writing cards");
        self.bar.set_message(format!("strategy: {strategy}"));
    }

    fn on_strategy_rejected(&self, strategy: SynthesisStrategy, reason: &str) {
        self.bar
            .println(format!("  {} {}  {}", cyan("↷"), strategy, dim(reason)));
    }

    fn on_generation_complete(&self, card_count: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped.load(Ordering::SeqCst);
        if dropped == 0 {
            eprintln!("{} {} flashcards", green("✔"), bold(&card_count.to_string()));
        } else {
            eprintln!(
                "{} {} flashcards  ({} page(s) unreadable)",
                cyan("⚠"),
                bold(&card_count.to_string()),
                red(&dropped.to_string()),
            );
        }
    }

    // The error itself is reported by `main`.
    fn on_generation_failed(&self, _code: &str, _message: &str) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Cards from two photos, Markdown on stdout
  cramfast page1.jpg page2.jpg

  # Write to a file
  cramfast notes/*.jpg -o biology.md

  # Remote images
  cramfast https://cdn.example.com/u/1/p1.jpg https://cdn.example.com/u/1/p2.jpg

  # JSON deck ({topic, flashcards}) for another tool
  cramfast --json page1.jpg > deck.json

  # Another provider and model
  cramfast --provider anthropic --model claude-sonnet-4-20250514 page1.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Turn photos of handwritten notes into study flashcards using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "cramfast",
    version,
    about = "Turn photos of handwritten notes into study flashcards using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files, http(s) URLs or data:image/ URLs, in page order.
    #[arg(required = true, num_args = 1..=MAX_IMAGES_PER_SESSION)]
    images: Vec<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "CRAMFAST_OUTPUT")]
    output: Option<PathBuf>,

    /// Session title (default: derived from the topic).
    #[arg(long, env = "CRAMFAST_TITLE")]
    title: Option<String>,

    /// User id that owns the local session.
    #[arg(long, env = "CRAMFAST_USER", default_value = "local")]
    user: String,

    /// LLM model ID (e.g. gpt-4o-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of pages transcribed concurrently.
    #[arg(short, long, env = "CRAMFAST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Attempts per page.
    #[arg(long, env = "CRAMFAST_MAX_OCR_RETRIES", default_value_t = 2)]
    max_ocr_retries: u32,

    /// Attempts on the structured synthesis path.
    #[arg(long, env = "CRAMFAST_MAX_GEN_RETRIES", default_value_t = 2)]
    max_gen_retries: u32,

    /// Cards a model reply must yield to be accepted.
    #[arg(long, env = "CRAMFAST_MIN_CARDS", default_value_t = 6)]
    min_cards: usize,

    /// Longest image side sent to the model, in pixels.
    #[arg(long, env = "CRAMFAST_MAX_IMAGE_DIMENSION", default_value_t = 2000)]
    max_image_dimension: u32,

    /// Output the deck as JSON instead of Markdown.
    #[arg(long, env = "CRAMFAST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CRAMFAST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CRAMFAST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CRAMFAST_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CRAMFAST_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "CRAMFAST_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Session setup ────────────────────────────────────────────────────
    let store = Arc::new(InMemorySessionStore::new());
    let session = store
        .create_session(&cli.user, cli.title.clone())
        .await
        .context("Failed to create session")?;
    store
        .append_images(&session.id, &cli.user, cli.images.clone())
        .await
        .context("Failed to add images")?;

    // ── Run generation ───────────────────────────────────────────────────
    let start = Instant::now();
    let mut generator = FlashcardGenerator::new(store.clone() as Arc<dyn SessionStore>, config);
    if let Some(ref title) = cli.title {
        generator = generator.with_title(title.clone());
    }
    let result = generator
        .generate(&session.id, &cli.user)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))
        .context("Generation failed")?;

    if let Some(ref output_path) = cli.output {
        write_markdown(&result, output_path)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} cards on '{}'  {}ms  →  {}",
                green("✔"),
                result.flashcards.len(),
                result.topic,
                start.elapsed().as_millis(),
                bold(&output_path.display().to_string()),
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let markdown = result.to_markdown();
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !cli.quiet && !show_progress {
            eprintln!(
                "Generated {} cards from {} page(s) in {}ms",
                result.flashcards.len(),
                cli.images.len(),
                start.elapsed().as_millis()
            );
        }
    }

    Ok(())
}

/// Map CLI args to `GenerationConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<GenerationConfig> {
    let mut builder = GenerationConfig::builder()
        .concurrency(cli.concurrency)
        .max_ocr_retries(cli.max_ocr_retries)
        .max_gen_retries(cli.max_gen_retries)
        .min_accepted_cards(cli.min_cards)
        .max_image_dimension(cli.max_image_dimension)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
