//! CLI binary for edgequake-letter2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the merged record, or a document
//! summary with `--summarize` / `--describe-pages`.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_letter2json::extract::write_atomic;
use edgequake_letter2json::{
    extract_with_cancel, summarize, summarize_stream, CancellationToken, ExtractionConfig,
    ExtractionOutput, ExtractionProgressCallback, FieldSchema, MergePolicy, PageSelection,
    ProgressCallback,
};
use futures::StreamExt;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// page showing the sender confidence the page reported.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
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

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages in order…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_merged(&self, page_num: usize, total: usize, confidence: Option<f64>) {
        let secs = self.elapsed_secs(page_num);
        let conf = confidence
            .map(|c| format!("sender {c:.2}"))
            .unwrap_or_else(|| "sender –".to_string());

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&conf),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
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

    fn on_extraction_complete(&self, total_pages: usize, merged_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 && merged_count == total_pages {
            eprintln!(
                "{} {} pages merged",
                green("✔"),
                bold(&merged_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages merged  ({} failed)",
                if merged_count == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&merged_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merged record to stdout
  letter2json --schema form.json letter.pdf

  # Write to a file
  letter2json --schema form.json letter.pdf -o record.json

  # Full output: record, page summaries, confidence history, failures
  letter2json --schema form.json --full letter.pdf > run.json

  # Only the first three pages, higher DPI for faint stamps
  letter2json --schema form.json --pages 1-3 --dpi 200 letter.pdf

  # Fail when no page could be read
  letter2json --schema form.json --require-success letter.pdf

  # Whole-letter summary with image descriptions (no schema needed)
  letter2json --summarize letter.pdf

  # Per-page descriptions, printed as each page is read
  letter2json --describe-pages letter.pdf

SCHEMA FILE:
  A JSON object mapping field names to descriptors:
    {
      "name":       {"type": "text"},
      "letterDate": {"type": "date", "required": true},
      "priority":   {"type": "select", "options": ["Low", "High"]}
    }
  Types: text, date, number, boolean (alias checkbox), select.

SENDER MERGE:
  Sender fields (name, designation, organisation, address, …) move as one
  block. A later page only replaces them when its sender confidence beats
  the current one by more than --adopt-margin. A current block at or above
  --retain-floor is kept against any page weaker by at least --retain-gap.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

Ctrl-C stops after the current page and still prints the partial record.
"#;

/// Extract structured form fields from multi-page letters using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "letter2json",
    version,
    about = "Extract structured form fields from multi-page letters using Vision LLMs",
    long_about = "Read a scanned official letter page by page with a Vision Language Model, \
carrying context forward, and merge every page into one JSON record matching a field schema. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// JSON file describing the fields to extract.
    #[arg(short, long, env = "LETTER2JSON_SCHEMA",
          required_unless_present_any = ["summarize", "describe_pages"])]
    schema: Option<PathBuf>,

    /// Summarise the whole document, images included, instead of extracting fields.
    #[arg(long, conflicts_with_all = ["describe_pages", "full"])]
    summarize: bool,

    /// Describe each page in order, printing descriptions as they arrive.
    #[arg(long, conflicts_with = "full")]
    describe_pages: bool,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "LETTER2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "LETTER2JSON_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "LETTER2JSON_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "LETTER2JSON_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "LETTER2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "LETTER2JSON_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "LETTER2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "LETTER2JSON_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "LETTER2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Confidence drop treated as noise when the current sender is strong.
    #[arg(long, env = "LETTER2JSON_RETAIN_GAP", default_value_t = 0.2)]
    retain_gap: f64,

    /// Sender confidence at or above which weaker pages are ignored.
    #[arg(long, env = "LETTER2JSON_RETAIN_FLOOR", default_value_t = 0.8)]
    retain_floor: f64,

    /// Confidence gain required before a page replaces the sender block.
    #[arg(long, env = "LETTER2JSON_ADOPT_MARGIN", default_value_t = 0.3)]
    adopt_margin: f64,

    /// Exit with an error when every attempted page failed.
    #[arg(long, env = "LETTER2JSON_REQUIRE_SUCCESS")]
    require_success: bool,

    /// Print the full ExtractionOutput instead of only the merged record.
    #[arg(long, env = "LETTER2JSON_FULL")]
    full: bool,

    /// Disable progress bar.
    #[arg(long, env = "LETTER2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LETTER2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LETTER2JSON_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    if cli.summarize || cli.describe_pages {
        let config = build_config(&cli, None).await?;
        return run_summary(&cli, &config).await;
    }

    // ── Schema ───────────────────────────────────────────────────────────
    let schema_path = cli
        .schema
        .as_ref()
        .context("--schema is required for field extraction")?;
    let schema_text = tokio::fs::read_to_string(schema_path)
        .await
        .with_context(|| format!("Failed to read schema from {:?}", schema_path))?;
    let schema = FieldSchema::from_json_str(&schema_text).context("Invalid schema")?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Ctrl-C → cancel after the in-flight page ─────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupted, finishing with pages read so far", cyan("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_with_cancel(&cli.input, &schema, &config, &cancel)
        .await
        .context("Extraction failed")?;

    let json = render_output(&output, cli.full)?;
    emit(&cli, &json).await?;

    if !cli.quiet {
        print_summary(&output, &cli, show_progress);
    }

    Ok(())
}

/// Write to `--output` atomically, or to stdout.
async fn emit(cli: &Cli, text: &str) -> Result<()> {
    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, text.as_bytes())
            .await
            .context("Failed to write output")?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// `--summarize` and `--describe-pages`.
async fn run_summary(cli: &Cli, config: &ExtractionConfig) -> Result<()> {
    if cli.summarize {
        let summary = summarize(&cli.input, config)
            .await
            .context("Summary failed")?;
        emit(cli, &summary.text).await?;
        if !cli.quiet {
            eprintln!(
                "{} {} pages summarised in {}ms  ({} tokens in / {} out)",
                green("✔"),
                bold(&summary.pages_processed.to_string()),
                summary.duration_ms,
                summary.total_input_tokens,
                summary.total_output_tokens,
            );
        }
        return Ok(());
    }

    let mut stream = summarize_stream(&cli.input, config)
        .await
        .context("Summary failed")?;
    let mut collected = String::new();
    let mut failed = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(page) => {
                let block = format!("## Page {}\n\n{}\n", page.pdf_page, page.text);
                if cli.output.is_some() {
                    collected.push_str(&block);
                    collected.push('\n');
                } else {
                    println!("{block}");
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {} {}", red("✗"), red(&e.to_string()));
            }
        }
    }
    if cli.output.is_some() {
        emit(cli, collected.trim_end()).await?;
    }
    if failed > 0 && !cli.quiet {
        eprintln!("{} {} pages could not be described", cyan("⚠"), failed);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let pages = PageSelection::parse(&cli.pages).context("Invalid --pages")?;
    let policy = MergePolicy {
        retain_gap: cli.retain_gap,
        retain_floor: cli.retain_floor,
        adopt_margin: cli.adopt_margin,
        ..MergePolicy::default()
    };

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .merge_policy(policy)
        .require_success(cli.require_success);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.password = cli.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}

fn render_output(output: &ExtractionOutput, full: bool) -> Result<String> {
    let json = if full {
        serde_json::to_string_pretty(output)
    } else {
        serde_json::to_string_pretty(&output.record_json())
    };
    json.context("Failed to serialise output")
}

fn print_summary(output: &ExtractionOutput, cli: &Cli, show_progress: bool) {
    let stats = &output.stats;
    let target = cli
        .output
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());

    if !show_progress {
        eprintln!(
            "Merged {}/{} pages in {}ms  →  {}",
            stats.merged_pages, stats.total_pages, stats.total_duration_ms, target
        );
        if stats.failed_pages > 0 {
            eprintln!("  {} pages failed", stats.failed_pages);
        }
    } else {
        eprintln!("   {}  →  {}", dim(&format!("{}ms", stats.total_duration_ms)), bold(&target));
    }

    if let Some(ref best) = output.best_page_confidence {
        eprintln!(
            "   sender confidence {} (page {}: {})",
            bold(&format!("{:.2}", best.confidence)),
            best.page,
            dim(&best.reason)
        );
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
    );
    if stats.cancelled {
        eprintln!(
            "{} cancelled after {} of {} pages",
            cyan("⚠"),
            stats.attempted_pages,
            stats.total_pages
        );
    }
}
