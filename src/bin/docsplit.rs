//! CLI binary for docsplit.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs a stage and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docsplit::pipeline::cleanup::{sweep_orphaned_artifacts, RetryPolicy};
use docsplit::{
    list_documents, Category, LlamaCloudClient, ParseOptions, ParseOrchestrator, PipelineConfig,
    PipelineProgress, ProcessStatus, ProgressCallback, RemoteJobClient, SplitOrchestrator, Stage,
    StageStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
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

/// Terminal progress: one bar over the documents of a stage, plus a log line
/// per finished segment or document.
struct CliProgress {
    bar: ProgressBar,
    segment_errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            segment_errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, stage: Stage, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(match stage {
            Stage::Split => "Splitting",
            Stage::Parse => "Parsing",
        });
        self.bar.reset_elapsed();
    }
}

impl PipelineProgress for CliProgress {
    fn on_stage_start(&self, stage: Stage, total_documents: usize) {
        self.activate_bar(stage, total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting {stage} of {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, _stage: Stage, file: &str, _index: usize, _total: usize) {
        self.bar.set_message(file.to_string());
    }

    fn on_document_status(&self, _stage: Stage, file: &str, message: &str) {
        self.bar.set_message(format!("{file}: {message}"));
    }

    fn on_document_complete(&self, stage: Stage, file: &str, status: StageStatus, segments: usize) {
        let (mark, detail) = match (stage, status) {
            (_, StageStatus::Failed) => (red("✗"), red("failed")),
            (Stage::Split, _) => (green("✓"), dim(&format!("{segments} segments"))),
            (Stage::Parse, _) => (green("✓"), dim(&format!("{segments} parsed"))),
        };
        self.bar.println(format!("  {mark} {file}  {detail}"));
        self.bar.inc(1);
    }

    fn on_segment_complete(
        &self,
        _file: &str,
        segment: &str,
        index: usize,
        total: usize,
        markdown_len: usize,
    ) {
        self.bar.println(format!(
            "    {} [{:>3}/{:<3}] {:<28} {}",
            green("·"),
            index,
            total,
            segment,
            dim(&format!("{markdown_len:>6} chars")),
        ));
    }

    fn on_segment_error(&self, _file: &str, segment: &str, index: usize, total: usize, error: &str) {
        self.segment_errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "    {} [{:>3}/{:<3}] {:<28} {}",
            red("·"),
            index,
            total,
            segment,
            red(&msg),
        ));
    }

    fn on_stage_complete(&self, stage: Stage, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        let errors = self.segment_errors.swap(0, Ordering::SeqCst);
        if failed == 0 && errors == 0 {
            eprintln!(
                "{} {} {} documents",
                green("✔"),
                bold(&succeeded.to_string()),
                stage
            );
        } else {
            eprintln!(
                "{} {}/{} documents ({} failed, {} segment errors)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                succeeded + failed,
                red(&failed.to_string()),
                red(&errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split every PDF in ./data into categorised segments
  docsplit split

  # Extract text and markdown for every segment
  docsplit parse

  # Both stages back to back
  docsplit run --data-dir /srv/uploads

  # Custom categories, give up on a split job after 10 minutes
  docsplit split --categories categories.json --poll-timeout 600

  # Progress as JSON, e.g. for a web front end
  docsplit status --json

  # Remove temporary segment files left by a crashed run
  docsplit sweep

FILES (inside --data-dir):
  split_results.json      file → [{name, category, pages, confidence_category}]
  parsed_segments.json    file → [{…, parsed: {text, markdown, num_pages_parsed} | {error}}]
  split_status.json       file → {status, message, timestamp}
  parse_status.json       file → {status, message, timestamp}

ENVIRONMENT VARIABLES:
  LLAMA_CLOUD_API_KEY     API key for the split and parse services
  DOCSPLIT_DATA_DIR       Default for --data-dir
  DOCSPLIT_BASE_URL       Override the API root
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Split PDFs into categorised segments and extract their text.
#[derive(Parser, Debug)]
#[command(
    name = "docsplit",
    version,
    about = "Split PDFs into categorised segments and extract their text",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory with the source PDFs and the JSON records.
    #[arg(long, global = true, env = "DOCSPLIT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, env = "DOCSPLIT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCSPLIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSPLIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSPLIT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split every source PDF with the remote splitter.
    Split(RemoteArgs),
    /// Parse every segment listed in split_results.json.
    Parse(RemoteArgs),
    /// Split, then parse.
    Run(RemoteArgs),
    /// Show the combined per-file status of both stages.
    Status,
    /// List processed documents whose source PDF still exists.
    Documents,
    /// Delete leftover temporary segment files.
    Sweep {
        /// Directory holding the artifacts. Defaults to --data-dir.
        #[arg(long, env = "DOCSPLIT_ARTIFACT_DIR")]
        artifact_dir: Option<PathBuf>,

        /// Attempts to delete one file.
        #[arg(long, env = "DOCSPLIT_CLEANUP_ATTEMPTS", default_value_t = 5)]
        cleanup_attempts: u32,
    },
}

#[derive(Args, Debug)]
struct RemoteArgs {
    /// API key for the remote services.
    #[arg(long, env = "LLAMA_CLOUD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API root URL.
    #[arg(long, env = "DOCSPLIT_BASE_URL", default_value = docsplit::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Path of the split-jobs endpoint relative to the API root.
    #[arg(long, env = "DOCSPLIT_SPLIT_JOBS_PATH", default_value = docsplit::config::DEFAULT_SPLIT_JOBS_PATH)]
    split_jobs_path: String,

    /// JSON file with `[{"name": …, "description": …}]` replacing the built-in categories.
    #[arg(long, env = "DOCSPLIT_CATEGORIES")]
    categories: Option<PathBuf>,

    /// Reject segments that match no category.
    #[arg(long, env = "DOCSPLIT_NO_UNCATEGORIZED")]
    no_uncategorized: bool,

    /// Milliseconds between two status checks of a remote job.
    #[arg(long, env = "DOCSPLIT_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Give up on a remote job after this many seconds (default: never).
    #[arg(long, env = "DOCSPLIT_POLL_TIMEOUT")]
    poll_timeout: Option<u64>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "DOCSPLIT_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    /// Where temporary segment PDFs are written. Defaults to --data-dir.
    #[arg(long, env = "DOCSPLIT_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Parser mode.
    #[arg(long, env = "DOCSPLIT_PARSE_MODE", default_value = "parse_page_with_agent")]
    parse_mode: String,

    /// Model used by the parser's agent mode.
    #[arg(long, env = "DOCSPLIT_PARSE_MODEL", default_value = "openai-gpt-4-1-mini")]
    parse_model: String,

    /// Primary document language (ISO 639-1).
    #[arg(long, env = "DOCSPLIT_LANGUAGE", default_value = "de")]
    language: String,

    /// Disable high-resolution OCR.
    #[arg(long, env = "DOCSPLIT_NO_HIGH_RES_OCR")]
    no_high_res_ocr: bool,

    /// Attempts to delete one temporary file.
    #[arg(long, env = "DOCSPLIT_CLEANUP_ATTEMPTS", default_value_t = 5)]
    cleanup_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let runs_stage = matches!(
        cli.command,
        Command::Split(_) | Command::Parse(_) | Command::Run(_)
    );
    let show_progress = runs_stage && !cli.quiet && !cli.no_progress && !cli.json;
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

    match &cli.command {
        Command::Split(args) => {
            let (config, client) = setup(&cli, args, show_progress).await?;
            run_split(&cli, config, client, ctrl_c_token()).await
        }
        Command::Parse(args) => {
            let (config, client) = setup(&cli, args, show_progress).await?;
            run_parse(&cli, config, client, ctrl_c_token()).await
        }
        Command::Run(args) => {
            let (config, client) = setup(&cli, args, show_progress).await?;
            let cancel = ctrl_c_token();
            run_split(&cli, config.clone(), client.clone(), cancel.clone()).await?;
            if cancel.is_cancelled() {
                anyhow::bail!("Interrupted after the split stage");
            }
            run_parse(&cli, config, client, cancel).await
        }
        Command::Status => show_status(&cli).await,
        Command::Documents => show_documents(&cli).await,
        Command::Sweep {
            artifact_dir,
            cleanup_attempts,
        } => {
            let dir = artifact_dir.clone().unwrap_or_else(|| cli.data_dir.clone());
            let policy = RetryPolicy {
                max_attempts: *cleanup_attempts,
                ..RetryPolicy::default()
            };
            let report = sweep_orphaned_artifacts(&dir, policy)
                .await
                .with_context(|| format!("Failed to sweep {}", dir.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {} removed, {} left",
                    if report.failed.is_empty() { green("✔") } else { cyan("⚠") },
                    report.removed.len(),
                    report.failed.len()
                );
            }
            Ok(())
        }
    }
}

/// A token that fires on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", cyan("Interrupted, stopping after the current request…"));
            trigger.cancel();
        }
    });
    cancel
}

async fn setup(
    cli: &Cli,
    args: &RemoteArgs,
    show_progress: bool,
) -> Result<(PipelineConfig, Arc<dyn RemoteJobClient>)> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn PipelineProgress>)
    } else {
        None
    };
    let config = build_config(cli, args, progress).await?;
    let client = LlamaCloudClient::from_config(&config).context("Cannot create API client")?;
    Ok((config, Arc::new(client)))
}

async fn run_split(
    cli: &Cli,
    config: PipelineConfig,
    client: Arc<dyn RemoteJobClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let report = SplitOrchestrator::new(config, client)
        .with_cancellation(cancel)
        .run()
        .await
        .context("Split stage failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.results).context("Failed to serialise results")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{} documents split into {} segments ({} failed)",
            bold(&report.total_documents().to_string()),
            bold(&report.total_segments().to_string()),
            report.failed
        );
    }
    if report.cancelled && !cli.quiet {
        eprintln!("{}", cyan("Split interrupted; unfinished documents stay pending"));
    }
    Ok(())
}

async fn run_parse(
    cli: &Cli,
    config: PipelineConfig,
    client: Arc<dyn RemoteJobClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let report = ParseOrchestrator::new(config, client)
        .with_cancellation(cancel)
        .run()
        .await
        .context("Parse stage failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        let s = report.summary;
        eprintln!("Summary:");
        eprintln!("   Total segments:     {}", s.total_segments);
        eprintln!("   Parsed:             {}", green(&s.succeeded.to_string()));
        eprintln!("   Failed:             {}", red(&s.failed.to_string()));
        eprintln!(
            "   Temporary files:    {}",
            dim(&format!("{}/{} removed", s.artifacts_removed, s.artifacts_created))
        );
    }
    if report.cancelled && !cli.quiet {
        eprintln!("{}", cyan("Parse interrupted; unfinished documents stay pending"));
    }
    Ok(())
}

async fn show_status(cli: &Cli) -> Result<()> {
    let status = ProcessStatus::load(&cli.data_dir).await;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
        return Ok(());
    }

    println!("{}", bold(&status.message));
    for (file, s) in &status.status {
        println!(
            "  {:<40} split: {:<10} parse: {:<10} {}",
            file,
            s.split_status.as_str(),
            s.parse_status.as_str(),
            dim(if s.parse_message.is_empty() {
                &s.split_message
            } else {
                &s.parse_message
            })
        );
    }
    Ok(())
}

async fn show_documents(cli: &Cli) -> Result<()> {
    let documents = list_documents(&cli.data_dir).await;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&documents).context("Failed to serialise documents")?
        );
        return Ok(());
    }

    for doc in &documents {
        let segments = match &doc.segments {
            docsplit::records::DocumentSegments::Parsed(s) => {
                let ok = s.iter().filter(|s| s.is_success()).count();
                format!("{} segments, {ok} parsed", s.len())
            }
            docsplit::records::DocumentSegments::Split(s) => format!("{} segments", s.len()),
        };
        println!("  {:<40} {}", doc.file, dim(&segments));
    }
    if documents.is_empty() && !cli.quiet {
        eprintln!("No processed documents in {}", cli.data_dir.display());
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    cli: &Cli,
    args: &RemoteArgs,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .data_dir(&cli.data_dir)
        .base_url(&args.base_url)
        .split_jobs_path(&args.split_jobs_path)
        .allow_uncategorized(!args.no_uncategorized)
        .poll_interval_ms(args.poll_interval_ms)
        .poll_timeout_secs(args.poll_timeout)
        .request_timeout_secs(args.request_timeout)
        .cleanup_max_attempts(args.cleanup_attempts)
        .parse_options(ParseOptions {
            parse_mode: args.parse_mode.clone(),
            model: Some(args.parse_model.clone()).filter(|m| !m.is_empty()),
            high_res_ocr: !args.no_high_res_ocr,
            language: args.language.clone(),
        });

    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref dir) = args.artifact_dir {
        builder = builder.artifact_dir(dir);
    }
    if let Some(ref path) = args.categories {
        builder = builder.categories(load_categories(path).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read a `[{name, description}]` JSON file.
async fn load_categories(path: &Path) -> Result<Vec<Category>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read categories from {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid categories file {:?}", path))
}
