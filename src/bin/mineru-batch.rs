//! CLI binary for mineru-batch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`
//! and `ApiConfig`, renders progress, and prints the run summary.

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mineru_batch::{
    corpus_statistics, ApiConfig, BatchConfig, BatchProgressCallback, BatchRunner,
    CorpusStatistics, FsDocumentSource, MarkdownArtifactPolicy, MinerUClient, OutcomeState,
    ProgressCallback, RunSummary, StopSignal, SUPPORTED_LANGUAGES,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Terminal progress callback: one bar for the whole run plus a log line per
/// finished document. Documents of a group finish in any order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Looking for documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} docs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.set_message("");
        self.bar.reset_eta();
    }

    fn elapsed(&self, name: &str) -> f64 {
        self.start_times
            .lock()
            .map(|mut m| m.remove(name))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: usize, to_process: usize) {
        self.activate_bar(to_process);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{to_process} documents to convert")),
            dim(&format!("({} already done)", total - to_process)),
        ));
    }

    fn on_group_start(&self, group_index: usize, group_count: usize, size: usize) {
        if size > 1 {
            self.bar
                .set_message(format!("group {group_index}/{group_count}"));
        }
    }

    fn on_document_start(&self, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(name.to_string(), Instant::now());
        }
    }

    fn on_document_progress(&self, name: &str, extracted_pages: u32, total_pages: u32) {
        self.bar
            .set_message(format!("{name}: {extracted_pages}/{total_pages} pages"));
    }

    fn on_document_complete(&self, name: &str, state: OutcomeState) {
        let secs = self.elapsed(name);
        let mark = match state {
            OutcomeState::Succeeded => green("✓"),
            OutcomeState::TimedOut => yellow("⧗"),
            _ => red("✗"),
        };
        self.bar.println(format!(
            "  {mark} {name}  {}",
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} documents converted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {} converted  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert ./pdfs into ./outputs_api, one document at a time
  mineru-batch

  # Chinese documents, three at a time, 5 s between groups
  mineru-batch -i papers -o md --language ch --concurrency 3 --delay 5

  # Show what is done and what is left, without contacting the service
  mineru-batch --stats

  # Reconvert everything, ignoring existing output
  mineru-batch --no-skip

  # Only the first ten pages of each document
  mineru-batch --page-ranges 1-10

OUTPUT LAYOUT:
  pdfs/Journal A/paper 1.pdf  →  outputs_api/Journal A/paper 1/full.md
                                 outputs_api/Journal A/paper 1/images/…
  outputs_api/processing_result.json   summary of the last run

  Reserved characters (\ / : * ? " < > |) in names become '_'; trailing
  spaces and dots are removed. Sources that end up with the same name
  are written to `name_2/`, `name_3/`, … in discovery order; `--stats`
  lists them.

RESUMING:
  A document counts as done when its output folder holds a non-empty .md
  file. Rerunning after an interruption only converts what is left.
  Ctrl-C once lets the current group finish and still writes the summary;
  press it twice to abort immediately.

ENVIRONMENT VARIABLES:
  MINERU_API_KEY     API token (falls back to ./token.txt)
  MINERU_API_BASE    Service URL (default https://mineru.net)
  MINERU_INPUT_DIR   Default for --input-dir
  MINERU_OUTPUT_DIR  Default for --output-dir
  RUST_LOG           Overrides the log filter, e.g. mineru_batch=debug
"#;

/// Batch-convert PDF trees to Markdown with the MinerU cloud API.
#[derive(Parser, Debug)]
#[command(
    name = "mineru-batch",
    version,
    about = "Batch-convert PDF trees to Markdown with the MinerU cloud API",
    long_about = "Walk an input directory, upload every PDF to the MinerU extraction service, \
wait for the conversions, and unpack the results into a mirrored output tree. Already converted \
documents are skipped, so an interrupted run can simply be restarted.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory scanned recursively for documents.
    #[arg(short, long, env = "MINERU_INPUT_DIR", default_value = "pdfs")]
    input_dir: PathBuf,

    /// Root of the mirrored output tree.
    #[arg(short, long, env = "MINERU_OUTPUT_DIR", default_value = "outputs_api")]
    output_dir: PathBuf,

    /// Document language.
    #[arg(short, long, env = "MINERU_LANGUAGE", default_value = "en",
          value_parser = PossibleValuesParser::new(SUPPORTED_LANGUAGES.iter().copied()))]
    language: String,

    /// Disable OCR.
    #[arg(long)]
    no_ocr: bool,

    /// Reconvert documents that already have Markdown output.
    #[arg(long)]
    no_skip: bool,

    /// Print corpus statistics and exit; no documents are uploaded.
    #[arg(long)]
    stats: bool,

    /// Documents converted at the same time (group size).
    #[arg(short, long, alias = "batch-size", env = "MINERU_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=64))]
    concurrency: u32,

    /// Seconds to wait between groups.
    #[arg(long, env = "MINERU_DELAY", default_value_t = 1.0)]
    delay: f64,

    /// Status checks per document before it is reported as timed out.
    #[arg(long, alias = "max-retries", env = "MINERU_MAX_POLL_ATTEMPTS", default_value_t = 180)]
    max_poll_attempts: u32,

    /// Seconds between status checks.
    #[arg(long, alias = "retry-interval", env = "MINERU_POLL_INTERVAL", default_value_t = 10)]
    poll_interval: u64,

    /// Page selection forwarded to the service, e.g. "1-5,8".
    #[arg(long, env = "MINERU_PAGE_RANGES")]
    page_ranges: Option<String>,

    /// File extensions to convert (repeatable).
    #[arg(long = "ext", default_value = "pdf", num_args = 1..)]
    extensions: Vec<String>,

    /// MinerU API token.
    #[arg(long, env = "MINERU_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// MinerU service URL.
    #[arg(long, env = "MINERU_API_BASE", default_value = mineru_batch::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Print the run summary (or statistics) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Exit with status 1 when any document failed or timed out.
    #[arg(long)]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "MINERU_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.stats;
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
        Some(CliProgressCallback::new_dynamic() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Statistics mode ──────────────────────────────────────────────────
    if cli.stats {
        let source = FsDocumentSource::from_config(&config);
        let stats = corpus_statistics(&source, &MarkdownArtifactPolicy)
            .context("Failed to scan input directory")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).context("Failed to serialise statistics")?
            );
        } else {
            print_statistics(&stats);
        }
        return Ok(());
    }

    // ── Build client ─────────────────────────────────────────────────────
    let api_key = resolve_api_key(cli.api_key.as_deref(), Path::new("token.txt"))?;
    let api = ApiConfig::new(api_key).with_api_base(&cli.api_base);
    let client = MinerUClient::new(&api).context("Failed to set up the MinerU client")?;

    // ── Ctrl-C: first stops dispatch, second aborts ─────────────────────
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "\n{} finishing the current group; press Ctrl-C again to abort",
                    yellow("⏸")
                );
                stop.request_stop();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let summary_path = config.summary_path();
    let runner = BatchRunner::new(config, Arc::new(client)).with_stop_signal(stop);
    let summary = runner.run().await.context("Batch run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary, &summary_path);
    }

    if summary.stopped_early {
        std::process::exit(130);
    }
    if cli.strict && !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    if !cli.delay.is_finite() || cli.delay < 0.0 {
        anyhow::bail!("--delay must be a non-negative number of seconds (got {})", cli.delay);
    }

    let mut builder = BatchConfig::builder()
        .input_dir(&cli.input_dir)
        .output_dir(&cli.output_dir)
        .language(&cli.language)
        .ocr_enabled(!cli.no_ocr)
        .skip_existing(!cli.no_skip)
        .concurrency_limit(cli.concurrency as usize)
        .inter_batch_delay(Duration::from_secs_f64(cli.delay))
        .max_poll_attempts(cli.max_poll_attempts)
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .extensions(cli.extensions.iter().cloned());

    if let Some(ranges) = &cli.page_ranges {
        builder = builder.page_ranges(ranges);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `--api-key` / `MINERU_API_KEY` first, then the first non-empty line of `token_file`.
fn resolve_api_key(flag: Option<&str>, token_file: &Path) -> Result<String> {
    if let Some(key) = flag.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    match std::fs::read_to_string(token_file) {
        Ok(text) => {
            let key = text.trim();
            if key.is_empty() {
                Err::<String, _>(mineru_batch::BatchError::MissingCredential)
                    .with_context(|| format!("{} is empty", token_file.display()))
            } else {
                Ok(key.to_string())
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(mineru_batch::BatchError::MissingCredential.into())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", token_file.display())),
    }
}

fn print_summary(summary: &RunSummary, summary_path: &Path) {
    let c = &summary.counts;
    eprintln!("{}", dim(&"─".repeat(60)));
    eprintln!("  Documents:   {}", bold(&summary.total_documents.to_string()));
    eprintln!("  Skipped:     {}", c.skipped);
    eprintln!("  Succeeded:   {}", green(&c.succeeded.to_string()));
    eprintln!("  Failed:      {}", if c.failed > 0 { red(&c.failed.to_string()) } else { "0".into() });
    eprintln!(
        "  Timed out:   {}",
        if c.timed_out > 0 { yellow(&c.timed_out.to_string()) } else { "0".into() }
    );
    if summary.stopped_early {
        eprintln!("  Not started: {}  {}", summary.not_dispatched, dim("(stopped by user)"));
    }
    eprintln!(
        "  Started:     {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    eprintln!(
        "  Finished:    {}  {}",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        dim(&format!("({:.1}s)", summary.duration_secs))
    );

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        eprintln!("{}", dim(&"─".repeat(60)));
        eprintln!("  Errors:");
        for o in failures.iter().take(10) {
            eprintln!(
                "   {} {}: {}",
                red("-"),
                o.relative_path.display(),
                o.failure_reason().unwrap_or_default()
            );
        }
        if failures.len() > 10 {
            eprintln!("   … and {} more", failures.len() - 10);
        }
    }
    eprintln!("{}", dim(&"─".repeat(60)));
    eprintln!("  Summary:     {}", summary_path.display());
}

fn print_statistics(stats: &CorpusStatistics) {
    println!("{}", "=".repeat(60));
    println!("{}", bold("Corpus statistics"));
    println!("{}", "=".repeat(60));

    if !stats.collisions.is_empty() {
        println!(
            "{} {} output folders are claimed by several sources; later ones get a numbered suffix:",
            yellow("⚠"),
            stats.collisions.len()
        );
        for c in &stats.collisions {
            println!("  {}", c.output_dir.display());
            for s in &c.sources {
                println!("    - {}", s.display());
            }
        }
        println!();
    }

    println!("  Total:      {}", stats.total);
    println!("  Processed:  {}  ({:.1}%)", stats.processed, stats.progress_percent());
    println!("  Remaining:  {}", stats.remaining);
    println!();
    println!("By folder:");
    println!("{}", "-".repeat(60));
    for (folder, s) in &stats.by_subfolder {
        let name = if folder == "." { "(root)" } else { folder.as_str() };
        println!("  {name}: {}/{} processed", s.processed, s.total);
    }
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_library_defaults() {
        let cli = Cli::parse_from(["mineru-batch"]);
        let config = build_config(&cli, None).unwrap();
        let defaults = BatchConfig::default();
        assert_eq!(config.concurrency_limit, defaults.concurrency_limit);
        assert_eq!(config.max_poll_attempts, defaults.max_poll_attempts);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.inter_batch_delay, defaults.inter_batch_delay);
        assert_eq!(config.language, "en");
        assert!(config.skip_existing);
        assert!(config.ocr_enabled);
    }

    #[test]
    fn legacy_flag_aliases_are_accepted() {
        let cli = Cli::parse_from([
            "mineru-batch",
            "--batch-size",
            "4",
            "--max-retries",
            "5",
            "--retry-interval",
            "2",
            "--no-ocr",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.max_poll_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(!config.ocr_enabled);
    }

    #[test]
    fn unknown_language_is_rejected_by_clap() {
        assert!(Cli::try_parse_from(["mineru-batch", "--language", "xx"]).is_err());
    }

    #[test]
    fn negative_delay_is_rejected() {
        let cli = Cli::parse_from(["mineru-batch", "--delay=-1"]);
        assert!(build_config(&cli, None).is_err());
    }

    #[test]
    fn api_key_flag_wins_over_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token.txt");
        std::fs::write(&token, "from-file\n").unwrap();
        assert_eq!(resolve_api_key(Some(" flag "), &token).unwrap(), "flag");
        assert_eq!(resolve_api_key(None, &token).unwrap(), "from-file");
        assert_eq!(resolve_api_key(Some(""), &token).unwrap(), "from-file");
    }

    #[test]
    fn missing_token_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_api_key(None, &dir.path().join("token.txt")).unwrap_err();
        assert!(err.to_string().contains("MINERU_API_KEY"));
    }
}
