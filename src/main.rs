// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use castfetch::download::{
    CacheStore, Fetcher, LogReporter, Orchestrator, Planner, ProgressReporter, ReqwestClient,
    RunReport, TokioSleeper,
};
use castfetch::download::types::format_bytes;
use castfetch::error::{exit_codes::*, FatalError};
use castfetch::feed::{candidate_urls, Feed, FeedClient};
use castfetch::naming::{download_dir_name, FileNamer};
use castfetch::Config;

/// Download every episode of a podcast feed, resuming where the last run stopped.
#[derive(Parser, Debug)]
#[command(name = "castfetch", version, about, long_about = None)]
struct Cli {
    /// RSS feed URL, or an iono.fm channel page (https://iono.fm/c/<n>)
    feed_url: String,

    /// Download directory name (default: feed author, else feed title)
    #[arg(short, long)]
    dir: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,

    /// Probe the server for every item, even ones the cache marks complete
    #[arg(long)]
    recheck: bool,

    /// Name files after the title only, never the description
    #[arg(long)]
    short_names: bool,

    /// Keep the feed's own order instead of sorting by episode number
    #[arg(long)]
    feed_order: bool,

    /// Configuration file (default: ./castfetch.json, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

/// Spinner helpers for consistent progress indicators
mod spinner {
    use colored::Colorize;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn finish_success(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("{} {}", "[✓]".green(), message);
    }

    pub fn finish_error(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        eprintln!("{} {}", "[✗]".red(), message);
    }
}

/// Per-item transfer bars for interactive terminals.
mod bar {
    use colored::Colorize;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::Mutex;
    use std::time::Duration;

    use castfetch::download::types::format_bytes;
    use castfetch::download::{Item, ItemOutcome, ProgressReporter, TransferPlan};

    const TITLE_WIDTH: usize = 40;

    #[derive(Default)]
    pub struct BarReporter {
        current: Mutex<Option<ProgressBar>>,
    }

    impl BarReporter {
        pub fn new() -> Self {
            Self::default()
        }

        fn take(&self) -> Option<ProgressBar> {
            self.current.lock().ok().and_then(|mut slot| slot.take())
        }
    }

    fn short_title(item: &Item) -> String {
        let title = if item.title.trim().is_empty() { &item.id } else { &item.title };
        if title.chars().count() > TITLE_WIDTH {
            let cut: String = title.chars().take(TITLE_WIDTH - 1).collect();
            format!("{}…", cut)
        } else {
            title.to_string()
        }
    }

    impl ProgressReporter for BarReporter {
        fn item_started(&self, item: &Item, plan: &TransferPlan, expected: Option<u64>) {
            let pb = match expected {
                Some(total) => {
                    let pb = ProgressBar::new(total);
                    let style = ProgressStyle::default_bar()
                        .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓░");
                    pb.set_style(style);
                    pb
                }
                None => {
                    let pb = ProgressBar::new_spinner();
                    let style = ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} {bytes}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());
                    pb.set_style(style);
                    pb
                }
            };
            pb.set_position(plan.start_offset());
            pb.set_message(short_title(item));
            pb.enable_steady_tick(Duration::from_millis(100));

            if let Ok(mut slot) = self.current.lock() {
                if let Some(previous) = slot.replace(pb) {
                    previous.finish_and_clear();
                }
            }
        }

        fn item_progress(&self, _item: &Item, bytes: u64, total: Option<u64>) {
            if let Ok(slot) = self.current.lock() {
                if let Some(pb) = slot.as_ref() {
                    if let Some(total) = total {
                        if pb.length() != Some(total) {
                            pb.set_length(total);
                        }
                    }
                    pb.set_position(bytes);
                }
            }
        }

        fn item_finished(&self, item: &Item, outcome: &ItemOutcome) {
            if let Some(pb) = self.take() {
                pb.finish_and_clear();
            }
            let title = short_title(item);
            match outcome {
                ItemOutcome::Skipped => {
                    println!("{} {} {}", "[=]".dimmed(), title.dimmed(), "already complete".dimmed())
                }
                ItemOutcome::Downloaded { resumed, size, .. } => {
                    let how = if *resumed { "resumed" } else { "downloaded" };
                    println!("{} {} ({}, {})", "[✓]".green(), title, how, format_bytes(*size));
                }
                ItemOutcome::Failed { reason } => {
                    println!("{} {} {}", "[✗]".red(), title, reason.red());
                }
                ItemOutcome::Interrupted => {
                    println!("{} {} {}", "[!]".yellow(), title, "interrupted, partial file kept".yellow());
                }
            }
        }
    }
}

/// Set up console and file logging.
///
/// Precedence for the level: `--log-level`, then `RUST_LOG`, then the config.
/// The returned guard must stay alive for the file writer to flush.
fn init_logging(cli_level: Option<&str>, config: &Config) -> Option<WorkerGuard> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };

    let (file_layer, guard) = match config.log_file_path().map(|path| open_log_file(&path)) {
        Some(Ok(file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_ansi(false).with_target(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("{} File logging disabled: {:#}", "[!]".yellow(), e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// First Ctrl+C asks the run to stop after flushing; a second one exits at once.
fn install_interrupt_handler(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\n{} Interrupted again, exiting now", "[!]".yellow());
            std::process::exit(INTERRUPTED);
        }
        eprintln!(
            "\n{} Interrupt received, finishing the current write (Ctrl+C again to force)",
            "[!]".yellow()
        );
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "Could not install Ctrl+C handler");
    }
}

/// Ask before downloading. Anything but an explicit yes declines.
fn confirm(feed: &Feed, item_count: usize, dir: &Path) -> bool {
    if !io::stdin().is_terminal() {
        eprintln!(
            "{} Not running in a terminal; pass --force to download without confirmation",
            "[!]".yellow()
        );
        return false;
    }

    let question = format!(
        "Download {} episodes of \"{}\" into {}?",
        item_count,
        feed.title,
        dir.display()
    );
    inquire::Confirm::new(&question)
        .with_default(true)
        .prompt()
        .unwrap_or(false)
}

fn print_summary(report: &RunReport, dir: &Path) {
    println!();
    println!("{}", "Summary".bold());
    println!("  Downloaded:  {} ({} resumed)", report.succeeded.to_string().green(), report.resumed);
    println!("  Skipped:     {}", report.skipped);
    println!("  Transferred: {}", format_bytes(report.bytes_transferred));
    if report.failed > 0 {
        println!("  Failed:      {}", report.failed.to_string().red());
        for failure in &report.failures {
            println!("    - {} {}", failure.id, failure.reason.dimmed());
        }
        println!("  Run again to retry the failed items.");
    }
    if report.interrupted {
        println!("  {}", "Interrupted; run again to resume.".yellow());
    }
    println!("  Files in {}", dir.display());
}

async fn run(cli: Cli, config: Config) -> std::result::Result<i32, FatalError> {
    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(cancel.clone());

    let client = Arc::new(ReqwestClient::new(config.timeout()).map_err(FatalError::Other)?);
    let feed_client = FeedClient::new(client.inner().clone(), config.timeout())
        .with_quality(config.preferred_quality);

    let candidates = candidate_urls(&cli.feed_url);
    let loading = spinner::create("Loading feed...");
    let (feed_url, feed) = match feed_client.fetch_first(&candidates).await {
        Ok(found) => found,
        Err(e) => {
            spinner::finish_error(&loading, "Could not load feed");
            return Err(FatalError::FeedUnreachable {
                input: cli.feed_url.clone(),
                reason: e.to_string(),
            });
        }
    };
    spinner::finish_success(
        &loading,
        &format!("{} ({} episodes)", feed.title.bold(), feed.items.len()),
    );
    if feed.skipped > 0 {
        println!("{} {} entries without audio were skipped", "[!]".yellow(), feed.skipped);
    }

    let items = feed.ordered_items(cli.feed_order);
    let dir_name = download_dir_name(
        cli.dir.as_deref(),
        feed.author.as_deref(),
        &feed.title,
        config.filename_max_length,
    );
    let download_dir = config.base_dir().join(&dir_name);
    tracing::info!(
        feed = %feed_url,
        items = items.len(),
        dir = %download_dir.display(),
        "Feed ready"
    );

    if !cli.force && !confirm(&feed, items.len(), &download_dir) {
        println!("Nothing downloaded.");
        return Ok(DECLINED);
    }

    fs::create_dir_all(&download_dir)
        .with_context(|| format!("Failed to create {}", download_dir.display()))
        .map_err(FatalError::Other)?;

    let namer = FileNamer::new(config.filename_max_length, cli.short_names, config.preferred_format);
    let planner = Planner::new(client.clone(), namer, &download_dir, cli.recheck);
    let fetcher = Fetcher::new(client, config.retry_policy(), Arc::new(TokioSleeper), cancel.clone())
        .with_read_timeout(config.timeout())
        .with_progress_interval(config.progress_interval_bytes);
    let cache = CacheStore::load(config.cache_path(&download_dir));

    let reporter: Arc<dyn ProgressReporter> = if io::stderr().is_terminal() {
        Arc::new(bar::BarReporter::new())
    } else {
        Arc::new(LogReporter)
    };

    let mut orchestrator = Orchestrator::new(planner, fetcher, cache, reporter, cancel.clone())
        .with_checksums(config.verify_checksums);
    let report = orchestrator.run(&items).await;

    print_summary(&report, &download_dir);

    if report.interrupted || cancel.load(Ordering::SeqCst) {
        Ok(INTERRUPTED)
    } else {
        Ok(SUCCESS)
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok((config, _)) => config,
        Err(e) => {
            let fatal = FatalError::Config(e);
            eprintln!("{}", fatal.render());
            std::process::exit(fatal.exit_code());
        }
    };

    let log_guard = init_logging(cli.log_level.as_deref(), &config);
    tracing::debug!(?config, "Configuration loaded");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", FatalError::Other(e.into()).render());
            std::process::exit(ERROR);
        }
    };

    let code = match runtime.block_on(run(cli, config)) {
        Ok(code) => code,
        Err(fatal) => {
            tracing::error!(error = %fatal, "Fatal error");
            eprintln!("{}", fatal.render());
            fatal.exit_code()
        }
    };

    // Flush the file log before exiting
    drop(log_guard);
    drop(runtime);
    std::process::exit(code);
}
