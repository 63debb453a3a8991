//! CLI binary for pdfstitch.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one job and prints the result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdfstitch::{
    fit, CancelToken, ConversionPipeline, FailureReport, JobProgressCallback, PipelineConfig,
    ProgressCallback, StitchError, A4_GEOMETRY,
};
use std::collections::HashMap;
use std::io;
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

/// Terminal progress callback: a live bar plus one log line per file.
/// Files finish out of order when converted concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self::with_bar(bar)
    }

    fn with_bar(bar: ProgressBar) -> Arc<Self> {
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Clear the bar after a failed job and say how it ended.
    fn finish_failed(&self) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✗"), self.failure_summary());
    }

    fn failure_summary(&self) -> String {
        match self.errors.load(Ordering::SeqCst) {
            0 => "Merge aborted".to_string(),
            1 => "Merge failed: 1 file could not be converted".to_string(),
            n => format!("Merge failed: {n} files could not be converted"),
        }
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .map(|mut m| m.remove(&index))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Merging {total_files} files…"))
        ));
    }

    fn on_file_start(&self, index: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_file_complete(&self, index: usize, name: &str, pages: Option<usize>) {
        let what = match pages {
            Some(1) => "1 page".to_string(),
            Some(n) => format!("{n} pages"),
            None => "document".to_string(),
        };
        self.bar.println(format!(
            "  {} #{:<3} {:<32}  {:<10}  {}",
            green("✓"),
            index + 1,
            name,
            dim(&what),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} #{:<3} {:<32}  {}  {}",
            red("✗"),
            index + 1,
            name,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, output_name: &str, total_pages: Option<usize>) {
        self.bar.finish_and_clear();
        let pages = total_pages
            .map(|n| format!("{n} pages"))
            .unwrap_or_else(|| "copied".to_string());
        eprintln!("{} {}  ({})", green("✔"), bold(output_name), pages);
    }
}

impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge images and PDFs in the order given
  pdfstitch merge cover.png report.pdf appendix.jpg

  # Custom directories, JSON result
  pdfstitch merge --output-dir /srv/out --scratch-dir /srv/uploads --json *.pdf

  # Copy a merged document out of the output store
  pdfstitch fetch merged_20240309_070501_01234567.pdf -o ~/merged.pdf

  # Where would a 4000x2000 px image land on the page?
  pdfstitch fit 4000 2000

ACCEPTED INPUTS:
  .pdf               passed through with all pages
  .png .jpg .jpeg    one A4 page each, centred, scaled down to fit 10 mm margins
  Files over 32 MiB are rejected. Any bad file fails the whole job.

ENVIRONMENT VARIABLES:
  PDFSTITCH_OUTPUT_DIR    Output store directory (default: output)
  PDFSTITCH_SCRATCH_DIR   Scratch directory (default: uploads)
  PDFSTITCH_CONCURRENCY   Files converted at once
  PDFSTITCH_TIMEOUT       Job timeout in seconds, 0 disables
  RUST_LOG                Tracing filter, overrides --verbose
"#;

/// Merge PDFs and images into a single PDF.
#[derive(Parser, Debug)]
#[command(
    name = "pdfstitch",
    version,
    about = "Merge PDFs and PNG/JPEG images into a single PDF",
    long_about = "Merge an ordered list of PDFs and PNG/JPEG images into one PDF. Images become \
one A4 page each; PDFs keep all of their pages. Output order always equals input order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFSTITCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "PDFSTITCH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge files into one PDF in the output store.
    Merge {
        /// Input files, in output order.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output store directory.
        #[arg(long, env = "PDFSTITCH_OUTPUT_DIR", default_value = "output")]
        output_dir: PathBuf,

        /// Parent of per-job scratch directories.
        #[arg(long, env = "PDFSTITCH_SCRATCH_DIR", default_value = "uploads")]
        scratch_dir: PathBuf,

        /// Files converted at once.
        #[arg(short, long, env = "PDFSTITCH_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Job timeout in seconds; 0 disables it.
        #[arg(long, env = "PDFSTITCH_TIMEOUT", default_value_t = 300)]
        timeout: u64,

        /// Print the result (or failure) as JSON on stdout.
        #[arg(long, env = "PDFSTITCH_JSON")]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "PDFSTITCH_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Copy a merged document out of the output store.
    Fetch {
        /// Output name printed by `merge`.
        name: String,

        /// Output store directory.
        #[arg(long, env = "PDFSTITCH_OUTPUT_DIR", default_value = "output")]
        output_dir: PathBuf,

        /// Destination file. Defaults to NAME in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show where an image of the given pixel size lands on an A4 page.
    Fit {
        width: u32,
        height: u32,

        /// Print the placement as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = matches!(
        &cli.command,
        Command::Merge { json: false, no_progress: false, .. }
    ) && !cli.quiet;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
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

    match cli.command {
        Command::Merge {
            files,
            output_dir,
            scratch_dir,
            concurrency,
            timeout,
            json,
            no_progress: _,
        } => {
            let progress = show_progress.then(CliProgressCallback::new);

            let mut builder = PipelineConfig::builder()
                .output_dir(output_dir)
                .scratch_dir(scratch_dir)
                .concurrency(concurrency)
                .job_timeout_secs((timeout > 0).then_some(timeout));
            if let Some(cb) = &progress {
                builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
            }
            let config = builder.build().context("Invalid configuration")?;
            let pipeline = ConversionPipeline::new(config);

            let cancel = CancelToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                });
            }

            let result = pipeline.run_paths(&files, &cancel).await;
            if let (Err(_), Some(cb)) = (&result, &progress) {
                cb.finish_failed();
            }
            match result {
                Ok(output) => {
                    if json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&output)
                                .context("Failed to serialise output")?
                        );
                    } else {
                        println!("{}", output.name);
                        if !cli.quiet && !show_progress {
                            eprintln!(
                                "{} files → {} ({} bytes) in {}ms",
                                output.stats.total_files,
                                output.path.display(),
                                output.size_bytes,
                                output.stats.total_duration_ms
                            );
                        }
                    }
                }
                Err(e) if json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&FailureReport::from(&e))
                            .context("Failed to serialise failure")?
                    );
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("Merge failed"),
            }
        }

        Command::Fetch {
            name,
            output_dir,
            output,
        } => {
            let pipeline = ConversionPipeline::new(
                PipelineConfig::builder()
                    .output_dir(output_dir)
                    .build()
                    .context("Invalid configuration")?,
            );
            let bytes = match pipeline.fetch(&name).await {
                Ok(bytes) => bytes,
                Err(StitchError::NotFound { name }) => {
                    anyhow::bail!("No merged document named '{}'", name)
                }
                Err(e) => return Err(e).context("Fetch failed"),
            };
            let dest = output.unwrap_or_else(|| PathBuf::from(&name));
            tokio::fs::write(&dest, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            if !cli.quiet {
                eprintln!("{} {} ({} bytes)", green("✔"), dest.display(), bytes.len());
            }
        }

        Command::Fit {
            width,
            height,
            json,
        } => {
            let placement = fit(width, height, &A4_GEOMETRY).context("Cannot place image")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&placement)
                        .context("Failed to serialise placement")?
                );
            } else {
                println!("Scale:   {:.6}", placement.scale);
                println!(
                    "Size:    {:.2} × {:.2} mm",
                    placement.render_width, placement.render_height
                );
                println!(
                    "Offset:  {:.2}, {:.2} mm {}",
                    placement.offset_x,
                    placement.offset_y,
                    dim("(from top-left)")
                );
            }
        }
    }

    Ok(())
}
