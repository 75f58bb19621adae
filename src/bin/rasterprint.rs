//! CLI binary for rasterprint.
//!
//! A thin shim over the library crate that maps CLI flags to `PrintConfig`,
//! drives a progress bar and prints the job report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rasterprint::device::BACKENDS;
use rasterprint::pipeline::input::{classify, InputKind};
use rasterprint::{
    inspect, print_file_with_control, print_folder, write_json, JobControl, JobPhase, JobReport,
    MediaSize, PageSelection, PrintConfig, PrintProgressCallback, ProgressCallback, RasterBackend,
};
use std::path::PathBuf;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

/// Live progress bar. The bar tracks pages handed to the device, which
/// happens in page order; conversion failures are logged above it as they
/// happen, in whatever order workers finish.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PrintProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: u32) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        // Folder runs reuse the bar after the previous job finished it.
        self.bar.reset();
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Printing");
        self.bar.set_message("");
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_page_converted(&self, _page: u32, converted: u32, total: u32, _elapsed: Duration) {
        self.bar.set_message(dim(&format!("{converted}/{total} rendered")));
    }

    fn on_page_failed(&self, page: u32, total: u32, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_page_emitted(&self, page: u32, _emitted: u32, total: u32) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}",
            green("✓"),
            page,
            total
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, report: &JobReport) {
        self.bar.finish_and_clear();
        eprintln!("{}", summary_line(report));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Spool a document as Apple Raster
  rasterprint report.pdf --device urf:report.urf

  # Preview pages 3-15 as PNGs at 150 DPI on Letter paper
  rasterprint --pages 3-15 --dpi 150 --paper letter report.pdf -d png:preview/

  # Print from a URL with 8 workers and a 5 mm margin
  rasterprint https://example.com/doc.pdf -d urf:doc.urf -w 8 --margin-mm 5

  # Print every PDF in a folder
  rasterprint scans/ -d png:out/

  # Page count only
  rasterprint --inspect-only report.pdf

  # JSON job report on stdout, or written to a file
  rasterprint --json report.pdf -d urf:report.urf > report.json
  rasterprint report.pdf -d urf:report.urf --report report.json

  # Render with pdfium instead of poppler
  rasterprint --backend pdfium report.pdf -d png:out/

DEVICES (see --list-devices):
  urf:<path>   Apple Raster (URF) spool file
  png:<dir>    one page-NNNN.png per printed page
  There is no default device: pass --device or set RASTERPRINT_DEVICE.
  Folder runs write each document apart: png:<dir>/<stem>/, urf:<name>-<stem>.urf

EXIT STATUS:
  0  every selected page was printed
  1  the job failed, was cancelled, or some pages could not be printed

ENVIRONMENT VARIABLES:
  RASTERPRINT_*    defaults for the flags above (see --help for names)
  POPPLER_PATH     directory holding pdftoppm and pdfinfo
  PDFIUM_LIB_PATH  pdfium shared library, or the directory holding it
  RUST_LOG         tracing filter, overrides -v / -q
"#;

/// Print PDF files and URLs through a parallel rasterising pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "rasterprint",
    version,
    about = "Print PDF files and URLs by rasterising pages in parallel",
    long_about = "Rasterise the pages of a PDF document (local file, URL, or a folder of PDFs) \
on several workers at once and stream them to a raster device strictly in page order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path, folder of PDFs, or HTTP/HTTPS URL.
    input: Option<String>,

    /// List the supported output devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Output device: urf:<path> or png:<dir>.
    #[arg(short, long, env = "RASTERPRINT_DEVICE")]
    device: Option<String>,

    /// Rendering DPI (72–1200).
    #[arg(long, env = "RASTERPRINT_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=1200))]
    dpi: u32,

    /// Number of parallel conversion workers.
    #[arg(short, long, env = "RASTERPRINT_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Maximum pages converted but not yet printed.
    #[arg(long, env = "RASTERPRINT_MAX_PENDING", default_value_t = 32)]
    max_pending: usize,

    /// Rasteriser: poppler (parallel, needs pdftoppm) or pdfium.
    #[arg(long, env = "RASTERPRINT_BACKEND", default_value = "poppler")]
    backend: String,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "RASTERPRINT_PAGES", default_value = "all")]
    pages: String,

    /// Paper size: a4, letter, legal.
    #[arg(long, env = "RASTERPRINT_PAPER", default_value = "a4")]
    paper: String,

    /// Blank border inside the paper, in millimetres.
    #[arg(long, env = "RASTERPRINT_MARGIN_MM", default_value_t = 0.0)]
    margin_mm: f32,

    /// Per-page rasterisation timeout in seconds.
    #[arg(long, env = "RASTERPRINT_PAGE_TIMEOUT")]
    page_timeout: Option<u64>,

    /// Job title announced to the device.
    #[arg(long, env = "RASTERPRINT_TITLE")]
    title: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "RASTERPRINT_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "RASTERPRINT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the job report as JSON on stdout.
    #[arg(long, env = "RASTERPRINT_JSON")]
    json: bool,

    /// Also write the job report as JSON to this file.
    #[arg(long, env = "RASTERPRINT_REPORT")]
    report: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "RASTERPRINT_NO_PROGRESS")]
    no_progress: bool,

    /// Print the page count only, no printing.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RASTERPRINT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RASTERPRINT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs when it is shown.
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

    if cli.list_devices {
        for (_, form, about) in BACKENDS {
            println!("{:<12} {}", form, about);
        }
        return Ok(ExitCode::SUCCESS);
    }
    let input = cli
        .input
        .clone()
        .context("No input given; pass a PDF file, folder or URL")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let info = inspect(&input, &config)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("File:   {}", info.document);
            println!("Pages:  {}", info.page_count);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let device = cli
        .device
        .clone()
        .context("No output device given; pass --device urf:<path> or png:<dir>")?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PrintProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Ctrl-C cancels the job ───────────────────────────────────────────
    let control = JobControl::new();
    {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} cancelling…", cyan("⚠"));
                control.cancel();
            }
        });
    }

    // ── Folder mode ──────────────────────────────────────────────────────
    if classify(&input) == InputKind::Directory {
        let entries = print_folder(&input, &device, &config, &control)
            .await
            .context("Folder print failed")?;
        if let Some(ref path) = cli.report {
            write_json(&entries, path)?;
        }
        let ok = entries
            .iter()
            .all(|e| e.report.as_ref().is_some_and(JobReport::is_complete_success));
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("Failed to serialise reports")?
            );
        } else if !cli.quiet {
            for entry in &entries {
                match (&entry.report, &entry.error) {
                    (Some(report), _) => eprintln!("{}  {}", summary_line(report), dim(&entry.document)),
                    (None, Some(e)) => eprintln!("{} {}  {}", red("✘"), entry.document, red(e)),
                    (None, None) => {}
                }
            }
        }
        return Ok(exit_code(ok));
    }

    // ── Single document ──────────────────────────────────────────────────
    let report = print_file_with_control(&input, &device, &config, &control)
        .await
        .context("Print failed")?;
    if let Some(ref path) = cli.report {
        write_json(&report, path)?;
    }

    if cli.json {
        println!("{}", report.to_json());
    } else if !cli.quiet && !show_progress {
        // The progress callback already printed the summary otherwise.
        eprintln!("{}", summary_line(&report));
    }
    if !cli.quiet {
        for failure in &report.failed_pages {
            if !show_progress {
                eprintln!("  {} {}", red("✗"), failure.error);
            }
        }
        if let Some(ref e) = report.fatal_error {
            eprintln!("{} {}", red("Error:"), e);
        }
    }
    Ok(exit_code(report.is_complete_success()))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn summary_line(report: &JobReport) -> String {
    let printed = report.succeeded_pages.len();
    let mark = match report.phase {
        JobPhase::Closed if report.failed_pages.is_empty() => green("✔"),
        JobPhase::Closed => cyan("⚠"),
        _ => red("✘"),
    };
    let mut line = format!(
        "{}  {}/{} pages printed  {}ms  →  {}",
        mark,
        bold(&printed.to_string()),
        report.total_pages,
        report.elapsed_ms,
        bold(&report.device),
    );
    if !report.failed_pages.is_empty() {
        line.push_str(&format!("  ({} failed)", red(&report.failed_pages.len().to_string())));
    }
    if !report.skipped_pages.is_empty() {
        line.push_str(&format!("  ({} skipped)", report.skipped_pages.len()));
    }
    line
}

/// Map CLI args to `PrintConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PrintConfig> {
    let pages: PageSelection = cli.pages.parse().context("Invalid --pages")?;
    let media: MediaSize = cli.paper.parse().context("Invalid --paper")?;
    let backend: RasterBackend = cli.backend.parse().context("Invalid --backend")?;

    let mut builder = PrintConfig::builder()
        .dpi(cli.dpi)
        .worker_count(cli.workers)
        .max_pending_pages(cli.max_pending)
        .pages(pages)
        .media(media)
        .raster_backend(backend)
        .margin_mm(cli.margin_mm)
        .download_timeout_secs(cli.download_timeout);
    if let Some(secs) = cli.page_timeout {
        builder = builder.page_timeout_secs(secs);
    }
    if let Some(ref title) = cli.title {
        builder = builder.job_title(title.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}
