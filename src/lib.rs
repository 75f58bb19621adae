//! # rasterprint
//!
//! Print PDF documents by rasterising pages in parallel and streaming them
//! to an output device in strict page order.
//!
//! Rasterising a page is the slow part of printing. This crate spreads it
//! over a pool of workers, lets pages finish in any order, and reorders them
//! so the device only ever sees page 1, then 2, then 3. A page that fails to
//! rasterise is skipped without holding up the rest; a device that fails
//! stops the job and the partial job is aborted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Select   page selection → ordered page tasks
//!  ├─ 3. Convert  N workers rasterise via poppler or pdfium (spawn_blocking)
//!  ├─ 4. Reorder  hold early pages until their predecessors arrive
//!  ├─ 5. Emit     one device job: fit, centre and draw each page
//!  └─ 6. Report   JobReport with printed / failed / skipped pages
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rasterprint::{print_file, PrintConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PrintConfig::builder().dpi(300).worker_count(4).build()?;
//!     let report = print_file("document.pdf", "urf:/tmp/document.urf", &config).await?;
//!     eprintln!("{} printed, {} failed", report.succeeded_pages.len(), report.failed_pages.len());
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Devices
//!
//! | Name         | Output                                   |
//! |--------------|------------------------------------------|
//! | `urf:<path>` | Apple Raster (URF) spool file            |
//! | `png:<dir>`  | one `page-NNNN.png` per printed page     |
//!
//! [`print_folder`] gives each document its own output: `png:<dir>/<stem>/`
//! and `urf:<path-stem>-<stem>.urf`.
//!
//! Implement [`PrintDevice`] and hand it to [`PrintPipeline`] to print
//! elsewhere.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rasterprint` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rasterprint = { version = "0.1", default-features = false }
//! ```
//!
//! ## Rasteriser backends
//!
//! By default each page is rendered by a `pdftoppm` process (poppler-utils),
//! so workers render in parallel. Set `POPPLER_PATH` to the directory
//! holding `pdftoppm` and `pdfinfo` if they are not on `PATH`.
//!
//! [`RasterBackend::Pdfium`] renders in-process instead. Set
//! `PDFIUM_LIB_PATH` to a pdfium shared library, or to the directory holding
//! it; otherwise the system library is used. pdfium renders one page at a
//! time.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod device;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod print;
pub mod progress;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MediaSize, PageSelection, PrintConfig, PrintConfigBuilder, RasterBackend};
pub use device::{open_device, DeviceSession, DeviceSpec, JobInfo, PrintDevice, Rect, Surface};
pub use error::{DeviceError, PageError, PrintError, RasterError};
pub use output::{write_json, JobPhase, JobReport, JobStatus, PageFailure};
pub use pipeline::coordinator::{JobControl, PrintPipeline};
pub use pipeline::poppler::PopplerRasterizer;
pub use pipeline::raster::{rasterizer_for, PdfiumRasterizer, Rasterizer};
pub use print::{
    inspect, print_file, print_file_sync, print_file_with_control, print_folder, print_from_bytes,
    DocumentInfo, FolderEntry,
};
pub use progress::{NoopProgressCallback, PrintProgressCallback, ProgressCallback};
pub use service::{JobId, JobRecord, PrintRequest, PrintService};
