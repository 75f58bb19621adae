//! Error types for the rasterprint library.
//!
//! Failures fall into two tiers:
//!
//! * [`PrintError`] is **fatal**. The job cannot proceed (bad input file,
//!   printer unavailable, device failure mid-job, cancellation). Returned as
//!   `Err(PrintError)` from the top-level `print*` functions, or carried as
//!   the terminal error of a [`crate::output::JobReport`] once workers have
//!   started.
//!
//! * [`PageError`] is **non-fatal**. A single page could not be rasterised.
//!   The page is recorded in the report's failure list and every other page
//!   is still printed.
//!
//! Two collaborator errors sit underneath: [`RasterError`] from a
//! [`crate::pipeline::raster::Rasterizer`] and [`DeviceError`] from a
//! [`crate::device::DeviceSession`]. The pipeline maps them onto the two
//! tiers above.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the rasterprint library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::JobReport::failed_pages`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PrintError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The page count could not be read: corrupt document or missing engine.
    #[error("Cannot read document '{path}': {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened fine but has no pages.
    #[error("Document '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// The page selection does not match any page of the document.
    #[error("No pages selected (document has {total} pages)")]
    NoPagesSelected { total: u32 },

    // ── Device errors ─────────────────────────────────────────────────────
    /// The device session could not be opened.
    #[error("Printer '{device}' is unavailable: {detail}")]
    DeviceUnavailable { device: String, detail: String },

    /// The device failed while the job was open; the job was aborted.
    #[error("Printer '{device}' failed{}: {detail}", on_page(.page))]
    DeviceFailed {
        device: String,
        page: Option<u32>,
        detail: String,
    },

    /// The device name could not be parsed into a known backend.
    #[error("Unknown device '{spec}': {hint}")]
    InvalidDevice { spec: String, hint: String },

    // ── Job control ───────────────────────────────────────────────────────
    /// The job was cancelled before every page was printed.
    #[error("Print job cancelled after {emitted}/{total} pages")]
    Cancelled { emitted: u32, total: u32 },

    /// Some pages printed but at least one failed.
    ///
    /// Returned by [`crate::output::JobReport::into_result`] when the caller
    /// wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed to print")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: u32,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the JSON job report.
    #[error("Failed to write report '{path}': {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn on_page(page: &Option<u32>) -> String {
    page.map(|p| format!(" on page {p}")).unwrap_or_default()
}

impl PrintError {
    /// Errors raised while resolving or opening the document, before any
    /// conversion worker starts.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PrintError::FileNotFound { .. }
                | PrintError::PermissionDenied { .. }
                | PrintError::InvalidInput { .. }
                | PrintError::DownloadFailed { .. }
                | PrintError::DownloadTimeout { .. }
                | PrintError::NotAPdf { .. }
                | PrintError::CorruptDocument { .. }
                | PrintError::PasswordRequired { .. }
                | PrintError::WrongPassword { .. }
                | PrintError::EmptyDocument { .. }
                | PrintError::NoPagesSelected { .. }
        )
    }

    /// Device-level failures that abort the whole job.
    pub fn is_fatal_device_error(&self) -> bool {
        matches!(
            self,
            PrintError::DeviceUnavailable { .. } | PrintError::DeviceFailed { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// The page is skipped on the device and listed in the job report; the rest
/// of the document keeps printing.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The rasteriser rejected or failed on this page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    ConversionFailed { page: u32, detail: String },

    /// Rasterisation exceeded the per-page timeout.
    #[error("Page {page}: rasterisation timed out after {secs}s")]
    Timeout { page: u32, secs: u64 },

    /// The conversion task itself died (panic inside the rasteriser).
    #[error("Page {page}: conversion worker failed: {detail}")]
    WorkerFailed { page: u32, detail: String },
}

impl PageError {
    /// Document page number the error refers to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::ConversionFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::WorkerFailed { page, .. } => *page,
        }
    }
}

/// Errors reported by a [`crate::pipeline::raster::Rasterizer`].
#[derive(Debug, Error)]
pub enum RasterError {
    /// Requested page does not exist in the document.
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// The document could not be parsed.
    #[error("document is corrupt: {0}")]
    Corrupt(String),

    /// The document is encrypted and no password was supplied.
    #[error("document requires a password")]
    PasswordRequired,

    /// The supplied password was rejected.
    #[error("wrong password")]
    WrongPassword,

    /// The rendering engine (pdfium) could not be loaded.
    #[error("rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine loaded the page but rendering failed.
    #[error("render failed: {0}")]
    Render(String),
}

/// Errors reported by a [`crate::device::PrintDevice`] or its session.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device cannot be reached or refused the session.
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// Writing to the device or its spool failed.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The page could not be encoded into the device format.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// A call arrived out of bracket order (e.g. `draw_image` with no open page).
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}
