//! Top-level entry points.
//!
//! These wire the configured rasteriser and a device named by string into a
//! [`PrintPipeline`]. Use the pipeline directly to plug in another
//! [`Rasterizer`] or [`PrintDevice`].

use crate::config::PrintConfig;
use crate::device::{open_device, DeviceSpec, PrintDevice};
use crate::error::PrintError;
use crate::output::JobReport;
use crate::pipeline::coordinator::{document_error, JobControl, PrintPipeline};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::raster::{rasterizer_for, Rasterizer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Print a PDF file or URL on the device named `device`.
///
/// # Returns
/// `Ok(JobReport)` once the job reached `Closed` or `Failed`. Check
/// `report.phase`, or call [`JobReport::into_result`] to turn page failures
/// into an error.
///
/// # Errors
/// Returns `Err(PrintError)` for problems found before printing starts:
/// unknown device, missing or unreadable file, failed download, empty page
/// selection.
///
/// # Example
/// ```rust,no_run
/// use rasterprint::{print_file, PrintConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let report = print_file("invoice.pdf", "urf:/var/spool/invoice.urf", &PrintConfig::default()).await?;
/// println!("{} pages printed", report.succeeded_pages.len());
/// # Ok(())
/// # }
/// ```
pub async fn print_file(
    input: impl AsRef<str>,
    device: &str,
    config: &PrintConfig,
) -> Result<JobReport, PrintError> {
    print_file_with_control(input, device, config, &JobControl::new()).await
}

/// [`print_file`] with a caller-held [`JobControl`] for cancellation and
/// status polling.
pub async fn print_file_with_control(
    input: impl AsRef<str>,
    device: &str,
    config: &PrintConfig,
    control: &JobControl,
) -> Result<JobReport, PrintError> {
    let device = open_device(device, config.media, config.dpi)?;
    let resolved = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    print_resolved(&resolved, rasterizer_for(config), device, config, control).await
}

/// Synchronous wrapper around [`print_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn print_file_sync(
    input: impl AsRef<str>,
    device: &str,
    config: &PrintConfig,
) -> Result<JobReport, PrintError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PrintError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(print_file(input, device, config))
}

/// Print PDF bytes held in memory.
///
/// The bytes are written to a managed temporary file, removed on return.
pub async fn print_from_bytes(
    bytes: &[u8],
    device: &str,
    config: &PrintConfig,
) -> Result<JobReport, PrintError> {
    let device = open_device(device, config.media, config.dpi)?;
    let resolved = input::resolve_bytes(bytes)?;
    print_resolved(
        &resolved,
        rasterizer_for(config),
        device,
        config,
        &JobControl::new(),
    )
    .await
}

/// Outcome of one file of a folder run.
#[derive(Debug, Serialize, Deserialize)]
pub struct FolderEntry {
    pub document: String,
    /// Present when printing started.
    pub report: Option<JobReport>,
    /// Present when the file was rejected before printing.
    pub error: Option<String>,
}

/// Print every `*.pdf` directly inside `dir`, in file-name order, one job at
/// a time.
///
/// A file that fails is logged and the next one continues. Each file is a
/// separate device job with output of its own: `png:<dir>` writes
/// `<dir>/<file-stem>/page-NNNN.png` and `urf:<name>.urf` writes
/// `<name>-<file-stem>.urf` next to it.
pub async fn print_folder(
    dir: impl AsRef<Path>,
    device: &str,
    config: &PrintConfig,
    control: &JobControl,
) -> Result<Vec<FolderEntry>, PrintError> {
    let spec = DeviceSpec::parse(device)?;
    print_each(dir.as_ref(), &spec, rasterizer_for(config), config, control).await
}

async fn print_each(
    dir: &Path,
    spec: &DeviceSpec,
    rasterizer: Arc<dyn Rasterizer>,
    config: &PrintConfig,
    control: &JobControl,
) -> Result<Vec<FolderEntry>, PrintError> {
    let files = input::list_pdfs(dir)?;
    info!("Printing {} PDFs from {}", files.len(), dir.display());

    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let document = path.display().to_string();
        if control.is_cancelled() {
            warn!("Folder run cancelled before '{}'", document);
            break;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document-{}", entries.len() + 1));
        let device = spec
            .for_document(&stem)
            .into_device(config.media, config.dpi);
        let outcome = match input::resolve_input(&document, config.download_timeout_secs).await {
            Ok(resolved) => {
                print_resolved(&resolved, Arc::clone(&rasterizer), device, config, control).await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(report) => entries.push(FolderEntry {
                document,
                report: Some(report),
                error: None,
            }),
            Err(e) => {
                warn!("Skipping '{}': {}", document, e);
                entries.push(FolderEntry {
                    document,
                    report: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(entries)
}

/// Basic facts about a document, without printing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document: String,
    pub page_count: u32,
}

/// Count the pages of a PDF file or URL.
pub async fn inspect(input: impl AsRef<str>, config: &PrintConfig) -> Result<DocumentInfo, PrintError> {
    let resolved = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    let rasterizer = rasterizer_for(config);
    let path = resolved.path().to_path_buf();
    let counted = tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
        .await
        .map_err(|e| PrintError::Internal(format!("Inspect task panicked: {}", e)))?;
    let page_count = counted.map_err(|e| document_error(resolved.path(), e))?;
    Ok(DocumentInfo {
        document: resolved.label(),
        page_count,
    })
}

async fn print_resolved(
    resolved: &ResolvedInput,
    rasterizer: Arc<dyn Rasterizer>,
    device: Arc<dyn PrintDevice>,
    config: &PrintConfig,
    control: &JobControl,
) -> Result<JobReport, PrintError> {
    let pipeline = PrintPipeline::new(rasterizer, device, config.clone());
    pipeline
        .print_document_as(resolved.path(), &resolved.label(), control)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RasterError;
    use image::{DynamicImage, Rgb, RgbImage};

    /// `a.pdf` has two red pages, `b.pdf` one blue page.
    struct Swatches;

    impl Swatches {
        fn colour(document: &Path) -> Rgb<u8> {
            if document.ends_with("a.pdf") {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        }
    }

    impl Rasterizer for Swatches {
        fn page_count(&self, document: &Path) -> Result<u32, RasterError> {
            Ok(if document.ends_with("a.pdf") { 2 } else { 1 })
        }

        fn rasterize(&self, document: &Path, _page: u32, _dpi: u32) -> Result<DynamicImage, RasterError> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                10,
                10,
                Self::colour(document),
            )))
        }
    }

    fn centre(path: &Path) -> Rgb<u8> {
        let page = image::open(path).unwrap().to_rgb8();
        *page.get_pixel(page.width() / 2, page.height() / 2)
    }

    #[tokio::test]
    async fn unknown_device_fails_before_input() {
        let err = print_file("missing.pdf", "lpt:1", &PrintConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrintError::InvalidDevice { .. }));
    }

    #[tokio::test]
    async fn missing_input_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = format!("png:{}", dir.path().display());
        let err = print_file("/no/such/file.pdf", &device, &PrintConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn bytes_must_be_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let device = format!("png:{}", dir.path().display());
        let err = print_from_bytes(b"not a pdf", &device, &PrintConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrintError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn empty_folder_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let device = format!("png:{}", out.path().display());
        let entries = print_folder(dir.path(), &device, &PrintConfig::default(), &JobControl::new())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn folder_documents_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pdf", "b.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4\n").unwrap();
        }
        let out = tempfile::tempdir().unwrap();
        let spec = DeviceSpec::PngDir(out.path().to_path_buf());
        let config = PrintConfig::builder().dpi(72).worker_count(2).build().unwrap();

        let entries = print_each(dir.path(), &spec, Arc::new(Swatches), &config, &JobControl::new())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert!(entry.error.is_none(), "{:?}", entry.error);
        }

        let red = Rgb([255, 0, 0]);
        assert_eq!(centre(&out.path().join("a/page-0001.png")), red);
        assert_eq!(centre(&out.path().join("a/page-0002.png")), red);
        assert_eq!(centre(&out.path().join("b/page-0001.png")), Rgb([0, 0, 255]));
        assert!(!out.path().join("b/page-0002.png").exists());
        assert!(!out.path().join("page-0001.png").exists());
    }

    #[tokio::test]
    async fn folder_spools_one_urf_file_per_document() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pdf", "b.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4\n").unwrap();
        }
        let out = tempfile::tempdir().unwrap();
        let spec = DeviceSpec::Urf(out.path().join("batch.urf"));
        let config = PrintConfig::builder().dpi(72).build().unwrap();

        print_each(dir.path(), &spec, Arc::new(Swatches), &config, &JobControl::new())
            .await
            .unwrap();
        assert!(out.path().join("batch-a.urf").exists());
        assert!(out.path().join("batch-b.urf").exists());
        assert!(!out.path().join("batch.urf").exists());
    }
}
