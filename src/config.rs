//! Configuration types for printing a document.
//!
//! Every knob of a print job lives in [`PrintConfig`], built via
//! [`PrintConfigBuilder`]. One struct makes configs cheap to clone into
//! worker tasks and easy to log when two runs behave differently.
//!
//! The builder clamps each setter to a sane range and [`PrintConfigBuilder::build`]
//! validates the combination, so a `PrintConfig` in hand is always usable.

use crate::error::PrintError;
use crate::progress::PrintProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for one print job.
///
/// # Example
/// ```rust
/// use rasterprint::PrintConfig;
///
/// let config = PrintConfig::builder()
///     .dpi(300)
///     .worker_count(8)
///     .max_pending_pages(16)
///     .build()
///     .unwrap();
/// assert_eq!(config.worker_count, 8);
/// ```
#[derive(Clone)]
pub struct PrintConfig {
    /// Rasterisation DPI. Range: 72–1200. Default: 300.
    ///
    /// Devices compose pages at this resolution too, so it is also the
    /// resolution of the spooled output.
    pub dpi: u32,

    /// Number of parallel conversion workers. Default: 4.
    pub worker_count: usize,

    /// Maximum number of pages converted but not yet emitted. Default: 32.
    ///
    /// When page 1 is slow and later pages finish early, completed pages
    /// wait in the reorder buffer. Once this many pages are held, workers
    /// stop pulling new tasks until the device catches up.
    pub max_pending_pages: usize,

    /// Per-page rasterisation timeout in seconds. Default: none.
    ///
    /// A page that exceeds it is recorded as failed; the render thread is
    /// left to finish in the background.
    pub page_timeout_secs: Option<u64>,

    /// Engine that renders pages. Default: poppler.
    pub raster_backend: RasterBackend,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 10 000.
    pub max_rendered_pixels: u32,

    /// Blank border kept inside the device surface, in millimetres. Default: 0.
    pub margin_mm: f32,

    /// Physical media the device composes pages on. Default: A4.
    pub media: MediaSize,

    /// Which pages of the document to print. Default: all.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Job title announced to the device. Default: the document file name.
    pub job_title: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional observer for per-page progress events.
    pub progress_callback: Option<Arc<dyn PrintProgressCallback>>,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            worker_count: 4,
            max_pending_pages: 32,
            page_timeout_secs: None,
            raster_backend: RasterBackend::default(),
            max_rendered_pixels: 10_000,
            margin_mm: 0.0,
            media: MediaSize::default(),
            pages: PageSelection::default(),
            password: None,
            job_title: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PrintConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintConfig")
            .field("dpi", &self.dpi)
            .field("worker_count", &self.worker_count)
            .field("max_pending_pages", &self.max_pending_pages)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("raster_backend", &self.raster_backend)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("margin_mm", &self.margin_mm)
            .field("media", &self.media)
            .field("pages", &self.pages)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("job_title", &self.job_title)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PrintProgressCallback>"),
            )
            .finish()
    }
}

impl PrintConfig {
    /// Create a new builder for `PrintConfig`.
    pub fn builder() -> PrintConfigBuilder {
        PrintConfigBuilder {
            config: Self::default(),
        }
    }

    /// Margin converted to device pixels at the job DPI.
    pub fn margin_px(&self) -> u32 {
        mm_to_px(self.margin_mm, self.dpi)
    }
}

/// Builder for [`PrintConfig`].
#[derive(Debug)]
pub struct PrintConfigBuilder {
    config: PrintConfig,
}

impl PrintConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 1200);
        self
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n.max(1);
        self
    }

    pub fn max_pending_pages(mut self, n: usize) -> Self {
        self.config.max_pending_pages = n.max(1);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = Some(secs.max(1));
        self
    }

    pub fn raster_backend(mut self, backend: RasterBackend) -> Self {
        self.config.raster_backend = backend;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn margin_mm(mut self, mm: f32) -> Self {
        self.config.margin_mm = mm.clamp(0.0, 50.0);
        self
    }

    pub fn media(mut self, media: MediaSize) -> Self {
        self.config.media = media;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn job_title(mut self, title: impl Into<String>) -> Self {
        self.config.job_title = Some(title.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn PrintProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PrintConfig, PrintError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 1200 {
            return Err(PrintError::InvalidConfig(format!(
                "DPI must be 72–1200, got {}",
                c.dpi
            )));
        }
        if c.worker_count == 0 {
            return Err(PrintError::InvalidConfig(
                "Worker count must be ≥ 1".into(),
            ));
        }
        if c.max_pending_pages == 0 {
            return Err(PrintError::InvalidConfig(
                "max_pending_pages must be ≥ 1".into(),
            ));
        }
        let (w, h) = c.media.pixels(c.dpi);
        let margin = c.margin_px();
        if margin * 2 >= w.min(h) {
            return Err(PrintError::InvalidConfig(format!(
                "margin of {}mm leaves no printable area on {}",
                c.margin_mm, c.media
            )));
        }
        Ok(self.config)
    }
}

pub(crate) fn mm_to_px(mm: f32, dpi: u32) -> u32 {
    (mm / 25.4 * dpi as f32).round() as u32
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Engine used to rasterise pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterBackend {
    /// `pdftoppm` subprocess per page. (default)
    #[default]
    Poppler,
    /// pdfium linked in-process; renders one page at a time.
    Pdfium,
}

impl fmt::Display for RasterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterBackend::Poppler => f.write_str("poppler"),
            RasterBackend::Pdfium => f.write_str("pdfium"),
        }
    }
}

impl FromStr for RasterBackend {
    type Err = PrintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "poppler" => Ok(RasterBackend::Poppler),
            "pdfium" => Ok(RasterBackend::Pdfium),
            other => Err(PrintError::InvalidConfig(format!(
                "unknown raster backend '{other}' (expected poppler or pdfium)"
            ))),
        }
    }
}

/// Physical media size a device composes pages on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaSize {
    /// 210 × 297 mm. (default)
    #[default]
    A4,
    /// 8.5 × 11 in.
    Letter,
    /// 8.5 × 14 in.
    Legal,
}

impl MediaSize {
    /// Width and height in inches.
    pub fn inches(&self) -> (f32, f32) {
        match self {
            MediaSize::A4 => (210.0 / 25.4, 297.0 / 25.4),
            MediaSize::Letter => (8.5, 11.0),
            MediaSize::Legal => (8.5, 14.0),
        }
    }

    /// Surface size in device pixels at `dpi`.
    pub fn pixels(&self, dpi: u32) -> (u32, u32) {
        let (w, h) = self.inches();
        (
            (w * dpi as f32).round() as u32,
            (h * dpi as f32).round() as u32,
        )
    }
}

impl fmt::Display for MediaSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSize::A4 => f.write_str("a4"),
            MediaSize::Letter => f.write_str("letter"),
            MediaSize::Legal => f.write_str("legal"),
        }
    }
}

impl FromStr for MediaSize {
    type Err = PrintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a4" => Ok(MediaSize::A4),
            "letter" => Ok(MediaSize::Letter),
            "legal" => Ok(MediaSize::Legal),
            other => Err(PrintError::InvalidConfig(format!(
                "unknown media size '{other}' (expected a4, letter or legal)"
            ))),
        }
    }
}

/// Specifies which pages of the PDF to print.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Print all pages (default).
    #[default]
    All,
    /// Print a single page (1-indexed).
    Single(u32),
    /// Print a contiguous range of pages (1-indexed, inclusive).
    Range(u32, u32),
    /// Print specific pages (1-indexed, deduplicated).
    Set(Vec<u32>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// document page numbers that exist in a document of `total_pages`.
    pub fn to_pages(&self, total_pages: u32) -> Vec<u32> {
        let mut pages: Vec<u32> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .copied()
                .filter(|&p| p >= 1 && p <= total_pages)
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

impl FromStr for PageSelection {
    type Err = PrintError;

    /// Parse `all`, `5`, `3-15` or `1,3,5,7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let invalid = |detail: String| PrintError::InvalidConfig(format!("pages: {detail}"));
        let parse_page = |p: &str| -> Result<u32, PrintError> {
            let n: u32 = p
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid page number '{}'", p.trim())))?;
            if n < 1 {
                return Err(invalid(format!("pages are 1-indexed, got {n}")));
            }
            Ok(n)
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }

        if let Some((start, end)) = s.split_once('-') {
            let start = parse_page(start)?;
            let end = parse_page(end)?;
            if start > end {
                return Err(invalid(format!(
                    "range '{start}-{end}': start must be <= end"
                )));
            }
            return Ok(PageSelection::Range(start, end));
        }

        if s.contains(',') {
            let pages = s
                .split(',')
                .map(parse_page)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }

        Ok(PageSelection::Single(parse_page(&s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_tool() {
        let c = PrintConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.worker_count, 4);
        assert!(c.page_timeout_secs.is_none());
        assert_eq!(c.raster_backend, RasterBackend::Poppler);
    }

    #[test]
    fn raster_backend_parse() {
        assert_eq!("PDFium".parse::<RasterBackend>().unwrap(), RasterBackend::Pdfium);
        assert_eq!(RasterBackend::Poppler.to_string(), "poppler");
        assert!("ghostscript".parse::<RasterBackend>().is_err());
    }

    #[test]
    fn builder_clamps() {
        let c = PrintConfig::builder()
            .dpi(5000)
            .worker_count(0)
            .max_pending_pages(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 1200);
        assert_eq!(c.worker_count, 1);
        assert_eq!(c.max_pending_pages, 1);
    }

    #[test]
    fn margin_must_leave_printable_area() {
        let mut builder = PrintConfig::builder().dpi(72);
        builder.config.margin_mm = 200.0;
        assert!(matches!(builder.build(), Err(PrintError::InvalidConfig(_))));
    }

    #[test]
    fn media_pixels() {
        assert_eq!(MediaSize::Letter.pixels(100), (850, 1100));
        assert_eq!(MediaSize::A4.pixels(300), (2480, 3508));
        assert_eq!("Legal".parse::<MediaSize>().unwrap(), MediaSize::Legal);
        assert!("tabloid".parse::<MediaSize>().is_err());
    }

    #[test]
    fn page_selection_to_pages() {
        assert_eq!(PageSelection::All.to_pages(3), vec![1, 2, 3]);
        assert_eq!(PageSelection::Single(3).to_pages(5), vec![3]);
        assert!(PageSelection::Single(6).to_pages(5).is_empty());
        assert_eq!(PageSelection::Range(2, 9).to_pages(4), vec![2, 3, 4]);
        assert_eq!(PageSelection::Set(vec![5, 1, 5, 9]).to_pages(5), vec![1, 5]);
    }

    #[test]
    fn page_selection_parse() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("7".parse::<PageSelection>().unwrap(), PageSelection::Single(7));
        assert_eq!(
            "3-15".parse::<PageSelection>().unwrap(),
            PageSelection::Range(3, 15)
        );
        assert_eq!(
            "1, 3,5".parse::<PageSelection>().unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
        assert!("0".parse::<PageSelection>().is_err());
        assert!("9-2".parse::<PageSelection>().is_err());
        assert!("x".parse::<PageSelection>().is_err());
    }
}
