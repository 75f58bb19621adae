//! Page rasterisation: the [`Rasterizer`] seam and its pdfium backend.
//!
//! Every call through this trait is made from `tokio::task::spawn_blocking`,
//! so implementations are plain blocking functions. [`rasterizer_for`] picks
//! the backend named by [`PrintConfig::raster_backend`]:
//!
//! * [`RasterBackend::Poppler`] (default): one `pdftoppm` process per page,
//!   see [`super::poppler`]. Pages render in parallel.
//! * [`RasterBackend::Pdfium`]: in-process. pdfium is not thread safe and
//!   `pdfium-render` holds a process-wide lock for as long as a [`Pdfium`]
//!   lives, so pages render one at a time whatever the worker count. The
//!   binding is made per call so that a render holds the lock only while it
//!   runs; workers still overlap emission with rendering.
//!
//! `max_rendered_pixels` caps the longest edge of a rendered page whatever
//! its physical size: an A0 poster at 300 DPI would otherwise come out at
//! 10,000 × 14,000 px.

use super::poppler::PopplerRasterizer;
use crate::config::{PrintConfig, RasterBackend};
use crate::error::RasterError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Turns one page of a document into an image.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in `document`.
    fn page_count(&self, document: &Path) -> Result<u32, RasterError>;

    /// Render 1-indexed `page` of `document` at `dpi`.
    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<DynamicImage, RasterError>;
}

/// The rasteriser selected by `config`.
pub fn rasterizer_for(config: &PrintConfig) -> Arc<dyn Rasterizer> {
    match config.raster_backend {
        RasterBackend::Poppler => Arc::new(PopplerRasterizer::new(
            config.password.clone(),
            config.max_rendered_pixels,
        )),
        RasterBackend::Pdfium => Arc::new(PdfiumRasterizer::new(
            config.password.clone(),
            config.max_rendered_pixels,
        )),
    }
}

/// [`Rasterizer`] backed by pdfium.
///
/// The library is located through `PDFIUM_LIB_PATH` (a directory holding the
/// platform library, or the library file itself) and falls back to the
/// system library search path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    password: Option<String>,
    max_rendered_pixels: u32,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            password,
            max_rendered_pixels,
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Use the pdfium library at `path` instead of `PDFIUM_LIB_PATH`.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RasterError::EngineUnavailable(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(&'a self, pdfium: &'a Pdfium, document: &Path) -> Result<PdfDocument<'a>, RasterError> {
        pdfium
            .load_pdf_from_file(document, self.password.as_deref())
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if self.password.is_some() {
                        RasterError::WrongPassword
                    } else {
                        RasterError::PasswordRequired
                    }
                } else {
                    RasterError::Corrupt(err_str)
                }
            })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self, document: &Path) -> Result<u32, RasterError> {
        let pdfium = self.bind()?;
        let doc = self.load(&pdfium, document)?;
        Ok(u32::from(doc.pages().len()))
    }

    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<DynamicImage, RasterError> {
        let pdfium = self.bind()?;
        let doc = self.load(&pdfium, document)?;
        let pages = doc.pages();
        let total = u32::from(pages.len());
        if page == 0 || page > total {
            return Err(RasterError::PageOutOfRange { page, total });
        }

        let max = self.max_rendered_pixels.max(1) as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max)
            .set_maximum_height(max);

        let pdf_page = pages
            .get((page - 1) as u16)
            .map_err(|e| RasterError::Render(format!("{:?}", e)))?;
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| RasterError::Render(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        debug!(
            "Rasterised page {} at {} dpi → {}x{} px",
            page,
            dpi,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_engine_unavailable() {
        let r = PdfiumRasterizer::new(None, 2000).with_library_path("/nonexistent/libpdfium.so");
        assert!(matches!(
            r.page_count(Path::new("whatever.pdf")),
            Err(RasterError::EngineUnavailable(_))
        ));
    }
}
