//! Poppler backend: every page is rendered by its own `pdftoppm` process.
//!
//! Processes share nothing, so N conversion workers render N pages at once.
//! The page count and page sizes come from `pdfinfo`. Both tools ship with
//! poppler-utils; `POPPLER_PATH` may name the directory holding them.

use super::raster::Rasterizer;
use crate::error::RasterError;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// [`Rasterizer`] that shells out to poppler-utils.
#[derive(Debug, Clone, Default)]
pub struct PopplerRasterizer {
    password: Option<String>,
    max_rendered_pixels: u32,
    bin_dir: Option<PathBuf>,
}

impl PopplerRasterizer {
    pub fn new(password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            password,
            max_rendered_pixels,
            bin_dir: std::env::var_os("POPPLER_PATH").map(PathBuf::from),
        }
    }

    /// Look for `pdftoppm` and `pdfinfo` in `dir` instead of `PATH`.
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    fn command(&self, tool: &str) -> Command {
        let program = match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        };
        let mut cmd = Command::new(program);
        if let Some(ref pw) = self.password {
            cmd.arg("-upw").arg(pw);
        }
        cmd
    }

    fn run(&self, tool: &str, mut cmd: Command) -> Result<Output, RasterError> {
        cmd.output().map_err(|e| {
            RasterError::EngineUnavailable(format!("cannot run {tool}: {e}"))
        })
    }

    /// Resolution for `page`: `dpi`, lowered so the longest edge stays
    /// within `max_rendered_pixels`.
    fn effective_dpi(&self, document: &Path, page: u32, dpi: u32) -> f64 {
        let mut cmd = self.command("pdfinfo");
        cmd.arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg(document);
        let size = self
            .run("pdfinfo", cmd)
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| parse_page_size(&String::from_utf8_lossy(&out.stdout), page));
        match size {
            Some((w, h)) => capped_dpi(dpi, w.max(h), self.max_rendered_pixels),
            None => f64::from(dpi),
        }
    }
}

impl Rasterizer for PopplerRasterizer {
    fn page_count(&self, document: &Path) -> Result<u32, RasterError> {
        let mut cmd = self.command("pdfinfo");
        cmd.arg(document);
        let out = self.run("pdfinfo", cmd)?;
        if !out.status.success() {
            return Err(open_failure(&out, self.password.is_some()));
        }
        parse_page_count(&String::from_utf8_lossy(&out.stdout))
            .ok_or_else(|| RasterError::Corrupt("pdfinfo reported no page count".into()))
    }

    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<DynamicImage, RasterError> {
        let resolution = self.effective_dpi(document, page, dpi);
        let mut cmd = self.command("pdftoppm");
        cmd.arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-r")
            .arg(format!("{resolution:.2}"))
            .arg("-png")
            .arg("-singlefile")
            .arg(document);
        let out = self.run("pdftoppm", cmd)?;
        if !out.status.success() {
            return Err(match open_failure(&out, self.password.is_some()) {
                RasterError::Corrupt(detail) => RasterError::Render(detail),
                other => other,
            });
        }
        let image = image::load_from_memory_with_format(&out.stdout, ImageFormat::Png)
            .map_err(|e| RasterError::Render(format!("pdftoppm output: {e}")))?;
        debug!(
            "Rasterised page {} at {:.0} dpi → {}x{} px",
            page,
            resolution,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

fn open_failure(out: &Output, has_password: bool) -> RasterError {
    let stderr = String::from_utf8_lossy(&out.stderr);
    if stderr.to_lowercase().contains("password") {
        if has_password {
            RasterError::WrongPassword
        } else {
            RasterError::PasswordRequired
        }
    } else {
        RasterError::Corrupt(stderr.trim().to_string())
    }
}

/// `Pages:` line of `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<u32> {
    info.lines()
        .find_map(|l| l.strip_prefix("Pages:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Size in points of `page` from `pdfinfo -f N -l N` output, e.g.
/// `Page    3 size: 612 x 792 pts (letter)`.
fn parse_page_size(info: &str, page: u32) -> Option<(f64, f64)> {
    info.lines().find_map(|line| {
        let rest = line.strip_prefix("Page")?.trim_start();
        let (num, rest) = rest.split_once(" size:")?;
        if num.trim().parse::<u32>().ok()? != page {
            return None;
        }
        let mut dims = rest.split_whitespace();
        let w = dims.next()?.parse().ok()?;
        let _x = dims.next()?;
        let h = dims.next()?.parse().ok()?;
        Some((w, h))
    })
}

fn capped_dpi(dpi: u32, longest_pts: f64, max_pixels: u32) -> f64 {
    let dpi = f64::from(dpi);
    if longest_pts <= 0.0 || max_pixels == 0 {
        return dpi;
    }
    dpi.min(f64::from(max_pixels) * 72.0 / longest_pts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "Producer:       pdfTeX\n\
                        Pages:          12\n\
                        Encrypted:      no\n\
                        Page    3 size: 612 x 792 pts (letter)\n\
                        Page    3 rot:  0\n";

    #[test]
    fn reads_page_count() {
        assert_eq!(parse_page_count(INFO), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn reads_size_of_requested_page_only() {
        assert_eq!(parse_page_size(INFO, 3), Some((612.0, 792.0)));
        assert_eq!(parse_page_size(INFO, 4), None);
    }

    #[test]
    fn large_pages_render_below_requested_dpi() {
        assert_eq!(capped_dpi(300, 792.0, 10_000), 300.0);
        // A0 long edge: 3370pt at 300 dpi would be 14,041px.
        let dpi = capped_dpi(300, 3370.0, 10_000);
        assert!((dpi * 3370.0 / 72.0 - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn missing_tools_are_engine_unavailable() {
        let r = PopplerRasterizer::new(None, 2000).with_bin_dir("/nonexistent/poppler/bin");
        assert!(matches!(
            r.page_count(Path::new("whatever.pdf")),
            Err(RasterError::EngineUnavailable(_))
        ));
        assert!(matches!(
            r.rasterize(Path::new("whatever.pdf"), 1, 72),
            Err(RasterError::EngineUnavailable(_))
        ));
    }
}
