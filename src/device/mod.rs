//! Output devices.
//!
//! A [`PrintDevice`] is a named, shareable handle to something that accepts
//! page images. Opening it yields a [`DeviceSession`], the one stream of
//! job and page brackets the device accepts at a time:
//!
//! ```text
//! begin_job ─┬─ begin_page ─ draw_image* ─ end_page ─┬─ end_job
//!            └───────────────── … ───────────────────┘
//!            (abort_job may replace end_job at any point)
//! ```
//!
//! All session calls block. The pipeline runs them on the blocking thread
//! pool.
//!
//! Two backends ship with the crate:
//!
//! | Spec          | Backend                 | Output                         |
//! |---------------|-------------------------|--------------------------------|
//! | `urf:<path>`  | [`urf::UrfSpoolDevice`] | Apple Raster spool stream      |
//! | `png:<dir>`   | [`png::PngDirectoryDevice`] | one `page-NNNN.png` per page |

pub mod png;
pub mod urf;

use crate::config::MediaSize;
use crate::error::{DeviceError, PrintError};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pixel dimensions of the printable surface of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl Surface {
    pub fn for_media(media: MediaSize, dpi: u32) -> Self {
        let (width, height) = media.pixels(dpi);
        Self { width, height, dpi }
    }
}

/// Placement of an image on a [`Surface`], in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What the device is told when a job begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub title: String,
    /// Pages selected for the job. Failed pages are never drawn, so the
    /// device may receive fewer.
    pub total_pages: u32,
}

/// A device that can open print sessions.
pub trait PrintDevice: Send + Sync {
    /// Name used in logs, reports and device locking.
    fn name(&self) -> &str;

    /// Acquire the device. Fails with [`DeviceError::Unavailable`] when the
    /// device cannot be reached.
    fn open_session(&self) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// One open stream to a device.
pub trait DeviceSession: Send {
    fn surface(&self) -> Surface;
    fn begin_job(&mut self, job: &JobInfo) -> Result<(), DeviceError>;
    fn begin_page(&mut self) -> Result<(), DeviceError>;
    fn draw_image(&mut self, image: &DynamicImage, rect: Rect) -> Result<(), DeviceError>;
    fn end_page(&mut self) -> Result<(), DeviceError>;
    fn end_job(&mut self) -> Result<(), DeviceError>;
    /// Drop the job. Must be safe to call at any point after `begin_job`,
    /// including with a page open.
    fn abort_job(&mut self) -> Result<(), DeviceError>;
}

// ── Device selection ─────────────────────────────────────────────────────

/// Device backends: scheme, name form and what it produces.
pub const BACKENDS: &[(&str, &str, &str)] = &[
    ("urf", "urf:<path>", "Apple Raster (URF) spool file"),
    ("png", "png:<dir>", "one page-NNNN.png per printed page"),
];

/// A parsed device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// Apple Raster spool file.
    Urf(PathBuf),
    /// Directory receiving one PNG per page.
    PngDir(PathBuf),
}

impl DeviceSpec {
    /// Parse `urf:<path>` or `png:<dir>`.
    pub fn parse(spec: &str) -> Result<Self, PrintError> {
        let invalid = |hint: &str| PrintError::InvalidDevice {
            spec: spec.to_string(),
            hint: hint.to_string(),
        };
        let (scheme, target) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected urf:<path> or png:<dir>"))?;
        if target.trim().is_empty() {
            return Err(invalid("missing target path after ':'"));
        }
        let target = PathBuf::from(target.trim());
        match scheme.trim().to_lowercase().as_str() {
            "urf" => Ok(DeviceSpec::Urf(target)),
            "png" => Ok(DeviceSpec::PngDir(target)),
            other => {
                let known: Vec<&str> = BACKENDS.iter().map(|(scheme, _, _)| *scheme).collect();
                Err(invalid(&format!(
                    "unknown backend '{other}' (supported: {})",
                    known.join(", ")
                )))
            }
        }
    }

    /// The same backend, aimed at output of its own for the document whose
    /// file stem is `stem`: `png:<dir>/<stem>` or `urf:<dir>/<name>-<stem>.urf`.
    pub fn for_document(&self, stem: &str) -> DeviceSpec {
        match self {
            DeviceSpec::PngDir(dir) => DeviceSpec::PngDir(dir.join(stem)),
            DeviceSpec::Urf(path) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "print".to_string());
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "urf".to_string());
                let parent = path.parent().unwrap_or(Path::new(""));
                DeviceSpec::Urf(parent.join(format!("{name}-{stem}.{ext}")))
            }
        }
    }

    /// Build the device, composing pages on `media` at `dpi`.
    pub fn into_device(self, media: MediaSize, dpi: u32) -> Arc<dyn PrintDevice> {
        let surface = Surface::for_media(media, dpi);
        match self {
            DeviceSpec::Urf(path) => Arc::new(urf::UrfSpoolDevice::new(path, surface)),
            DeviceSpec::PngDir(dir) => Arc::new(png::PngDirectoryDevice::new(dir, surface)),
        }
    }
}

/// Parse a device name and build the device in one step.
pub fn open_device(
    spec: &str,
    media: MediaSize,
    dpi: u32,
) -> Result<Arc<dyn PrintDevice>, PrintError> {
    Ok(DeviceSpec::parse(spec)?.into_device(media, dpi))
}

// ── Shared page composition ──────────────────────────────────────────────

/// A blank page sized to `surface`.
pub(crate) fn blank_page(surface: Surface) -> RgbImage {
    RgbImage::from_pixel(surface.width, surface.height, Rgb([255, 255, 255]))
}

/// Scale `image` to `rect` and paint it onto `page`.
///
/// Pixels of `rect` outside the page are clipped.
pub(crate) fn compose(page: &mut RgbImage, image: &DynamicImage, rect: Rect) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let rgb = image.to_rgb8();
    let scaled = if rgb.dimensions() == (rect.width, rect.height) {
        rgb
    } else {
        imageops::resize(&rgb, rect.width, rect.height, imageops::FilterType::Triangle)
    };
    imageops::overlay(page, &scaled, i64::from(rect.x), i64::from(rect.y));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_specs() {
        assert_eq!(
            DeviceSpec::parse("urf:/tmp/job.urf").unwrap(),
            DeviceSpec::Urf(PathBuf::from("/tmp/job.urf"))
        );
        assert_eq!(
            DeviceSpec::parse("PNG:out").unwrap(),
            DeviceSpec::PngDir(PathBuf::from("out"))
        );
    }

    #[test]
    fn reject_bad_device_specs() {
        for bad in ["", "urf", "urf:", "lpt1:/dev/lp0"] {
            assert!(
                matches!(DeviceSpec::parse(bad), Err(PrintError::InvalidDevice { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn every_listed_backend_parses() {
        for (scheme, form, _) in BACKENDS {
            let spec = form.replace(['<', '>'], "");
            assert!(DeviceSpec::parse(&spec).is_ok(), "{scheme} should parse");
        }
        let err = DeviceSpec::parse("lpt:/dev/lp0").unwrap_err().to_string();
        assert!(err.contains("urf, png"), "{err}");
    }

    #[test]
    fn each_document_gets_its_own_target() {
        let png = DeviceSpec::parse("png:/out").unwrap();
        assert_eq!(
            png.for_document("invoice"),
            DeviceSpec::PngDir(PathBuf::from("/out/invoice"))
        );
        let urf = DeviceSpec::parse("urf:/spool/batch.urf").unwrap();
        assert_eq!(
            urf.for_document("a"),
            DeviceSpec::Urf(PathBuf::from("/spool/batch-a.urf"))
        );
        assert_ne!(urf.for_document("a"), urf.for_document("b"));
    }

    #[test]
    fn surface_follows_media() {
        let s = Surface::for_media(MediaSize::Letter, 100);
        assert_eq!((s.width, s.height, s.dpi), (850, 1100, 100));
    }

    #[test]
    fn compose_paints_only_inside_rect() {
        let mut page = blank_page(Surface {
            width: 10,
            height: 10,
            dpi: 72,
        });
        let black = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
        compose(
            &mut page,
            &black,
            Rect {
                x: 2,
                y: 3,
                width: 4,
                height: 4,
            },
        );
        assert_eq!(page.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(page.get_pixel(2, 3), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(5, 6), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(6, 7), &Rgb([255, 255, 255]));
    }
}
