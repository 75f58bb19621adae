//! Directory-of-PNGs device, one file per printed page.
//!
//! Useful for previews and for checking page order by eye: page files are
//! numbered in the order the device received them.

use super::{blank_page, compose, DeviceSession, JobInfo, PrintDevice, Rect, Surface};
use crate::error::DeviceError;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct PngDirectoryDevice {
    name: String,
    dir: PathBuf,
    surface: Surface,
}

impl PngDirectoryDevice {
    pub fn new(dir: impl Into<PathBuf>, surface: Surface) -> Self {
        let dir = dir.into();
        Self {
            name: format!("png:{}", dir.display()),
            dir,
            surface,
        }
    }
}

impl PrintDevice for PngDirectoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> Result<Box<dyn DeviceSession>, DeviceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            DeviceError::Unavailable(format!("cannot create '{}': {e}", self.dir.display()))
        })?;
        Ok(Box::new(PngSession {
            dir: self.dir.clone(),
            surface: self.surface,
            in_job: false,
            page: None,
            written: Vec::new(),
        }))
    }
}

struct PngSession {
    dir: PathBuf,
    surface: Surface,
    in_job: bool,
    page: Option<RgbImage>,
    written: Vec<PathBuf>,
}

impl DeviceSession for PngSession {
    fn surface(&self) -> Surface {
        self.surface
    }

    fn begin_job(&mut self, job: &JobInfo) -> Result<(), DeviceError> {
        if self.in_job {
            return Err(DeviceError::Protocol("job already started"));
        }
        self.in_job = true;
        info!("PNG job '{}' started in '{}'", job.title, self.dir.display());
        Ok(())
    }

    fn begin_page(&mut self) -> Result<(), DeviceError> {
        if !self.in_job {
            return Err(DeviceError::Protocol("begin_page outside a job"));
        }
        if self.page.is_some() {
            return Err(DeviceError::Protocol("page already open"));
        }
        self.page = Some(blank_page(self.surface));
        Ok(())
    }

    fn draw_image(&mut self, image: &DynamicImage, rect: Rect) -> Result<(), DeviceError> {
        let page = self
            .page
            .as_mut()
            .ok_or(DeviceError::Protocol("draw_image with no open page"))?;
        compose(page, image, rect);
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), DeviceError> {
        let canvas = self
            .page
            .take()
            .ok_or(DeviceError::Protocol("end_page with no open page"))?;
        let path = self
            .dir
            .join(format!("page-{:04}.png", self.written.len() + 1));
        canvas
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| DeviceError::Encode(e.to_string()))?;
        debug!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }

    fn end_job(&mut self) -> Result<(), DeviceError> {
        if !self.in_job {
            return Err(DeviceError::Protocol("no job is open"));
        }
        if self.page.is_some() {
            return Err(DeviceError::Protocol("end_job with a page open"));
        }
        self.in_job = false;
        info!(
            "PNG job finished: {} pages in '{}'",
            self.written.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn abort_job(&mut self) -> Result<(), DeviceError> {
        self.page = None;
        self.in_job = false;
        for path in self.written.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove '{}': {e}", path.display());
            }
        }
        Ok(())
    }
}
