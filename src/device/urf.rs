//! Apple Raster (URF) spool device.
//!
//! Pages are composed on a white sRGB surface and streamed through
//! `print_raster`'s [`UrfWriter`]. The stream header carries a page count
//! that must be written before the first page, but failed pages are never
//! drawn, so the count is patched in place once the job ends.

use super::{blank_page, compose, DeviceSession, JobInfo, PrintDevice, Rect, Surface};
use crate::error::DeviceError;
use futures::executor::block_on;
use futures::io::AllowStdIo;
use futures::AsyncWriteExt;
use image::{DynamicImage, RgbImage};
use print_raster::error::UrfError;
use print_raster::model::urf::{
    UrfColorSpace, UrfDuplex, UrfHeader, UrfMediaPosition, UrfMediaType, UrfPageHeader,
    UrfQuality,
};
use print_raster::writer::urf::{UrfPageWriter, UrfWriter};
use print_raster::writer::{RasterPageWriter, RasterWriter};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, info, warn};

type Sink = Box<AllowStdIo<BufWriter<File>>>;

/// Byte offset of the big-endian page count in the URF file header.
const PAGE_COUNT_OFFSET: u64 = 8;

/// Writes each job to a single `.urf` file.
pub struct UrfSpoolDevice {
    name: String,
    path: PathBuf,
    surface: Surface,
}

impl UrfSpoolDevice {
    pub fn new(path: impl Into<PathBuf>, surface: Surface) -> Self {
        let path = path.into();
        Self {
            name: format!("urf:{}", path.display()),
            path,
            surface,
        }
    }
}

impl PrintDevice for UrfSpoolDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(DeviceError::Unavailable(format!(
                "spool directory '{}' does not exist",
                parent.display()
            )));
        }
        Ok(Box::new(UrfSession {
            path: self.path.clone(),
            surface: self.surface,
            state: State::Idle,
            page: None,
            pages_written: 0,
        }))
    }
}

enum State {
    Idle,
    /// Header written, no page yet.
    Started(UrfWriter<Sink>),
    /// At least one page written.
    Paged(UrfPageWriter<Sink>),
    Done,
}

struct UrfSession {
    path: PathBuf,
    surface: Surface,
    state: State,
    /// Canvas of the open page.
    page: Option<RgbImage>,
    pages_written: u32,
}

impl UrfSession {
    fn page_header(&self) -> UrfPageHeader {
        UrfPageHeader {
            bits_per_pixel: 24,
            color_space: UrfColorSpace::sRGB,
            duplex: UrfDuplex::NoDuplex,
            quality: UrfQuality::Normal,
            media_position: UrfMediaPosition::Auto,
            media_type: UrfMediaType::Auto,
            width: self.surface.width,
            height: self.surface.height,
            dot_per_inch: self.surface.dpi,
        }
    }

    fn write_page(&mut self, canvas: RgbImage) -> Result<(), DeviceError> {
        let header = self.page_header();
        let mut writer = match std::mem::replace(&mut self.state, State::Done) {
            State::Started(w) => block_on(w.next_page(&header)).map_err(urf_error)?,
            State::Paged(w) => block_on(w.next_page(&header)).map_err(urf_error)?,
            State::Idle | State::Done => return Err(DeviceError::Protocol("no job is open")),
        };
        block_on(writer.content_mut().write_all(canvas.as_raw()))?;
        self.state = State::Paged(writer);
        self.pages_written += 1;
        Ok(())
    }

    fn patch_page_count(&self) -> Result<(), DeviceError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(PAGE_COUNT_OFFSET))?;
        file.write_all(&self.pages_written.to_be_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl DeviceSession for UrfSession {
    fn surface(&self) -> Surface {
        self.surface
    }

    fn begin_job(&mut self, job: &JobInfo) -> Result<(), DeviceError> {
        if !matches!(self.state, State::Idle) {
            return Err(DeviceError::Protocol("job already started"));
        }
        let file = File::create(&self.path)?;
        let sink: Sink = Box::new(AllowStdIo::new(BufWriter::new(file)));
        let header = UrfHeader {
            page_count: job.total_pages,
        };
        let writer = block_on(UrfWriter::new(Box::into_pin(sink), &header)).map_err(urf_error)?;
        self.state = State::Started(writer);
        info!(
            "URF spool '{}' opened for '{}'",
            self.path.display(),
            job.title
        );
        Ok(())
    }

    fn begin_page(&mut self) -> Result<(), DeviceError> {
        if !matches!(self.state, State::Started(_) | State::Paged(_)) {
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
        self.write_page(canvas)?;
        debug!("URF page {} written", self.pages_written);
        Ok(())
    }

    fn end_job(&mut self) -> Result<(), DeviceError> {
        if self.page.is_some() {
            return Err(DeviceError::Protocol("end_job with a page open"));
        }
        match std::mem::replace(&mut self.state, State::Done) {
            State::Started(w) => block_on(w.finish()).map_err(urf_error)?,
            State::Paged(w) => block_on(w.finish()).map_err(urf_error)?,
            State::Idle | State::Done => return Err(DeviceError::Protocol("no job is open")),
        }
        self.patch_page_count()?;
        info!(
            "URF spool '{}' closed with {} pages",
            self.path.display(),
            self.pages_written
        );
        Ok(())
    }

    fn abort_job(&mut self) -> Result<(), DeviceError> {
        self.page = None;
        let had_job = !matches!(self.state, State::Idle);
        // Dropping the writer closes the file before it is removed.
        self.state = State::Done;
        if had_job {
            match std::fs::remove_file(&self.path) {
                Ok(()) => warn!("URF spool '{}' aborted and removed", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn urf_error(e: UrfError) -> DeviceError {
    match e {
        UrfError::IoError(io) => DeviceError::Io(io),
        other => DeviceError::Encode(other.to_string()),
    }
}
