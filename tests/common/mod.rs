//! Mock collaborators shared by the integration tests.
//!
//! Every mock rasterises page `n` to an `n`×1 image, so the width of a drawn
//! image tells which document page reached the device.

#![allow(dead_code)]

use image::DynamicImage;
use rasterprint::{
    DeviceError, DeviceSession, JobInfo, PrintConfig, PrintDevice, RasterError, Rasterizer, Rect,
    Surface,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Upper bound on how long any mock blocks, so a broken pipeline fails the
/// test instead of hanging it.
const MAX_BLOCK: Duration = Duration::from_secs(10);

pub fn config(workers: usize, max_pending: usize) -> PrintConfig {
    PrintConfig::builder()
        .dpi(72)
        .worker_count(workers)
        .max_pending_pages(max_pending)
        .build()
        .unwrap()
}

pub fn page_image(page: u32) -> DynamicImage {
    DynamicImage::new_rgb8(page, 1)
}

// ── Rasterizers ──────────────────────────────────────────────────────────────

/// Renders immediately, failing the listed pages.
pub struct MockRasterizer {
    pub pages: u32,
    pub failing: HashSet<u32>,
    pub delays: HashMap<u32, Duration>,
}

impl MockRasterizer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            failing: HashSet::new(),
            delays: HashMap::new(),
        }
    }

    pub fn failing(mut self, pages: &[u32]) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn delay(mut self, page: u32, delay: Duration) -> Self {
        self.delays.insert(page, delay);
        self
    }
}

impl Rasterizer for MockRasterizer {
    fn page_count(&self, _: &Path) -> Result<u32, RasterError> {
        Ok(self.pages)
    }

    fn rasterize(&self, _: &Path, page: u32, _dpi: u32) -> Result<DynamicImage, RasterError> {
        if let Some(delay) = self.delays.get(&page) {
            std::thread::sleep(*delay);
        }
        if self.failing.contains(&page) {
            return Err(RasterError::Render(format!("page {page} is damaged")));
        }
        Ok(page_image(page))
    }
}

/// Finishes pages in a fixed order: page `order[i]` returns only after
/// `order[..i]` have all returned.
pub struct OrderedRasterizer {
    order: Vec<u32>,
    done: Mutex<usize>,
    turn: Condvar,
}

impl OrderedRasterizer {
    pub fn new(order: &[u32]) -> Self {
        Self {
            order: order.to_vec(),
            done: Mutex::new(0),
            turn: Condvar::new(),
        }
    }
}

impl Rasterizer for OrderedRasterizer {
    fn page_count(&self, _: &Path) -> Result<u32, RasterError> {
        Ok(self.order.len() as u32)
    }

    fn rasterize(&self, _: &Path, page: u32, _dpi: u32) -> Result<DynamicImage, RasterError> {
        let my_turn = self
            .order
            .iter()
            .position(|p| *p == page)
            .ok_or(RasterError::PageOutOfRange {
                page,
                total: self.order.len() as u32,
            })?;
        let done = self.done.lock().unwrap();
        let (mut done, _) = self
            .turn
            .wait_timeout_while(done, MAX_BLOCK, |d| *d < my_turn)
            .unwrap();
        *done += 1;
        self.turn.notify_all();
        Ok(page_image(page))
    }
}

/// A latch the test opens once.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let open = self.open.lock().unwrap();
        let _ = self.cv.wait_timeout_while(open, MAX_BLOCK, |o| !*o).unwrap();
    }
}

/// Renders the `gated` pages only after the gate opens, the rest at once.
/// Records which pages have started rendering.
pub struct GatedRasterizer {
    pub pages: u32,
    pub gated: HashSet<u32>,
    pub gate: Arc<Gate>,
    started: Mutex<Vec<u32>>,
}

impl GatedRasterizer {
    pub fn new(pages: u32, gated: &[u32]) -> Self {
        Self {
            pages,
            gated: gated.iter().copied().collect(),
            gate: Arc::new(Gate::default()),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Pages that have started rendering, ascending.
    pub fn started(&self) -> Vec<u32> {
        let mut s = self.started.lock().unwrap().clone();
        s.sort();
        s
    }
}

impl Rasterizer for GatedRasterizer {
    fn page_count(&self, _: &Path) -> Result<u32, RasterError> {
        Ok(self.pages)
    }

    fn rasterize(&self, _: &Path, page: u32, _dpi: u32) -> Result<DynamicImage, RasterError> {
        self.started.lock().unwrap().push(page);
        if self.gated.contains(&page) {
            self.gate.wait();
        }
        Ok(page_image(page))
    }
}

// ── Recording device ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    BeginJob { title: String, total_pages: u32 },
    BeginPage,
    /// Width of the drawn image, i.e. the document page number.
    Draw(u32),
    EndPage,
    EndJob,
    Abort,
}

/// Which call the device should refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    Open,
    /// Refuse the n-th `draw_image` (1-based).
    Draw(usize),
    EndJob,
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    fault: Mutex<Fault>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Session events only (no `Open`).
    pub fn session_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| *e != Event::Open)
            .collect()
    }

    /// Pages drawn, in the order the device received them.
    pub fn drawn(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Draw(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

pub struct RecordingDevice {
    name: String,
    pub recorder: Arc<Recorder>,
}

impl RecordingDevice {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_fault(name, Fault::None)
    }

    pub fn with_fault(name: &str, fault: Fault) -> Arc<Self> {
        let recorder = Arc::new(Recorder::default());
        *recorder.fault.lock().unwrap() = fault;
        Arc::new(Self {
            name: name.to_string(),
            recorder,
        })
    }
}

impl PrintDevice for RecordingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> Result<Box<dyn DeviceSession>, DeviceError> {
        self.recorder.push(Event::Open);
        if self.recorder.fault() == Fault::Open {
            return Err(DeviceError::Unavailable("printer offline".into()));
        }
        Ok(Box::new(RecordingSession {
            recorder: Arc::clone(&self.recorder),
            draws: 0,
        }))
    }
}

struct RecordingSession {
    recorder: Arc<Recorder>,
    draws: usize,
}

impl DeviceSession for RecordingSession {
    fn surface(&self) -> Surface {
        Surface {
            width: 1000,
            height: 1000,
            dpi: 72,
        }
    }

    fn begin_job(&mut self, job: &JobInfo) -> Result<(), DeviceError> {
        self.recorder.push(Event::BeginJob {
            title: job.title.clone(),
            total_pages: job.total_pages,
        });
        Ok(())
    }

    fn begin_page(&mut self) -> Result<(), DeviceError> {
        self.recorder.push(Event::BeginPage);
        Ok(())
    }

    fn draw_image(&mut self, image: &DynamicImage, _rect: Rect) -> Result<(), DeviceError> {
        self.draws += 1;
        if self.recorder.fault() == Fault::Draw(self.draws) {
            return Err(DeviceError::Io(std::io::Error::other("paper jam")));
        }
        self.recorder.push(Event::Draw(image.width()));
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), DeviceError> {
        self.recorder.push(Event::EndPage);
        Ok(())
    }

    fn end_job(&mut self) -> Result<(), DeviceError> {
        self.recorder.push(Event::EndJob);
        if self.recorder.fault() == Fault::EndJob {
            return Err(DeviceError::Io(std::io::Error::other("spooler rejected job")));
        }
        Ok(())
    }

    fn abort_job(&mut self) -> Result<(), DeviceError> {
        self.recorder.push(Event::Abort);
        Ok(())
    }
}
