//! Emission stage: the only code that talks to the device.
//!
//! The [`Emitter`] owns the job's [`DeviceSession`]. It brackets the job with
//! `begin_job`/`end_job` and every drawn page with `begin_page`/`end_page`.
//! Any device error aborts the job before it is returned, and the session
//! is closed exactly once: by `end_job`, by `abort_job`, or by being dropped
//! after `end_job` itself failed.
//!
//! The emitter is blocking and not internally synchronised; the coordinator
//! keeps it behind a mutex and calls it from the blocking thread pool.

use crate::device::{DeviceSession, JobInfo, PrintDevice, Rect, Surface};
use crate::error::{DeviceError, PrintError};
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to a page handed to [`Emitter::emit_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    /// The page was drawn.
    Drawn,
    /// The page had no image and was skipped.
    Skipped,
}

pub struct Emitter {
    device: Arc<dyn PrintDevice>,
    job: JobInfo,
    margin_px: u32,
    session: Option<Box<dyn DeviceSession>>,
    closed: bool,
    drawn: u32,
}

impl Emitter {
    pub fn new(device: Arc<dyn PrintDevice>, job: JobInfo, margin_px: u32) -> Self {
        Self {
            device,
            job,
            margin_px,
            session: None,
            closed: false,
            drawn: 0,
        }
    }

    /// Send one page to the device.
    ///
    /// `image` is `None` for a page that failed conversion; it gets no page
    /// bracket. The session opens with the first page that has an image, so
    /// a job whose every page failed never touches the device. The job stays
    /// open until [`Self::finish`], so the caller can record the last page
    /// before `end_job` runs.
    pub fn emit_page(
        &mut self,
        image: Option<&DynamicImage>,
        page: u32,
        is_first: bool,
    ) -> Result<Emitted, PrintError> {
        if self.closed {
            return Err(PrintError::Internal(format!(
                "page {page} emitted after the job was closed"
            )));
        }
        if is_first && image.is_none() {
            debug!("First page failed; deferring device session");
        }

        match image {
            Some(image) => {
                if self.session.is_none() {
                    self.open()?;
                }
                self.draw(image, page)?;
                self.drawn += 1;
                Ok(Emitted::Drawn)
            }
            None => Ok(Emitted::Skipped),
        }
    }

    /// Close the job normally if a session is open. Idempotent.
    pub fn finish(&mut self) -> Result<(), PrintError> {
        let Some(mut session) = self.session.take() else {
            self.closed = true;
            return Ok(());
        };
        self.closed = true;
        // No abort after a failed end_job: the session is dropped as is.
        session.end_job().map_err(|e| {
            error!("Device '{}' failed to end job: {}", self.device.name(), e);
            self.failed(None, e)
        })?;
        info!(
            "Job '{}' closed on '{}' after {} pages",
            self.job.title,
            self.device.name(),
            self.drawn
        );
        Ok(())
    }

    /// Abort the job if a session is open. Idempotent; errors are logged.
    pub fn abort(&mut self) {
        self.closed = true;
        if let Some(mut session) = self.session.take() {
            abort_session(session.as_mut(), self.device.name());
        }
    }

    /// `true` once the job was ended or aborted.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pages drawn on the device so far.
    pub fn drawn(&self) -> u32 {
        self.drawn
    }

    fn open(&mut self) -> Result<(), PrintError> {
        let unavailable = |e: DeviceError| PrintError::DeviceUnavailable {
            device: self.device.name().to_string(),
            detail: e.to_string(),
        };
        let mut session = self.device.open_session().map_err(unavailable)?;
        if let Err(e) = session.begin_job(&self.job) {
            abort_session(session.as_mut(), self.device.name());
            self.closed = true;
            return Err(unavailable(e));
        }
        info!(
            "Started job '{}' on '{}' ({} pages)",
            self.job.title,
            self.device.name(),
            self.job.total_pages
        );
        self.session = Some(session);
        Ok(())
    }

    fn draw(&mut self, image: &DynamicImage, page: u32) -> Result<(), PrintError> {
        let device = self.device.name().to_string();
        let margin = self.margin_px;
        let mut guard = SessionGuard {
            slot: &mut self.session,
            device: &device,
            armed: true,
        };
        let result = (|| -> Result<(), DeviceError> {
            let session = guard.session()?;
            let rect = fit_centered(image.width(), image.height(), printable_area(session.surface(), margin));
            session.begin_page()?;
            session.draw_image(image, rect)?;
            session.end_page()?;
            debug!("Page {} drawn at {:?}", page, rect);
            Ok(())
        })();
        match result {
            Ok(()) => {
                guard.disarm();
                Ok(())
            }
            Err(e) => {
                error!("Device '{}' failed on page {}: {}", device, page, e);
                drop(guard);
                self.closed = true;
                Err(self.failed(Some(page), e))
            }
        }
    }

    fn failed(&self, page: Option<u32>, e: DeviceError) -> PrintError {
        PrintError::DeviceFailed {
            device: self.device.name().to_string(),
            page,
            detail: e.to_string(),
        }
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            warn!("Emitter dropped with an open job; aborting");
            abort_session(session.as_mut(), self.device.name());
        }
    }
}

/// Aborts the session it guards on every exit that does not disarm it,
/// including unwinding.
struct SessionGuard<'a> {
    slot: &'a mut Option<Box<dyn DeviceSession>>,
    device: &'a str,
    armed: bool,
}

impl SessionGuard<'_> {
    fn session(&mut self) -> Result<&mut dyn DeviceSession, DeviceError> {
        match self.slot.as_mut() {
            Some(s) => Ok(s.as_mut()),
            None => Err(DeviceError::Protocol("no open session")),
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(mut session) = self.slot.take() {
                abort_session(session.as_mut(), self.device);
            }
        }
    }
}

fn abort_session(session: &mut dyn DeviceSession, device: &str) {
    match session.abort_job() {
        Ok(()) => warn!("Job aborted on '{}'", device),
        Err(e) => warn!("Abort on '{}' failed: {}", device, e),
    }
}

// ── Placement ────────────────────────────────────────────────────────────

/// Surface area left after removing `margin` pixels on every side.
pub fn printable_area(surface: Surface, margin: u32) -> Rect {
    let margin = margin.min(surface.width / 2).min(surface.height / 2);
    Rect {
        x: margin,
        y: margin,
        width: surface.width - 2 * margin,
        height: surface.height - 2 * margin,
    }
}

/// Largest rect with the image's aspect ratio that fits in `area`, centred.
///
/// `scale = min(area_w / img_w, area_h / img_h)`; scaled sizes are rounded
/// down and the leftover split evenly, odd pixels going right and bottom.
pub fn fit_centered(img_w: u32, img_h: u32, area: Rect) -> Rect {
    if img_w == 0 || img_h == 0 || area.width == 0 || area.height == 0 {
        return Rect {
            x: area.x,
            y: area.y,
            width: 0,
            height: 0,
        };
    }
    let scale = f64::min(
        area.width as f64 / img_w as f64,
        area.height as f64 / img_h as f64,
    );
    let width = ((img_w as f64 * scale).floor() as u32).clamp(1, area.width);
    let height = ((img_h as f64 * scale).floor() as u32).clamp(1, area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn fit_wide_image_in_tall_surface() {
        // 2:1 image on 100x200 → 100x50, centred vertically.
        assert_eq!(fit_centered(400, 200, rect(0, 0, 100, 200)), rect(0, 75, 100, 50));
    }

    #[test]
    fn fit_upscales_small_image() {
        assert_eq!(fit_centered(10, 10, rect(0, 0, 300, 200)), rect(50, 0, 200, 200));
    }

    #[test]
    fn fit_floors_and_centres_with_integer_division() {
        // scale = min(100/30, 100/70) = 1.428..; 30*1.428 = 42.85 → 42
        let r = fit_centered(30, 70, rect(0, 0, 100, 100));
        assert_eq!(r, rect(29, 0, 42, 100));
    }

    #[test]
    fn fit_respects_margin() {
        let area = printable_area(
            Surface {
                width: 120,
                height: 220,
                dpi: 72,
            },
            10,
        );
        assert_eq!(area, rect(10, 10, 100, 200));
        assert_eq!(fit_centered(400, 200, area), rect(10, 85, 100, 50));
    }

    #[test]
    fn fit_degenerate_image() {
        assert_eq!(fit_centered(0, 10, rect(5, 5, 10, 10)).width, 0);
    }

    // ── Emitter against a scripted device ────────────────────────────────

    #[derive(Default)]
    struct Script {
        log: Mutex<Vec<String>>,
        fail_on: Mutex<Option<&'static str>>,
    }

    struct ScriptDevice(Arc<Script>);
    struct ScriptSession(Arc<Script>);

    impl ScriptSession {
        fn call(&self, name: &'static str) -> Result<(), DeviceError> {
            self.0.log.lock().unwrap().push(name.to_string());
            if *self.0.fail_on.lock().unwrap() == Some(name) {
                return Err(DeviceError::Unavailable(format!("{name} refused")));
            }
            Ok(())
        }
    }

    impl PrintDevice for ScriptDevice {
        fn name(&self) -> &str {
            "script"
        }
        fn open_session(&self) -> Result<Box<dyn DeviceSession>, DeviceError> {
            let s = ScriptSession(Arc::clone(&self.0));
            s.call("open")?;
            Ok(Box::new(s))
        }
    }

    impl DeviceSession for ScriptSession {
        fn surface(&self) -> Surface {
            Surface {
                width: 100,
                height: 100,
                dpi: 72,
            }
        }
        fn begin_job(&mut self, _job: &JobInfo) -> Result<(), DeviceError> {
            self.call("begin_job")
        }
        fn begin_page(&mut self) -> Result<(), DeviceError> {
            self.call("begin_page")
        }
        fn draw_image(&mut self, _image: &DynamicImage, _rect: Rect) -> Result<(), DeviceError> {
            self.call("draw_image")
        }
        fn end_page(&mut self) -> Result<(), DeviceError> {
            self.call("end_page")
        }
        fn end_job(&mut self) -> Result<(), DeviceError> {
            self.call("end_job")
        }
        fn abort_job(&mut self) -> Result<(), DeviceError> {
            self.call("abort_job")
        }
    }

    fn emitter(fail_on: Option<&'static str>) -> (Emitter, Arc<Script>) {
        let script = Arc::new(Script::default());
        *script.fail_on.lock().unwrap() = fail_on;
        let job = JobInfo {
            title: "t".into(),
            total_pages: 3,
        };
        (
            Emitter::new(Arc::new(ScriptDevice(Arc::clone(&script))), job, 0),
            script,
        )
    }

    fn log(script: &Script) -> Vec<String> {
        script.log.lock().unwrap().clone()
    }

    fn img() -> DynamicImage {
        DynamicImage::new_rgb8(10, 10)
    }

    #[test]
    fn brackets_job_and_pages() {
        let (mut e, script) = emitter(None);
        assert_eq!(e.emit_page(Some(&img()), 1, true).unwrap(), Emitted::Drawn);
        assert_eq!(e.emit_page(None, 2, false).unwrap(), Emitted::Skipped);
        e.emit_page(Some(&img()), 3, false).unwrap();
        assert!(!e.is_closed());
        e.finish().unwrap();
        assert_eq!(
            log(&script),
            [
                "open", "begin_job", "begin_page", "draw_image", "end_page", "begin_page",
                "draw_image", "end_page", "end_job"
            ]
        );
        assert!(e.is_closed());
        assert_eq!(e.drawn(), 2);
    }

    #[test]
    fn last_page_is_drawn_before_end_job_runs() {
        let (mut e, script) = emitter(Some("end_job"));
        assert_eq!(e.emit_page(Some(&img()), 1, true).unwrap(), Emitted::Drawn);
        assert_eq!(log(&script).last().map(String::as_str), Some("end_page"));
        assert!(e.finish().is_err());
        assert_eq!(e.drawn(), 1);
    }

    #[test]
    fn emitting_after_finish_is_an_error() {
        let (mut e, _script) = emitter(None);
        e.emit_page(Some(&img()), 1, true).unwrap();
        e.finish().unwrap();
        let err = e.emit_page(Some(&img()), 2, false).unwrap_err();
        assert!(matches!(err, PrintError::Internal(_)));
    }

    #[test]
    fn failed_first_page_defers_open() {
        let (mut e, script) = emitter(None);
        e.emit_page(None, 1, true).unwrap();
        assert!(log(&script).is_empty());
        e.emit_page(Some(&img()), 2, false).unwrap();
        assert_eq!(log(&script)[..2], ["open", "begin_job"]);
    }

    #[test]
    fn all_pages_failed_never_opens() {
        let (mut e, script) = emitter(None);
        e.emit_page(None, 1, true).unwrap();
        e.emit_page(None, 2, false).unwrap();
        e.finish().unwrap();
        assert!(log(&script).is_empty());
        assert!(e.is_closed());
    }

    #[test]
    fn draw_failure_aborts_once() {
        let (mut e, script) = emitter(Some("draw_image"));
        let err = e.emit_page(Some(&img()), 1, true).unwrap_err();
        assert!(matches!(err, PrintError::DeviceFailed { page: Some(1), .. }));
        e.abort();
        drop(e);
        let calls = log(&script);
        assert_eq!(calls.iter().filter(|c| *c == "abort_job").count(), 1);
        assert!(!calls.contains(&"end_job".to_string()));
        assert!(!calls.contains(&"end_page".to_string()));
    }

    #[test]
    fn open_failure_is_unavailable() {
        let (mut e, script) = emitter(Some("open"));
        let err = e.emit_page(Some(&img()), 1, true).unwrap_err();
        assert!(matches!(err, PrintError::DeviceUnavailable { .. }));
        assert_eq!(log(&script), ["open"]);
    }

    #[test]
    fn end_job_failure_is_not_followed_by_abort() {
        let (mut e, script) = emitter(Some("end_job"));
        e.emit_page(Some(&img()), 1, true).unwrap();
        let err = e.finish().unwrap_err();
        assert!(matches!(err, PrintError::DeviceFailed { page: None, .. }));
        e.abort();
        assert!(!log(&script).contains(&"abort_job".to_string()));
    }

    #[test]
    fn dropping_open_emitter_aborts() {
        let (mut e, script) = emitter(None);
        e.emit_page(Some(&img()), 1, true).unwrap();
        drop(e);
        assert_eq!(log(&script).last().map(String::as_str), Some("abort_job"));
    }
}
