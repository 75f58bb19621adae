//! Pipeline coordinator: runs one document through convert → reorder → emit.
//!
//! ## Phases
//!
//! ```text
//! Idle ──▶ Converting ──▶ Draining ──▶ Closed
//!   └──────────┴─────────────┴───────▶ Failed
//! ```
//!
//! * `Converting`: workers are rasterising; pages are emitted as soon as
//!   their predecessors are out.
//! * `Draining`: every page is converted; the tail is being emitted.
//! * `Failed`: a device error or cancellation stopped the job. Work
//!   already in flight finishes, its results are discarded and the device
//!   job is aborted.
//!
//! Input problems (unreadable document, empty selection) are returned as
//! `Err` before any worker starts. Everything after that ends in a
//! [`JobReport`].

use super::emit::{Emitted, Emitter};
use super::pool::{ConversionPool, PageResult, PoolSettings};
use super::raster::Rasterizer;
use super::reorder::ReorderBuffer;
use super::source::page_tasks;
use crate::config::PrintConfig;
use crate::device::{JobInfo, PrintDevice};
use crate::error::{PrintError, RasterError};
use crate::output::{FatalError, JobPhase, JobReport, JobStatus, PageFailure};
use image::DynamicImage;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mutable job bookkeeping, only touched under its lock.
#[derive(Debug, Default)]
struct JobState {
    total_pages: u32,
    converted: u32,
    failed: u32,
    /// Pages released to the emitter in order, failed ones included.
    emitted: u32,
    first_failure: Option<String>,
    device: Option<String>,
    phase: JobPhase,
}

impl JobState {
    fn record_failure(&mut self, detail: String) {
        if self.first_failure.is_none() {
            self.first_failure = Some(detail);
        }
    }
}

/// Handle for observing and cancelling a job from another task.
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    cancel: CancellationToken,
    state: Arc<Mutex<JobState>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the job to stop. Pages not yet emitted are dropped and the
    /// device job is aborted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`Self::cancel`] has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Snapshot of the job's progress.
    pub fn status(&self) -> JobStatus {
        let s = self.lock();
        JobStatus {
            phase: s.phase,
            total_pages: s.total_pages,
            converted_pages: s.converted,
            failed_pages: s.failed,
            emitted_pages: s.emitted,
            first_failure: s.first_failure.clone(),
            device: s.device.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Prints documents with a given rasteriser, device and configuration.
#[derive(Clone)]
pub struct PrintPipeline {
    rasterizer: Arc<dyn Rasterizer>,
    device: Arc<dyn PrintDevice>,
    config: PrintConfig,
}

impl PrintPipeline {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        device: Arc<dyn PrintDevice>,
        config: PrintConfig,
    ) -> Self {
        Self {
            rasterizer,
            device,
            config,
        }
    }

    pub fn device(&self) -> &Arc<dyn PrintDevice> {
        &self.device
    }

    /// Print `document` with a fresh [`JobControl`].
    pub async fn run(&self, document: &Path) -> Result<JobReport, PrintError> {
        self.print_document(document, &JobControl::new()).await
    }

    /// Print `document`, reporting progress through `control`.
    pub async fn print_document(
        &self,
        document: &Path,
        control: &JobControl,
    ) -> Result<JobReport, PrintError> {
        let label = document.display().to_string();
        self.print_document_as(document, &label, control).await
    }

    /// Like [`Self::print_document`], naming the job `label` in reports
    /// (e.g. the URL a temporary file was downloaded from).
    pub async fn print_document_as(
        &self,
        document: &Path,
        label: &str,
        control: &JobControl,
    ) -> Result<JobReport, PrintError> {
        let started = Instant::now();
        *control.lock() = JobState::default();

        // ── Idle: resolve pages ──────────────────────────────────────────
        let (total_in_document, source_pages) = match self.resolve_pages(document).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let mut s = control.lock();
                s.phase = JobPhase::Failed;
                s.first_failure = Some(e.to_string());
                return Err(e);
            }
        };
        let total = source_pages.len() as u32;
        let title = self.config.job_title.clone().unwrap_or_else(|| {
            document
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| label.to_string())
        });
        info!(
            "Printing '{}' to '{}': {} of {} pages, {} workers, {} dpi",
            label,
            self.device.name(),
            total,
            total_in_document,
            self.config.worker_count,
            self.config.dpi
        );

        {
            let mut s = control.lock();
            s.total_pages = total;
            s.phase = JobPhase::Converting;
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_start(total);
        }

        // ── Converting ───────────────────────────────────────────────────
        let tasks = page_tasks(document, &source_pages);
        let (task_tx, task_rx) = mpsc::channel(tasks.len());
        for task in tasks {
            task_tx
                .send(task)
                .await
                .map_err(|_| PrintError::Internal("task queue closed early".into()))?;
        }
        drop(task_tx);

        let (result_tx, mut result_rx) = mpsc::channel(self.config.max_pending_pages.max(1));
        let pool_cancel = control.cancel.child_token();
        let pool = ConversionPool::start(
            PoolSettings {
                worker_count: self.config.worker_count,
                dpi: self.config.dpi,
                page_timeout: self.config.page_timeout_secs.map(Duration::from_secs),
                max_pending_pages: self.config.max_pending_pages,
                progress: self.config.progress_callback.clone(),
            },
            Arc::clone(&self.rasterizer),
            task_rx,
            result_tx,
            pool_cancel.clone(),
        );

        let emitter = Arc::new(Mutex::new(Emitter::new(
            Arc::clone(&self.device),
            JobInfo {
                title,
                total_pages: total,
            },
            self.config.margin_px(),
        )));

        let mut reorder: ReorderBuffer<PageResult> = ReorderBuffer::new();
        let mut succeeded: Vec<u32> = Vec::new();
        let mut failures: Vec<PageFailure> = Vec::new();
        let mut fatal: Option<PrintError> = None;

        'consume: while reorder.next_expected() <= total {
            let result = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => {
                    let emitted = control.lock().emitted;
                    warn!("Job '{}' cancelled after {}/{} pages", label, emitted, total);
                    fatal = Some(PrintError::Cancelled { emitted, total });
                    break 'consume;
                }
                r = result_rx.recv() => r,
            };
            let Some(result) = result else {
                fatal = Some(PrintError::Internal(
                    "conversion workers stopped before every page was converted".into(),
                ));
                break;
            };

            if !tally(&reorder, &mut control.lock(), &mut failures, &result) {
                continue;
            }
            let page = result.page;
            for (page, result) in reorder.accept(page, result) {
                let source_page = result.source_page;
                let (outcome, slot) = result.into_outcome();
                let emitted = emit(&emitter, outcome.ok(), page, page == 1).await;
                drop(slot);
                match emitted {
                    Ok(kind) => {
                        let mut s = control.lock();
                        s.emitted += 1;
                        if kind == Emitted::Drawn {
                            succeeded.push(source_page);
                            if s.device.is_none() {
                                s.device = Some(self.device.name().to_string());
                            }
                            let drawn = succeeded.len() as u32;
                            drop(s);
                            if let Some(ref cb) = self.config.progress_callback {
                                cb.on_page_emitted(source_page, drawn, total);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Job '{}' failed on page {}: {}", label, source_page, e);
                        fatal = Some(e);
                        break 'consume;
                    }
                }
            }
        }

        // ── Shutdown ─────────────────────────────────────────────────────
        if fatal.is_some() {
            pool_cancel.cancel();
            abort(&emitter).await;
            let discarded = reorder.discard();
            let mut late = 0usize;
            while result_rx.recv().await.is_some() {
                late += 1;
            }
            debug!(
                "Discarded {} buffered and {} in-flight pages",
                discarded, late
            );
            pool.join().await;
        } else {
            pool.join().await;
            if let Err(e) = finish(&emitter).await {
                fatal = Some(e);
            }
        }

        // ── Report ───────────────────────────────────────────────────────
        failures.sort_by_key(|f| f.page);
        let phase = if fatal.is_some() {
            JobPhase::Failed
        } else {
            JobPhase::Closed
        };
        {
            let mut s = control.lock();
            s.phase = phase;
            if let Some(ref e) = fatal {
                s.first_failure = Some(e.to_string());
            }
        }
        let skipped_pages: Vec<u32> = source_pages
            .iter()
            .copied()
            .filter(|p| !succeeded.contains(p) && !failures.iter().any(|f| f.page == *p))
            .collect();

        let report = JobReport {
            document: label.to_string(),
            device: self.device.name().to_string(),
            total_pages: total,
            succeeded_pages: succeeded,
            failed_pages: failures,
            skipped_pages,
            phase,
            fatal_error: fatal.as_ref().map(|e| e.to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
            fatal: fatal.map(FatalError::new),
        };

        info!(
            "Job '{}' {}: {}/{} pages printed, {} failed, {}ms",
            label,
            report.phase,
            report.succeeded_pages.len(),
            total,
            report.failed_pages.len(),
            report.elapsed_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_complete(&report);
        }
        Ok(report)
    }

    /// Page count of `document` and the document pages the job prints.
    async fn resolve_pages(&self, document: &Path) -> Result<(u32, Vec<u32>), PrintError> {
        let total_in_document = self.page_count(document).await?;
        if total_in_document == 0 {
            return Err(PrintError::EmptyDocument {
                path: document.to_path_buf(),
            });
        }
        let source_pages = self.config.pages.to_pages(total_in_document);
        if source_pages.is_empty() {
            return Err(PrintError::NoPagesSelected {
                total: total_in_document,
            });
        }
        Ok((total_in_document, source_pages))
    }

    async fn page_count(&self, document: &Path) -> Result<u32, PrintError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = document.to_path_buf();
        let counted = tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
            .await
            .map_err(|e| PrintError::Internal(format!("Page count task panicked: {}", e)))?;
        counted.map_err(|e| document_error(document, e))
    }
}

/// Count a converted or failed page. Returns `false`, counting nothing, for
/// a page the reorder stage has already seen.
fn tally(
    reorder: &ReorderBuffer<PageResult>,
    s: &mut JobState,
    failures: &mut Vec<PageFailure>,
    result: &PageResult,
) -> bool {
    if !reorder.admits(result.page) {
        warn!("Dropping repeated result for page {}", result.page);
        return false;
    }
    match &result.outcome {
        Ok(_) => s.converted += 1,
        Err(e) => {
            s.failed += 1;
            s.record_failure(e.to_string());
            failures.push(PageFailure {
                page: result.source_page,
                error: e.clone(),
            });
        }
    }
    if s.converted + s.failed == s.total_pages && s.phase == JobPhase::Converting {
        debug!("All {} pages converted; draining", s.total_pages);
        s.phase = JobPhase::Draining;
    }
    true
}

/// Map a failure to open `document` onto the fatal input error it stands for.
pub(crate) fn document_error(document: &Path, e: RasterError) -> PrintError {
    let path = document.to_path_buf();
    match e {
        RasterError::PasswordRequired => PrintError::PasswordRequired { path },
        RasterError::WrongPassword => PrintError::WrongPassword { path },
        RasterError::Corrupt(detail) => PrintError::CorruptDocument { path, detail },
        other => PrintError::CorruptDocument {
            path,
            detail: other.to_string(),
        },
    }
}

// ── Emitter calls on the blocking pool ───────────────────────────────────

async fn emit(
    emitter: &Arc<Mutex<Emitter>>,
    image: Option<DynamicImage>,
    page: u32,
    is_first: bool,
) -> Result<Emitted, PrintError> {
    let emitter = Arc::clone(emitter);
    tokio::task::spawn_blocking(move || {
        let mut e = emitter.lock().unwrap_or_else(PoisonError::into_inner);
        e.emit_page(image.as_ref(), page, is_first)
    })
    .await
    .map_err(|e| PrintError::Internal(format!("Emit task panicked: {}", e)))?
}

async fn finish(emitter: &Arc<Mutex<Emitter>>) -> Result<(), PrintError> {
    let emitter = Arc::clone(emitter);
    tokio::task::spawn_blocking(move || {
        emitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish()
    })
    .await
    .map_err(|e| PrintError::Internal(format!("Finish task panicked: {}", e)))?
}

async fn abort(emitter: &Arc<Mutex<Emitter>>) {
    let emitter = Arc::clone(emitter);
    let joined = tokio::task::spawn_blocking(move || {
        emitter.lock().unwrap_or_else(PoisonError::into_inner).abort();
    })
    .await;
    if let Err(e) = joined {
        warn!("Abort task panicked: {}", e);
    }
}
