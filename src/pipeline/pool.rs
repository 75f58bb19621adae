//! Conversion pool: a fixed set of workers rasterising pages in parallel.
//!
//! Workers share one task queue and push every finished page, good or
//! failed, onto an unordered result channel. A failed page is reported once
//! and never retried.
//!
//! ## Backpressure
//!
//! Before pulling a task a worker takes a permit from the pending-page
//! semaphore. The permit travels inside the [`PageResult`] and is returned
//! when the result is dropped, i.e. once the page has left the reorder
//! buffer. Tasks are pulled in ascending order, so the page the reorder
//! buffer waits for is always already in flight and the cap cannot stall
//! the job.

use super::raster::Rasterizer;
use super::source::PageTask;
use crate::error::PageError;
use crate::progress::ProgressCallback;
use image::DynamicImage;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A converted page, or the reason it could not be converted.
#[derive(Debug)]
pub struct PageResult {
    /// Job page number (reorder key).
    pub page: u32,
    /// Document page number.
    pub source_page: u32,
    pub outcome: Result<DynamicImage, PageError>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PageResult {
    pub fn new(page: u32, source_page: u32, outcome: Result<DynamicImage, PageError>) -> Self {
        Self {
            page,
            source_page,
            outcome,
            permit: None,
        }
    }

    /// Whether this result still holds a pending-page permit.
    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }

    /// Split into the outcome and the slot it occupies in the pending cap.
    pub fn into_outcome(self) -> (Result<DynamicImage, PageError>, PendingSlot) {
        (self.outcome, PendingSlot(self.permit))
    }
}

/// A page's place under the pending-page cap; released on drop.
#[derive(Debug)]
pub struct PendingSlot(#[allow(dead_code)] Option<OwnedSemaphorePermit>);

/// Settings shared by every worker of a pool.
#[derive(Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    pub dpi: u32,
    pub page_timeout: Option<Duration>,
    /// Cap on pages converted but not yet released by the reorder stage.
    pub max_pending_pages: usize,
    pub progress: Option<ProgressCallback>,
}

/// Handle to a running set of conversion workers.
pub struct ConversionPool {
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Semaphore>,
}

struct Worker {
    id: usize,
    rasterizer: Arc<dyn Rasterizer>,
    tasks: Arc<Mutex<mpsc::Receiver<PageTask>>>,
    results: mpsc::Sender<PageResult>,
    pending: Arc<Semaphore>,
    cancel: CancellationToken,
    settings: PoolSettings,
    converted: Arc<AtomicU32>,
    started: Instant,
}

impl ConversionPool {
    /// Spawn `settings.worker_count` workers on the current runtime.
    ///
    /// Workers exit when `tasks` is closed and drained, when `results` is
    /// closed, or when `cancel` fires. A task in progress when `cancel`
    /// fires is finished and its result still sent.
    pub fn start(
        settings: PoolSettings,
        rasterizer: Arc<dyn Rasterizer>,
        tasks: mpsc::Receiver<PageTask>,
        results: mpsc::Sender<PageResult>,
        cancel: CancellationToken,
    ) -> Self {
        let tasks = Arc::new(Mutex::new(tasks));
        let pending = Arc::new(Semaphore::new(settings.max_pending_pages.max(1)));
        let converted = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let workers = (0..settings.worker_count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    rasterizer: Arc::clone(&rasterizer),
                    tasks: Arc::clone(&tasks),
                    results: results.clone(),
                    pending: Arc::clone(&pending),
                    cancel: cancel.clone(),
                    settings: settings.clone(),
                    converted: Arc::clone(&converted),
                    started,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self { workers, pending }
    }

    /// Free pending-page permits right now.
    pub fn available_permits(&self) -> usize {
        self.pending.available_permits()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!("Conversion worker ended abnormally: {}", e);
            }
        }
    }
}

impl Worker {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.pending).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let task = {
                let mut rx = self.tasks.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    task = rx.recv() => task,
                }
            };
            let Some(task) = task else { break };

            let outcome = self.convert(&task).await;
            self.report(&task, &outcome);

            let result = PageResult {
                page: task.page,
                source_page: task.source_page,
                outcome,
                permit: Some(permit),
            };
            if self.results.send(result).await.is_err() {
                debug!("Result channel closed; worker {} exiting", self.id);
                break;
            }
        }
        debug!("Worker {} stopped", self.id);
    }

    async fn convert(&self, task: &PageTask) -> Result<DynamicImage, PageError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let document = Arc::clone(&task.document);
        let source_page = task.source_page;
        let dpi = self.settings.dpi;
        let handle = tokio::task::spawn_blocking(move || {
            rasterizer.rasterize(&document, source_page, dpi)
        });

        let joined = match self.settings.page_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // The blocking render cannot be interrupted; it finishes
                    // in the background and its image is dropped.
                    return Err(PageError::Timeout {
                        page: source_page,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(image)) => Ok(image),
            Ok(Err(e)) => Err(PageError::ConversionFailed {
                page: source_page,
                detail: e.to_string(),
            }),
            Err(e) => Err(PageError::WorkerFailed {
                page: source_page,
                detail: e.to_string(),
            }),
        }
    }

    fn report(&self, task: &PageTask, outcome: &Result<DynamicImage, PageError>) {
        let converted = self.converted.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome {
            Ok(image) => debug!(
                "Worker {} converted page {} ({}x{})",
                self.id,
                task.source_page,
                image.width(),
                image.height()
            ),
            Err(e) => warn!("{}", e),
        }
        if let Some(ref cb) = self.settings.progress {
            match outcome {
                Ok(_) => cb.on_page_converted(
                    task.source_page,
                    converted,
                    task.total_pages,
                    self.started.elapsed(),
                ),
                Err(e) => cb.on_page_failed(task.source_page, task.total_pages, &e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RasterError;
    use crate::pipeline::source::page_tasks;
    use std::path::Path;

    struct Blank;

    impl Rasterizer for Blank {
        fn page_count(&self, _: &Path) -> Result<u32, RasterError> {
            Ok(4)
        }
        fn rasterize(&self, _: &Path, page: u32, _dpi: u32) -> Result<DynamicImage, RasterError> {
            if page == 3 {
                return Err(RasterError::Render("boom".into()));
            }
            Ok(DynamicImage::new_rgb8(page, page))
        }
    }

    struct Sleepy;

    impl Rasterizer for Sleepy {
        fn page_count(&self, _: &Path) -> Result<u32, RasterError> {
            Ok(1)
        }
        fn rasterize(&self, _: &Path, _: u32, _: u32) -> Result<DynamicImage, RasterError> {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(DynamicImage::new_rgb8(1, 1))
        }
    }

    fn settings(workers: usize, max_pending: usize) -> PoolSettings {
        PoolSettings {
            worker_count: workers,
            dpi: 72,
            page_timeout: None,
            max_pending_pages: max_pending,
            progress: None,
        }
    }

    async fn queue(pages: &[u32]) -> mpsc::Receiver<PageTask> {
        let tasks = page_tasks(Path::new("doc.pdf"), pages);
        let (tx, rx) = mpsc::channel(tasks.len().max(1));
        for t in tasks {
            tx.send(t).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn every_task_yields_one_result() {
        let (res_tx, mut res_rx) = mpsc::channel(8);
        let pool = ConversionPool::start(
            settings(3, 8),
            Arc::new(Blank),
            queue(&[1, 2, 3, 4]).await,
            res_tx,
            CancellationToken::new(),
        );
        let mut seen = Vec::new();
        while let Some(r) = res_rx.recv().await {
            assert!(r.holds_permit());
            seen.push((r.page, r.outcome.is_ok()));
        }
        pool.join().await;
        seen.sort();
        assert_eq!(seen, vec![(1, true), (2, true), (3, false), (4, true)]);
    }

    #[tokio::test]
    async fn held_results_stop_workers_pulling() {
        let (res_tx, mut res_rx) = mpsc::channel(8);
        let pool = ConversionPool::start(
            settings(4, 2),
            Arc::new(Blank),
            queue(&[1, 2, 4, 5]).await,
            res_tx,
            CancellationToken::new(),
        );
        let first = res_rx.recv().await.unwrap();
        let second = res_rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(res_rx.try_recv().is_err(), "cap of 2 exceeded");
        assert_eq!(pool.available_permits(), 0);

        drop(first);
        drop(second);
        let mut rest = 0;
        while res_rx.recv().await.is_some() {
            rest += 1;
        }
        assert_eq!(rest, 2);
        pool.join().await;
    }

    #[tokio::test]
    async fn cancel_stops_pulling() {
        let (res_tx, mut res_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = ConversionPool::start(
            settings(2, 8),
            Arc::new(Blank),
            queue(&[1, 2]).await,
            res_tx,
            cancel,
        );
        pool.join().await;
        assert!(res_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let (res_tx, mut res_rx) = mpsc::channel(8);
        let mut s = settings(1, 8);
        s.page_timeout = Some(Duration::from_millis(100));
        let pool = ConversionPool::start(
            s,
            Arc::new(Sleepy),
            queue(&[1]).await,
            res_tx,
            CancellationToken::new(),
        );
        let r = res_rx.recv().await.unwrap();
        assert!(matches!(r.outcome, Err(PageError::Timeout { page: 1, .. })));
        pool.join().await;
    }
}
