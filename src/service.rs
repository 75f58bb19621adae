//! In-memory print job service.
//!
//! [`PrintService`] accepts print requests, runs them through the pipeline
//! and keeps every job's status for the life of the service. Jobs that name
//! the same device run one after another; jobs for different devices run in
//! parallel.
//!
//! ```rust,no_run
//! use rasterprint::{PrintConfig, PrintRequest, PrintService};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = PrintService::new(PrintConfig::default());
//! let id = service.submit(PrintRequest::new("report.pdf", "png:/tmp/preview"))?;
//! if let Some(status) = service.status(id) {
//!     println!("{}: {}/{} pages", status.phase, status.emitted_pages, status.total_pages);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{MediaSize, PageSelection, PrintConfig};
use crate::device::{open_device, PrintDevice};
use crate::error::PrintError;
use crate::output::{JobPhase, JobReport, JobStatus};
use crate::pipeline::coordinator::{JobControl, PrintPipeline};
use crate::pipeline::input;
use crate::pipeline::raster::{rasterizer_for, Rasterizer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

/// Builds the device for a request from its device name.
pub type DeviceResolver =
    Arc<dyn Fn(&str, MediaSize, u32) -> Result<Arc<dyn PrintDevice>, PrintError> + Send + Sync>;

/// One print request. Unset fields fall back to the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRequest {
    /// Local path or HTTP(S) URL.
    pub document: String,
    /// Device name, e.g. `png:/tmp/out`.
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_mm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PrintRequest {
    pub fn new(document: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            device: device.into(),
            dpi: None,
            worker_count: None,
            margin_mm: None,
            pages: None,
            title: None,
        }
    }
}

/// Everything the service knows about one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub document: String,
    pub device: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error that stopped the job before printing started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<JobReport>,
}

struct JobEntry {
    request: PrintRequest,
    control: JobControl,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    report: Option<JobReport>,
}

impl JobEntry {
    fn status(&self) -> JobStatus {
        let mut status = self.control.status();
        if let Some(ref e) = self.error {
            status.phase = JobPhase::Failed;
            status.first_failure = Some(e.clone());
        }
        status
    }

    fn record(&self, id: JobId) -> JobRecord {
        JobRecord {
            id,
            document: self.request.document.clone(),
            device: self.request.device.clone(),
            status: self.status(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
            report: self.report.clone(),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Accepts print jobs and tracks their status in memory.
#[derive(Clone)]
pub struct PrintService {
    config: PrintConfig,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    devices: DeviceResolver,
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    device_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PrintService {
    /// Service printing through the configured raster backend to devices
    /// named `urf:` or `png:`.
    pub fn new(config: PrintConfig) -> Self {
        Self {
            config,
            rasterizer: None,
            devices: Arc::new(open_device),
            jobs: Arc::default(),
            device_locks: Arc::default(),
        }
    }

    /// Service with a custom rasteriser and device resolver.
    pub fn with_backends(
        config: PrintConfig,
        rasterizer: Arc<dyn Rasterizer>,
        devices: DeviceResolver,
    ) -> Self {
        Self {
            rasterizer: Some(rasterizer),
            devices,
            ..Self::new(config)
        }
    }

    /// Print and wait until the job is `Closed` or `Failed`.
    pub async fn print(&self, request: PrintRequest) -> Result<JobReport, PrintError> {
        let (id, config, control) = self.register(request)?;
        self.run(id, config, control).await
    }

    /// Queue a job and return its id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: PrintRequest) -> Result<JobId, PrintError> {
        let (id, config, control) = self.register(request)?;
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run(id, config, control).await {
                warn!("Job {} failed: {}", id, e);
            }
        });
        Ok(id)
    }

    /// Current status of a job.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.lock_jobs().get(&id).map(JobEntry::status)
    }

    /// Full record of a job.
    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.lock_jobs().get(&id).map(|e| e.record(id))
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .lock_jobs()
            .iter()
            .map(|(id, e)| e.record(*id))
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Cancel a queued or running job. Returns `false` if the job is unknown
    /// or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.lock_jobs().get(&id) {
            Some(entry) if !entry.is_finished() => {
                info!("Cancelling job {}", id);
                entry.control.cancel();
                true
            }
            _ => false,
        }
    }

    fn register(&self, request: PrintRequest) -> Result<(JobId, PrintConfig, JobControl), PrintError> {
        let config = self.config_for(&request)?;
        let id = Uuid::new_v4();
        let control = JobControl::new();
        self.lock_jobs().insert(
            id,
            JobEntry {
                request,
                control: control.clone(),
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
                report: None,
            },
        );
        Ok((id, config, control))
    }

    fn config_for(&self, request: &PrintRequest) -> Result<PrintConfig, PrintError> {
        let mut builder = PrintConfig::builder()
            .dpi(request.dpi.unwrap_or(self.config.dpi))
            .worker_count(request.worker_count.unwrap_or(self.config.worker_count))
            .max_pending_pages(self.config.max_pending_pages)
            .max_rendered_pixels(self.config.max_rendered_pixels)
            .margin_mm(request.margin_mm.unwrap_or(self.config.margin_mm))
            .media(self.config.media)
            .pages(request.pages.clone().unwrap_or_else(|| self.config.pages.clone()))
            .download_timeout_secs(self.config.download_timeout_secs);
        if let Some(secs) = self.config.page_timeout_secs {
            builder = builder.page_timeout_secs(secs);
        }
        if let Some(ref pwd) = self.config.password {
            builder = builder.password(pwd.clone());
        }
        if let Some(title) = request.title.clone().or_else(|| self.config.job_title.clone()) {
            builder = builder.job_title(title);
        }
        if let Some(ref cb) = self.config.progress_callback {
            builder = builder.progress_callback(Arc::clone(cb));
        }
        builder.build()
    }

    async fn run(
        &self,
        id: JobId,
        config: PrintConfig,
        control: JobControl,
    ) -> Result<JobReport, PrintError> {
        let result = self.execute(id, &config, &control).await;
        let mut jobs = self.lock_jobs();
        if let Some(entry) = jobs.get_mut(&id) {
            entry.finished_at = Some(Utc::now());
            match &result {
                Ok(report) => entry.report = Some(report.clone()),
                Err(e) => entry.error = Some(e.to_string()),
            }
        }
        result
    }

    async fn execute(
        &self,
        id: JobId,
        config: &PrintConfig,
        control: &JobControl,
    ) -> Result<JobReport, PrintError> {
        let (document, device_name) = {
            let jobs = self.lock_jobs();
            let entry = jobs
                .get(&id)
                .ok_or_else(|| PrintError::Internal(format!("job {id} vanished")))?;
            (entry.request.document.clone(), entry.request.device.clone())
        };
        let device = (self.devices)(&device_name, config.media, config.dpi)?;

        // One job per device at a time.
        let lock = self.device_lock(device.name());
        let _held = tokio::select! {
            biased;
            _ = control.cancelled() => {
                return Err(PrintError::Cancelled { emitted: 0, total: 0 });
            }
            held = lock.lock_owned() => held,
        };
        if let Some(entry) = self.lock_jobs().get_mut(&id) {
            entry.started_at = Some(Utc::now());
        }
        info!("Job {} started on '{}'", id, device.name());

        let resolved = input::resolve_input(&document, config.download_timeout_secs).await?;
        let rasterizer = self
            .rasterizer
            .clone()
            .unwrap_or_else(|| rasterizer_for(&config));
        PrintPipeline::new(rasterizer, device, config.clone())
            .print_document_as(resolved.path(), &resolved.label(), control)
            .await
    }

    fn device_lock(&self, device: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(device.to_string()).or_default())
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_overrides_service_defaults() {
        let service = PrintService::new(PrintConfig::builder().dpi(150).build().unwrap());
        let mut request = PrintRequest::new("a.pdf", "png:/tmp/x");
        request.worker_count = Some(2);
        let config = service.config_for(&request).unwrap();
        assert_eq!(config.dpi, 150);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn request_json_roundtrip_skips_unset_fields() {
        let json = serde_json::to_string(&PrintRequest::new("a.pdf", "png:out")).unwrap();
        assert_eq!(json, r#"{"document":"a.pdf","device":"png:out"}"#);
        let parsed: PrintRequest = serde_json::from_str(r#"{"document":"b.pdf","device":"urf:x.urf","dpi":600}"#).unwrap();
        assert_eq!(parsed.dpi, Some(600));
    }

    #[test]
    fn unknown_job_has_no_status() {
        let service = PrintService::new(PrintConfig::default());
        assert!(service.status(Uuid::new_v4()).is_none());
        assert!(!service.cancel(Uuid::new_v4()));
        assert!(service.jobs().is_empty());
    }

    #[tokio::test]
    async fn input_error_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let service = PrintService::new(PrintConfig::default());
        let request = PrintRequest::new("/no/such.pdf", format!("png:{}", dir.path().display()));
        let err = service.print(request).await.unwrap_err();
        assert!(err.is_input_error());
        let jobs = service.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status.phase, JobPhase::Failed);
        assert!(jobs[0].finished_at.is_some());
        assert!(!service.cancel(jobs[0].id));
    }
}
