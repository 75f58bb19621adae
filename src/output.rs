//! Job state and the end-of-job report.

use crate::error::{PageError, PrintError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifecycle of one print job.
///
/// `Idle → Converting → Draining → Closed` on success; any phase may move to
/// `Failed` on a fatal device error or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Idle,
    Converting,
    Draining,
    Closed,
    Failed,
}

impl JobPhase {
    /// `Closed` and `Failed` are final; no further transition happens.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Closed | JobPhase::Failed)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Idle => "idle",
            JobPhase::Converting => "converting",
            JobPhase::Draining => "draining",
            JobPhase::Closed => "closed",
            JobPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a running or finished job.
///
/// Returned by [`crate::pipeline::coordinator::JobControl::status`] and
/// [`crate::service::PrintService::status`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub total_pages: u32,
    /// Pages rasterised successfully.
    pub converted_pages: u32,
    /// Pages whose rasterisation failed.
    pub failed_pages: u32,
    /// Pages the device has accepted.
    pub emitted_pages: u32,
    /// First per-page or fatal error seen, if any.
    pub first_failure: Option<String>,
    /// Device the job is bound to once a session has been opened.
    pub device: Option<String>,
}

/// One page that could not be printed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFailure {
    /// Document page number.
    pub page: u32,
    pub error: PageError,
}

/// Result of one print job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Input as given by the caller (path or URL).
    pub document: String,
    /// Device the job targeted.
    pub device: String,
    /// Number of pages selected for printing.
    pub total_pages: u32,
    /// Document page numbers printed, ascending.
    pub succeeded_pages: Vec<u32>,
    /// Pages that failed to rasterise, ascending by page.
    pub failed_pages: Vec<PageFailure>,
    /// Pages never printed because the job stopped early.
    pub skipped_pages: Vec<u32>,
    pub phase: JobPhase,
    /// Terminal error of a failed job.
    pub fatal_error: Option<String>,
    pub elapsed_ms: u64,
    /// Not serialised; kept so [`JobReport::into_result`] can return the
    /// original error.
    #[serde(skip)]
    pub(crate) fatal: Option<FatalError>,
}

/// Wrapper that lets a [`PrintError`] ride inside a `Clone` report.
#[derive(Debug, Clone)]
pub(crate) struct FatalError(std::sync::Arc<PrintError>);

impl FatalError {
    pub(crate) fn new(e: PrintError) -> Self {
        Self(std::sync::Arc::new(e))
    }
}

impl JobReport {
    /// `true` when every selected page was printed.
    pub fn is_complete_success(&self) -> bool {
        self.phase == JobPhase::Closed && self.failed_pages.is_empty()
    }

    /// Convert the report into a `Result`.
    ///
    /// A failed job yields its terminal error; a job with page failures yields
    /// [`PrintError::PartialFailure`].
    pub fn into_result(self) -> Result<JobReport, PrintError> {
        if self.phase == JobPhase::Failed {
            let err = match self.fatal {
                Some(FatalError(arc)) => std::sync::Arc::try_unwrap(arc)
                    .unwrap_or_else(|shared| PrintError::Internal(shared.to_string())),
                None => PrintError::Internal(
                    self.fatal_error
                        .unwrap_or_else(|| "job failed".to_string()),
                ),
            };
            return Err(err);
        }
        if !self.failed_pages.is_empty() {
            return Err(PrintError::PartialFailure {
                succeeded: self.succeeded_pages.len(),
                failed: self.failed_pages.len(),
                total: self.total_pages,
            });
        }
        Ok(self)
    }

    /// Serialise the report as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Write `value` to `path` as pretty-printed JSON, replacing the file.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), PrintError> {
    let failed = |source: std::io::Error| PrintError::ReportWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(value).map_err(|e| failed(e.into()))?;
    std::fs::write(path, json).map_err(failed)
}
