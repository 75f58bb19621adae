//! Input resolution: turn a path, URL or byte buffer into a local PDF file.
//!
//! Every worker reopens the document by path, so non-file inputs are
//! written to a temporary location that lives as long as the
//! [`ResolvedInput`]. The `%PDF` magic is checked here so a wrong file
//! fails before any worker starts.

use crate::error::PrintError;
use futures::StreamExt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A document ready to be opened by path.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Downloaded from a URL; removed when dropped.
    Downloaded {
        url: String,
        path: PathBuf,
        _temp_dir: TempDir,
    },
    /// Written from an in-memory buffer; removed when dropped.
    Buffered(NamedTempFile),
}

impl ResolvedInput {
    /// Path the rasteriser should open.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Buffered(tmp) => tmp.path(),
        }
    }

    /// Name to show in logs and reports.
    pub fn label(&self) -> String {
        match self {
            ResolvedInput::Local(p) => p.display().to_string(),
            ResolvedInput::Downloaded { url, .. } => url.clone(),
            ResolvedInput::Buffered(_) => "<memory>".to_string(),
        }
    }
}

/// What a user-supplied input string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Url,
    Directory,
    File,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify an input string without reading it.
pub fn classify(input: &str) -> InputKind {
    if is_url(input) {
        InputKind::Url
    } else if Path::new(input).is_dir() {
        InputKind::Directory
    } else {
        InputKind::File
    }
}

/// Resolve a path or URL to a local PDF.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, PrintError> {
    match classify(input) {
        InputKind::Url => download_url(input, timeout_secs).await,
        InputKind::Directory => Err(PrintError::InvalidInput {
            input: input.to_string(),
        }),
        InputKind::File => resolve_local(input),
    }
}

/// Write `bytes` to a temporary file after checking they are a PDF.
pub fn resolve_bytes(bytes: &[u8]) -> Result<ResolvedInput, PrintError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| PrintError::Internal(format!("tempfile: {e}")))?;
    check_magic(bytes, tmp.path())?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| PrintError::Internal(format!("tempfile write: {e}")))?;
    debug!("Buffered {} bytes to {}", bytes.len(), tmp.path().display());
    Ok(ResolvedInput::Buffered(tmp))
}

/// All `*.pdf` files directly inside `dir`, sorted by file name.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, PrintError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PrintError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => PrintError::FileNotFound {
            path: dir.to_path_buf(),
        },
    })?;
    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    Ok(pdfs)
}

fn check_magic(head: &[u8], path: &Path) -> Result<(), PrintError> {
    if head.len() >= 4 && &head[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[..4]);
        return Err(PrintError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, PrintError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(PrintError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PrintError::PermissionDenied { path });
        }
        Err(_) => return Err(PrintError::FileNotFound { path }),
    };
    let mut head = [0u8; 4];
    if file.read_exact(&mut head).is_ok() {
        check_magic(&head, &path)?;
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Stream a URL into a temporary directory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PrintError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| PrintError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify_err = |e: reqwest::Error| {
        if e.is_timeout() {
            PrintError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client.get(url).send().await.map_err(classify_err)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = response_filename(&response).unwrap_or_else(|| url_filename(url));
    let temp_dir = TempDir::new().map_err(|e| PrintError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(&filename);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| PrintError::Internal(format!("Failed to create temp file: {e}")))?;

    let mut stream = response.bytes_stream();
    let mut head: Vec<u8> = Vec::with_capacity(4);
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_err)?;
        if head.len() < 4 {
            let take = (4 - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            check_magic(&head, &path)?;
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| PrintError::Internal(format!("Failed to write temp file: {e}")))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| PrintError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to {}", written, path.display());
    Ok(ResolvedInput::Downloaded {
        url: url.to_string(),
        path,
        _temp_dir: temp_dir,
    })
}

/// File name from a `Content-Disposition: attachment; filename=...` header.
fn response_filename(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    disposition_filename(header)
}

fn disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).to_string())
        .find(|name| !name.is_empty() && name != "." && name != "..")
}

/// Last path segment of the URL when it looks like a file name.
fn url_filename(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
