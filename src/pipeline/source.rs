//! Page enumeration: one [`PageTask`] per selected page.

use std::path::Path;
use std::sync::Arc;

/// Unit of work for a conversion worker.
///
/// `page` is the job page number, contiguous from 1 to `total_pages`, and is
/// the key the reorder stage sorts on. `source_page` is the page of the
/// document to rasterise; it differs from `page` when only part of the
/// document is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub document: Arc<Path>,
    pub page: u32,
    pub source_page: u32,
    pub total_pages: u32,
}

/// Build the task list for `source_pages`, in job order.
pub fn page_tasks(document: &Path, source_pages: &[u32]) -> Vec<PageTask> {
    let document: Arc<Path> = Arc::from(document);
    let total_pages = source_pages.len() as u32;
    source_pages
        .iter()
        .enumerate()
        .map(|(i, &source_page)| PageTask {
            document: Arc::clone(&document),
            page: i as u32 + 1,
            source_page,
            total_pages,
        })
        .collect()
}
