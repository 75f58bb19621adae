//! Pipeline stages for printing a document.
//!
//! Each submodule implements one stage. Stages talk through channels and
//! plain values, so each is testable on its own and the rasteriser or
//! device can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ pool (N workers) ──▶ reorder ──▶ emit ──▶ device
//! (path/URL) (tasks)   (raster, unordered)  (ascending)  (serialised)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`source`]: one task per selected page, numbered 1..=K
//! 3. [`pool`]: rasterise in parallel through a [`raster::Rasterizer`];
//!    ([`poppler`] subprocesses by default, or pdfium); runs in
//!    `spawn_blocking` because both backends block
//! 4. [`reorder`]: hold early pages until their predecessors are out
//! 5. [`emit`]: bracket the job and pages on the device, fit each image
//!    to the printable area
//!
//! [`coordinator`] wires the stages together for one document.

pub mod coordinator;
pub mod emit;
pub mod input;
pub mod pool;
pub mod poppler;
pub mod raster;
pub mod reorder;
pub mod source;
