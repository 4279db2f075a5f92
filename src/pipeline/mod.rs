//! Building blocks shared by the split and parse stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ remote (split) ──▶ extract ──▶ remote (parse) ──▶ page_text
//!                                 │
//!                                 └──────────▶ cleanup
//! ```
//!
//! 1. [`input`]: find, validate and match source PDFs in the data directory
//! 2. [`remote`]: the [`remote::RemoteJobClient`] seam and the poll loop;
//!    [`llama_cloud`] is its HTTP implementation
//! 3. [`extract`]: copy a segment's pages into a temporary PDF; runs in
//!    `spawn_blocking` because lopdf is synchronous
//! 4. [`page_text`]: turn the parser's per-page result into text and
//!    markdown
//! 5. [`cleanup`]: delete temporary artifacts with bounded retries

pub mod cleanup;
pub mod extract;
pub mod input;
pub mod llama_cloud;
pub mod page_text;
pub mod remote;
