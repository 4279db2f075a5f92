//! Error types for the docsplit pipeline.
//!
//! Failures come in two scopes:
//!
//! * **Batch-fatal**: the stage cannot run at all. Today that is only a
//!   missing split-results record when the parse stage starts
//!   ([`PipelineError::MissingSplitResults`]) or an invalid configuration.
//!
//! * **Item-scoped**: one document or one segment failed. The orchestrators
//!   catch these, record them (status store entry, empty segment list, or a
//!   [`crate::output::ParseOutcome::Failed`] entry) and move on to the next
//!   item. They still travel as [`PipelineError`] values up to the point
//!   where they are recorded.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docsplit library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Remote service errors ─────────────────────────────────────────────
    /// Network failure or non-success HTTP status while talking to a remote
    /// service (upload, job submission, polling, result download).
    #[error("{operation} failed: {detail}")]
    Transport { operation: String, detail: String },

    /// The remote service reported the job as failed.
    #[error("Remote job {job_id} failed: {reason}")]
    RemoteJobFailed { job_id: String, reason: String },

    /// A polling deadline elapsed before the job reached a terminal state.
    #[error("Remote job {job_id} did not finish within {secs}s")]
    PollTimeout { job_id: String, secs: u64 },

    /// Polling was cancelled through the caller's cancellation token.
    #[error("Polling of remote job {job_id} was cancelled")]
    Cancelled { job_id: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// The source could not be opened or no requested page was in range.
    #[error("Cannot extract segment from '{path}': {detail}")]
    Extraction { path: PathBuf, detail: String },

    /// The remote parser failed or returned no usable content.
    #[error("Parsing failed: {detail}")]
    ParseFailed { detail: String },

    /// The file is missing or does not start with the `%PDF` magic bytes.
    #[error("Not a readable PDF: '{path}'")]
    NotAPdf { path: PathBuf },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A status or result record could not be read or written.
    #[error("Cannot access record '{path}': {detail}")]
    Persistence { path: PathBuf, detail: String },

    /// The parse stage needs the split results, and they do not exist.
    #[error("Split results not found at '{path}'\nRun the split stage first.")]
    MissingSplitResults { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn transport(operation: impl Into<String>, detail: impl ToString) -> Self {
        Self::Transport {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Whether this error aborts a whole stage rather than a single item.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingSplitResults { .. } | PipelineError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_names_operation() {
        let e = PipelineError::transport("Upload of a.pdf", "connection reset");
        let msg = e.to_string();
        assert!(msg.contains("Upload of a.pdf"), "got: {msg}");
        assert!(msg.contains("connection reset"), "got: {msg}");
    }

    #[test]
    fn missing_split_results_is_batch_fatal() {
        let e = PipelineError::MissingSplitResults {
            path: PathBuf::from("data/split_results.json"),
        };
        assert!(e.is_batch_fatal());
        assert!(e.to_string().contains("split_results.json"));
    }

    #[test]
    fn item_errors_are_not_batch_fatal() {
        let e = PipelineError::RemoteJobFailed {
            job_id: "job-1".into(),
            reason: "failed".into(),
        };
        assert!(!e.is_batch_fatal());
        let e = PipelineError::Extraction {
            path: PathBuf::from("a.pdf"),
            detail: "no valid pages".into(),
        };
        assert!(!e.is_batch_fatal());
    }

    #[test]
    fn poll_timeout_display() {
        let e = PipelineError::PollTimeout {
            job_id: "abc".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("abc"));
    }
}
