//! Remote job contract: upload, split-job submission, single-step polling
//! and document parsing.
//!
//! Orchestrators only talk to the [`RemoteJobClient`] trait, so tests can
//! substitute a scripted fake. Polling is split in two: a client exposes one
//! status check (`poll_split_job`), and [`poll_until_terminal`] drives any
//! such step with a fixed interval, an optional deadline and a cancellation
//! token.

use crate::config::{Category, PipelineConfig};
use crate::error::PipelineError;
use crate::output::null_as_empty;
use crate::pipeline::page_text::ParsedDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one status check on a remote job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// Not terminal yet; `status` is the raw state reported by the service.
    Pending { status: String },
    Completed(T),
    Failed { reason: String },
}

/// A segment as reported by the remote splitter, before naming.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteSegment {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pages: Vec<i64>,
    #[serde(default)]
    pub confidence_category: Option<String>,
}

/// Remote segmentation and parsing services.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Upload a source document and return the remote file id.
    async fn upload_file(&self, path: &Path) -> Result<String, PipelineError>;

    /// Start a split job on an uploaded file and return the job id.
    async fn submit_split_job(
        &self,
        file_id: &str,
        categories: &[Category],
        allow_uncategorized: bool,
    ) -> Result<String, PipelineError>;

    /// Check a split job once.
    async fn poll_split_job(
        &self,
        job_id: &str,
    ) -> Result<PollOutcome<Vec<RemoteSegment>>, PipelineError>;

    /// Parse a document and return its per-page content. Returns once the
    /// remote parse is finished.
    async fn parse_document(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ParsedDocument, PipelineError>;
}

/// Interval and optional deadline of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until a terminal state, however long that takes.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            deadline: config.poll_timeout(),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

/// Call `step` until it reports a terminal state.
///
/// `on_pending` sees every non-terminal status before the loop sleeps.
/// A `Failed` outcome becomes [`PipelineError::RemoteJobFailed`]; errors
/// from `step` are returned as-is without retry.
pub async fn poll_until_terminal<T, F, Fut, P>(
    job_id: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut step: F,
    mut on_pending: P,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>, PipelineError>>,
    P: FnMut(&str),
{
    let poll = async {
        let mut checks = 0u32;
        loop {
            checks += 1;
            match step().await? {
                PollOutcome::Completed(value) => {
                    debug!("Job {} completed after {} checks", job_id, checks);
                    return Ok(value);
                }
                PollOutcome::Failed { reason } => {
                    return Err(PipelineError::RemoteJobFailed {
                        job_id: job_id.to_string(),
                        reason,
                    });
                }
                PollOutcome::Pending { status } => {
                    debug!("Job {} status: {}", job_id, status);
                    on_pending(&status);
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    };

    let bounded = async {
        match policy.deadline {
            Some(deadline) => tokio::time::timeout(deadline, poll).await.map_err(|_| {
                PipelineError::PollTimeout {
                    job_id: job_id.to_string(),
                    secs: deadline.as_secs(),
                }
            })?,
            None => poll.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled {
            job_id: job_id.to_string(),
        }),
        result = bounded => result,
    }
}
