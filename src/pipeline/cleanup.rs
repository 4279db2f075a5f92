//! Bounded-retry release of temporary artifacts.
//!
//! Deletion can fail transiently (a virus scanner or a preview process
//! holding the file). Each release is attempted up to `max_attempts` times
//! with exponential backoff (`backoff * 2^(attempt - 2)` before every retry);
//! exhaustion is logged and reported, never raised.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::extract::ARTIFACT_PREFIX;
use crate::pipeline::input::is_pdf_name;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.cleanup_max_attempts,
            backoff: Duration::from_millis(config.cleanup_backoff_ms),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(2)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(250),
        }
    }
}

/// How a release attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { attempts: u32 },
    /// The resource did not exist (any more).
    AlreadyGone,
    Exhausted { attempts: u32, last_error: String },
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        !matches!(self, ReleaseOutcome::Exhausted { .. })
    }
}

/// Run `release` until it succeeds, reports `NotFound`, or the attempts
/// run out.
pub async fn release_with_retry<F, Fut>(
    what: &str,
    policy: RetryPolicy,
    mut release: F,
) -> ReleaseOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.delay_before(attempt);
            debug!(
                "Releasing {}: retry {}/{} after {}ms",
                what,
                attempt - 1,
                max_attempts - 1,
                delay.as_millis()
            );
            sleep(delay).await;
        }
        match release().await {
            Ok(()) => return ReleaseOutcome::Released { attempts: attempt },
            Err(e) if e.kind() == ErrorKind::NotFound => return ReleaseOutcome::AlreadyGone,
            Err(e) => {
                debug!("Releasing {}: attempt {} failed: {}", what, attempt, e);
                last_error = e.to_string();
            }
        }
    }

    warn!(
        "Could not release {} after {} attempts: {}",
        what, max_attempts, last_error
    );
    ReleaseOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

/// Delete one artifact file with retry.
pub async fn remove_artifact(path: &Path, policy: RetryPolicy) -> ReleaseOutcome {
    let what = path.display().to_string();
    release_with_retry(&what, policy, || tokio::fs::remove_file(path)).await
}

/// Delete every file in `paths`; returns how many are gone afterwards.
pub async fn remove_artifacts(paths: &[PathBuf], policy: RetryPolicy) -> usize {
    let mut removed = 0;
    for path in paths {
        if remove_artifact(path, policy).await.is_released() {
            removed += 1;
        }
    }
    removed
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Whether `name` looks like a segment artifact.
pub fn is_artifact_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX) && is_pdf_name(name)
}

/// Delete leftover segment artifacts in `dir`, e.g. after a crashed run.
pub async fn sweep_orphaned_artifacts(
    dir: &Path,
    policy: RetryPolicy,
) -> Result<SweepReport, PipelineError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::persistence(dir, e))?;

    let mut orphans = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::persistence(dir, e))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_artifact_name(&entry.file_name().to_string_lossy()) {
            orphans.push(entry.path());
        }
    }
    orphans.sort();

    let mut report = SweepReport::default();
    for path in orphans {
        if remove_artifact(&path, policy).await.is_released() {
            report.removed.push(path);
        } else {
            report.failed.push(path);
        }
    }

    info!(
        "Swept {}: {} artifacts removed, {} left",
        dir.display(),
        report.removed.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tempfile::TempDir;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let p = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(250),
        };
        assert_eq!(p.delay_before(2), Duration::from_millis(250));
        assert_eq!(p.delay_before(3), Duration::from_millis(500));
        assert_eq!(p.delay_before(5), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn removes_existing_file_first_try() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp_segment_a_1234abcd.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let outcome = remove_artifact(&path, quick(5)).await;
        assert_eq!(outcome, ReleaseOutcome::Released { attempts: 1 });
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_is_already_gone() {
        let dir = TempDir::new().unwrap();
        let outcome = remove_artifact(&dir.path().join("nope.pdf"), quick(5)).await;
        assert_eq!(outcome, ReleaseOutcome::AlreadyGone);
        assert!(outcome.is_released());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut calls = 0;
        let outcome = release_with_retry("locked", quick(5), || {
            calls += 1;
            let result = if calls < 3 {
                Err(io::Error::new(ErrorKind::PermissionDenied, "in use"))
            } else {
                Ok(())
            };
            std::future::ready(result)
        })
        .await;
        assert_eq!(outcome, ReleaseOutcome::Released { attempts: 3 });
    }

    #[tokio::test]
    async fn exhaustion_is_reported_not_raised() {
        let mut calls = 0;
        let outcome = release_with_retry("stuck", quick(5), || {
            calls += 1;
            std::future::ready(Err(io::Error::new(ErrorKind::PermissionDenied, "in use")))
        })
        .await;
        assert_eq!(calls, 5);
        match outcome {
            ReleaseOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 5);
                assert!(last_error.contains("in use"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sweep_only_touches_artifacts() {
        let dir = TempDir::new().unwrap();
        for name in [
            "temp_segment_invoice_1_0a1b2c3d.pdf",
            "temp_segment_lease_1_deadbeef.PDF",
            "contract.pdf",
            "temp_segment_notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let report = sweep_orphaned_artifacts(dir.path(), quick(1)).await.unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(report.failed.is_empty());
        assert!(dir.path().join("contract.pdf").exists());
        assert!(dir.path().join("temp_segment_notes.txt").exists());
    }
}
