//! Split stage: one remote segmentation job per source document.
//!
//! ## Per-document flow
//!
//! ```text
//! pending ──▶ processing ("Uploading file...")
//!         ──▶ processing ("Creating split job...")
//!         ──▶ processing ("Waiting for split job..." / "Status: <remote>")
//!         ──▶ completed | failed
//! ```
//!
//! Documents are processed strictly one after another. A failure (invalid
//! file, transport error, remote job failure) is recorded as `failed` with an
//! empty segment list and the batch moves on. The full filename → segments
//! mapping is written once, after the last document.
//!
//! When the cancellation token fires, the document in flight and all later
//! ones go back to `pending`. Only finished documents are merged into the
//! existing results record; entries of the others are left as they were.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{Segment, SplitReport};
use crate::pipeline::input;
use crate::pipeline::remote::{
    poll_until_terminal, PollOutcome, PollPolicy, RemoteJobClient, RemoteSegment,
};
use crate::progress::{NoopProgress, ProgressCallback};
use crate::records;
use crate::status::{Stage, StageStatus, StatusStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Category assigned to segments the splitter left without one.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Status message of documents a cancelled run left unfinished.
pub const CANCELLED: &str = "Cancelled, waiting for the next run";

/// Drives the split stage over every source PDF in the data directory.
pub struct SplitOrchestrator {
    config: PipelineConfig,
    client: Arc<dyn RemoteJobClient>,
    status: StatusStore,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

impl SplitOrchestrator {
    pub fn new(config: PipelineConfig, client: Arc<dyn RemoteJobClient>) -> Self {
        let status = StatusStore::new(&config.data_dir, Stage::Split);
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgress));
        Self {
            config,
            client,
            status,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop polling and skip the remaining documents once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    /// Split every source document and write `split_results.json`.
    ///
    /// Only listing the data directory or writing the results record can
    /// fail the whole run; per-document failures end up in the report.
    pub async fn run(&self) -> Result<SplitReport, PipelineError> {
        let data_dir = &self.config.data_dir;
        let sources = input::list_source_names(data_dir).await?;
        info!("Found {} PDF files in {}", sources.len(), data_dir.display());

        self.status
            .init(sources.iter().cloned(), "Waiting for processing")
            .await?;
        self.progress.on_stage_start(Stage::Split, sources.len());

        let mut report = SplitReport::default();
        for (i, file) in sources.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.stop_early(&sources[i..], &mut report).await;
                break;
            }

            self.progress
                .on_document_start(Stage::Split, file, i + 1, sources.len());
            info!("Processing {} ({}/{})", file, i + 1, sources.len());

            let segments = match self.split_document(file, &data_dir.join(file)).await {
                Ok(segments) => {
                    info!("{}: {} segments", file, segments.len());
                    self.status
                        .record(file, StageStatus::Completed, "Processing completed")
                        .await;
                    self.progress.on_document_complete(
                        Stage::Split,
                        file,
                        StageStatus::Completed,
                        segments.len(),
                    );
                    report.succeeded += 1;
                    segments
                }
                Err(e) if self.cancel.is_cancelled() => {
                    debug!("{}: interrupted: {}", file, e);
                    self.stop_early(&sources[i..], &mut report).await;
                    break;
                }
                Err(e) => {
                    warn!("{}: split failed: {}", file, e);
                    let message = match e {
                        PipelineError::RemoteJobFailed { .. } => "Processing failed".to_string(),
                        other => format!("Error: {other}"),
                    };
                    self.status.record(file, StageStatus::Failed, message).await;
                    self.progress
                        .on_document_complete(Stage::Split, file, StageStatus::Failed, 0);
                    report.failed += 1;
                    Vec::new()
                }
            };
            report.results.insert(file.clone(), segments);
        }

        // A cancelled run must not drop the entries of documents it never
        // reached.
        let path = self.config.split_results_path();
        if report.cancelled {
            records::merge_json_atomic(&path, report.results.clone()).await?;
        } else {
            records::write_json_atomic(&path, &report.results).await?;
        }
        info!(
            "Split finished: {} documents, {} segments, {} failed",
            report.total_documents(),
            report.total_segments(),
            report.failed
        );
        self.progress
            .on_stage_complete(Stage::Split, report.succeeded, report.failed);
        Ok(report)
    }

    async fn split_document(&self, file: &str, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        self.set_processing(file, "Starting processing...").await;
        input::validate_pdf(path)?;

        self.set_processing(file, "Uploading file...").await;
        let file_id = self.client.upload_file(path).await?;

        self.set_processing(file, "Creating split job...").await;
        let job_id = self
            .client
            .submit_split_job(
                &file_id,
                &self.config.categories,
                self.config.allow_uncategorized,
            )
            .await?;

        self.set_processing(file, "Waiting for split job...").await;

        // Only status changes are written, not every poll.
        let last_status = Mutex::new(String::new());
        let (last_status, job, client) = (&last_status, job_id.as_str(), &self.client);
        let remote = poll_until_terminal(
            job,
            PollPolicy::from_config(&self.config),
            &self.cancel,
            move || async move {
                let outcome = client.poll_split_job(job).await?;
                if let PollOutcome::Pending { status } = &outcome {
                    let changed = {
                        let mut last = last_status.lock().await;
                        if *last == *status {
                            false
                        } else {
                            *last = status.clone();
                            true
                        }
                    };
                    if changed {
                        self.set_processing(file, &format!("Status: {status}")).await;
                    }
                }
                Ok::<_, PipelineError>(outcome)
            },
            |_| {},
        )
        .await?;

        Ok(name_segments(remote))
    }

    /// Return `unfinished` to `pending` and flag the report as cancelled.
    async fn stop_early(&self, unfinished: &[String], report: &mut SplitReport) {
        warn!(
            "Split cancelled, {} documents left unprocessed",
            unfinished.len()
        );
        if let Err(e) = self.status.reset(unfinished.iter().cloned(), CANCELLED).await {
            warn!("split status reset failed: {}", e);
        }
        report.cancelled = true;
    }

    async fn set_processing(&self, file: &str, message: &str) {
        self.status
            .record(file, StageStatus::Processing, message)
            .await;
        self.progress.on_document_status(Stage::Split, file, message);
    }
}

/// Name remote segments `{category}_{n}`, counting per category in
/// first-seen order. Category, pages and confidence are kept verbatim.
pub fn name_segments(remote: Vec<RemoteSegment>) -> Vec<Segment> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    remote
        .into_iter()
        .map(|r| {
            let category = r
                .category
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            let n = counters.entry(category.clone()).or_insert(0);
            *n += 1;
            Segment {
                name: format!("{category}_{n}"),
                category,
                pages: r.pages,
                confidence_category: r.confidence_category,
            }
        })
        .collect()
}
