//! Parse stage: extract every segment into a temporary PDF, send it to the
//! remote parser and collect text and markdown.
//!
//! ## Failure scopes
//!
//! * Missing `split_results.json`: the run fails before touching anything.
//! * Missing source PDF: that document is marked `failed` with an empty
//!   segment list.
//! * Extraction or parse failure: recorded as `{"error": ...}` on that one
//!   segment; its siblings and the document carry on.
//!
//! Artifacts are collected during the run and deleted at the end with
//! bounded retries, whatever the outcome of their parse.
//!
//! Cancellation is checked before every segment. The interrupted document
//! and all later ones go back to `pending`, and only finished documents are
//! merged into the existing parsed-segments record.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{
    ParseOutcome, ParseReport, ParseSummary, ParsedResults, ParsedSegment, Segment,
};
use crate::pipeline::cleanup::{self, RetryPolicy};
use crate::pipeline::extract::SegmentExtractor;
use crate::pipeline::page_text;
use crate::pipeline::remote::RemoteJobClient;
use crate::progress::{NoopProgress, ProgressCallback};
use crate::records;
use crate::split::CANCELLED;
use crate::status::{Stage, StageStatus, StatusStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives the parse stage over the documents listed in the split results.
pub struct ParseOrchestrator {
    config: PipelineConfig,
    client: Arc<dyn RemoteJobClient>,
    extractor: SegmentExtractor,
    status: StatusStore,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

/// Position of a segment within the whole run, for status messages.
struct SegmentPosition {
    index: usize,
    total: usize,
}

impl ParseOrchestrator {
    pub fn new(config: PipelineConfig, client: Arc<dyn RemoteJobClient>) -> Self {
        let extractor = SegmentExtractor::new(config.artifact_dir());
        let status = StatusStore::new(&config.data_dir, Stage::Parse);
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgress));
        Self {
            config,
            client,
            extractor,
            status,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort running parses and skip the remaining documents once `cancel`
    /// fires. Artifacts created so far are still removed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    /// Parse every segment and write `parsed_segments.json`.
    pub async fn run(&self) -> Result<ParseReport, PipelineError> {
        let split = records::load_split_results(&self.config.split_results_path()).await?;
        let total_segments: usize = split.values().map(Vec::len).sum();
        info!(
            "Parsing {} segments from {} documents",
            total_segments,
            split.len()
        );

        self.status
            .init(split.keys().cloned(), "Waiting for parsing")
            .await?;
        let artifact_dir = self.extractor.output_dir();
        tokio::fs::create_dir_all(artifact_dir)
            .await
            .map_err(|e| PipelineError::persistence(artifact_dir, e))?;
        self.progress.on_stage_start(Stage::Parse, split.len());

        let mut results = ParsedResults::new();
        let mut artifacts: Vec<PathBuf> = Vec::new();
        let mut position = SegmentPosition {
            index: 0,
            total: total_segments,
        };
        let (mut docs_ok, mut docs_failed) = (0, 0);
        let files: Vec<&String> = split.keys().collect();
        let mut cancelled = false;
        // Segments of documents that reached a final status.
        let mut settled = 0;

        for (i, (file, segments)) in split.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.stop_early(&files[i..]).await;
                cancelled = true;
                break;
            }

            self.progress
                .on_document_start(Stage::Parse, file, i + 1, split.len());
            self.set_processing(file, &format!("Starting parsing for {file}..."))
                .await;

            let source = self.config.data_dir.join(file);
            if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
                warn!("Source PDF {} not found, skipping", file);
                self.status
                    .record(file, StageStatus::Failed, format!("PDF file not found: {file}"))
                    .await;
                self.progress
                    .on_document_complete(Stage::Parse, file, StageStatus::Failed, 0);
                results.insert(file.clone(), Vec::new());
                position.index += segments.len();
                settled += segments.len();
                docs_failed += 1;
                continue;
            }

            info!("Processing {} ({} segments)", file, segments.len());
            let mut parsed = Vec::with_capacity(segments.len());
            for segment in segments {
                if self.cancel.is_cancelled() {
                    break;
                }
                position.index += 1;
                let outcome = self
                    .parse_segment(&source, segment, &mut artifacts)
                    .await;
                // An outcome cut short by cancellation says nothing about
                // the segment.
                if self.cancel.is_cancelled() {
                    break;
                }
                self.report_segment(file, segment, &outcome, &position)
                    .await;
                parsed.push(ParsedSegment::new(segment, outcome));
            }
            if parsed.len() < segments.len() {
                self.stop_early(&files[i..]).await;
                cancelled = true;
                break;
            }

            let succeeded = parsed.iter().filter(|s| s.is_success()).count();
            self.status
                .record(
                    file,
                    StageStatus::Completed,
                    format!("Parsing completed for {file}"),
                )
                .await;
            self.progress
                .on_document_complete(Stage::Parse, file, StageStatus::Completed, succeeded);
            results.insert(file.clone(), parsed);
            settled += segments.len();
            docs_ok += 1;
        }

        info!("Removing {} temporary files", artifacts.len());
        let removed =
            cleanup::remove_artifacts(&artifacts, RetryPolicy::from_config(&self.config)).await;
        if removed < artifacts.len() {
            warn!(
                "{} temporary files could not be removed",
                artifacts.len() - removed
            );
        }

        let path = self.config.parsed_segments_path();
        if cancelled {
            records::merge_json_atomic(&path, results.clone()).await?;
        } else {
            records::write_json_atomic(&path, &results).await?;
        }

        let summary = ParseSummary {
            artifacts_created: artifacts.len(),
            artifacts_removed: removed,
            ..ParseSummary::from_results(&results, settled)
        };
        info!(
            "Parse finished: {} segments, {} parsed, {} failed",
            summary.total_segments, summary.succeeded, summary.failed
        );
        self.progress
            .on_stage_complete(Stage::Parse, docs_ok, docs_failed);

        Ok(ParseReport {
            results,
            summary,
            cancelled,
        })
    }

    /// Extract and parse one segment. Never fails: errors become the
    /// segment's outcome.
    async fn parse_segment(
        &self,
        source: &Path,
        segment: &Segment,
        artifacts: &mut Vec<PathBuf>,
    ) -> ParseOutcome {
        debug!(
            "Segment {}: category {}, pages {:?}, confidence {}",
            segment.name,
            segment.category,
            segment.pages,
            segment.confidence_or_unknown()
        );

        let artifact = match self
            .extractor
            .extract_async(source, &segment.pages, &segment.name)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Segment {}: {}", segment.name, e);
                return ParseOutcome::failed(e);
            }
        };
        artifacts.push(artifact.path.clone());

        let assembled = self
            .client
            .parse_document(&artifact.path, &self.cancel)
            .await
            .and_then(|doc| page_text::assemble(&doc));

        match assembled {
            Ok(content) => {
                if content.pages != artifact.page_count {
                    warn!(
                        "Segment {}: expected {} pages, {} parsed",
                        segment.name, artifact.page_count, content.pages
                    );
                }
                ParseOutcome::Parsed {
                    text: content.text,
                    markdown: content.markdown,
                    num_pages_parsed: content.pages,
                }
            }
            Err(e) => {
                warn!("Segment {}: {}", segment.name, e);
                ParseOutcome::failed(e)
            }
        }
    }

    async fn report_segment(
        &self,
        file: &str,
        segment: &Segment,
        outcome: &ParseOutcome,
        position: &SegmentPosition,
    ) {
        let message = match outcome {
            ParseOutcome::Parsed { markdown, .. } => {
                self.progress.on_segment_complete(
                    file,
                    &segment.name,
                    position.index,
                    position.total,
                    markdown.len(),
                );
                format!(
                    "Segment {}/{} parsed: {}",
                    position.index, position.total, segment.name
                )
            }
            ParseOutcome::Failed { error } => {
                self.progress.on_segment_error(
                    file,
                    &segment.name,
                    position.index,
                    position.total,
                    error,
                );
                format!("Error in segment {}: {}", segment.name, error)
            }
        };
        self.set_processing(file, &message).await;
    }

    /// Return `unfinished` to `pending` after the cancellation token fired.
    async fn stop_early(&self, unfinished: &[&String]) {
        warn!(
            "Parse cancelled, {} documents left unprocessed",
            unfinished.len()
        );
        if let Err(e) = self
            .status
            .reset(unfinished.iter().map(|f| f.as_str()), CANCELLED)
            .await
        {
            warn!("parse status reset failed: {}", e);
        }
    }

    async fn set_processing(&self, file: &str, message: &str) {
        self.status
            .record(file, StageStatus::Processing, message)
            .await;
        self.progress.on_document_status(Stage::Parse, file, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SplitResults;
    use crate::pipeline::page_text::ParsedDocument;
    use crate::pipeline::remote::{PollOutcome, RemoteSegment};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Fails every remote call; enough for paths that never reach the parser.
    struct Unreachable;

    #[async_trait]
    impl RemoteJobClient for Unreachable {
        async fn upload_file(&self, _path: &Path) -> Result<String, PipelineError> {
            Err(PipelineError::transport("upload", "unreachable"))
        }
        async fn submit_split_job(
            &self,
            _file_id: &str,
            _categories: &[crate::config::Category],
            _allow_uncategorized: bool,
        ) -> Result<String, PipelineError> {
            Err(PipelineError::transport("submit", "unreachable"))
        }
        async fn poll_split_job(
            &self,
            _job_id: &str,
        ) -> Result<PollOutcome<Vec<RemoteSegment>>, PipelineError> {
            Err(PipelineError::transport("poll", "unreachable"))
        }
        async fn parse_document(
            &self,
            _path: &Path,
            _cancel: &CancellationToken,
        ) -> Result<ParsedDocument, PipelineError> {
            Err(PipelineError::transport("parse", "unreachable"))
        }
    }

    fn orchestrator(dir: &Path) -> ParseOrchestrator {
        let config = PipelineConfig::builder()
            .data_dir(dir)
            .cleanup_backoff_ms(1)
            .build()
            .unwrap();
        ParseOrchestrator::new(config, Arc::new(Unreachable))
    }

    #[tokio::test]
    async fn missing_split_results_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(dir.path()).run().await.unwrap_err();
        assert!(err.is_batch_fatal());
        assert!(!dir.path().join(records::PARSED_SEGMENTS_FILE).exists());
    }

    #[tokio::test]
    async fn missing_source_marks_document_failed() {
        let dir = TempDir::new().unwrap();
        let mut split = SplitResults::new();
        split.insert(
            "gone.pdf".into(),
            vec![Segment {
                name: "invoice_1".into(),
                category: "invoice".into(),
                pages: vec![1],
                confidence_category: None,
            }],
        );
        records::write_json_atomic(&dir.path().join(records::SPLIT_RESULTS_FILE), &split)
            .await
            .unwrap();

        let orchestrator = orchestrator(dir.path());
        let report = orchestrator.run().await.unwrap();

        assert!(report.results["gone.pdf"].is_empty());
        assert_eq!(report.summary.total_segments, 1);
        assert_eq!(report.summary.failed, 1);

        let status = orchestrator.status_store().load().await;
        assert_eq!(status["gone.pdf"].status, StageStatus::Failed);
        assert!(status["gone.pdf"].message.contains("not found"));
    }
}
