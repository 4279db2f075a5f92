//! Durable per-file, per-stage status tracking.
//!
//! Each stage owns one JSON file mapping filename → [`StatusRecord`]. Every
//! [`StatusStore::update`] reads the whole mapping, replaces one entry and
//! writes the mapping back through a temp-file rename, so a crash mid-write
//! leaves the previous mapping intact.
//!
//! There is no cross-process lock. Only the orchestrator of a stage writes
//! that stage's file; two concurrent runs of the same stage can lose updates
//! (last writer wins on the whole mapping).

use crate::error::PipelineError;
use crate::records;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Status mapping as persisted: filename → record.
pub type StatusMap = BTreeMap<String, StatusRecord>;

/// The two pipeline phases, each with its own status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Split,
    Parse,
}

impl Stage {
    pub fn status_file_name(&self) -> &'static str {
        match self {
            Stage::Split => "split_status.json",
            Stage::Parse => "parse_status.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Split => "split",
            Stage::Parse => "parse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one file within one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    /// Forward-only transitions: pending → processing → {completed, failed}.
    ///
    /// Repeating the current status is allowed (progress messages), and a
    /// pending file may fail before it ever starts processing.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, Processing | Failed) => true,
            (Processing, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: StageStatus,
    #[serde(default)]
    pub message: String,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
}

impl StatusRecord {
    pub fn now(status: StageStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: epoch_seconds(),
        }
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Read-merge-write status file for one stage.
#[derive(Debug, Clone)]
pub struct StatusStore {
    stage: Stage,
    path: PathBuf,
}

impl StatusStore {
    /// The status store of `stage` inside `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>, stage: Stage) -> Self {
        Self {
            stage,
            path: data_dir.as_ref().join(stage.status_file_name()),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current mapping.
    ///
    /// A missing or unreadable file yields an empty mapping: the status
    /// surface is advisory and must never block a run.
    pub async fn load(&self) -> StatusMap {
        match records::read_json_opt::<StatusMap>(&self.path).await {
            Ok(Some(map)) => map,
            Ok(None) => StatusMap::new(),
            Err(e) => {
                warn!("{} status unreadable, starting from empty: {}", self.stage, e);
                StatusMap::new()
            }
        }
    }

    /// Seed every filename as `pending`, replacing whatever a previous run
    /// left behind.
    pub async fn init<I, S>(&self, filenames: I, message: &str) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let map: StatusMap = filenames
            .into_iter()
            .map(|f| (f.into(), StatusRecord::now(StageStatus::Pending, message)))
            .collect();
        debug!("Initialising {} status for {} files", self.stage, map.len());
        records::write_json_atomic(&self.path, &map).await
    }

    /// Put `filenames` back to `pending` in one write, e.g. the files a
    /// cancelled run did not finish. Unlike [`update`](Self::update) this is
    /// not reported as a regression.
    pub async fn reset<I, S>(&self, filenames: I, message: &str) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = self.load().await;
        for file in filenames {
            map.insert(file.into(), StatusRecord::now(StageStatus::Pending, message));
        }
        records::write_json_atomic(&self.path, &map).await
    }

    /// Set the entry for `filename` and persist the full mapping.
    ///
    /// A backwards transition (e.g. completed → pending) is logged but still
    /// written.
    pub async fn update(
        &self,
        filename: &str,
        status: StageStatus,
        message: impl Into<String>,
    ) -> Result<(), PipelineError> {
        let mut map = self.load().await;
        if let Some(previous) = map.get(filename) {
            if !previous.status.can_transition_to(status) {
                warn!(
                    "{} status of '{}' moves backwards: {} → {}",
                    self.stage, filename, previous.status, status
                );
            }
        }
        map.insert(filename.to_string(), StatusRecord::now(status, message));
        records::write_json_atomic(&self.path, &map).await
    }

    /// Like [`update`](Self::update) but only logs a failure: status writes
    /// must not abort the document being processed.
    pub async fn record(&self, filename: &str, status: StageStatus, message: impl Into<String>) {
        if let Err(e) = self.update(filename, status, message).await {
            warn!("{} status update for '{}' failed: {}", self.stage, filename, e);
        }
    }
}

// ── Combined view ────────────────────────────────────────────────────────

/// Per-file view over both stages, as polled by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub split_status: StageStatus,
    pub split_message: String,
    pub parse_status: StageStatus,
    pub parse_message: String,
}

/// Merge the split and parse mappings into one per-file view.
///
/// Files known only to the parse stage were split by an earlier run whose
/// status file has since been replaced; their split stage counts as
/// completed.
pub fn combine(split: &StatusMap, parse: &StatusMap) -> BTreeMap<String, CombinedStatus> {
    let mut combined: BTreeMap<String, CombinedStatus> = split
        .iter()
        .map(|(file, s)| {
            let p = parse.get(file);
            (
                file.clone(),
                CombinedStatus {
                    split_status: s.status,
                    split_message: s.message.clone(),
                    parse_status: p.map(|p| p.status).unwrap_or_default(),
                    parse_message: p.map(|p| p.message.clone()).unwrap_or_default(),
                },
            )
        })
        .collect();

    for (file, p) in parse {
        combined
            .entry(file.clone())
            .or_insert_with(|| CombinedStatus {
                split_status: StageStatus::Completed,
                split_message: String::new(),
                parse_status: p.status,
                parse_message: p.message.clone(),
            });
    }
    combined
}

/// Overall progress snapshot served to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub completed: bool,
    pub split_completed: bool,
    pub parse_completed: bool,
    pub status: BTreeMap<String, CombinedStatus>,
    pub message: String,
}

impl ProcessStatus {
    /// Build the snapshot from the files in `data_dir`.
    ///
    /// A stage counts as completed once its result record exists and none of
    /// its files is still pending or processing.
    pub async fn load(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        let split = StatusStore::new(data_dir, Stage::Split).load().await;
        let parse = StatusStore::new(data_dir, Stage::Parse).load().await;
        let split_completed =
            stage_finished(&split, &data_dir.join(records::SPLIT_RESULTS_FILE)).await;
        let parse_completed =
            stage_finished(&parse, &data_dir.join(records::PARSED_SEGMENTS_FILE)).await;
        let completed = split_completed && parse_completed;

        Self {
            completed,
            split_completed,
            parse_completed,
            status: combine(&split, &parse),
            message: if completed {
                "Processing completed".to_string()
            } else {
                "Processing still running".to_string()
            },
        }
    }
}

async fn stage_finished(status: &StatusMap, record: &Path) -> bool {
    let settled = status.values().all(|r| r.status.is_terminal());
    settled && tokio::fs::try_exists(record).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transitions_only_move_forward() {
        use StageStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn status_serialises_lowercase() {
        let r = StatusRecord::now(StageStatus::Processing, "Uploading file...");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "processing");
        assert!(v["timestamp"].as_f64().unwrap() > 1.6e9);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_and_update_recovers() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Parse);
        tokio::fs::write(store.path(), b"{ not json").await.unwrap();
        assert!(store.load().await.is_empty());

        store
            .update("a.pdf", StageStatus::Processing, "go")
            .await
            .unwrap();
        let map = store.load().await;
        assert_eq!(map["a.pdf"].status, StageStatus::Processing);
    }

    #[tokio::test]
    async fn init_seeds_pending_and_replaces_previous_run() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        store
            .update("old.pdf", StageStatus::Completed, "done")
            .await
            .unwrap();

        store.init(["a.pdf", "b.pdf"], "Waiting").await.unwrap();
        let map = store.load().await;
        assert_eq!(map.len(), 2);
        assert!(map.values().all(|r| r.status == StageStatus::Pending));
        assert!(!map.contains_key("old.pdf"));
    }

    #[tokio::test]
    async fn update_merges_without_touching_other_entries() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        store.init(["a.pdf", "b.pdf"], "Waiting").await.unwrap();
        store
            .update("a.pdf", StageStatus::Processing, "Uploading file...")
            .await
            .unwrap();

        let map = store.load().await;
        assert_eq!(map["a.pdf"].status, StageStatus::Processing);
        assert_eq!(map["a.pdf"].message, "Uploading file...");
        assert_eq!(map["b.pdf"].status, StageStatus::Pending);
        assert_eq!(map["b.pdf"].message, "Waiting");
    }

    #[tokio::test]
    async fn repeated_update_is_idempotent_apart_from_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        store.init(["a.pdf"], "Waiting").await.unwrap();
        store.update("a.pdf", StageStatus::Failed, "boom").await.unwrap();
        let first = store.load().await;
        store.update("a.pdf", StageStatus::Failed, "boom").await.unwrap();
        let second = store.load().await;

        assert_eq!(first.len(), second.len());
        for (file, a) in &first {
            let b = &second[file];
            assert_eq!(a.status, b.status);
            assert_eq!(a.message, b.message);
            assert!(b.timestamp >= a.timestamp);
        }
    }

    #[tokio::test]
    async fn regression_is_flagged_but_written() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Parse);
        store.update("a.pdf", StageStatus::Processing, "").await.unwrap();
        store.update("a.pdf", StageStatus::Completed, "").await.unwrap();
        assert!(!StageStatus::Completed.can_transition_to(StageStatus::Pending));
        store.update("a.pdf", StageStatus::Pending, "again").await.unwrap();
        let stored = &store.load().await["a.pdf"];
        assert_eq!(stored.status, StageStatus::Pending);
        assert_eq!(stored.message, "again");
    }

    #[tokio::test]
    async fn reset_returns_files_to_pending_and_keeps_others() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        store.init(["a.pdf", "b.pdf", "c.pdf"], "Waiting").await.unwrap();
        store.update("a.pdf", StageStatus::Completed, "done").await.unwrap();
        store.update("b.pdf", StageStatus::Processing, "Uploading file...").await.unwrap();

        store.reset(["b.pdf", "c.pdf"], "Cancelled").await.unwrap();
        let map = store.load().await;
        assert_eq!(map["a.pdf"].status, StageStatus::Completed);
        assert_eq!(map["b.pdf"].status, StageStatus::Pending);
        assert_eq!(map["b.pdf"].message, "Cancelled");
        assert_eq!(map["c.pdf"].message, "Cancelled");
    }

    #[test]
    fn combine_treats_parse_only_files_as_split_completed() {
        let mut split = StatusMap::new();
        split.insert("a.pdf".into(), StatusRecord::now(StageStatus::Completed, "ok"));
        split.insert("b.pdf".into(), StatusRecord::now(StageStatus::Failed, "boom"));
        let mut parse = StatusMap::new();
        parse.insert("a.pdf".into(), StatusRecord::now(StageStatus::Processing, "seg 1/2"));
        parse.insert("c.pdf".into(), StatusRecord::now(StageStatus::Completed, "done"));

        let view = combine(&split, &parse);
        assert_eq!(view.len(), 3);
        assert_eq!(view["a.pdf"].parse_status, StageStatus::Processing);
        assert_eq!(view["a.pdf"].parse_message, "seg 1/2");
        assert_eq!(view["b.pdf"].split_status, StageStatus::Failed);
        assert_eq!(view["b.pdf"].parse_status, StageStatus::Pending);
        assert_eq!(view["c.pdf"].split_status, StageStatus::Completed);
        assert_eq!(view["c.pdf"].parse_status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn process_status_reflects_record_files() {
        let dir = TempDir::new().unwrap();
        let snapshot = ProcessStatus::load(dir.path()).await;
        assert!(!snapshot.completed);
        assert!(!snapshot.split_completed);

        tokio::fs::write(dir.path().join(records::SPLIT_RESULTS_FILE), b"{}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(records::PARSED_SEGMENTS_FILE), b"{}")
            .await
            .unwrap();
        let snapshot = ProcessStatus::load(dir.path()).await;
        assert!(snapshot.completed);
        assert_eq!(snapshot.message, "Processing completed");
    }

    #[tokio::test]
    async fn unsettled_files_keep_a_stage_open() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(records::SPLIT_RESULTS_FILE), b"{}")
            .await
            .unwrap();
        let store = StatusStore::new(dir.path(), Stage::Split);
        store.init(["a.pdf", "b.pdf"], "Waiting").await.unwrap();
        store.update("a.pdf", StageStatus::Completed, "ok").await.unwrap();
        assert!(!ProcessStatus::load(dir.path()).await.split_completed);

        store.update("b.pdf", StageStatus::Failed, "boom").await.unwrap();
        assert!(ProcessStatus::load(dir.path()).await.split_completed);
    }
}
