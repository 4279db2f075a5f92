//! Durable JSON records shared with the web front end.
//!
//! All records are UTF-8, pretty-printed JSON objects keyed by source
//! filename. Writes go through a sibling `.tmp` file and a rename so readers
//! never observe a half-written record.

use crate::error::PipelineError;
use crate::output::{ParsedResults, ParsedSegment, Segment, SplitResults};
use crate::pipeline::input;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SPLIT_RESULTS_FILE: &str = "split_results.json";
pub const PARSED_SEGMENTS_FILE: &str = "parsed_segments.json";

/// Read and decode a JSON file. `Ok(None)` when the file does not exist.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PipelineError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::persistence(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PipelineError::persistence(path, e))
}

/// Serialise `value` as pretty JSON and atomically replace `path`.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), PipelineError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| PipelineError::persistence(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::persistence(path, e))?;
    }

    let tmp_path = tmp_path_for(path);
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| PipelineError::persistence(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PipelineError::persistence(path, e))?;

    debug!("Wrote {} ({} bytes)", path.display(), json.len());
    Ok(())
}

/// Overlay `entries` on the record at `path`, keeping every other file's
/// entry. Used when a run stops early and only covered part of the files.
pub async fn merge_json_atomic<T>(
    path: &Path,
    entries: BTreeMap<String, T>,
) -> Result<(), PipelineError>
where
    T: Serialize + DeserializeOwned,
{
    let mut record: BTreeMap<String, T> = match read_json_opt(path).await {
        Ok(existing) => existing.unwrap_or_default(),
        Err(e) => {
            warn!("Replacing unreadable record: {}", e);
            BTreeMap::new()
        }
    };
    record.extend(entries);
    write_json_atomic(path, &record).await
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load the split results the parse stage depends on.
///
/// A missing file is the one batch-fatal condition of the pipeline.
pub async fn load_split_results(path: &Path) -> Result<SplitResults, PipelineError> {
    read_json_opt(path)
        .await?
        .ok_or_else(|| PipelineError::MissingSplitResults {
            path: path.to_path_buf(),
        })
}

// ── Consumer listing ─────────────────────────────────────────────────────

/// Which record a listed document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSource {
    ParsedSegments,
    SplitResults,
}

/// Segments of a listed document, parsed when available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSegments {
    Parsed(Vec<ParsedSegment>),
    Split(Vec<Segment>),
}

/// One processed document, as rendered by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub source: RecordSource,
    pub file: String,
    pub segments: DocumentSegments,
}

/// List processed documents whose source PDF still exists in `data_dir`.
///
/// The parsed-segments record wins when it exists; otherwise the split
/// results are listed. A record that cannot be decoded is logged and treated
/// as absent.
pub async fn list_documents(data_dir: &Path) -> Vec<DocumentEntry> {
    let present = match input::list_source_names(data_dir).await {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot list {}: {}", data_dir.display(), e);
            return Vec::new();
        }
    };
    let keep = |file: &str| {
        let found = input::find_source_name(&present, file).is_some();
        if !found {
            debug!("Source PDF missing, not listing: {}", file);
        }
        found
    };

    let parsed_path = data_dir.join(PARSED_SEGMENTS_FILE);
    match read_json_opt::<ParsedResults>(&parsed_path).await {
        Ok(Some(parsed)) => {
            return parsed
                .into_iter()
                .filter(|(file, _)| keep(file.as_str()))
                .map(|(file, segments)| DocumentEntry {
                    source: RecordSource::ParsedSegments,
                    file,
                    segments: DocumentSegments::Parsed(segments),
                })
                .collect();
        }
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable parsed segments: {}", e),
    }

    let split_path = data_dir.join(SPLIT_RESULTS_FILE);
    match read_json_opt::<SplitResults>(&split_path).await {
        Ok(Some(split)) => split
            .into_iter()
            .filter(|(file, _)| keep(file.as_str()))
            .map(|(file, segments)| DocumentEntry {
                source: RecordSource::SplitResults,
                file,
                segments: DocumentSegments::Split(segments),
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Ignoring unreadable split results: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ParseOutcome;
    use tempfile::TempDir;

    #[tokio::test]
    async fn merge_keeps_untouched_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SPLIT_RESULTS_FILE);
        let mut before = SplitResults::new();
        before.insert("a.pdf".into(), vec![seg("invoice_1")]);
        before.insert("b.pdf".into(), vec![seg("invoice_1"), seg("invoice_2")]);
        write_json_atomic(&path, &before).await.unwrap();

        let mut partial = SplitResults::new();
        partial.insert("a.pdf".into(), vec![seg("lease_1")]);
        merge_json_atomic(&path, partial).await.unwrap();

        let after: SplitResults = read_json_opt(&path).await.unwrap().unwrap();
        assert_eq!(after["a.pdf"], vec![seg("lease_1")]);
        assert_eq!(after["b.pdf"].len(), 2);
    }

    #[tokio::test]
    async fn merge_creates_missing_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SPLIT_RESULTS_FILE);
        let mut partial = SplitResults::new();
        partial.insert("a.pdf".into(), vec![seg("invoice_1")]);
        merge_json_atomic(&path, partial).await.unwrap();

        let after: SplitResults = read_json_opt(&path).await.unwrap().unwrap();
        assert_eq!(after.len(), 1);
    }

    fn seg(name: &str) -> Segment {
        Segment {
            name: name.into(),
            category: "invoice".into(),
            pages: vec![1],
            confidence_category: Some("high".into()),
        }
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SPLIT_RESULTS_FILE);
        let mut results = SplitResults::new();
        results.insert("a.pdf".into(), vec![seg("invoice_1")]);

        write_json_atomic(&path, &results).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("split_results.json.tmp").exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  "), "expected pretty JSON, got: {text}");
        let back: SplitResults = read_json_opt(&path).await.unwrap().unwrap();
        assert_eq!(back, results);
    }

    #[tokio::test]
    async fn non_ascii_survives_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.json");
        let mut results = SplitResults::new();
        results.insert("Übergabe.pdf".into(), vec![seg("Übergabeprotokoll_1")]);
        write_json_atomic(&path, &results).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Übergabeprotokoll_1"));
    }

    #[tokio::test]
    async fn missing_split_results_is_fatal_error() {
        let dir = TempDir::new().unwrap();
        let err = load_split_results(&dir.path().join(SPLIT_RESULTS_FILE))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSplitResults { .. }));
    }

    #[tokio::test]
    async fn corrupt_record_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SPLIT_RESULTS_FILE);
        std::fs::write(&path, b"[1, 2").unwrap();
        let err = load_split_results(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { .. }));
    }

    #[tokio::test]
    async fn listing_prefers_parsed_segments_and_skips_missing_sources() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.5").unwrap();

        let mut split = SplitResults::new();
        split.insert("a.pdf".into(), vec![seg("invoice_1")]);
        split.insert("deleted.pdf".into(), vec![seg("invoice_1")]);
        write_json_atomic(&dir.path().join(SPLIT_RESULTS_FILE), &split)
            .await
            .unwrap();

        let docs = list_documents(dir.path()).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, RecordSource::SplitResults);

        let mut parsed = ParsedResults::new();
        parsed.insert(
            "a.pdf".into(),
            vec![ParsedSegment::new(&seg("invoice_1"), ParseOutcome::failed("x"))],
        );
        write_json_atomic(&dir.path().join(PARSED_SEGMENTS_FILE), &parsed)
            .await
            .unwrap();

        let docs = list_documents(dir.path()).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, RecordSource::ParsedSegments);
        assert!(matches!(docs[0].segments, DocumentSegments::Parsed(_)));
    }

    #[tokio::test]
    async fn listing_matches_normalised_filenames() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Uebergabe.PDF"), b"%PDF-1.5").unwrap();
        std::fs::write(dir.path().join("Mietvertrag.pdf"), b"%PDF-1.5").unwrap();

        let mut split = SplitResults::new();
        split.insert("mietvertrag.pdf".into(), vec![seg("invoice_1")]);
        write_json_atomic(&dir.path().join(SPLIT_RESULTS_FILE), &split)
            .await
            .unwrap();

        let docs = list_documents(dir.path()).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file, "mietvertrag.pdf");
    }
}
