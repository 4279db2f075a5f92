//! Configuration types for the split and parse stages.
//!
//! Everything a run needs (remote endpoint, credentials, category set,
//! polling and cleanup policy) lives in one [`PipelineConfig`] value that is
//! handed to each orchestrator when it is constructed. Nothing is read from
//! global state, so tests can build a config pointing at a temp directory
//! and pair it with a fake remote client.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default LlamaCloud API root.
pub const DEFAULT_BASE_URL: &str = "https://api.cloud.llamaindex.ai/api/v1";

/// Split jobs live under the beta namespace of the API root.
pub const DEFAULT_SPLIT_JOBS_PATH: &str = "beta/split/jobs";

/// Configuration shared by [`crate::split::SplitOrchestrator`] and
/// [`crate::parse::ParseOrchestrator`].
///
/// Built via [`PipelineConfig::builder()`].
///
/// # Example
/// ```rust
/// use docsplit::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .data_dir("data")
///     .api_key("llx-...")
///     .poll_interval_ms(1000)
///     .build()
///     .unwrap();
/// assert_eq!(config.artifact_dir(), std::path::Path::new("data"));
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory holding source PDFs and the four JSON records.
    pub data_dir: PathBuf,

    /// Where temporary segment artifacts are written. Defaults to `data_dir`.
    pub artifact_dir: Option<PathBuf>,

    /// Bearer token for the remote services.
    pub api_key: Option<String>,

    /// API root, without trailing slash. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Path of the split-jobs collection relative to `base_url`.
    pub split_jobs_path: String,

    /// Category taxonomy sent with every split job.
    pub categories: Vec<Category>,

    /// Let the splitter emit segments that match no category. Default: true.
    pub allow_uncategorized: bool,

    /// Sleep between two status checks of a remote job. Default: 2000 ms.
    pub poll_interval_ms: u64,

    /// Give up on a remote job after this many seconds. Default: None.
    ///
    /// `None` polls until the service reports a terminal state, however
    /// long that takes.
    pub poll_timeout_secs: Option<u64>,

    /// Per-request HTTP timeout. Default: 120 s.
    pub request_timeout_secs: u64,

    /// Options forwarded to the remote parser.
    pub parse: ParseOptions,

    /// Attempts to delete one temporary artifact. Default: 5.
    pub cleanup_max_attempts: u32,

    /// Initial delay between deletion attempts, doubled each time. Default: 250 ms.
    pub cleanup_backoff_ms: u64,

    /// Receives per-document and per-segment events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            artifact_dir: None,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            split_jobs_path: DEFAULT_SPLIT_JOBS_PATH.to_string(),
            categories: default_categories(),
            allow_uncategorized: true,
            poll_interval_ms: 2000,
            poll_timeout_secs: None,
            request_timeout_secs: 120,
            parse: ParseOptions::default(),
            cleanup_max_attempts: 5,
            cleanup_backoff_ms: 250,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("data_dir", &self.data_dir)
            .field("artifact_dir", &self.artifact_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("split_jobs_path", &self.split_jobs_path)
            .field("categories", &self.categories.len())
            .field("allow_uncategorized", &self.allow_uncategorized)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("parse", &self.parse)
            .field("cleanup_max_attempts", &self.cleanup_max_attempts)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgress>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        self.artifact_dir.as_deref().unwrap_or(&self.data_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }

    pub fn split_results_path(&self) -> PathBuf {
        self.data_dir.join(crate::records::SPLIT_RESULTS_FILE)
    }

    pub fn parsed_segments_path(&self) -> PathBuf {
        self.data_dir.join(crate::records::PARSED_SEGMENTS_FILE)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.artifact_dir = Some(dir.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn split_jobs_path(mut self, path: impl Into<String>) -> Self {
        self.config.split_jobs_path = path.into().trim_matches('/').to_string();
        self
    }

    pub fn categories(mut self, categories: Vec<Category>) -> Self {
        self.config.categories = categories;
        self
    }

    pub fn allow_uncategorized(mut self, v: bool) -> Self {
        self.config.allow_uncategorized = v;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn poll_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.poll_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.config.parse = options;
        self
    }

    pub fn cleanup_max_attempts(mut self, n: u32) -> Self {
        self.config.cleanup_max_attempts = n;
        self
    }

    pub fn cleanup_backoff_ms(mut self, ms: u64) -> Self {
        self.config.cleanup_backoff_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.categories.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one category is required".into(),
            ));
        }
        if let Some(dup) = first_duplicate_category(&c.categories) {
            return Err(PipelineError::InvalidConfig(format!(
                "category '{dup}' is defined twice"
            )));
        }
        if c.cleanup_max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "cleanup_max_attempts must be ≥ 1".into(),
            ));
        }
        if c.base_url.is_empty() {
            return Err(PipelineError::InvalidConfig("base_url is empty".into()));
        }
        Ok(self.config)
    }
}

fn first_duplicate_category(categories: &[Category]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    categories
        .iter()
        .find(|c| !seen.insert(c.name.as_str()))
        .map(|c| c.name.as_str())
}

// ── Categories ───────────────────────────────────────────────────────────

/// One entry of the classification taxonomy sent to the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub description: String,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// The property-management taxonomy the pipeline was built for.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new(
            "Mietvertrag",
            "Dokument, das die Vereinbarung zwischen Vermieter und Mieter über die Nutzung \
             einer Immobilie regelt, einschließlich Vertragsänderungen oder -verlängerungen.",
        ),
        Category::new(
            "Rechnung",
            "Dokument, das Zahlungsverpflichtungen darstellt, wie z.B. Mietabrechnungen, \
             Betriebskostenabrechnungen oder sonstige Rechnungen.",
        ),
        Category::new(
            "Bewerbung",
            "Dokumente, die von Interessenten eingereicht werden, um eine Immobilie zu mieten, \
             einschließlich Bewerbungsformulare und Mietgesuche.",
        ),
        Category::new(
            "Übergabeprotokoll",
            "Dokumentation des Zustands einer Immobilie bei Ein- oder Auszug, einschließlich \
             Inventar, Schäden und Vereinbarungen über Mängel.",
        ),
    ]
}

// ── Parser options ───────────────────────────────────────────────────────

/// Options forwarded verbatim to the remote parser with every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Parser mode, e.g. `parse_page_with_agent`.
    pub parse_mode: String,
    /// Model the agent mode runs on.
    pub model: Option<String>,
    /// Slower, more precise OCR.
    pub high_res_ocr: bool,
    /// Primary document language (ISO 639-1).
    pub language: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            parse_mode: "parse_page_with_agent".to_string(),
            model: Some("openai-gpt-4-1-mini".to_string()),
            high_res_ocr: true,
            language: "de".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.poll_interval(), Duration::from_secs(2));
        assert_eq!(c.poll_timeout(), None);
        assert_eq!(c.cleanup_max_attempts, 5);
        assert!(c.allow_uncategorized);
        assert_eq!(c.categories.len(), 4);
        assert_eq!(c.artifact_dir(), Path::new("data"));
    }

    #[test]
    fn builder_trims_url_slashes() {
        let c = PipelineConfig::builder()
            .base_url("http://localhost:9000/api/")
            .split_jobs_path("/split/jobs/")
            .build()
            .unwrap();
        assert_eq!(c.base_url, "http://localhost:9000/api");
        assert_eq!(c.split_jobs_path, "split/jobs");
    }

    #[test]
    fn builder_rejects_empty_categories() {
        let err = PipelineConfig::builder().categories(vec![]).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_duplicate_category() {
        let err = PipelineConfig::builder()
            .categories(vec![Category::new("invoice", "a"), Category::new("invoice", "b")])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invoice"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = PipelineConfig::builder().api_key("llx-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("llx-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn artifact_dir_override() {
        let c = PipelineConfig::builder()
            .data_dir("/srv/data")
            .artifact_dir("/tmp/segments")
            .build()
            .unwrap();
        assert_eq!(c.artifact_dir(), Path::new("/tmp/segments"));
        assert_eq!(
            c.split_results_path(),
            Path::new("/srv/data/split_results.json")
        );
    }

    #[test]
    fn categories_deserialize_from_json() {
        let json = r#"[{"name":"invoice","description":"Bills"}]"#;
        let cats: Vec<Category> = serde_json::from_str(json).unwrap();
        assert_eq!(cats, vec![Category::new("invoice", "Bills")]);
    }
}
