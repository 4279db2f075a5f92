//! # docsplit
//!
//! Split scanned PDF bundles into categorised segments with a remote
//! document splitter, then extract text and markdown for every segment with
//! a remote parser.
//!
//! ## Pipeline Overview
//!
//! ```text
//! data/*.pdf
//!  │
//!  ├─ 1. Split   upload each PDF, run a split job, poll to completion
//!  │             → split_results.json  (file → [{name, category, pages, …}])
//!  ├─ 2. Extract copy each segment's pages into temp_segment_*.pdf
//!  ├─ 3. Parse   send each artifact to the parser, assemble text/markdown
//!  │             → parsed_segments.json
//!  └─ 4. Clean   delete artifacts with bounded retries
//! ```
//!
//! Both stages record per-file progress in `split_status.json` and
//! `parse_status.json`, which a web front end polls through
//! [`ProcessStatus::load`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsplit::{LlamaCloudClient, ParseOrchestrator, PipelineConfig, SplitOrchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .data_dir("data")
//!         .api_key(std::env::var("LLAMA_CLOUD_API_KEY")?)
//!         .build()?;
//!     let client = Arc::new(LlamaCloudClient::from_config(&config)?);
//!
//!     let split = SplitOrchestrator::new(config.clone(), client.clone()).run().await?;
//!     eprintln!("{} segments", split.total_segments());
//!
//!     let parsed = ParseOrchestrator::new(config, client).run().await?;
//!     eprintln!("{}/{} parsed", parsed.summary.succeeded, parsed.summary.total_segments);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsplit` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docsplit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod records;
pub mod split;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Category, ParseOptions, PipelineConfig, PipelineConfigBuilder};
pub use error::PipelineError;
pub use output::{
    ParseOutcome, ParseReport, ParseSummary, ParsedResults, ParsedSegment, Segment, SplitReport,
    SplitResults,
};
pub use parse::ParseOrchestrator;
pub use pipeline::extract::{SegmentArtifact, SegmentExtractor};
pub use pipeline::llama_cloud::LlamaCloudClient;
pub use pipeline::remote::{PollOutcome, PollPolicy, RemoteJobClient, RemoteSegment};
pub use progress::{NoopProgress, PipelineProgress, ProgressCallback};
pub use records::{list_documents, DocumentEntry};
pub use split::SplitOrchestrator;
pub use status::{ProcessStatus, Stage, StageStatus, StatusRecord, StatusStore};
