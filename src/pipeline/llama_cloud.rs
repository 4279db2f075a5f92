//! HTTP implementation of [`RemoteJobClient`] for LlamaCloud.
//!
//! ## Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | upload | `POST {base}/files` (multipart `upload_file`) → `{id}` |
//! | split submit | `POST {base}/{split_jobs_path}` → `{id}` |
//! | split poll | `GET {base}/{split_jobs_path}/{id}` → `{status, result}` |
//! | parse upload | `POST {base}/parsing/upload` (multipart `file`) → `{id}` |
//! | parse poll | `GET {base}/parsing/job/{id}` → `{status}` |
//! | parse result | `GET {base}/parsing/job/{id}/result/json` → `{pages}` |
//!
//! No call is retried here. Failures surface as
//! [`PipelineError::Transport`] and the orchestrator decides what to record.

use crate::config::{Category, ParseOptions, PipelineConfig};
use crate::error::PipelineError;
use crate::pipeline::page_text::ParsedDocument;
use crate::pipeline::remote::{
    poll_until_terminal, PollOutcome, PollPolicy, RemoteJobClient, RemoteSegment,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest error body quoted in a transport error.
const MAX_ERROR_BODY: usize = 500;

pub struct LlamaCloudClient {
    client: reqwest::Client,
    base_url: String,
    split_jobs_path: String,
    api_key: String,
    parse: ParseOptions,
    poll: PollPolicy,
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct SplitJobRequest<'a> {
    document_input: DocumentInput<'a>,
    categories: &'a [Category],
    splitting_strategy: SplittingStrategy,
}

#[derive(Debug, Serialize)]
struct DocumentInput<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SplittingStrategy {
    allow_uncategorized: bool,
}

#[derive(Debug, Deserialize)]
struct SplitJobResponse {
    status: String,
    #[serde(default)]
    result: Option<SplitJobResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SplitJobResult {
    #[serde(default)]
    segments: Option<Vec<RemoteSegment>>,
}

#[derive(Debug, Deserialize)]
struct ParseJobResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

impl LlamaCloudClient {
    /// Build a client from the pipeline configuration. Requires an API key.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "no API key configured (set LLAMA_CLOUD_API_KEY)".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            split_jobs_path: config.split_jobs_path.trim_matches('/').to_string(),
            api_key,
            parse: config.parse.clone(),
            poll: PollPolicy::from_config(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn split_job_url(&self, job_id: Option<&str>) -> String {
        match job_id {
            Some(id) => self.url(&format!("{}/{}", self.split_jobs_path, id)),
            None => self.url(&self.split_jobs_path),
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PipelineError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transport(
                operation,
                format!("HTTP {status}: {}", truncate(&body, MAX_ERROR_BODY)),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::transport(operation, format!("invalid response: {e}")))
    }

    async fn poll_parse_job(&self, job_id: &str) -> Result<PollOutcome<()>, PipelineError> {
        let url = self.url(&format!("parsing/job/{job_id}"));
        let response: ParseJobResponse = self
            .send_json("Parse job status", self.client.get(url))
            .await?;
        Ok(parse_status_outcome(response))
    }
}

#[async_trait]
impl RemoteJobClient for LlamaCloudClient {
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    async fn upload_file(&self, path: &Path) -> Result<String, PipelineError> {
        let form = Form::new().part("upload_file", pdf_part(path).await?);
        let response: IdResponse = self
            .send_json("File upload", self.client.post(self.url("files")).multipart(form))
            .await?;
        debug!("Uploaded {} as file {}", path.display(), response.id);
        Ok(response.id)
    }

    #[tracing::instrument(skip(self, categories), fields(categories = categories.len()))]
    async fn submit_split_job(
        &self,
        file_id: &str,
        categories: &[Category],
        allow_uncategorized: bool,
    ) -> Result<String, PipelineError> {
        let payload = split_job_request(file_id, categories, allow_uncategorized);
        let response: IdResponse = self
            .send_json(
                "Split job submission",
                self.client.post(self.split_job_url(None)).json(&payload),
            )
            .await?;
        Ok(response.id)
    }

    #[tracing::instrument(skip(self))]
    async fn poll_split_job(
        &self,
        job_id: &str,
    ) -> Result<PollOutcome<Vec<RemoteSegment>>, PipelineError> {
        let response: SplitJobResponse = self
            .send_json(
                "Split job status",
                self.client.get(self.split_job_url(Some(job_id))),
            )
            .await?;
        Ok(split_status_outcome(response))
    }

    #[tracing::instrument(skip(self, path, cancel), fields(path = %path.display()))]
    async fn parse_document(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ParsedDocument, PipelineError> {
        let mut form = Form::new()
            .part("file", pdf_part(path).await?)
            .text("parse_mode", self.parse.parse_mode.clone())
            .text("high_res_ocr", self.parse.high_res_ocr.to_string())
            .text("language", self.parse.language.clone());
        if let Some(model) = &self.parse.model {
            form = form.text("model", model.clone());
        }

        let upload = self.send_json::<IdResponse>(
            "Parse upload",
            self.client.post(self.url("parsing/upload")).multipart(form),
        );
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled {
                    job_id: path.display().to_string(),
                })
            }
            job = upload => job?,
        };

        poll_until_terminal(
            &job.id,
            self.poll,
            cancel,
            || self.poll_parse_job(&job.id),
            |_| {},
        )
        .await?;

        let url = self.url(&format!("parsing/job/{}/result/json", job.id));
        self.send_json("Parse result download", self.client.get(url))
            .await
    }
}

fn split_job_request<'a>(
    file_id: &'a str,
    categories: &'a [Category],
    allow_uncategorized: bool,
) -> SplitJobRequest<'a> {
    SplitJobRequest {
        document_input: DocumentInput {
            kind: "file_id",
            value: file_id,
        },
        categories,
        splitting_strategy: SplittingStrategy {
            allow_uncategorized,
        },
    }
}

fn split_status_outcome(response: SplitJobResponse) -> PollOutcome<Vec<RemoteSegment>> {
    match response.status.to_ascii_lowercase().as_str() {
        "completed" | "success" | "succeeded" => PollOutcome::Completed(
            response
                .result
                .and_then(|r| r.segments)
                .unwrap_or_default(),
        ),
        "failed" | "error" | "cancelled" => PollOutcome::Failed {
            reason: response
                .error_message
                .unwrap_or_else(|| format!("job status {}", response.status)),
        },
        _ => PollOutcome::Pending {
            status: response.status,
        },
    }
}

fn parse_status_outcome(response: ParseJobResponse) -> PollOutcome<()> {
    match response.status.to_ascii_uppercase().as_str() {
        "SUCCESS" | "PARTIAL_SUCCESS" | "COMPLETED" => PollOutcome::Completed(()),
        "ERROR" | "FAILED" | "CANCELLED" => PollOutcome::Failed {
            reason: response
                .error_message
                .unwrap_or_else(|| format!("parse job status {}", response.status)),
        },
        _ => PollOutcome::Pending {
            status: response.status,
        },
    }
}

async fn pdf_part(path: &Path) -> Result<Part, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::transport(format!("Reading {}", path.display()), e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/pdf")
        .map_err(|e| PipelineError::Internal(format!("invalid MIME type: {e}")))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
