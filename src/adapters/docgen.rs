//! Document-generation service client
//!
//! Submission returns a remote job id; the pipeline driver owns the polling
//! cadence and the overall time bound.

use super::{attribute_status, endpoint, parse_retry_after};
use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Options forwarded with a submission
#[derive(Debug, Clone, Serialize)]
pub struct DocOptions {
    pub project_name: Option<String>,
    pub language: String,
    pub model: String,
}

impl DocOptions {
    pub fn for_project(project_name: Option<String>, model: &str) -> Self {
        Self {
            project_name,
            language: "en".to_string(),
            model: model.to_string(),
        }
    }
}

/// Remote job state as reported by the status endpoint
#[derive(Debug, Clone)]
pub enum DocJobState {
    InProgress,
    Completed { markdown: String },
    Failed { error: String },
}

/// One poll result
#[derive(Debug, Clone)]
pub struct DocJobStatus {
    /// Remote progress in [0, 100]
    pub progress: f64,
    pub current_stage: Option<String>,
    pub state: DocJobState,
}

/// Contract the document stage needs from the generation service
#[async_trait]
pub trait DocGenerator: Send + Sync {
    async fn submit(&self, local_path: &str, options: &DocOptions) -> Result<String>;

    async fn status(&self, job_id: &str) -> Result<DocJobStatus>;

    /// Remove the generated artifact; missing artifacts delete as success
    async fn delete_artifact(&self, job_id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SubmitRequestWire<'a> {
    local_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<&'a str>,
    generate_readme: bool,
    analyze_dependencies: bool,
    language: &'a str,
    model: &'a str,
    export_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponseWire {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponseWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    result: Option<StatusResultWire>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResultWire {
    #[serde(default)]
    markdown: Option<String>,
}

impl StatusResponseWire {
    fn into_status(self) -> DocJobStatus {
        let progress = self.progress.unwrap_or(0.0).clamp(0.0, 100.0);
        let status = self.status.as_deref().unwrap_or("");

        let state = if status == "completed" {
            match self.result.and_then(|r| r.markdown).filter(|m| !m.is_empty()) {
                Some(markdown) => DocJobState::Completed { markdown },
                None => DocJobState::Failed {
                    error: "document service returned empty content".to_string(),
                },
            }
        } else if status == "failed" || self.error.is_some() {
            DocJobState::Failed {
                error: self
                    .error
                    .unwrap_or_else(|| "document generation failed".to_string()),
            }
        } else {
            DocJobState::InProgress
        };

        DocJobStatus {
            progress,
            current_stage: self.current_stage,
            state,
        }
    }
}

/// HTTP client for the document-generation service
pub struct HttpDocGenerator {
    client: Client,
    base_url: String,
}

impl HttpDocGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.docgen.base_url.clone(),
        })
    }
}

#[async_trait]
impl DocGenerator for HttpDocGenerator {
    async fn submit(&self, local_path: &str, options: &DocOptions) -> Result<String> {
        let url = endpoint(&self.base_url, "api/analyze/local");
        let wire = SubmitRequestWire {
            local_path,
            project_name: options.project_name.as_deref(),
            generate_readme: true,
            analyze_dependencies: true,
            language: &options.language,
            model: &options.model,
            export_format: "markdown",
        };

        let response = self.client.post(&url).json(&wire).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let text = response.text().await.unwrap_or_default();
            return Err(attribute_status("doc-generation", status, &text, retry_after));
        }

        let parsed: SubmitResponseWire = response.json().await?;
        info!(job = %parsed.task_id, "Submitted document-generation job");
        Ok(parsed.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<DocJobStatus> {
        let url = endpoint(&self.base_url, &format!("api/analyze/local/{}/status", job_id));
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let text = response.text().await.unwrap_or_default();
            return Err(attribute_status("doc-generation", status, &text, retry_after));
        }

        let parsed: StatusResponseWire = response.json().await?;
        Ok(parsed.into_status())
    }

    async fn delete_artifact(&self, job_id: &str) -> Result<()> {
        let url = endpoint(&self.base_url, &format!("api/analyze/local/{}", job_id));
        let response = self.client.delete(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(attribute_status("doc-generation", status, &text, None))
            }
        }
    }
}
