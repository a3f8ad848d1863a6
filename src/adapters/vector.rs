//! Vector-index service client
//!
//! The service embeds documents server-side; this client only ships chunk
//! payloads and metadata. Index names returned by `create_index` are opaque
//! and owned by the task that created them.

use super::{attribute_status, endpoint, parse_retry_after};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// One chunk delivered to (or returned from) the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub title: String,
    pub file: String,
    pub content: String,
    pub category: String,
    pub language: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// A search hit with its similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub score: f32,
    pub document: IndexDocument,
}

/// Contract the index and analyze stages need from the vector service
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a fresh index from the first document batch
    async fn create_index(
        &self,
        documents: &[IndexDocument],
        vector_field: &str,
    ) -> Result<String>;

    /// Add a batch to an existing index; returns the number accepted
    async fn add_documents(&self, index_name: &str, documents: &[IndexDocument]) -> Result<usize>;

    async fn search(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn index_exists(&self, index_name: &str) -> Result<bool>;

    /// Deleting a missing index is a success
    async fn delete_index(&self, index_name: &str) -> Result<()>;

    async fn health(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CreateResponseWire {
    index: String,
    #[serde(default)]
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponseWire {
    #[serde(default)]
    results: Vec<ScoredChunk>,
}

/// HTTP client for the vector-index service
pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.vector.base_url.clone(),
        })
    }

    async fn post_documents(
        &self,
        documents: &[IndexDocument],
        vector_field: &str,
        index_name: Option<&str>,
    ) -> Result<CreateResponseWire> {
        let url = endpoint(&self.base_url, "documents");
        let mut body = json!({
            "documents": documents,
            "vector_field": vector_field,
        });
        if let Some(index) = index_name {
            body["index"] = json!(index);
        }

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let text = response.text().await.unwrap_or_default();
            return Err(attribute_status("vector-index", status, &text, retry_after));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn create_index(
        &self,
        documents: &[IndexDocument],
        vector_field: &str,
    ) -> Result<String> {
        let parsed = self.post_documents(documents, vector_field, None).await?;
        info!(
            index = %parsed.index,
            count = parsed.count,
            "Created vector index"
        );
        Ok(parsed.index)
    }

    async fn add_documents(&self, index_name: &str, documents: &[IndexDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let parsed = self
            .post_documents(documents, "content", Some(index_name))
            .await?;
        debug!(index = %index_name, count = parsed.count, "Added documents to index");
        Ok(parsed.count)
    }

    async fn search(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let url = endpoint(&self.base_url, "search");
        let body = json!({
            "query": query,
            "index": index_name,
            "top_k": top_k,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let text = response.text().await.unwrap_or_default();
            return Err(attribute_status("vector-index", status, &text, retry_after));
        }

        let parsed: SearchResponseWire = response.json().await?;
        Ok(parsed.results)
    }

    async fn index_exists(&self, index_name: &str) -> Result<bool> {
        let url = endpoint(&self.base_url, &format!("index/{}", index_name));
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(attribute_status("vector-index", status, &text, None))
            }
        }
    }

    async fn delete_index(&self, index_name: &str) -> Result<()> {
        let url = endpoint(&self.base_url, &format!("index/{}", index_name));
        let response = self.client.delete(&url).send().await?;
        match response.status() {
            // Idempotent delete: a missing index counts as deleted.
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => {
                info!(index = %index_name, "Deleted vector index");
                Ok(())
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(attribute_status("vector-index", status, &text, None))
            }
        }
    }

    async fn health(&self) -> Result<()> {
        let url = endpoint(&self.base_url, "health");
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transient(format!(
                "vector-index health returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_response_parsing() {
        let json = r#"{"index": "idx-demo-3f2a", "count": 42}"#;
        let parsed: CreateResponseWire = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.index, "idx-demo-3f2a");
        assert_eq!(parsed.count, 42);
    }

    #[test]
    fn test_search_response_parsing() {
        let json = r#"{
            "results": [
                {
                    "score": 0.87,
                    "document": {
                        "title": "main.py",
                        "file": "src/main.py",
                        "content": "def main(): ...",
                        "category": "code",
                        "language": "python",
                        "start_line": 1,
                        "end_line": 20
                    }
                }
            ]
        }"#;
        let parsed: SearchResponseWire = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].document.file, "src/main.py");
        assert!(parsed.results[0].score > 0.8);
    }

    #[test]
    fn test_empty_search_response() {
        let parsed: SearchResponseWire = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }
}
