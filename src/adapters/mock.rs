//! In-process adapter fakes for tests

use super::{
    Completion, CompletionRequest, DocGenerator, DocJobState, DocJobStatus, DocOptions,
    IndexDocument, LanguageModel, ScoredChunk, Usage, VectorIndex,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted LLM: succeeds with a fixed payload, optionally failing
/// transiently the first N times a marker appears in the prompt.
pub struct MockLlm {
    pub calls: AtomicUsize,
    pub response: String,
    transient_failures: Mutex<HashMap<String, u32>>,
}

impl MockLlm {
    pub fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: r#"{"summary": "Defines the module entry point.", "dependencies": ["os"], "items": [{"title": "main function", "description": "Entry point", "start_line": 1, "end_line": 5}]}"#.to_string(),
            transient_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Fail with a transient error the first `times` calls whose prompt
    /// contains `marker`.
    pub fn fail_transient_for(self, marker: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(marker.to_string(), times);
        self
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut failures = self.transient_failures.lock().unwrap();
        for (marker, remaining) in failures.iter_mut() {
            if prompt.contains(marker.as_str()) && *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Transient(format!("scripted failure for {}", marker)));
            }
        }

        Ok(Completion {
            text: self.response.clone(),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// In-memory vector index
#[derive(Default)]
pub struct MockVectorIndex {
    counter: AtomicUsize,
    pub indexes: Mutex<HashMap<String, Vec<IndexDocument>>>,
    pub deleted: Mutex<Vec<String>>,
    pub unreachable: std::sync::atomic::AtomicBool,
}

impl MockVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(Error::Transient("vector service unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorIndex for MockVectorIndex {
    async fn create_index(
        &self,
        documents: &[IndexDocument],
        _vector_field: &str,
    ) -> Result<String> {
        self.check_reachable()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("idx-test-{}", n);
        self.indexes
            .lock()
            .unwrap()
            .insert(name.clone(), documents.to_vec());
        Ok(name)
    }

    async fn add_documents(&self, index_name: &str, documents: &[IndexDocument]) -> Result<usize> {
        self.check_reachable()?;
        let mut indexes = self.indexes.lock().unwrap();
        let entry = indexes
            .get_mut(index_name)
            .ok_or_else(|| Error::NotFound(format!("index {}", index_name)))?;
        entry.extend(documents.iter().cloned());
        Ok(documents.len())
    }

    async fn search(
        &self,
        index_name: &str,
        _query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_reachable()?;
        let indexes = self.indexes.lock().unwrap();
        let docs = indexes.get(index_name).cloned().unwrap_or_default();
        Ok(docs
            .into_iter()
            .take(top_k)
            .map(|document| ScoredChunk {
                score: 0.9,
                document,
            })
            .collect())
    }

    async fn index_exists(&self, index_name: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.indexes.lock().unwrap().contains_key(index_name))
    }

    async fn delete_index(&self, index_name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(index_name.to_string());
        self.indexes.lock().unwrap().remove(index_name);
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.check_reachable()
    }
}

/// Scripted document-generation service
pub enum DocMode {
    Succeed(String),
    FailPermanent(String),
    NeverFinish,
}

pub struct MockDocGen {
    pub mode: Mutex<DocMode>,
    counter: AtomicUsize,
    pub deleted_artifacts: Mutex<Vec<String>>,
}

impl MockDocGen {
    pub fn succeeding() -> Self {
        Self::with_mode(DocMode::Succeed("# Generated Readme\n\nOverview.".to_string()))
    }

    pub fn with_mode(mode: DocMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            counter: AtomicUsize::new(0),
            deleted_artifacts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DocGenerator for MockDocGen {
    async fn submit(&self, _local_path: &str, _options: &DocOptions) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("doc-job-{}", n))
    }

    async fn status(&self, _job_id: &str) -> Result<DocJobStatus> {
        let mode = self.mode.lock().unwrap();
        let (progress, state) = match &*mode {
            DocMode::Succeed(markdown) => (
                100.0,
                DocJobState::Completed {
                    markdown: markdown.clone(),
                },
            ),
            DocMode::FailPermanent(error) => (
                30.0,
                DocJobState::Failed {
                    error: error.clone(),
                },
            ),
            DocMode::NeverFinish => (50.0, DocJobState::InProgress),
        };
        Ok(DocJobStatus {
            progress,
            current_stage: Some("rendering".to_string()),
            state,
        })
    }

    async fn delete_artifact(&self, job_id: &str) -> Result<()> {
        self.deleted_artifacts
            .lock()
            .unwrap()
            .push(job_id.to_string());
        Ok(())
    }
}
