//! Per-task pipeline driver
//!
//! Drives one admitted task through Scan -> Index -> Analyze -> Document.
//! The driver is a function of the persisted `(status, current_step)` pair:
//! re-running it against a task that crashed mid-flight re-executes only
//! the remaining work, because every stage is idempotent over the rows it
//! has already written.

pub mod analyze;
pub mod document;
pub mod index;
pub mod scan;

use crate::adapters::{DocGenerator, LanguageModel, VectorIndex};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::HeartbeatRegistry;
use crate::pool::RateGate;
use crate::store::TaskStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The four pipeline stages, dispatched by one match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Scan,
    Index,
    Analyze,
    Document,
}

impl PipelineStage {
    pub fn from_step(step: i64) -> Option<Self> {
        match step {
            0 => Some(PipelineStage::Scan),
            1 => Some(PipelineStage::Index),
            2 => Some(PipelineStage::Analyze),
            3 => Some(PipelineStage::Document),
            _ => None,
        }
    }

    pub fn as_step(&self) -> u8 {
        match self {
            PipelineStage::Scan => 0,
            PipelineStage::Index => 1,
            PipelineStage::Analyze => 2,
            PipelineStage::Document => 3,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PipelineStage::Scan => "scan",
            PipelineStage::Index => "index",
            PipelineStage::Analyze => "analyze",
            PipelineStage::Document => "document",
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            PipelineStage::Scan => Some(PipelineStage::Index),
            PipelineStage::Index => Some(PipelineStage::Analyze),
            PipelineStage::Analyze => Some(PipelineStage::Document),
            PipelineStage::Document => None,
        }
    }
}

/// Drives admitted tasks to a terminal state
#[derive(Clone)]
pub struct PipelineDriver {
    pub(crate) store: TaskStore,
    pub(crate) config: Config,
    pub(crate) llm: Arc<dyn LanguageModel>,
    pub(crate) vector: Arc<dyn VectorIndex>,
    pub(crate) docgen: Arc<dyn DocGenerator>,
    pub(crate) registry: Arc<HeartbeatRegistry>,
    pub(crate) rate_gate: Arc<RateGate>,
    pub(crate) cancel: CancellationToken,
}

impl PipelineDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: TaskStore,
        config: Config,
        llm: Arc<dyn LanguageModel>,
        vector: Arc<dyn VectorIndex>,
        docgen: Arc<dyn DocGenerator>,
        registry: Arc<HeartbeatRegistry>,
        rate_gate: Arc<RateGate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            config,
            llm,
            vector,
            docgen,
            registry,
            rate_gate,
            cancel,
        }
    }

    /// Run (or resume) a task that is in status=running. Terminal tasks
    /// are a no-op; the terminal transition is written exactly once here.
    pub async fn run(&self, task_id: i64) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        let status = task.get_status()?;
        if status.is_terminal() {
            info!(task = task_id, status = %task.status, "task already terminal");
            return Ok(());
        }
        if status == crate::store::TaskStatus::Pending {
            return Err(Error::Conflict(format!(
                "task {} has not been admitted",
                task_id
            )));
        }

        let worker = format!("driver-{}", task_id);
        self.registry.beat(&worker);

        let outcome = self.drive(task_id).await;
        self.registry.remove(&worker);

        match outcome {
            Ok(()) => {
                self.store.complete_task(task_id).await?;
                info!(task = task_id, "task completed");
                Ok(())
            }
            Err(Error::Cancelled) => {
                if self.store.cancel_requested(task_id).await? {
                    self.store.fail_task(task_id, "cancelled").await?;
                    info!(task = task_id, "task cancelled");
                } else {
                    // Shutdown, not an operator cancel: the task stays
                    // running so a restart resumes it from the persisted
                    // step.
                    info!(task = task_id, "interrupted, left for resume");
                }
                Ok(())
            }
            Err(e) => {
                self.store.fail_task(task_id, &e.to_string()).await?;
                error!(task = task_id, "task failed: {}", e);
                Ok(())
            }
        }
    }

    async fn drive(&self, task_id: i64) -> Result<()> {
        loop {
            let task = self
                .store
                .get_task(task_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
            self.check_cancel(task_id).await?;

            let Some(stage) = PipelineStage::from_step(task.current_step) else {
                return Ok(());
            };

            let repo = self
                .store
                .get_repository(task.repository_id)
                .await?
                .ok_or_else(|| {
                    Error::Fatal(format!("repository {} row missing", task.repository_id))
                })?;

            info!(task = task_id, stage = stage.title(), "running stage");
            let worker = format!("driver-{}", task_id);
            self.registry.beat(&worker);

            match stage {
                PipelineStage::Scan => scan::run(self, &task, &repo).await?,
                PipelineStage::Index => index::run(self, &task, &repo).await?,
                PipelineStage::Analyze => analyze::run(self, &task, &repo).await?,
                PipelineStage::Document => document::run(self, &task, &repo).await?,
            }

            match stage.next() {
                Some(next) => {
                    self.store.set_current_step(task_id, next.as_step()).await?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Observe cancellation at a safe point: either the in-process token or
    /// the persisted operator intent.
    pub(crate) async fn check_cancel(&self, task_id: i64) -> Result<()> {
        if self.cancel.is_cancelled() || self.store.cancel_requested(task_id).await? {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::mock::{DocMode, MockDocGen, MockLlm, MockVectorIndex};
    use crate::store::{FileStatus, Task, TaskStatus};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub store: TaskStore,
        pub config: Config,
        pub llm: Arc<MockLlm>,
        pub vector: Arc<MockVectorIndex>,
        pub docgen: Arc<MockDocGen>,
        pub repo_dir: std::path::PathBuf,
        pub _tmp: TempDir,
    }

    impl Fixture {
        pub async fn new() -> Self {
            Self::with_llm(MockLlm::ok()).await
        }

        pub async fn with_llm(llm: MockLlm) -> Self {
            let tmp = TempDir::new().unwrap();
            let store = TaskStore::new(&tmp.path().join("tasks.db"), 5).await.unwrap();
            let mut config = Config::default();
            config.concurrency.worker_count = 2;
            config.retry.base_ms = 1;
            config.doc.poll_interval_secs = 1;
            let repo_dir = tmp.path().join("repo");
            std::fs::create_dir_all(&repo_dir).unwrap();
            Self {
                store,
                config,
                llm: Arc::new(llm),
                vector: Arc::new(MockVectorIndex::new()),
                docgen: Arc::new(MockDocGen::succeeding()),
                repo_dir,
                _tmp: tmp,
            }
        }

        pub fn write_file(&self, rel: &str, content: &str) {
            let path = self.repo_dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }

        pub fn driver(&self) -> PipelineDriver {
            PipelineDriver::new(
                self.store.clone(),
                self.config.clone(),
                self.llm.clone(),
                self.vector.clone(),
                self.docgen.clone(),
                Arc::new(HeartbeatRegistry::new(std::time::Duration::from_secs(30))),
                Arc::new(RateGate::per_minute(6000)),
                CancellationToken::new(),
            )
        }

        /// Register the repo dir, submit a task, and admit it
        pub async fn admitted_task(&self) -> Task {
            let repo = self
                .store
                .create_repository(
                    "demo",
                    "acme/demo",
                    &self.repo_dir.to_string_lossy(),
                )
                .await
                .unwrap();
            self.store.create_task(repo.id, None).await.unwrap();
            self.store.admit_next(1).await.unwrap().unwrap()
        }
    }

    #[test]
    fn test_stage_roundtrip() {
        for step in 0..4 {
            let stage = PipelineStage::from_step(step).unwrap();
            assert_eq!(stage.as_step() as i64, step);
        }
        assert!(PipelineStage::from_step(4).is_none());
        assert_eq!(PipelineStage::Scan.next(), Some(PipelineStage::Index));
        assert_eq!(PipelineStage::Document.next(), None);
    }

    #[tokio::test]
    async fn test_happy_path_tiny_repo() {
        let fx = Fixture::new().await;
        fx.write_file("a.py", "import os\n\nprint('a')\n");
        fx.write_file("b.py", &"x = 1\n".repeat(20));
        fx.write_file("c.md", "# Title\n\nBody\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.total_files, 3);
        assert_eq!(task.successful_files, 3);
        assert_eq!(task.failed_files, 0);
        assert_eq!(task.current_step, 3);
        assert!(task.vector_index_name.is_some());
        assert!(task.ended_at.is_some());
        assert!(task.code_lines > 0);
        assert_eq!(task.module_count, 1);

        let readme = fx.store.get_readme(task.id).await.unwrap().unwrap();
        assert!(readme.content.contains("Generated Readme"));

        // Items landed for the analyzed files.
        let file = fx.store.get_file(task.id, "a.py").await.unwrap().unwrap();
        assert_eq!(file.get_status().unwrap(), FileStatus::Success);
        let items = fx.store.items_by_file(file.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "main function");
    }

    #[tokio::test]
    async fn test_transient_llm_failure_single_success_row() {
        // Fail the first 2 attempts for x.py, succeed on the 3rd.
        let fx = Fixture::with_llm(MockLlm::ok().fail_transient_for("x.py", 2)).await;
        fx.write_file("x.py", "print('x')\n");
        fx.write_file("y.py", "print('y')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.successful_files, 2);
        assert_eq!(task.failed_files, 0);

        let file = fx.store.get_file(task.id, "x.py").await.unwrap().unwrap();
        assert_eq!(file.get_status().unwrap(), FileStatus::Success);

        let counts = fx.store.file_counts(task.id).await.unwrap();
        assert_eq!(counts.success, 2);
        assert_eq!(counts.total, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_file_not_task() {
        // More failures than retry.max_attempts: x.py fails, y.py passes.
        let fx = Fixture::with_llm(MockLlm::ok().fail_transient_for("x.py", 10)).await;
        fx.write_file("x.py", "print('x')\n");
        fx.write_file("y.py", "print('y')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.successful_files, 1);
        assert_eq!(task.failed_files, 1);

        let file = fx.store.get_file(task.id, "x.py").await.unwrap().unwrap();
        assert_eq!(file.get_status().unwrap(), FileStatus::Failed);
        assert!(file.error_message.is_some());
    }

    #[tokio::test]
    async fn test_fatal_during_document_preserves_analyses() {
        let fx = Fixture::new().await;
        *fx.docgen.mode.lock().unwrap() =
            DocMode::FailPermanent("renderer exploded".to_string());
        fx.write_file("a.py", "print('a')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Failed);
        let message = task.error_message.clone().unwrap();
        assert!(message.contains("document stage"), "got: {}", message);
        assert!(task.ended_at.is_some());

        // FileAnalyses survive the failure.
        let file = fx.store.get_file(task.id, "a.py").await.unwrap().unwrap();
        assert_eq!(file.get_status().unwrap(), FileStatus::Success);
        assert!(fx.store.get_readme(task.id).await.unwrap().is_none());

        // Progress is frozen at the document stage.
        let counts = fx.store.file_counts(task.id).await.unwrap();
        let progress = crate::progress::derive(&task, &counts, None);
        assert_eq!(progress.step, 3);
        assert!(progress.percent >= 75.0);
    }

    #[tokio::test]
    async fn test_optional_document_failure_completes_task() {
        let mut fx = Fixture::new().await;
        fx.config.doc.required = false;
        *fx.docgen.mode.lock().unwrap() = DocMode::FailPermanent("down".to_string());
        fx.write_file("a.py", "print('a')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert!(fx.store.get_readme(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crash_resume_processes_only_pending() {
        let fx = Fixture::new().await;
        for i in 0..6 {
            fx.write_file(&format!("f{}.py", i), &format!("print({})\n", i));
        }

        let task = fx.admitted_task().await;
        let driver = fx.driver();

        // Simulate the pre-crash run: scan + index done, half the files
        // analyzed, step persisted at 2.
        let repo = fx.store.get_repository(task.repository_id).await.unwrap().unwrap();
        scan::run(&driver, &task, &repo).await.unwrap();
        driver.store.set_current_step(task.id, 1).await.unwrap();
        let task_mid = fx.store.get_task(task.id).await.unwrap().unwrap();
        index::run(&driver, &task_mid, &repo).await.unwrap();
        driver.store.set_current_step(task.id, 2).await.unwrap();

        for i in 0..3 {
            let path = format!("f{}.py", i);
            fx.store
                .finish_file(
                    task.id,
                    &path,
                    &crate::store::FileOutcome::Success {
                        analysis: "pre-crash".to_string(),
                        dependencies: None,
                    },
                )
                .await
                .unwrap();
        }
        let llm_calls_before = fx.llm.calls.load(Ordering::SeqCst);

        // "Restart": a fresh driver resumes from the persisted state.
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.successful_files + task.failed_files, 6);

        // Only the 3 still-pending files hit the LLM after the restart.
        let llm_calls_after = fx.llm.calls.load(Ordering::SeqCst);
        assert_eq!(llm_calls_after - llm_calls_before, 3);

        // Pre-crash analyses were not overwritten.
        let file = fx.store.get_file(task.id, "f0.py").await.unwrap().unwrap();
        assert_eq!(file.analysis.as_deref(), Some("pre-crash"));
    }

    #[tokio::test]
    async fn test_rerun_of_terminal_task_is_noop() {
        let fx = Fixture::new().await;
        fx.write_file("a.py", "print('a')\n");
        let task = fx.admitted_task().await;
        let driver = fx.driver();
        driver.run(task.id).await.unwrap();

        let calls = fx.llm.calls.load(Ordering::SeqCst);
        driver.run(task.id).await.unwrap();
        assert_eq!(fx.llm.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_empty_repository_completes_with_zeros() {
        let fx = Fixture::new().await;
        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.total_files, 0);
        assert_eq!(task.successful_files, 0);
        assert_eq!(task.failed_files, 0);
        let index = task.vector_index_name.unwrap();
        assert!(index.starts_with("local-") && index.ends_with("-empty"));
    }

    #[tokio::test]
    async fn test_oversize_file_failed_others_continue() {
        let mut fx = Fixture::new().await;
        fx.config.limits.max_file_bytes = 64;
        fx.write_file("big.py", &"# padding\n".repeat(100));
        fx.write_file("small.py", "print('ok')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Completed);
        assert_eq!(task.successful_files, 1);
        assert_eq!(task.failed_files, 1);

        let big = fx.store.get_file(task.id, "big.py").await.unwrap().unwrap();
        assert_eq!(big.get_status().unwrap(), FileStatus::Failed);
        assert!(big.error_message.unwrap().contains("input budget"));
    }

    #[tokio::test]
    async fn test_vector_unreachable_fails_task() {
        let fx = Fixture::new().await;
        fx.vector.set_unreachable(true);
        fx.write_file("a.py", "print('a')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("index stage"));
    }

    #[tokio::test]
    async fn test_document_poll_timeout_fails_task() {
        let mut fx = Fixture::new().await;
        fx.config.doc.max_total_secs = 0;
        *fx.docgen.mode.lock().unwrap() = DocMode::NeverFinish;
        fx.write_file("a.py", "print('a')\n");

        let task = fx.admitted_task().await;
        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Failed);
        let message = task.error_message.unwrap();
        assert!(message.contains("document stage"), "got: {}", message);
        assert!(message.contains("timed out"), "got: {}", message);
    }

    #[tokio::test]
    async fn test_persisted_cancellation_intent() {
        let fx = Fixture::new().await;
        fx.write_file("a.py", "print('a')\n");
        let task = fx.admitted_task().await;
        fx.store.request_cancel(task.id).await.unwrap();

        fx.driver().run(task.id).await.unwrap();

        let task = fx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.get_status().unwrap(), TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_existing_index_is_not_rebuilt() {
        let fx = Fixture::new().await;
        fx.write_file("a.py", "print('a')\n");
        let task = fx.admitted_task().await;
        let driver = fx.driver();
        let repo = fx.store.get_repository(task.repository_id).await.unwrap().unwrap();

        scan::run(&driver, &task, &repo).await.unwrap();
        let task_mid = fx.store.get_task(task.id).await.unwrap().unwrap();
        index::run(&driver, &task_mid, &repo).await.unwrap();
        let first_index = fx
            .store
            .get_task(task.id)
            .await
            .unwrap()
            .unwrap()
            .vector_index_name
            .unwrap();

        // Re-running the stage sees the index and keeps it.
        let task_again = fx.store.get_task(task.id).await.unwrap().unwrap();
        index::run(&driver, &task_again, &repo).await.unwrap();
        let second_index = fx
            .store
            .get_task(task.id)
            .await
            .unwrap()
            .unwrap()
            .vector_index_name
            .unwrap();
        assert_eq!(first_index, second_index);
        assert_eq!(fx.vector.indexes.lock().unwrap().len(), 1);
    }
}
