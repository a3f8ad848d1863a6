//! Orchestrator facade and scheduler
//!
//! Owns the wiring between the store, the admission queue, the pipeline
//! driver, and the adapters. Every control-surface operation (submit,
//! detail, cancel, delete, health) lives here; the CLI is a thin shell
//! over these methods.

use crate::adapters::{
    DocGenerator, HttpDocGenerator, HttpLanguageModel, HttpVectorIndex, LanguageModel, VectorIndex,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{HealthReport, HeartbeatRegistry};
use crate::pipeline::PipelineDriver;
use crate::pool::RateGate;
use crate::progress::{self, Progress};
use crate::queue::{AdmissionQueue, QueueSnapshot};
use crate::repo;
use crate::store::{FileCounts, Repository, Task, TaskStatus, TaskStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Task row plus everything a poller needs in one response
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub repository: Option<Repository>,
    pub counts: FileCounts,
    pub progress: Progress,
    pub queue_position: Option<usize>,
    pub has_readme: bool,
}

/// Outcome of a repository deletion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionReport {
    pub existed: bool,
    pub soft: bool,
    pub tasks_removed: u64,
    pub vector_indexes_deleted: usize,
    pub doc_artifacts_deleted: usize,
    pub files_removed: bool,
}

/// The orchestrator service
#[derive(Clone)]
pub struct Orchestrator {
    store: TaskStore,
    config: Config,
    queue: Arc<AdmissionQueue>,
    registry: Arc<HeartbeatRegistry>,
    rate_gate: Arc<RateGate>,
    llm: Arc<dyn LanguageModel>,
    vector: Arc<dyn VectorIndex>,
    docgen: Arc<dyn DocGenerator>,
    active: Arc<Mutex<HashMap<i64, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Wire up the service against live HTTP adapters
    pub async fn new(config: Config) -> Result<Self> {
        // Surface misconfigured endpoints at startup, not at first call.
        url::Url::parse(&config.llm.base_url)?;
        url::Url::parse(&config.vector.base_url)?;
        url::Url::parse(&config.docgen.base_url)?;

        let store = TaskStore::connect(&config).await?;
        let llm: Arc<dyn LanguageModel> = Arc::new(HttpLanguageModel::new(&config)?);
        let vector: Arc<dyn VectorIndex> = Arc::new(HttpVectorIndex::new(&config)?);
        let docgen: Arc<dyn DocGenerator> = Arc::new(HttpDocGenerator::new(&config)?);
        Ok(Self::with_adapters(config, store, llm, vector, docgen))
    }

    /// Wire up with explicit adapters (tests, embedding)
    pub fn with_adapters(
        config: Config,
        store: TaskStore,
        llm: Arc<dyn LanguageModel>,
        vector: Arc<dyn VectorIndex>,
        docgen: Arc<dyn DocGenerator>,
    ) -> Self {
        let queue = Arc::new(AdmissionQueue::new(store.clone(), &config));
        let registry = Arc::new(HeartbeatRegistry::new(config.heartbeat_interval()));
        let rate_gate = Arc::new(RateGate::per_minute(config.limits.rpm));
        Self {
            store,
            config,
            queue,
            registry,
            rate_gate,
            llm,
            vector,
            docgen,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ===== Repositories =====

    /// Import a source tree and register it. Identical content hashes to
    /// the same full name, so re-registering the same upload returns the
    /// existing row instead of duplicating it.
    pub async fn register_repository(
        &self,
        source: &Path,
        name: Option<String>,
    ) -> Result<Repository> {
        let tree_hash = repo::hash_tree(source)?;
        let name = repo::display_name(source, name);
        let full_name = repo::full_name(&name, &tree_hash);

        if let Some(existing) = self.store.get_repository_by_full_name(&full_name).await? {
            info!(repository = existing.id, "identical content already registered");
            return Ok(existing);
        }

        let local_path = repo::materialize(source, &self.config.paths.repo_root, &tree_hash)?;
        self.store
            .create_repository(&name, &full_name, &local_path.to_string_lossy())
            .await
    }

    /// Delete a repository. Soft deletion flips the status; hard deletion
    /// cascades through the store, the vector service, the document
    /// service, and the imported files. Both are idempotent.
    pub async fn delete_repository(&self, repository_id: i64, soft: bool) -> Result<DeletionReport> {
        if soft {
            let existed = self.store.mark_repository_deleted(repository_id).await?;
            return Ok(DeletionReport {
                existed,
                soft: true,
                ..Default::default()
            });
        }

        let repo_row = self.store.get_repository(repository_id).await?;
        let cascade = self.store.delete_repository_cascade(repository_id).await?;

        let mut vector_indexes_deleted = 0;
        for index in &cascade.vector_indexes {
            match self.vector.delete_index(index).await {
                Ok(()) => vector_indexes_deleted += 1,
                Err(e) => warn!(index = %index, "vector index delete failed: {}", e),
            }
        }

        let mut doc_artifacts_deleted = 0;
        for job in &cascade.doc_jobs {
            match self.docgen.delete_artifact(job).await {
                Ok(()) => doc_artifacts_deleted += 1,
                Err(e) => warn!(job = %job, "doc artifact delete failed: {}", e),
            }
        }

        let mut files_removed = false;
        if let Some(repo_row) = repo_row {
            files_removed = repo::remove_imported(
                Path::new(&repo_row.local_path),
                &self.config.paths.repo_root,
            )
            .unwrap_or(false);
        }

        Ok(DeletionReport {
            existed: cascade.existed,
            soft: false,
            tasks_removed: cascade.tasks_removed,
            vector_indexes_deleted,
            doc_artifacts_deleted,
            files_removed,
        })
    }

    // ===== Tasks =====

    /// Create a pending task; the queue picks it up in FIFO order
    pub async fn submit_task(&self, repository_id: i64) -> Result<Task> {
        let config_json = serde_json::to_string(&self.config.limits).ok();
        let task = self.store.create_task(repository_id, config_json).await?;
        info!(task = task.id, repository = repository_id, "task submitted");
        Ok(task)
    }

    /// Full task detail with derived progress
    pub async fn task_detail(&self, task_id: i64) -> Result<TaskDetail> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        let counts = self.store.file_counts(task_id).await?;
        let repository = self.store.get_repository(task.repository_id).await?;
        let has_readme = self.store.get_readme(task_id).await?.is_some();
        let queue_position = match task.get_status()? {
            TaskStatus::Pending => self.queue.position_of(task_id).await?,
            _ => None,
        };

        // Remote document progress is only consulted while the document
        // stage is live; failures degrade to no progress detail.
        let doc_progress = match (&task.doc_job_id, task.get_status()?) {
            (Some(job), TaskStatus::Running) if task.current_step == 3 => self
                .docgen
                .status(job)
                .await
                .ok()
                .map(|status| status.progress),
            _ => None,
        };

        let progress = progress::derive(&task, &counts, doc_progress);
        Ok(TaskDetail {
            task,
            repository,
            counts,
            progress,
            queue_position,
            has_readme,
        })
    }

    /// Flag a pending or running task for cancellation. Running drivers
    /// observe the flag at their next safe point.
    pub async fn cancel_task(&self, task_id: i64) -> Result<bool> {
        let flagged = self.store.request_cancel(task_id).await?;
        if flagged {
            if let Some(token) = self.active.lock().unwrap().get(&task_id) {
                token.cancel();
            }
            info!(task = task_id, "cancellation requested");
        }
        Ok(flagged)
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.queue.snapshot().await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let snapshot = self.queue.snapshot().await?;
        let workers = self.registry.snapshot();
        Ok(HealthReport {
            worker_count: workers.len(),
            workers,
            pending_depth: snapshot.total_pending,
            running_tasks: snapshot.running_tasks,
            estimated_wait_minutes: snapshot.estimated_wait_minutes,
        })
    }

    // ===== Driving =====

    fn driver_for(&self, task_id: i64) -> PipelineDriver {
        let token = self.shutdown.child_token();
        self.active.lock().unwrap().insert(task_id, token.clone());
        PipelineDriver::new(
            self.store.clone(),
            self.config.clone(),
            self.llm.clone(),
            self.vector.clone(),
            self.docgen.clone(),
            self.registry.clone(),
            self.rate_gate.clone(),
            token,
        )
    }

    fn finish_driving(&self, task_id: i64) {
        self.active.lock().unwrap().remove(&task_id);
    }

    fn is_driving(&self, task_id: i64) -> bool {
        self.active.lock().unwrap().contains_key(&task_id)
    }

    async fn record_duration(&self, task_id: i64) {
        if let Ok(Some(task)) = self.store.get_task(task_id).await {
            if let (Some(start), Some(end)) = (&task.started_at, &task.ended_at) {
                let parsed = (
                    chrono::DateTime::parse_from_rfc3339(start),
                    chrono::DateTime::parse_from_rfc3339(end),
                );
                if let (Ok(s), Ok(e)) = parsed {
                    let minutes = (e - s).num_seconds().max(0) as f64 / 60.0;
                    self.queue.record_duration_minutes(minutes);
                }
            }
        }
    }

    /// Drive one task to a terminal state in the calling context. A
    /// pending task is admitted first and must be at the queue head.
    pub async fn run_task_inline(&self, task_id: i64) -> Result<Task> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        match task.get_status()? {
            TaskStatus::Completed | TaskStatus::Failed => return Ok(task),
            TaskStatus::Running => {}
            TaskStatus::Pending => {
                let head = self.store.list_pending_ids().await?.first().copied();
                if head != Some(task_id) {
                    return Err(Error::Conflict(format!(
                        "task {} is not at the head of the queue",
                        task_id
                    )));
                }
                let admitted = self.queue.admit_next().await?;
                match admitted {
                    Some(t) if t.id == task_id => {}
                    _ => {
                        return Err(Error::Conflict(format!(
                            "task {} could not be admitted (no free slot)",
                            task_id
                        )));
                    }
                }
            }
        }

        let driver = self.driver_for(task_id);
        let outcome = driver.run(task_id).await;
        self.finish_driving(task_id);
        self.record_duration(task_id).await;
        outcome?;

        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))
    }

    /// Recover orphaned running tasks by re-running the driver on them.
    /// At startup every running task is an orphan (no driver can be live);
    /// afterwards only tasks with stale heartbeats qualify.
    async fn collect_orphans(&self, startup: bool) -> Result<Vec<i64>> {
        let cutoff = if startup {
            (Utc::now() + chrono::Duration::days(1)).to_rfc3339()
        } else {
            let stale = chrono::Duration::from_std(self.config.heartbeat_interval() * 2)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            (Utc::now() - stale).to_rfc3339()
        };

        let orphans = self.store.list_orphans(&cutoff).await?;
        Ok(orphans
            .into_iter()
            .filter(|t| !self.is_driving(t.id))
            .map(|t| t.id)
            .collect())
    }

    /// Stop the scheduler and cancel in-flight drivers
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Scheduler loop: admit pending tasks as slots free up, spawn a
    /// driver per admitted task, recover orphans, and fold completed-task
    /// durations back into the wait estimate. Runs until `shutdown`.
    pub async fn run_scheduler(&self) -> Result<()> {
        self.queue.seed_from_history().await?;

        let mut drivers: JoinSet<()> = JoinSet::new();
        for task_id in self.collect_orphans(true).await? {
            info!(task = task_id, "recovering orphaned task");
            self.spawn_driver(&mut drivers, task_id);
        }

        let mut admit_tick = tokio::time::interval(Duration::from_secs(1));
        let mut orphan_tick = tokio::time::interval(self.config.heartbeat_interval().max(
            Duration::from_secs(1),
        ));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = admit_tick.tick() => {
                    while let Some(task) = self.queue.admit_next().await? {
                        info!(task = task.id, "admitted");
                        self.spawn_driver(&mut drivers, task.id);
                    }
                }
                _ = orphan_tick.tick() => {
                    for task_id in self.collect_orphans(false).await? {
                        warn!(task = task_id, "heartbeat stale, recovering orphan");
                        self.spawn_driver(&mut drivers, task_id);
                    }
                }
                Some(_) = drivers.join_next(), if !drivers.is_empty() => {}
            }
        }

        // Drain: give in-flight drivers a chance to reach a safe point.
        while drivers.join_next().await.is_some() {}
        info!("scheduler stopped");
        Ok(())
    }

    fn spawn_driver(&self, drivers: &mut JoinSet<()>, task_id: i64) {
        let service = self.clone();
        let driver = self.driver_for(task_id);
        drivers.spawn(async move {
            if let Err(e) = driver.run(task_id).await {
                warn!(task = task_id, "driver error: {}", e);
            }
            service.finish_driving(task_id);
            service.record_duration(task_id).await;
        });
    }
}
