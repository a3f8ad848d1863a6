//! Durable task storage using SQLite
//!
//! This module is the source of truth for resume. It holds:
//! - Repositories (registered upload directories)
//! - Tasks (the per-run state machine row)
//! - FileAnalyses (per-file outcomes inside a task)
//! - AnalysisItems (findings appended by the analyze stage)
//! - ReadmeArtifacts (the generated document)
//!
//! Every guarded transition is a single SQL statement whose WHERE clause
//! encodes the invariant, so a transition is atomic with the counters it
//! implies and concurrent writers cannot violate the task lifecycle.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Repository lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Active,
    Deleted,
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoStatus::Active => write!(f, "active"),
            RepoStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for RepoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(RepoStatus::Active),
            "deleted" => Ok(RepoStatus::Deleted),
            _ => Err(Error::Config(format!("Unknown repository status: {}", s))),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(Error::Config(format!("Unknown task status: {}", s))),
        }
    }
}

/// Per-file analysis status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Success => write!(f, "success"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(FileStatus::Pending),
            "success" => Ok(FileStatus::Success),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(Error::Config(format!("Unknown file status: {}", s))),
        }
    }
}

/// A registered repository
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub local_path: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Repository {
    pub fn get_status(&self) -> Result<RepoStatus> {
        self.status.parse()
    }
}

/// One end-to-end analysis run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub repository_id: i64,
    pub status: String,
    pub current_step: i64,
    pub total_files: i64,
    pub successful_files: i64,
    pub failed_files: i64,
    pub code_lines: i64,
    pub module_count: i64,
    pub current_file: Option<String>,
    pub vector_index_name: Option<String>,
    pub doc_job_id: Option<String>,
    pub error_message: Option<String>,
    pub config_json: Option<String>,
    pub cancel_requested: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub heartbeat_at: Option<String>,
}

impl Task {
    pub fn get_status(&self) -> Result<TaskStatus> {
        self.status.parse()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested != 0
    }
}

/// One candidate file inside a task
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub id: i64,
    pub task_id: i64,
    pub file_path: String,
    pub language: String,
    pub size_bytes: i64,
    pub code_lines: i64,
    pub status: String,
    pub code_content: Option<String>,
    pub analysis: Option<String>,
    pub dependencies: Option<String>,
    pub error_message: Option<String>,
    pub analyzed_at: Option<String>,
    pub created_at: String,
}

impl FileAnalysis {
    pub fn get_status(&self) -> Result<FileStatus> {
        self.status.parse()
    }
}

/// Fields for a new (or re-scanned) FileAnalysis row
#[derive(Debug, Clone)]
pub struct NewFileAnalysis {
    pub task_id: i64,
    pub file_path: String,
    pub language: String,
    pub size_bytes: i64,
    pub code_lines: i64,
    pub code_content: Option<String>,
    pub dependencies: Option<String>,
}

/// Terminal outcome a worker writes for one file
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Success {
        analysis: String,
        dependencies: Option<String>,
    },
    Failed {
        error: String,
    },
}

/// A finding appended during the analyze stage
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnalysisItem {
    pub id: i64,
    pub file_analysis_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub language: Option<String>,
    pub code: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub created_at: String,
}

/// Fields for appending an analysis item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAnalysisItem {
    pub title: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub language: Option<String>,
    pub code: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
}

/// The generated readme for a task
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReadmeArtifact {
    pub id: i64,
    pub task_id: i64,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-task file counts used by progress derivation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FileCounts {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub pending: i64,
}

/// What a cascade delete removed, so the caller can clean up external
/// resources (vector indexes) afterwards
#[derive(Debug, Clone, Default)]
pub struct CascadeResult {
    pub existed: bool,
    pub vector_indexes: Vec<String>,
    pub doc_jobs: Vec<String>,
    pub tasks_removed: u64,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Task store handle
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Connect using config (creates parent directory and schema as needed)
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.database_path(), config.store.pool_size).await
    }

    /// Open a database at `db_path` directly
    pub async fn new(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };

        if !store.is_initialized().await? {
            store.init_schema().await?;
        }

        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing task store schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check whether the schema exists
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='tasks'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Repository Operations =====

    /// Register a repository. Duplicate full names surface as Conflict.
    pub async fn create_repository(
        &self,
        name: &str,
        full_name: &str,
        local_path: &str,
    ) -> Result<Repository> {
        let now = now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO repositories (name, full_name, local_path, status, created_at, updated_at)
            VALUES (?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(name)
        .bind(full_name)
        .bind(local_path)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(Error::Conflict(format!(
                    "Repository '{}' already exists",
                    full_name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let id = result.last_insert_rowid();
        self.get_repository(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {}", id)))
    }

    pub async fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(repo)
    }

    pub async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>> {
        let repo =
            sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE full_name = ?")
                .bind(full_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(repo)
    }

    /// List repositories still marked active
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let repos = sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE status = 'active' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(repos)
    }

    /// Soft-delete: flip the status, keep all rows
    pub async fn mark_repository_deleted(&self, id: i64) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE repositories SET status = 'deleted', updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Hard-delete a repository and everything it owns. Refuses while a
    /// task for it is running; repeating the delete is a success. Returns
    /// the vector index names that were referenced so the caller can issue
    /// deletes against the vector service.
    pub async fn delete_repository_cascade(&self, id: i64) -> Result<CascadeResult> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(CascadeResult::default());
        }

        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE repository_id = ? AND status = 'running'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if running > 0 {
            return Err(Error::Conflict(format!(
                "Repository {} has a running task",
                id
            )));
        }

        let vector_indexes: Vec<String> = sqlx::query_scalar(
            "SELECT vector_index_name FROM tasks WHERE repository_id = ? AND vector_index_name IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let doc_jobs: Vec<String> = sqlx::query_scalar(
            "SELECT doc_job_id FROM tasks WHERE repository_id = ? AND doc_job_id IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM analysis_items WHERE file_analysis_id IN (
                SELECT f.id FROM file_analyses f
                JOIN tasks t ON f.task_id = t.id
                WHERE t.repository_id = ?
            )
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM file_analyses WHERE task_id IN (SELECT id FROM tasks WHERE repository_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM readme_artifacts WHERE task_id IN (SELECT id FROM tasks WHERE repository_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let tasks_removed = sqlx::query("DELETE FROM tasks WHERE repository_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(CascadeResult {
            existed: true,
            vector_indexes,
            doc_jobs,
            tasks_removed,
        })
    }

    // ===== Task Operations =====

    /// Create a pending task for a repository
    pub async fn create_task(
        &self,
        repository_id: i64,
        config_json: Option<String>,
    ) -> Result<Task> {
        let repo = self
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {}", repository_id)))?;
        if repo.get_status()? != RepoStatus::Active {
            return Err(Error::Conflict(format!(
                "Repository {} is deleted",
                repository_id
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (repository_id, status, config_json, created_at)
            VALUES (?, 'pending', ?, ?)
            "#,
        )
        .bind(repository_id)
        .bind(config_json)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    pub async fn list_tasks(&self, repository_id: Option<i64>) -> Result<Vec<Task>> {
        let tasks = match repository_id {
            Some(repo) => {
                sqlx::query_as::<_, Task>(
                    "SELECT * FROM tasks WHERE repository_id = ? ORDER BY created_at DESC, id DESC",
                )
                .bind(repo)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC, id DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(tasks)
    }

    /// Pending task ids in admission order (FIFO, lower id first on ties)
    pub async fn list_pending_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM tasks WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn count_running(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn list_running(&self) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE status = 'running' ORDER BY started_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    /// Promote the head of the pending queue to running, if a slot is free
    /// and no task of the same repository is already running. Everything
    /// happens inside one transaction so two admitters cannot both succeed.
    pub async fn admit_next(&self, max_running: usize) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let head: Option<(i64, i64)> = sqlx::query_as(
            "SELECT id, repository_id FROM tasks WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((task_id, repository_id)) = head else {
            return Ok(None);
        };

        let running: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'running'")
            .fetch_one(&mut *tx)
            .await?;
        if running >= max_running as i64 {
            return Ok(None);
        }

        // Strict FIFO: a blocked head blocks the queue rather than being
        // skipped, so completion order matches submission order.
        let repo_running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE status = 'running' AND repository_id = ?",
        )
        .bind(repository_id)
        .fetch_one(&mut *tx)
        .await?;
        if repo_running > 0 {
            return Ok(None);
        }

        let now = now_rfc3339();
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = COALESCE(started_at, ?),
                heartbeat_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if affected == 1 {
            self.get_task(task_id).await
        } else {
            Ok(None)
        }
    }

    /// Advance the persisted step. Steps only move forward.
    pub async fn set_current_step(&self, task_id: i64, step: u8) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET current_step = ?, heartbeat_at = ? WHERE id = ? AND current_step <= ?",
        )
        .bind(step as i64)
        .bind(now_rfc3339())
        .bind(task_id)
        .bind(step as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record scan-stage totals
    pub async fn set_scan_totals(
        &self,
        task_id: i64,
        total_files: i64,
        code_lines: i64,
        module_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET total_files = ?, code_lines = ?, module_count = ?, heartbeat_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_files)
        .bind(code_lines)
        .bind(module_count)
        .bind(now_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_vector_index(&self, task_id: i64, index_name: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET vector_index_name = ?, heartbeat_at = ? WHERE id = ?")
            .bind(index_name)
            .bind(now_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_doc_job(&self, task_id: i64, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET doc_job_id = ?, heartbeat_at = ? WHERE id = ?")
            .bind(job_id)
            .bind(now_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_current_file(&self, task_id: i64, file_path: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE tasks SET current_file = ?, heartbeat_at = ? WHERE id = ?")
            .bind(file_path)
            .bind(now_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a running task completed. Returns false if the task was not
    /// running (terminal states are written exactly once).
    pub async fn complete_task(&self, task_id: i64) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', ended_at = ?, current_file = NULL, error_message = NULL
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(now_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Mark a running or pending task failed with an error message.
    pub async fn fail_task(&self, task_id: i64, error: &str) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', ended_at = ?, current_file = NULL, error_message = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(now_rfc3339())
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn heartbeat(&self, task_id: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET heartbeat_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a cancellation intent for a pending or running task
    pub async fn request_cancel(&self, task_id: i64) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE tasks SET cancel_requested = 1 WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn cancel_requested(&self, task_id: i64) -> Result<bool> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT cancel_requested FROM tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or(0) != 0)
    }

    /// Running tasks whose heartbeat is older than `stale_before`
    /// (RFC3339). These are orphans left by a dead worker.
    pub async fn list_orphans(&self, stale_before: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?)
            ORDER BY started_at ASC
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    /// Durations (minutes) of the most recent completed tasks, newest
    /// first. Feeds the estimated-wait statistic.
    pub async fn recent_task_minutes(&self, limit: usize) -> Result<Vec<f64>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT started_at, ended_at FROM tasks
            WHERE status = 'completed' AND started_at IS NOT NULL AND ended_at IS NOT NULL
            ORDER BY ended_at DESC LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut minutes = Vec::with_capacity(rows.len());
        for (start, end) in rows {
            let start = chrono::DateTime::parse_from_rfc3339(&start);
            let end = chrono::DateTime::parse_from_rfc3339(&end);
            if let (Ok(s), Ok(e)) = (start, end) {
                let secs = (e - s).num_seconds();
                if secs >= 0 {
                    minutes.push(secs as f64 / 60.0);
                }
            }
        }
        Ok(minutes)
    }

    // ===== FileAnalysis Operations =====

    /// Insert a scanned file row. If a row already exists for
    /// (task, path), the new pending row must not clobber a success row;
    /// any other existing row is refreshed with the re-scanned content.
    pub async fn append_file_analysis(&self, row: &NewFileAnalysis) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_analyses
                (task_id, file_path, language, size_bytes, code_lines, status,
                 code_content, dependencies, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            ON CONFLICT(task_id, file_path) DO UPDATE SET
                language = excluded.language,
                size_bytes = excluded.size_bytes,
                code_lines = excluded.code_lines,
                code_content = excluded.code_content,
                dependencies = excluded.dependencies
            WHERE file_analyses.status != 'success'
            "#,
        )
        .bind(row.task_id)
        .bind(&row.file_path)
        .bind(&row.language)
        .bind(row.size_bytes)
        .bind(row.code_lines)
        .bind(&row.code_content)
        .bind(&row.dependencies)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write a terminal outcome for a file and bump the task counters in
    /// the same transaction. A success outcome always lands; a failure
    /// never overwrites an existing success row. Returns true when the row
    /// actually transitioned (counters were bumped exactly then).
    pub async fn finish_file(
        &self,
        task_id: i64,
        file_path: &str,
        outcome: &FileOutcome,
    ) -> Result<bool> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;

        let (status, analysis, dependencies, error) = match outcome {
            FileOutcome::Success {
                analysis,
                dependencies,
            } => ("success", Some(analysis.as_str()), dependencies.clone(), None),
            FileOutcome::Failed { error } => ("failed", None, None, Some(error.as_str())),
        };

        let transitioned = sqlx::query(
            r#"
            UPDATE file_analyses
            SET status = ?, analysis = COALESCE(?, analysis),
                dependencies = COALESCE(?, dependencies),
                error_message = ?, analyzed_at = ?
            WHERE task_id = ? AND file_path = ? AND status != 'success'
            "#,
        )
        .bind(status)
        .bind(analysis)
        .bind(&dependencies)
        .bind(error)
        .bind(&now)
        .bind(task_id)
        .bind(file_path)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if transitioned {
            let counter = match outcome {
                FileOutcome::Success { .. } => "successful_files = successful_files + 1",
                FileOutcome::Failed { .. } => "failed_files = failed_files + 1",
            };
            // The ceiling guard keeps successful + failed <= total even if
            // a duplicate completion slips through.
            let sql = format!(
                r#"
                UPDATE tasks
                SET {}, current_file = ?, heartbeat_at = ?
                WHERE id = ? AND successful_files + failed_files < total_files
                "#,
                counter
            );
            sqlx::query(&sql)
                .bind(file_path)
                .bind(&now)
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
        } else if matches!(outcome, FileOutcome::Success { .. }) {
            // Row already succeeded earlier: refresh content, leave the
            // counters alone.
            sqlx::query(
                r#"
                UPDATE file_analyses
                SET analysis = COALESCE(?, analysis), analyzed_at = ?
                WHERE task_id = ? AND file_path = ?
                "#,
            )
            .bind(analysis)
            .bind(&now)
            .bind(task_id)
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(transitioned)
    }

    pub async fn get_file(&self, task_id: i64, file_path: &str) -> Result<Option<FileAnalysis>> {
        let file = sqlx::query_as::<_, FileAnalysis>(
            "SELECT * FROM file_analyses WHERE task_id = ? AND file_path = ?",
        )
        .bind(task_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn files_by_task(&self, task_id: i64) -> Result<Vec<FileAnalysis>> {
        let files = sqlx::query_as::<_, FileAnalysis>(
            "SELECT * FROM file_analyses WHERE task_id = ? ORDER BY file_path",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// Files still awaiting analysis, in insertion order
    pub async fn pending_files(&self, task_id: i64) -> Result<Vec<FileAnalysis>> {
        let files = sqlx::query_as::<_, FileAnalysis>(
            "SELECT * FROM file_analyses WHERE task_id = ? AND status = 'pending' ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// Cheap per-status counts for a task
    pub async fn file_counts(&self, task_id: i64) -> Result<FileCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM file_analyses WHERE task_id = ? GROUP BY status",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = FileCounts::default();
        for (status, n) in rows {
            counts.total += n;
            match status.as_str() {
                "success" => counts.success = n,
                "failed" => counts.failed = n,
                "pending" => counts.pending = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    // ===== AnalysisItem Operations =====

    /// Bulk-append findings for an analyzed file. Rejects spans where
    /// start_line > end_line.
    pub async fn append_analysis_items(
        &self,
        file_analysis_id: i64,
        items: &[NewAnalysisItem],
    ) -> Result<()> {
        for item in items {
            if let (Some(start), Some(end)) = (item.start_line, item.end_line) {
                if start > end {
                    return Err(Error::Input(format!(
                        "Item '{}' has start_line {} > end_line {}",
                        item.title, start, end
                    )));
                }
            }
        }

        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO analysis_items
                    (file_analysis_id, title, description, source, language,
                     code, start_line, end_line, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file_analysis_id)
            .bind(&item.title)
            .bind(&item.description)
            .bind(&item.source)
            .bind(&item.language)
            .bind(&item.code)
            .bind(item.start_line)
            .bind(item.end_line)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn items_by_file(&self, file_analysis_id: i64) -> Result<Vec<AnalysisItem>> {
        let items = sqlx::query_as::<_, AnalysisItem>(
            "SELECT * FROM analysis_items WHERE file_analysis_id = ? ORDER BY id",
        )
        .bind(file_analysis_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // ===== Readme Operations =====

    pub async fn upsert_readme(&self, task_id: i64, content: &str) -> Result<()> {
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO readme_artifacts (task_id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task_id)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_readme(&self, task_id: i64) -> Result<Option<ReadmeArtifact>> {
        let readme = sqlx::query_as::<_, ReadmeArtifact>(
            "SELECT * FROM readme_artifacts WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(readme)
    }
}
