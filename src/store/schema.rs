//! SQLite schema definition

/// SQL schema for the task store
pub const SCHEMA_SQL: &str = r#"
-- Repositories: registered upload directories
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    local_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Tasks: one end-to-end analysis run for a repository version
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    status TEXT NOT NULL DEFAULT 'pending',
    current_step INTEGER NOT NULL DEFAULT 0,
    total_files INTEGER NOT NULL DEFAULT 0,
    successful_files INTEGER NOT NULL DEFAULT 0,
    failed_files INTEGER NOT NULL DEFAULT 0,
    code_lines INTEGER NOT NULL DEFAULT 0,
    module_count INTEGER NOT NULL DEFAULT 0,
    current_file TEXT,
    vector_index_name TEXT,
    doc_job_id TEXT,
    error_message TEXT,
    config_json TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    heartbeat_at TEXT
);

-- File analyses: one row per candidate file per task
CREATE TABLE IF NOT EXISTS file_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    code_lines INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    code_content TEXT,
    analysis TEXT,
    dependencies TEXT,
    error_message TEXT,
    analyzed_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(task_id, file_path)
);

-- Analysis items: append-only findings per analyzed file
CREATE TABLE IF NOT EXISTS analysis_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_analysis_id INTEGER NOT NULL REFERENCES file_analyses(id),
    title TEXT NOT NULL,
    description TEXT,
    source TEXT,
    language TEXT,
    code TEXT,
    start_line INTEGER,
    end_line INTEGER,
    created_at TEXT NOT NULL
);

-- Readme artifacts: one generated document per task
CREATE TABLE IF NOT EXISTS readme_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL UNIQUE REFERENCES tasks(id),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Indexes for progress queries and queue scans
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_repository ON tasks(repository_id);
CREATE INDEX IF NOT EXISTS idx_files_task ON file_analyses(task_id);
CREATE INDEX IF NOT EXISTS idx_files_task_status ON file_analyses(task_id, status);
CREATE INDEX IF NOT EXISTS idx_items_file ON analysis_items(file_analysis_id);
"#;
