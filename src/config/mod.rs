//! Configuration management for codenav
//!
//! Handles loading, saving, and validating configuration from TOML files,
//! plus the documented environment-variable overrides. The loaded value is
//! constructed once at boot and passed by value to the scheduler, the
//! worker pool, and the adapters; nothing reads the environment after boot.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Task/worker concurrency
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// LLM request limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Retry/backoff parameters for transient errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Vector-index delivery configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Document-generation stage polling
    #[serde(default)]
    pub doc: DocConfig,

    /// Persistence configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Filesystem roots
    #[serde(default)]
    pub paths: RootsConfig,

    /// LLM provider endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector-index service endpoint
    #[serde(default)]
    pub vector: VectorConfig,

    /// Document-generation service endpoint
    #[serde(default)]
    pub docgen: DocgenConfig,

    /// Worker liveness
    #[serde(default)]
    pub health: HealthConfig,

    /// Internal locations (derived, not user-editable)
    #[serde(skip)]
    pub internal: InternalPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Max tasks in status=running simultaneously (N)
    #[serde(default = "default_global_running_tasks")]
    pub global_running_tasks: usize,

    /// Worker pool size (W)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Queued files each worker may hold beyond its active one
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// LLM requests per minute across the whole process
    #[serde(default = "default_rpm")]
    pub rpm: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hard ceiling on a single LLM call, retries included
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,

    /// Files larger than this are marked failed with an input error
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for transient errors (R)
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,

    /// Jitter fraction applied to each delay, in [0, 1)
    #[serde(default = "default_retry_jitter_frac")]
    pub jitter_frac: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Documents per index-add call (B)
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,

    /// Lines per chunk delivered to the index
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    /// Overlapping lines between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocConfig {
    /// Seconds between status polls
    #[serde(default = "default_doc_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Ceiling on total polling time in seconds
    #[serde(default = "default_doc_max_total_secs")]
    pub max_total_secs: u64,

    /// When false, a failed document stage completes the task without a
    /// readme instead of failing it
    #[serde(default = "default_doc_required")]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database path; empty means `<base_dir>/codenav.db`
    #[serde(default)]
    pub dsn: String,

    /// Connection pool size
    #[serde(default = "default_store_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootsConfig {
    /// Root directory for uploaded repositories (`<root>/<hash>/...`)
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// Root directory for locally materialized vector stores
    #[serde(default = "default_vectorstore_root")]
    pub vectorstore_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector-index service base URL
    #[serde(default = "default_vector_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocgenConfig {
    /// Document-generation service base URL
    #[serde(default = "default_docgen_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Worker heartbeat interval in seconds (H); a worker silent for more
    /// than 2H is unhealthy and its task becomes an orphan candidate
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seed for the estimated-wait statistic before any task completes
    #[serde(default = "default_mean_task_minutes")]
    pub mean_task_minutes: u64,
}

/// Internal locations derived from the config file position
#[derive(Debug, Clone, Default)]
pub struct InternalPaths {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_running_tasks: default_global_running_tasks(),
            worker_count: default_worker_count(),
            prefetch: default_prefetch(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            request_timeout_secs: default_request_timeout_secs(),
            hard_timeout_secs: default_hard_timeout_secs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_ms: default_retry_base_ms(),
            jitter_frac: default_retry_jitter_frac(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
            chunk_lines: default_chunk_lines(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_doc_poll_interval_secs(),
            max_total_secs: default_doc_max_total_secs(),
            required: default_doc_required(),
        }
    }
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            vectorstore_root: default_vectorstore_root(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_vector_base_url(),
        }
    }
}

impl Default for DocgenConfig {
    fn default() -> Self {
        Self {
            base_url: default_docgen_base_url(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            mean_task_minutes: default_mean_task_minutes(),
        }
    }
}

impl Config {
    /// Default base directory (~/.codenav)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codenav")
    }

    /// Default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn init_internal(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.internal = InternalPaths {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path, then apply
    /// environment overrides and validate.
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.internal = InternalPaths {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    /// when no config file exists yet.
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_internal(base_dir);

        if config.internal.config_file.exists() {
            debug!("Loading config from {:?}", config.internal.config_file);
            let content = std::fs::read_to_string(&config.internal.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.internal = config.internal;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to its file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.internal.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.internal.config_file, content)?;
        info!("Saved config to {:?}", self.internal.config_file);
        Ok(())
    }

    /// Apply the documented environment-variable overrides. The recognized
    /// set is exactly `CODENAV_<SECTION>_<KEY>` for the tables in this
    /// struct plus the provider variables `OPENAI_BASE_URL` and
    /// `OPENAI_MODEL` (the API key is read lazily via `llm_api_key`).
    pub fn apply_env(&mut self) {
        env_usize(
            "CODENAV_CONCURRENCY_GLOBAL_RUNNING_TASKS",
            &mut self.concurrency.global_running_tasks,
        );
        env_usize(
            "CODENAV_CONCURRENCY_WORKER_COUNT",
            &mut self.concurrency.worker_count,
        );
        env_usize("CODENAV_CONCURRENCY_PREFETCH", &mut self.concurrency.prefetch);

        env_u32("CODENAV_LIMITS_RPM", &mut self.limits.rpm);
        env_u64(
            "CODENAV_LIMITS_REQUEST_TIMEOUT_SECS",
            &mut self.limits.request_timeout_secs,
        );
        env_u64(
            "CODENAV_LIMITS_HARD_TIMEOUT_SECS",
            &mut self.limits.hard_timeout_secs,
        );
        env_usize("CODENAV_LIMITS_MAX_FILE_BYTES", &mut self.limits.max_file_bytes);

        env_u32("CODENAV_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        env_u64("CODENAV_RETRY_BASE_MS", &mut self.retry.base_ms);
        env_f64("CODENAV_RETRY_JITTER_FRAC", &mut self.retry.jitter_frac);

        env_usize("CODENAV_INDEX_BATCH_SIZE", &mut self.index.batch_size);

        env_u64(
            "CODENAV_DOC_POLL_INTERVAL_SECS",
            &mut self.doc.poll_interval_secs,
        );
        env_u64("CODENAV_DOC_MAX_TOTAL_SECS", &mut self.doc.max_total_secs);
        env_bool("CODENAV_DOC_REQUIRED", &mut self.doc.required);

        env_string("CODENAV_STORE_DSN", &mut self.store.dsn);
        env_u32("CODENAV_STORE_POOL_SIZE", &mut self.store.pool_size);

        env_path("CODENAV_PATHS_REPO_ROOT", &mut self.paths.repo_root);
        env_path(
            "CODENAV_PATHS_VECTORSTORE_ROOT",
            &mut self.paths.vectorstore_root,
        );

        env_string("OPENAI_BASE_URL", &mut self.llm.base_url);
        env_string("OPENAI_MODEL", &mut self.llm.model);
        env_string("CODENAV_VECTOR_BASE_URL", &mut self.vector.base_url);
        env_string("CODENAV_DOCGEN_BASE_URL", &mut self.docgen.base_url);
    }

    /// LLM API key from the configured environment variable
    pub fn llm_api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env).ok()
    }

    /// Resolved SQLite database path
    pub fn database_path(&self) -> PathBuf {
        if self.store.dsn.is_empty() {
            self.internal.base_dir.join("codenav.db")
        } else {
            PathBuf::from(&self.store.dsn)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.request_timeout_secs)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.hard_timeout_secs)
    }

    pub fn doc_poll_interval(&self) -> Duration {
        Duration::from_secs(self.doc.poll_interval_secs)
    }

    pub fn doc_max_total(&self) -> Duration {
        Duration::from_secs(self.doc.max_total_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.health.heartbeat_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.global_running_tasks == 0 {
            return Err(Error::Config(
                "concurrency.global_running_tasks must be >= 1".to_string(),
            ));
        }

        if self.concurrency.worker_count == 0 {
            return Err(Error::Config(
                "concurrency.worker_count must be >= 1".to_string(),
            ));
        }

        if self.limits.rpm == 0 {
            return Err(Error::Config("limits.rpm must be >= 1".to_string()));
        }

        if self.retry.base_ms == 0 {
            return Err(Error::Config("retry.base_ms must be positive".to_string()));
        }

        if !(0.0..1.0).contains(&self.retry.jitter_frac) {
            return Err(Error::Config(
                "retry.jitter_frac must be in [0, 1)".to_string(),
            ));
        }

        if self.index.batch_size == 0 {
            return Err(Error::Config("index.batch_size must be >= 1".to_string()));
        }

        if self.index.chunk_overlap >= self.index.chunk_lines {
            return Err(Error::Config(
                "index.chunk_overlap must be < index.chunk_lines".to_string(),
            ));
        }

        if self.doc.poll_interval_secs == 0 {
            return Err(Error::Config(
                "doc.poll_interval_secs must be >= 1".to_string(),
            ));
        }

        if self.health.heartbeat_secs == 0 {
            return Err(Error::Config(
                "health.heartbeat_secs must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn env_path(key: &str, slot: &mut PathBuf) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *slot = PathBuf::from(value);
        }
    }
}

fn env_usize(key: &str, slot: &mut usize) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        }
    }
}

fn env_u32(key: &str, slot: &mut u32) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        }
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        }
    }
}

fn env_f64(key: &str, slot: &mut f64) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        }
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(value) = std::env::var(key) {
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => *slot = true,
            "0" | "false" | "no" => *slot = false,
            _ => {}
        }
    }
}
