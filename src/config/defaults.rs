//! Default values for configuration

pub fn default_global_running_tasks() -> usize {
    2
}

pub fn default_worker_count() -> usize {
    4
}

pub fn default_prefetch() -> usize {
    2
}

pub fn default_rpm() -> u32 {
    500
}

pub fn default_request_timeout_secs() -> u64 {
    120
}

pub fn default_hard_timeout_secs() -> u64 {
    600
}

pub fn default_max_file_bytes() -> usize {
    256 * 1024
}

pub fn default_retry_max_attempts() -> u32 {
    3
}

pub fn default_retry_base_ms() -> u64 {
    500
}

pub fn default_retry_jitter_frac() -> f64 {
    0.2
}

pub fn default_index_batch_size() -> usize {
    100
}

pub fn default_chunk_lines() -> usize {
    200
}

pub fn default_chunk_overlap() -> usize {
    20
}

pub fn default_doc_poll_interval_secs() -> u64 {
    5
}

pub fn default_doc_max_total_secs() -> u64 {
    300
}

pub fn default_doc_required() -> bool {
    true
}

pub fn default_store_pool_size() -> u32 {
    5
}

pub fn default_repo_root() -> std::path::PathBuf {
    std::path::PathBuf::from("data/repos")
}

pub fn default_vectorstore_root() -> std::path::PathBuf {
    std::path::PathBuf::from("data/vectorstores")
}

pub fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

pub fn default_vector_base_url() -> String {
    "http://127.0.0.1:8003".to_string()
}

pub fn default_docgen_base_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

pub fn default_heartbeat_secs() -> u64 {
    30
}

pub fn default_mean_task_minutes() -> u64 {
    15
}
