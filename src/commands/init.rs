//! Init command implementation

use crate::config::Config;
use crate::error::Result;
use crate::store::TaskStore;
use std::path::PathBuf;
use tracing::info;

/// Write a default config file and create the database under `base_dir`
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    let base = base_dir.unwrap_or_else(Config::default_base_dir);
    config.paths.repo_root = base.join("repos");
    config.paths.vectorstore_root = base.join("vectorstores");

    let config_file = base.join("config.toml");
    if config_file.exists() && !force {
        return Config::load(&config_file);
    }

    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(&config.paths.repo_root)?;

    config.internal.base_dir = base.clone();
    config.internal.config_file = config_file;
    config.save()?;

    // Creating the store up front surfaces permission problems at init
    // time instead of at first submit.
    TaskStore::connect(&config).await?;

    info!(base = %base.display(), "initialized");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let config = cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();

        assert!(config.internal.config_file.exists());
        assert!(config.paths.repo_root.is_dir());
        assert!(config.database_path().exists());
    }

    #[tokio::test]
    async fn test_init_twice_keeps_existing_config() {
        let tmp = TempDir::new().unwrap();
        let mut first = cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();
        first.concurrency.global_running_tasks = 9;
        first.save().unwrap();

        let second = cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();
        assert_eq!(second.concurrency.global_running_tasks, 9);

        let forced = cmd_init(Some(tmp.path().to_path_buf()), true).await.unwrap();
        assert_ne!(forced.concurrency.global_running_tasks, 9);
    }
}
