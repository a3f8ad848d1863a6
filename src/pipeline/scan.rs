//! Stage 0 — Scan
//!
//! Walks the repository, persists one pending FileAnalysis row per
//! candidate file, and records the task totals. Re-running the stage
//! reuses existing rows via the prefer-success upsert, so a resumed task
//! never loses completed work.

use super::PipelineDriver;
use crate::error::{Error, Result};
use crate::lang;
use crate::store::{NewFileAnalysis, Repository, Task};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub(crate) async fn run(driver: &PipelineDriver, task: &Task, repo: &Repository) -> Result<()> {
    let root = Path::new(&repo.local_path);
    if !root.is_dir() {
        return Err(Error::Fatal(format!(
            "scan stage: repository path missing: {}",
            repo.local_path
        )));
    }

    let max_file_bytes = driver.config.limits.max_file_bytes;
    let mut total_files = 0i64;
    let mut total_code_lines = 0i64;
    let mut top_level: BTreeSet<String> = BTreeSet::new();

    // Hidden files and ignore rules are skipped the same way the upload
    // packaging skips them, so both sides see the same tree.
    let walker = WalkBuilder::new(root).hidden(true).build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("scan: unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let rel_path = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !lang::is_candidate(&rel_path) {
            debug!(file = %rel_path, "scan: skipped by extension");
            continue;
        }

        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0) as i64;
        let language = lang::language_for_path(&rel_path);

        // Oversize files get a row with no content; the analyze stage
        // turns that into a per-file input failure without losing the
        // rest of the task.
        let code_content = if size_bytes as usize > max_file_bytes {
            warn!(file = %rel_path, size_bytes, "scan: exceeds input budget");
            None
        } else {
            match std::fs::read(entry.path()) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    warn!(file = %rel_path, "scan: unreadable: {}", e);
                    None
                }
            }
        };

        let code_lines = code_content
            .as_deref()
            .map(lang::count_code_lines)
            .unwrap_or(0) as i64;
        let dependencies = code_content
            .as_deref()
            .map(|c| lang::extract_dependencies(c, language))
            .filter(|d| !d.is_empty());

        driver
            .store
            .append_file_analysis(&NewFileAnalysis {
                task_id: task.id,
                file_path: rel_path.clone(),
                language: language.to_string(),
                size_bytes,
                code_lines,
                code_content,
                dependencies,
            })
            .await?;

        total_files += 1;
        total_code_lines += code_lines;
        top_level.insert(top_level_segment(&rel_path));

        if total_files % 100 == 0 {
            driver.check_cancel(task.id).await?;
        }
    }

    // Module count: distinct top-level path segments among candidates,
    // with root-level files folded into one pseudo-module.
    let module_count = top_level.len() as i64;

    driver
        .store
        .set_scan_totals(task.id, total_files, total_code_lines, module_count)
        .await?;

    info!(
        task = task.id,
        total_files, total_code_lines, module_count, "scan complete"
    );
    Ok(())
}

fn top_level_segment(rel_path: &str) -> String {
    match rel_path.split_once('/') {
        Some((first, _)) => first.to_string(),
        None => ".".to_string(),
    }
}
