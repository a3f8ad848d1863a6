//! Stage 1 — Index
//!
//! Chunks every scanned file and delivers the chunks to the vector-index
//! service in batches. The returned index name is persisted on the task;
//! a resumed task whose index still exists skips the stage entirely.

use super::PipelineDriver;
use crate::adapters::IndexDocument;
use crate::chunk::chunk_lines;
use crate::error::{Error, Result};
use crate::pool::with_retries;
use crate::store::{Repository, Task};
use tracing::{debug, info};

const DOC_CATEGORIES: &[&str] = &["markdown", "text"];

pub(crate) async fn run(driver: &PipelineDriver, task: &Task, repo: &Repository) -> Result<()> {
    if let Some(existing) = &task.vector_index_name {
        match driver.vector.index_exists(existing).await {
            Ok(true) => {
                info!(task = task.id, index = %existing, "index present, skipping re-index");
                return Ok(());
            }
            Ok(false) => {
                info!(task = task.id, index = %existing, "recorded index is gone, re-indexing");
            }
            Err(e) => {
                debug!(task = task.id, "index existence probe failed: {}", e);
            }
        }
    }

    let documents = build_documents(driver, task).await?;

    if documents.is_empty() {
        // Nothing to embed; record a sentinel so the analyze stage knows
        // context retrieval is unavailable.
        let name = format!("local-{}-empty", repo.name);
        driver.store.set_vector_index(task.id, &name).await?;
        info!(task = task.id, index = %name, "empty repository, skipped index creation");
        return Ok(());
    }

    let batch_size = driver.config.index.batch_size;
    let mut batches = documents.chunks(batch_size);

    let first = batches.next().unwrap_or_default();
    let index_name = with_retries(&driver.config.retry, &driver.cancel, |_| async {
        driver.vector.create_index(first, "content").await
    })
    .await
    .map_err(|e| stage_error(e, "create index"))?;

    driver.store.set_vector_index(task.id, &index_name).await?;

    let mut delivered = first.len();
    for batch in batches {
        driver.check_cancel(task.id).await?;
        let count = with_retries(&driver.config.retry, &driver.cancel, |_| async {
            driver.vector.add_documents(&index_name, batch).await
        })
        .await
        .map_err(|e| stage_error(e, "add documents"))?;
        delivered += count;
        driver.store.heartbeat(task.id).await?;
    }

    info!(
        task = task.id,
        index = %index_name,
        documents = delivered,
        "index stage complete"
    );
    Ok(())
}

async fn build_documents(driver: &PipelineDriver, task: &Task) -> Result<Vec<IndexDocument>> {
    let files = driver.store.files_by_task(task.id).await?;
    let chunk_lines_max = driver.config.index.chunk_lines;
    let chunk_overlap = driver.config.index.chunk_overlap;

    let mut documents = Vec::new();
    for file in files {
        let Some(content) = file.code_content.as_deref() else {
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }

        let title = file
            .file_path
            .rsplit('/')
            .next()
            .unwrap_or(&file.file_path)
            .to_string();
        let category = if DOC_CATEGORIES.contains(&file.language.as_str()) {
            "docs"
        } else {
            "code"
        };

        for chunk in chunk_lines(content, chunk_lines_max, chunk_overlap) {
            documents.push(IndexDocument {
                title: title.clone(),
                file: file.file_path.clone(),
                content: chunk.content,
                category: category.to_string(),
                language: file.language.clone(),
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
            });
        }
    }
    Ok(documents)
}

fn stage_error(e: Error, op: &str) -> Error {
    match e {
        Error::Cancelled => Error::Cancelled,
        // Unreachable beyond the retry budget is fatal for the task.
        other => Error::Fatal(format!("index stage: {} failed: {}", op, other)),
    }
}
