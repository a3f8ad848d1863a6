//! Stage 3 — Document
//!
//! Submits the repository to the document-generation service, polls the
//! remote job at a fixed interval up to the configured ceiling, and
//! persists the returned markdown. Whether a document failure fails the
//! task is a policy switch (`doc.required`); analyses persisted by earlier
//! stages are retained either way.

use super::PipelineDriver;
use crate::adapters::{DocJobState, DocOptions};
use crate::error::{Error, Result};
use crate::pool::with_retries;
use crate::store::{Repository, Task};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) async fn run(driver: &PipelineDriver, task: &Task, repo: &Repository) -> Result<()> {
    if driver.store.get_readme(task.id).await?.is_some() {
        info!(task = task.id, "document stage: readme already present");
        return Ok(());
    }

    let options = DocOptions::for_project(Some(repo.name.clone()), &driver.config.llm.model);

    // Resume reuses a previously submitted job instead of double-submitting.
    let job_id = match &task.doc_job_id {
        Some(job) => job.clone(),
        None => {
            let submitted = with_retries(&driver.config.retry, &driver.cancel, |_| async {
                driver.docgen.submit(&repo.local_path, &options).await
            })
            .await;
            let job = match submitted {
                Ok(job) => job,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    return finish_without_readme(
                        driver,
                        format!("document stage: submit failed: {}", e),
                    );
                }
            };
            driver.store.set_doc_job(task.id, &job).await?;
            job
        }
    };

    let poll_interval = driver.config.doc_poll_interval();
    let deadline = Instant::now() + driver.config.doc_max_total();

    loop {
        driver.check_cancel(task.id).await?;

        match driver.docgen.status(&job_id).await {
            Ok(status) => match status.state {
                DocJobState::Completed { markdown } => {
                    driver.store.upsert_readme(task.id, &markdown).await?;
                    info!(
                        task = task.id,
                        bytes = markdown.len(),
                        "document stage complete"
                    );
                    return Ok(());
                }
                DocJobState::Failed { error } => {
                    return finish_without_readme(
                        driver,
                        format!("document stage: upstream failure: {}", error),
                    );
                }
                DocJobState::InProgress => {
                    debug!(
                        task = task.id,
                        progress = status.progress,
                        stage = status.current_stage.as_deref().unwrap_or("-"),
                        "document generation in progress"
                    );
                }
            },
            Err(e) if e.is_transient() => {
                warn!(task = task.id, "document status poll failed: {}", e);
            }
            Err(e) => {
                return finish_without_readme(driver, format!("document stage: {}", e));
            }
        }

        driver.store.heartbeat(task.id).await?;

        if Instant::now() + poll_interval > deadline {
            return finish_without_readme(
                driver,
                format!(
                    "document stage: timed out after {:?}",
                    driver.config.doc_max_total()
                ),
            );
        }

        tokio::select! {
            _ = driver.cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Apply the document-failure policy: fail the task when the readme is
/// required, otherwise complete without one.
fn finish_without_readme(driver: &PipelineDriver, message: String) -> Result<()> {
    if driver.config.doc.required {
        Err(Error::Fatal(message))
    } else {
        warn!("{} (doc.required = false, completing without readme)", message);
        Ok(())
    }
}
