//! Task commands: submit, status, list, cancel

use crate::error::Result;
use crate::service::{Orchestrator, TaskDetail};
use crate::store::Task;

pub async fn cmd_submit(service: &Orchestrator, repository_id: i64) -> Result<Task> {
    service.submit_task(repository_id).await
}

pub async fn cmd_status(service: &Orchestrator, task_id: i64) -> Result<TaskDetail> {
    service.task_detail(task_id).await
}

pub async fn cmd_list_tasks(
    service: &Orchestrator,
    repository_id: Option<i64>,
) -> Result<Vec<Task>> {
    service.store().list_tasks(repository_id).await
}

pub async fn cmd_cancel(service: &Orchestrator, task_id: i64) -> Result<bool> {
    service.cancel_task(task_id).await
}

pub fn print_task_detail(detail: &TaskDetail) {
    let task = &detail.task;
    println!("\nTask {}", task.id);
    if let Some(repo) = &detail.repository {
        println!("  Repository: {} ({})", repo.full_name, repo.id);
    }
    println!("  Status: {}", task.status);
    println!(
        "  Progress: {} (step {}) {:.0}%",
        detail.progress.label, detail.progress.step, detail.progress.percent
    );
    if let Some(position) = detail.queue_position {
        println!("  Queue position: {}", position);
    }
    if let Some(file) = &task.current_file {
        println!("  Current file: {}", file);
    }
    println!(
        "  Files: {} total, {} analyzed, {} failed, {} pending",
        detail.counts.total, detail.counts.success, detail.counts.failed, detail.counts.pending
    );
    println!(
        "  Code lines: {}, modules: {}",
        task.code_lines, task.module_count
    );
    if let Some(index) = &task.vector_index_name {
        println!("  Vector index: {}", index);
    }
    println!(
        "  Readme: {}",
        if detail.has_readme { "generated" } else { "none" }
    );
    if let Some(error) = &task.error_message {
        println!("  Error: {}", error);
    }
}

pub fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks. Use 'codenav submit <repository-id>' first.");
        return;
    }
    println!(
        "{:<6} {:<6} {:<10} {:<5} {:<22} FILES",
        "ID", "REPO", "STATUS", "STEP", "CREATED"
    );
    for task in tasks {
        let created = task.created_at.chars().take(19).collect::<String>();
        println!(
            "{:<6} {:<6} {:<10} {:<5} {:<22} {}/{}",
            task.id,
            task.repository_id,
            task.status,
            task.current_step,
            created,
            task.successful_files + task.failed_files,
            task.total_files
        );
    }
}
