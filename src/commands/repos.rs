//! Repository commands: add, list, remove

use crate::error::Result;
use crate::service::{DeletionReport, Orchestrator};
use crate::store::Repository;
use std::path::Path;

/// Import and register a source tree
pub async fn cmd_add(
    service: &Orchestrator,
    path: &Path,
    name: Option<String>,
) -> Result<Repository> {
    service.register_repository(path, name).await
}

pub async fn cmd_list_repositories(service: &Orchestrator) -> Result<Vec<Repository>> {
    service.store().list_repositories().await
}

/// Delete a repository (soft keeps the rows, hard cascades everywhere)
pub async fn cmd_remove(
    service: &Orchestrator,
    repository_id: i64,
    soft: bool,
) -> Result<DeletionReport> {
    service.delete_repository(repository_id, soft).await
}

pub fn print_repositories(repositories: &[Repository]) {
    if repositories.is_empty() {
        println!("No repositories registered. Use 'codenav add <path>' first.");
        return;
    }
    println!("{:<6} {:<24} {:<40} STATUS", "ID", "NAME", "FULL NAME");
    for repo in repositories {
        println!(
            "{:<6} {:<24} {:<40} {}",
            repo.id, repo.name, repo.full_name, repo.status
        );
    }
}

pub fn print_deletion(report: &DeletionReport, repository_id: i64) {
    if !report.existed {
        println!("Repository {} was already gone (nothing to do)", repository_id);
        return;
    }
    if report.soft {
        println!("✓ Repository {} marked deleted", repository_id);
        return;
    }
    println!("✓ Repository {} deleted", repository_id);
    println!("  Tasks removed: {}", report.tasks_removed);
    println!("  Vector indexes deleted: {}", report.vector_indexes_deleted);
    println!("  Doc artifacts deleted: {}", report.doc_artifacts_deleted);
    if report.files_removed {
        println!("  Imported files removed");
    }
}
