//! Run, queue, and health commands

use crate::console::task_bar;
use crate::error::Result;
use crate::health::HealthReport;
use crate::queue::QueueSnapshot;
use crate::service::Orchestrator;
use crate::store::Task;
use std::time::Duration;
use tracing::info;

/// Run the scheduler loop until ctrl-c
pub async fn cmd_run_scheduler(service: &Orchestrator) -> Result<()> {
    let shutdown_handle = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_handle.shutdown();
        }
    });

    service.run_scheduler().await
}

/// Drive one task to a terminal state, rendering a progress bar while the
/// pipeline works.
pub async fn cmd_run_task(service: &Orchestrator, task_id: i64) -> Result<Task> {
    let bar = task_bar(100, "analyzing");
    let watcher_service = service.clone();
    let watcher_bar = bar.clone();
    let watcher = tokio::spawn(async move {
        loop {
            if let Ok(detail) = watcher_service.task_detail(task_id).await {
                watcher_bar.set_position(detail.progress.percent as u64);
                watcher_bar.set_message(detail.progress.label.to_string());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    let outcome = service.run_task_inline(task_id).await;
    watcher.abort();
    bar.finish_and_clear();
    outcome
}

pub async fn cmd_queue(service: &Orchestrator) -> Result<QueueSnapshot> {
    service.queue_snapshot().await
}

pub async fn cmd_health(service: &Orchestrator) -> Result<HealthReport> {
    service.health().await
}

pub fn print_queue(snapshot: &QueueSnapshot) {
    println!("\nQueue");
    println!("  Pending: {}", snapshot.total_pending);
    println!("  Running: {}", snapshot.running_tasks);
    println!(
        "  Estimated wait: {:.0} minutes",
        snapshot.estimated_wait_minutes
    );
    if !snapshot.pending_task_ids.is_empty() {
        let ids: Vec<String> = snapshot
            .pending_task_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        println!("  Order: {}", ids.join(" -> "));
    }
}

pub fn print_health(report: &HealthReport) {
    println!("\nHealth");
    println!("  Workers: {}", report.worker_count);
    for worker in &report.workers {
        let mark = if worker.healthy { "✓" } else { "✗" };
        println!(
            "  {} {} (active {}, last beat {}s ago)",
            mark, worker.name, worker.active, worker.seconds_since_beat
        );
    }
    println!("  Pending: {}", report.pending_depth);
    println!("  Running: {}", report.running_tasks);
    println!(
        "  Estimated wait: {:.0} minutes",
        report.estimated_wait_minutes
    );
}
