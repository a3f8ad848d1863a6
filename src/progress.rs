//! Progress derivation for UI polling
//!
//! Progress is a pure function of the task row plus cheap per-task file
//! counts; there is no separate progress cache to drift out of sync. On a
//! failed task the counters stop moving, so the same derivation yields the
//! frozen last-known values.

use crate::store::{FileCounts, Task, TaskStatus};
use serde::Serialize;

/// Derived progress for one task
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    /// Stage number (0 Scan, 1 Index, 2 Analyze, 3 Document)
    pub step: u8,
    pub label: &'static str,
    /// Overall percentage in [0, 100]
    pub percent: f64,
    pub current_file: Option<String>,
}

/// Derive progress from the persisted task state. `doc_progress` is the
/// remote document-generation progress in [0, 100], when known.
pub fn derive(task: &Task, counts: &FileCounts, doc_progress: Option<f64>) -> Progress {
    let status = task.get_status().unwrap_or(TaskStatus::Pending);

    match status {
        TaskStatus::Pending => Progress {
            step: 0,
            label: "queued",
            percent: 0.0,
            current_file: None,
        },
        TaskStatus::Completed => Progress {
            step: 3,
            label: "completed",
            percent: 100.0,
            current_file: None,
        },
        TaskStatus::Running | TaskStatus::Failed => {
            let mut progress = derive_running(task, counts, doc_progress);
            if status == TaskStatus::Failed {
                progress.label = "failed";
            }
            progress
        }
    }
}

fn derive_running(task: &Task, counts: &FileCounts, doc_progress: Option<f64>) -> Progress {
    let current_file = task.current_file.clone();

    // Scan: rows are still being persisted.
    if task.total_files > 0 && counts.total < task.total_files {
        let ratio = counts.total as f64 / task.total_files as f64;
        return Progress {
            step: 0,
            label: "scan",
            percent: ratio * 25.0,
            current_file,
        };
    }

    // Index: no index name recorded yet.
    if task.vector_index_name.is_none() {
        return Progress {
            step: 1,
            label: "index",
            percent: 25.0,
            current_file,
        };
    }

    // Analyze: pending rows remain.
    if counts.total > 0 && counts.pending > 0 {
        let ratio = counts.success as f64 / counts.total as f64;
        return Progress {
            step: 2,
            label: "analyze",
            percent: 25.0 + ratio * 50.0,
            current_file,
        };
    }

    // Document: everything analyzed, waiting on the generation service.
    let doc = doc_progress.unwrap_or(0.0).clamp(0.0, 100.0);
    Progress {
        step: 3,
        label: "document",
        percent: 75.0 + doc * 0.25,
        current_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: &str) -> Task {
        Task {
            id: 1,
            repository_id: 1,
            status: status.to_string(),
            current_step: 0,
            total_files: 0,
            successful_files: 0,
            failed_files: 0,
            code_lines: 0,
            module_count: 0,
            current_file: None,
            vector_index_name: None,
            doc_job_id: None,
            error_message: None,
            config_json: None,
            cancel_requested: 0,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            started_at: None,
            ended_at: None,
            heartbeat_at: None,
        }
    }

    fn counts(total: i64, success: i64, failed: i64) -> FileCounts {
        FileCounts {
            total,
            success,
            failed,
            pending: total - success - failed,
        }
    }

    #[test]
    fn test_pending_is_queued_zero() {
        let p = derive(&task("pending"), &counts(0, 0, 0), None);
        assert_eq!(p.label, "queued");
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn test_scan_phase_scales_to_25() {
        let mut t = task("running");
        t.total_files = 10;
        let p = derive(&t, &counts(4, 0, 0), None);
        assert_eq!(p.step, 0);
        assert_eq!(p.label, "scan");
        assert_eq!(p.percent, 10.0);
    }

    #[test]
    fn test_index_phase_is_25() {
        let mut t = task("running");
        t.total_files = 10;
        let p = derive(&t, &counts(10, 0, 0), None);
        assert_eq!(p.step, 1);
        assert_eq!(p.percent, 25.0);
    }

    #[test]
    fn test_analyze_phase_scales_25_to_75() {
        let mut t = task("running");
        t.total_files = 10;
        t.vector_index_name = Some("idx".to_string());
        t.current_file = Some("src/lib.rs".to_string());

        let p = derive(&t, &counts(10, 5, 0), None);
        assert_eq!(p.step, 2);
        assert_eq!(p.percent, 50.0);
        assert_eq!(p.current_file.as_deref(), Some("src/lib.rs"));
    }

    #[test]
    fn test_analyze_with_failures_still_advances() {
        let mut t = task("running");
        t.total_files = 4;
        t.vector_index_name = Some("idx".to_string());
        // 2 success, 1 failed, 1 pending: still in analyze.
        let p = derive(&t, &counts(4, 2, 1), None);
        assert_eq!(p.step, 2);
        assert_eq!(p.percent, 50.0);
    }

    #[test]
    fn test_document_phase_uses_remote_progress() {
        let mut t = task("running");
        t.total_files = 4;
        t.vector_index_name = Some("idx".to_string());
        let c = counts(4, 3, 1);

        let p = derive(&t, &c, None);
        assert_eq!(p.step, 3);
        assert_eq!(p.percent, 75.0);

        let p = derive(&t, &c, Some(60.0));
        assert_eq!(p.percent, 90.0);

        let p = derive(&t, &c, Some(400.0));
        assert_eq!(p.percent, 100.0);
    }

    #[test]
    fn test_completed_is_100() {
        let p = derive(&task("completed"), &counts(3, 3, 0), None);
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.label, "completed");
    }

    #[test]
    fn test_failed_freezes_at_last_known() {
        // Failed during the document stage: step stays 3, percent >= 75.
        let mut t = task("failed");
        t.total_files = 4;
        t.vector_index_name = Some("idx".to_string());
        t.error_message = Some("document stage: permanent failure".to_string());
        let p = derive(&t, &counts(4, 4, 0), None);
        assert_eq!(p.step, 3);
        assert_eq!(p.label, "failed");
        assert!(p.percent >= 75.0);
    }

    #[test]
    fn test_empty_repository_skips_to_document() {
        let mut t = task("running");
        t.total_files = 0;
        t.vector_index_name = Some("local-demo-empty".to_string());
        let p = derive(&t, &counts(0, 0, 0), None);
        assert_eq!(p.step, 3);
        assert_eq!(p.percent, 75.0);
    }
}
