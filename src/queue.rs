//! Admission queue: FIFO view over pending tasks plus the wait estimator
//!
//! The durable store is the queue; this type only adds the snapshot shape
//! served to pollers and a bounded rolling statistic of completed-task
//! durations for the (advisory) wait estimate.

use crate::config::Config;
use crate::error::Result;
use crate::store::{Task, TaskStore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const DURATION_WINDOW: usize = 32;

/// Point-in-time queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending_task_ids: Vec<i64>,
    pub total_pending: usize,
    pub running_tasks: i64,
    pub estimated_wait_minutes: f64,
    pub has_queue: bool,
}

/// Admission queue over the task store
pub struct AdmissionQueue {
    store: TaskStore,
    max_running: usize,
    seed_minutes: f64,
    window: Mutex<VecDeque<f64>>,
}

impl AdmissionQueue {
    pub fn new(store: TaskStore, config: &Config) -> Self {
        Self {
            store,
            max_running: config.concurrency.global_running_tasks,
            seed_minutes: config.health.mean_task_minutes as f64,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit the head of the queue if a slot is free. The transition is
    /// atomic against the store; this is the only path from pending to
    /// running.
    pub async fn admit_next(&self) -> Result<Option<Task>> {
        self.store.admit_next(self.max_running).await
    }

    /// Record a completed task's duration for the wait estimate
    pub fn record_duration_minutes(&self, minutes: f64) {
        if !minutes.is_finite() || minutes < 0.0 {
            return;
        }
        let mut window = self.window.lock().unwrap();
        window.push_back(minutes);
        while window.len() > DURATION_WINDOW {
            window.pop_front();
        }
    }

    /// Seed the rolling window from history (used at startup)
    pub async fn seed_from_history(&self) -> Result<()> {
        let recent = self.store.recent_task_minutes(DURATION_WINDOW).await?;
        let mut window = self.window.lock().unwrap();
        for minutes in recent.into_iter().rev() {
            window.push_back(minutes);
        }
        while window.len() > DURATION_WINDOW {
            window.pop_front();
        }
        Ok(())
    }

    /// Mean task duration in minutes: rolling window when populated,
    /// configured seed otherwise
    pub fn mean_minutes(&self) -> f64 {
        let window = self.window.lock().unwrap();
        if window.is_empty() {
            self.seed_minutes
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }

    /// Queue state for pollers. The estimate is advisory:
    /// `position × mean task duration`.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let pending_task_ids = self.store.list_pending_ids().await?;
        let running_tasks = self.store.count_running().await?;
        let total_pending = pending_task_ids.len();
        let estimated_wait_minutes = total_pending as f64 * self.mean_minutes();

        Ok(QueueSnapshot {
            has_queue: total_pending > 0,
            pending_task_ids,
            total_pending,
            running_tasks,
            estimated_wait_minutes,
        })
    }

    /// 1-based position of a pending task in admission order
    pub async fn position_of(&self, task_id: i64) -> Result<Option<usize>> {
        let pending = self.store.list_pending_ids().await?;
        Ok(pending.iter().position(|id| *id == task_id).map(|p| p + 1))
    }
}
