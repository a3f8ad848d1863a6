//! Worker liveness and queue introspection

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Health of one worker slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub name: String,
    pub active: usize,
    pub seconds_since_beat: u64,
    pub healthy: bool,
}

/// Aggregate report served by the health operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub workers: Vec<WorkerHealth>,
    pub worker_count: usize,
    pub pending_depth: usize,
    pub running_tasks: i64,
    pub estimated_wait_minutes: f64,
}

struct WorkerState {
    last_beat: Instant,
    active: usize,
}

/// In-process registry of worker heartbeats. Workers beat on every unit of
/// work; a worker silent beyond twice the heartbeat interval is unhealthy
/// and its task becomes an orphan-recovery candidate.
pub struct HeartbeatRegistry {
    inner: Mutex<HashMap<String, WorkerState>>,
    stale_after: Duration,
}

impl HeartbeatRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            stale_after: heartbeat_interval * 2,
        }
    }

    /// Record a heartbeat for `name`, registering it on first use
    pub fn beat(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(name.to_string()).or_insert(WorkerState {
            last_beat: Instant::now(),
            active: 0,
        });
        state.last_beat = Instant::now();
    }

    pub fn set_active(&self, name: &str, active: usize) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(name.to_string()).or_insert(WorkerState {
            last_beat: Instant::now(),
            active: 0,
        });
        state.active = active;
        state.last_beat = Instant::now();
    }

    /// Drop a worker that exited cleanly
    pub fn remove(&self, name: &str) {
        self.inner.lock().unwrap().remove(name);
    }

    pub fn snapshot(&self) -> Vec<WorkerHealth> {
        let inner = self.inner.lock().unwrap();
        let mut workers: Vec<WorkerHealth> = inner
            .iter()
            .map(|(name, state)| {
                let since = state.last_beat.elapsed();
                WorkerHealth {
                    name: name.clone(),
                    active: state.active,
                    seconds_since_beat: since.as_secs(),
                    healthy: since <= self.stale_after,
                }
            })
            .collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }

    /// Names of workers whose heartbeat has gone stale
    pub fn stale_workers(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|w| !w.healthy)
            .map(|w| w.name)
            .collect()
    }
}
