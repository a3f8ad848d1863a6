//! Bounded worker pool, global rate limiting, and retry policy
//!
//! The pool drains a per-task queue of work items through `worker_count`
//! concurrent workers. Each worker is a sequential pipeline (one in-flight
//! request), and all workers share one process-wide token bucket for LLM
//! requests.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use rand::Rng;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Process-wide token bucket for LLM requests
pub struct RateGate {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateGate {
    pub fn per_minute(rpm: u32) -> Self {
        let rpm = NonZeroU32::new(rpm).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_minute(rpm);
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait until a request token is available
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

/// Exponential backoff with jitter: `base · 2^attempt · (1 ± jitter_frac)`
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    jitter_frac: f64,
}

impl Backoff {
    pub fn new(base_ms: u64, jitter_frac: f64) -> Self {
        Self {
            base: Duration::from_millis(base_ms.max(1)),
            jitter_frac: jitter_frac.clamp(0.0, 0.99),
        }
    }

    pub fn from_config(retry: &RetryConfig) -> Self {
        Self::new(retry.base_ms, retry.jitter_frac)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * 2f64.powi(attempt.min(16) as i32);
        let jitter = 1.0 + self.jitter_frac * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
        Duration::from_millis((exp * jitter).max(1.0) as u64)
    }
}

/// Run `op` up to `retry.max_attempts` times, backing off between transient
/// failures. A `Retry-After` hint from the provider overrides the computed
/// delay. The attempt number is passed through so callers can shrink the
/// request on later attempts. Cancellation is observed before every attempt
/// and during every sleep.
pub async fn with_retries<T, F, Fut>(
    retry: &RetryConfig,
    cancel: &CancellationToken,
    op: F,
) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = Backoff::from_config(retry);
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let delay = e.retry_after().unwrap_or_else(|| backoff.delay(attempt));
                trace!(attempt, ?delay, "transient failure, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A fixed-size pool draining one task's work items
#[derive(Debug, Clone)]
pub struct WorkerPool {
    worker_count: usize,
    prefetch: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize, prefetch: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            prefetch,
        }
    }

    /// Drain `items` through the pool. The handler owns per-item error
    /// recording; the pool only guarantees bounded concurrency, bounded
    /// prefetch, and a prompt stop on cancellation. Returns the number of
    /// items handed to workers.
    pub async fn drain<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: CancellationToken,
        handler: F,
    ) -> usize
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Channel capacity models prefetch: each worker may hold its active
        // item plus `prefetch` queued ones.
        let capacity = self.worker_count * (1 + self.prefetch);
        let (tx, rx) = mpsc::channel::<T>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.worker_count {
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                let mut handled = 0usize;
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let item = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            item = guard.recv() => item,
                        }
                    };
                    match item {
                        Some(item) => {
                            handler(item).await;
                            handled += 1;
                        }
                        None => break,
                    }
                }
                handled
            });
        }

        let feeder_cancel = cancel.clone();
        let feeder = tokio::spawn(async move {
            for item in items {
                tokio::select! {
                    _ = feeder_cancel.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping tx closes the channel and lets workers drain out.
        });

        let mut handled = 0usize;
        while let Some(result) = workers.join_next().await {
            if let Ok(count) = result {
                handled += count;
            }
        }
        let _ = feeder.await;
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_ms: 1,
            jitter_frac: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff::new(100, 0.0);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = Backoff::new(100, 0.2);
        for attempt in 0..4 {
            let base = 100u64 << attempt;
            let delay = backoff.delay(attempt).as_millis() as u64;
            assert!(delay >= base * 8 / 10, "delay {} below bound", delay);
            assert!(delay <= base * 12 / 10 + 1, "delay {} above bound", delay);
        }
    }

    #[tokio::test]
    async fn test_rate_gate_allows_burst_within_quota() {
        let gate = RateGate::per_minute(600);
        let start = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        // 600/min leaves a comfortable initial burst.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retries_succeed_on_third_attempt() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let result = with_retries(&quick_retry(), &cancel, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let result: Result<()> = with_retries(&quick_retry(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transient("still flaky".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_bails_immediately() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let result: Result<()> = with_retries(&quick_retry(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Input("empty file".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Input(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_observe_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> =
            with_retries(&quick_retry(), &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_pool_drains_everything_with_bounded_concurrency() {
        let pool = WorkerPool::new(3, 1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let (active2, peak2, done2) = (active.clone(), peak.clone(), done.clone());
        let handled = pool
            .drain((0..20).collect(), CancellationToken::new(), move |_item| {
                let active = active2.clone();
                let peak = peak2.clone();
                let done = done2.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(handled, 20);
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_pool_stops_on_cancellation() {
        let pool = WorkerPool::new(2, 0);
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicUsize::new(0));

        let cancel2 = cancel.clone();
        let done2 = done.clone();
        let handled = pool
            .drain((0..100).collect(), cancel.clone(), move |item: i32| {
                let cancel = cancel2.clone();
                let done = done2.clone();
                async move {
                    if item == 3 {
                        cancel.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        // In-flight items finish; the rest of the queue is abandoned.
        assert!(handled < 100);
        assert_eq!(handled, done.load(Ordering::SeqCst));
    }
}
