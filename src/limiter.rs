use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{FixEmbedError, Result},
    metrics::Metrics,
    utils::TimeSource,
};

/// Sliding-window admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Sends admitted in any trailing window
    pub capacity: usize,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            capacity: 5,
            window: Duration::from_secs(1),
        }
    }
}

/// Process-wide outbound send limiter.
///
/// Keeps the instants of recent admissions; an attempt is admitted when fewer
/// than `capacity` of them fall inside the trailing window. Waiters sleep
/// until the oldest admission ages out instead of polling. Admission order
/// between concurrent waiters is not FIFO; only the aggregate bound holds.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    sent: Mutex<VecDeque<Instant>>,
    time_source: TimeSource,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy: RateLimitPolicy {
                capacity: policy.capacity.max(1),
                window: policy.window,
            },
            sent: Mutex::new(VecDeque::with_capacity(policy.capacity)),
            time_source: TimeSource::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Wait for send capacity; returns how long the caller waited.
    ///
    /// The check-and-record step is atomic under the window lock. Only the
    /// wait itself can be cancelled.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Duration> {
        let started = self.time_source.now();
        loop {
            let next_free = {
                let mut sent = self.sent.lock().await;
                let now = self.time_source.now();
                while let Some(&oldest) = sent.front() {
                    if now.duration_since(oldest) >= self.policy.window {
                        sent.pop_front();
                    } else {
                        break;
                    }
                }

                if sent.len() < self.policy.capacity {
                    sent.push_back(now);
                    let waited = now.duration_since(started);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_send_wait(waited.as_secs_f64());
                    }
                    return Ok(waited);
                }

                sent.front().copied().unwrap_or(now) + self.policy.window
            };

            debug!(
                "Send window full, waiting {:?}",
                next_free.saturating_duration_since(self.time_source.now())
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(FixEmbedError::Cancelled),
                _ = sleep_until(next_free) => {}
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Duration> {
        tokio::time::timeout(timeout, self.acquire(cancel))
            .await
            .map_err(|_| FixEmbedError::SendTimeout)?
    }

    /// Wait for capacity, then run the send outside the window lock and
    /// hand back its result
    pub async fn send<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(cancel).await?;
        op().await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
