use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::config::RetrySection;
use crate::control::{ControlSignal, ControlWatch};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    schedule: Vec<Duration>,
    jitter_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: Option<T>,
    pub attempts: usize,
    pub cancelled: bool,
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        let mut schedule = config
            .backoff_ms
            .into_iter()
            .map(Duration::from_millis)
            .collect::<Vec<_>>();
        if schedule.is_empty() {
            schedule.push(Duration::from_secs(1));
        }
        Self {
            max_attempts: config.max_attempts.max(1),
            schedule,
            jitter_ms: config.jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.schedule
            .get(attempt - 1)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or_default()
    }

    /// Calls `operation` with the attempt index until it yields `Some`, the
    /// attempts run out, or the control channel reports cancellation. Backoff
    /// sleeps end early on cancel.
    pub async fn run<F, Fut, T>(&self, control: &ControlWatch, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut watch = control.clone();
        let mut attempt = 0usize;
        while attempt < self.max_attempts {
            if attempt > 0 {
                let mut delay = self.delay_for_attempt(attempt);
                if self.jitter_ms > 0 {
                    delay += Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms));
                }
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                if !wait_or_cancel(&mut watch, delay).await {
                    return RetryOutcome {
                        result: None,
                        attempts: attempt,
                        cancelled: true,
                    };
                }
            }
            if watch.is_cancelled() {
                return RetryOutcome {
                    result: None,
                    attempts: attempt,
                    cancelled: true,
                };
            }
            let result = operation(attempt).await;
            attempt += 1;
            if result.is_some() {
                return RetryOutcome {
                    result,
                    attempts: attempt,
                    cancelled: false,
                };
            }
            if watch.is_cancelled() {
                return RetryOutcome {
                    result: None,
                    attempts: attempt,
                    cancelled: true,
                };
            }
        }
        RetryOutcome {
            result: None,
            attempts: attempt,
            cancelled: false,
        }
    }
}

/// Sleeps for `delay`; returns false if cancelled first.
pub(crate) async fn wait_or_cancel(watch: &mut ControlWatch, delay: Duration) -> bool {
    if watch.is_cancelled() {
        return false;
    }
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            signal = watch.changed() => {
                if signal == ControlSignal::Cancel {
                    return false;
                }
            }
        }
    }
}
