//! Bounded retry with exponential backoff and jitter.
//!
//! Both the jitter function and the sleeper are injectable so tests can run
//! the full retry path without real delays.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use crate::config::PipelineConfig;

/// Blocks the current thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested delays instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).push(duration);
    }
}

pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Uniform in `[d/2, d]`.
pub fn random_jitter(delay: Duration) -> Duration {
    let max = delay.as_millis() as u64;
    if max < 2 {
        return delay;
    }
    Duration::from_millis(rand::thread_rng().gen_range(max / 2..=max))
}

pub fn no_jitter(delay: Duration) -> Duration {
    delay
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: JitterFn,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Arc::new(random_jitter),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_attempts, config.base_backoff, config.max_backoff)
    }

    pub fn with_jitter(mut self, jitter: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        (self.jitter)(delay)
    }

    /// Sleep before the attempt following `attempt`.
    pub fn backoff(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
        self.sleeper.sleep(delay);
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}
