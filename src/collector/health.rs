use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rand::random_range;
use serde::Deserialize;

/// Reconnect policy of a collector.
///
/// Two independent triggers:
/// - Idle: no item received for longer than the idle window. The window
///   doubles per consecutive idle reconnect (capped) so a quiet source
///   does not cause a reconnect storm.
/// - Dead: the session task exited. Retries wait `retry_delay`, doubled
///   per consecutive failure (capped), plus a little jitter.
///
/// Any received item resets both back-offs.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthPolicy {
    #[serde(default = "default_idle_timeout", with = "secs")]
    pub idle_timeout: Duration,

    #[serde(default = "default_max_idle_timeout", with = "secs")]
    pub max_idle_timeout: Duration,

    #[serde(default = "default_retry_delay", with = "secs")]
    pub retry_delay: Duration,

    #[serde(default = "default_max_retry_delay", with = "secs")]
    pub max_retry_delay: Duration,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_idle_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            max_idle_timeout: default_max_idle_timeout(),
            retry_delay: default_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
        }
    }
}

/// Config durations are whole seconds (`idle_timeout: 300`).
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn scaled(base: Duration, failures: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

impl HealthPolicy {
    /// Allowed silence before an idle reconnect.
    pub fn idle_window(&self, failures: u32) -> Duration {
        scaled(self.idle_timeout, failures, self.max_idle_timeout)
    }

    /// Wait before restarting a dead session, without jitter.
    pub fn retry_window(&self, failures: u32) -> Duration {
        scaled(self.retry_delay, failures, self.max_retry_delay)
    }

    /// Retry window plus up to 10% random jitter.
    pub fn retry_window_jittered(&self, failures: u32) -> Duration {
        let base = self.retry_window(failures);
        let jitter_ms = (base.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(random_range(0..jitter_ms))
    }
}

/// Liveness signals shared between a collector and its session task.
///
/// Everything here is cheap to read from the health-check loop.
#[derive(Debug)]
pub struct Liveness {
    last_item: Mutex<Instant>,
    last_attempt: Mutex<Instant>,
    failures: AtomicU32,
    /// Jittered wait for the next retry, keyed by the failure count it
    /// was sampled for. Cleared on every attempt.
    retry_wait: Mutex<Option<(u32, Duration)>>,
}

impl Default for Liveness {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            last_item: Mutex::new(now),
            last_attempt: Mutex::new(now),
            failures: AtomicU32::new(0),
            retry_wait: Mutex::new(None),
        }
    }
}

impl Liveness {
    pub fn record_item(&self) {
        if let Ok(mut t) = self.last_item.lock() {
            *t = Instant::now();
        }
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        if let Ok(mut t) = self.last_attempt.lock() {
            *t = Instant::now();
        }
        if let Ok(mut wait) = self.retry_wait.lock() {
            *wait = None;
        }
    }

    /// Wait before retrying a dead session. The jitter is drawn once per
    /// attempt, so repeated health checks see one fixed deadline.
    pub fn retry_wait(&self, policy: &HealthPolicy, failures: u32) -> Duration {
        let Ok(mut slot) = self.retry_wait.lock() else {
            return policy.retry_window(failures);
        };
        match *slot {
            Some((sampled_for, wait)) if sampled_for == failures => wait,
            _ => {
                let wait = policy.retry_window_jittered(failures);
                *slot = Some((failures, wait));
                wait
            }
        }
    }

    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Time since the last item, or since the last (re)connection
    /// attempt when that is more recent. A fresh session always gets a
    /// full idle window.
    pub fn idle_for(&self) -> Duration {
        let item = self.last_item.lock().map(|t| t.elapsed()).unwrap_or_default();
        item.min(self.since_attempt())
    }

    pub fn since_attempt(&self) -> Duration {
        self.last_attempt
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}
