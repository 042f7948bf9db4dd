//! Per-identity admission control
//!
//! Rolling window: an identity may be admitted `burst_capacity` times within
//! any `window`. The next attempt is rejected with the time remaining until
//! the oldest admission leaves the window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_BURST_CAPACITY: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Prune idle identities once the map grows past this many entries
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub burst_capacity: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_capacity: DEFAULT_BURST_CAPACITY,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Zero when allowed
    pub retry_after: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Snapshot of one identity's window, stored on the conversation for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub identity: String,
    pub window_start: Option<DateTime<Utc>>,
    pub count: u32,
    pub burst_capacity: u32,
}

/// Admission timestamps inside the current window, oldest first
#[derive(Debug, Default)]
struct Window {
    admissions: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn expire(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        while let Some(oldest) = self.admissions.front() {
            if now - *oldest >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared rate limiter keyed by identity
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn window_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX)
    }

    /// Check and, if allowed, record an admission for `identity` at `now`
    pub async fn admit(&self, identity: &str, now: DateTime<Utc>) -> Admission {
        let span = self.window_span();
        let capacity = self.config.burst_capacity as usize;
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| {
                w.expire(now, span);
                !w.admissions.is_empty()
            });
        }

        let window = windows.entry(identity.to_string()).or_default();
        window.expire(now, span);

        if window.admissions.len() < capacity {
            window.admissions.push_back(now);
            return Admission::allowed();
        }

        let retry_after = window
            .admissions
            .front()
            .map(|oldest| (*oldest + span - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.config.window);
        // A denial always asks the caller to wait a little
        let retry_after = retry_after.max(Duration::from_millis(1));

        tracing::warn!(
            identity,
            capacity,
            retry_after_ms = retry_after.as_millis(),
            "Admission denied"
        );
        Admission::denied(retry_after)
    }

    /// Current counter for `identity`, without recording anything
    pub async fn snapshot(&self, identity: &str, now: DateTime<Utc>) -> RateLimitCounter {
        let span = self.window_span();
        let mut windows = self.windows.lock().await;
        let (window_start, count) = match windows.get_mut(identity) {
            Some(window) => {
                window.expire(now, span);
                (
                    window.admissions.front().copied(),
                    u32::try_from(window.admissions.len()).unwrap_or(u32::MAX),
                )
            }
            None => (None, 0),
        };
        RateLimitCounter {
            identity: identity.to_string(),
            window_start,
            count,
            burst_capacity: self.config.burst_capacity,
        }
    }

    #[cfg(test)]
    /// Number of identities currently tracked
    pub async fn tracked_identities(&self) -> usize {
        self.windows.lock().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
