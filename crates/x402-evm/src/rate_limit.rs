//! Fixed-window rate limiting keyed by client identifier.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Count one request for `client`. Returns `false` once the window's
    /// budget is exhausted.
    pub fn check(&self, client: &str) -> bool {
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: Instant::now(),
            count: 0,
        });
        if entry.started.elapsed() >= self.window {
            entry.started = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.limit
    }

    /// Drop windows that lapsed; called opportunistically by the purge loop.
    pub fn purge_expired(&self) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.started.elapsed() < self.window);
        before - self.windows.len()
    }
}
