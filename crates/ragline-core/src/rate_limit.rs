//! Per-domain request budgets for crawlers and other text producers.
//!
//! A [`DomainRateLimiter`] is owned by whoever drives the crawl; there is
//! no process-wide counter map. Each domain gets a fixed window of
//! `window` length allowing `max_requests` acquisitions; the window
//! restarts on the first acquisition after it expires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

pub struct DomainRateLimiter {
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl DomainRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Take one request slot for `domain`. Returns `false` when the budget
    /// for the current window is spent.
    pub fn try_acquire(&self, domain: &str) -> bool {
        let now = self.clock.now();
        let key = normalize_domain(domain);
        let mut windows = self.windows.lock().unwrap();
        let w = windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now - w.started >= self.window {
            w.started = now;
            w.count = 0;
        }
        if w.count >= self.max_requests {
            debug!(domain = %domain, "domain rate limit reached");
            return false;
        }
        w.count += 1;
        true
    }

    /// Slots left for `domain` in the current window.
    pub fn remaining(&self, domain: &str) -> u32 {
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap();
        match windows.get(&normalize_domain(domain)) {
            Some(w) if now - w.started < self.window => self.max_requests.saturating_sub(w.count),
            _ => self.max_requests,
        }
    }

    /// How long until `domain` gets a fresh window, or `None` when a slot is
    /// free right now.
    pub fn retry_after(&self, domain: &str) -> Option<Duration> {
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap();
        let w = windows.get(&normalize_domain(domain))?;
        let elapsed = now - w.started;
        if elapsed >= self.window || w.count < self.max_requests {
            return None;
        }
        Some(self.window - elapsed)
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}
