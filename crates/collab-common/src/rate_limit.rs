//! Fixed-size rolling-window admission counters.
//!
//! A window remembers the instants of accepted attempts and rejects new ones
//! once `limit` of them fall inside the last `window`. Rejected attempts are
//! not recorded, so a client hammering a closed window does not extend it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Length of every admission window used by the server.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl RateWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            hits: VecDeque::with_capacity(limit),
            limit,
            window,
        }
    }

    /// A window of `limit` attempts per minute.
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Record an attempt at `now`; returns `false` if the window is full.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Attempts currently counted against the window.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// One [`RateWindow`] per key (e.g. per source address).
///
/// Keys whose windows drain completely are dropped so the map does not grow
/// with every address ever seen.
#[derive(Debug)]
pub struct KeyedRateWindows<K> {
    windows: HashMap<K, RateWindow>,
    limit: usize,
    window: Duration,
}

impl<K: Hash + Eq + Clone> KeyedRateWindows<K> {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            limit,
            window,
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    pub fn try_acquire(&mut self, key: &K) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    pub fn try_acquire_at(&mut self, key: &K, now: Instant) -> bool {
        let (limit, window) = (self.limit, self.window);
        let allowed = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::new(limit, window))
            .try_acquire_at(now);
        self.windows.retain(|_, w| {
            w.evict(now);
            !w.is_empty()
        });
        allowed
    }

    /// Number of keys with at least one live attempt.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
