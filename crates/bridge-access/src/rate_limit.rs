use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Sliding-window rate limiter keyed by user id.
///
/// Tracks up to `max_requests` hits per `window` for each key, entirely
/// in memory. No external store, no background cleanup: stale entries are
/// pruned on access.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: Duration::from_secs(window_secs.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records the hit when `key` is under its limit.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = lock_unpoisoned(&self.buckets);
        let bucket = buckets.entry(key.to_string()).or_default();
        prune(bucket, now, self.window);

        if bucket.len() < self.max_requests {
            bucket.push_back(now);
            true
        } else {
            false
        }
    }

    /// Seconds until the oldest in-window hit ages out and `key` may send
    /// again; zero when the key is currently allowed.
    pub fn retry_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut buckets = lock_unpoisoned(&self.buckets);
        let Some(bucket) = buckets.get_mut(key) else {
            return Duration::ZERO;
        };
        prune(bucket, now, self.window);

        if bucket.len() < self.max_requests {
            return Duration::ZERO;
        }
        match bucket.front() {
            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }
}

fn prune(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = bucket.front() {
        if now.duration_since(*oldest) > window {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
