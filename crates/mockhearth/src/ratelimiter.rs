//! Per-key token-bucket rate limiter store (§4.5). The map is guarded by a
//! single mutex; each entry's token state advances under a monotonic clock so
//! concurrent `Allow` calls for different keys never contend on one another's
//! arithmetic, only on the lock that protects the map itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    rate: f64,
    burst: u32,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn new(rate: f64, burst: u32, now: Instant) -> Self {
        Bucket {
            tokens: burst as f64,
            rate,
            burst,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst as f64);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant, rate: f64, burst: u32) -> bool {
        if (rate - self.rate).abs() > f64::EPSILON || burst != self.burst {
            // Rate/burst changed since the last call (hot-reload); keep the
            // current token level but adopt the new parameters.
            self.rate = rate;
            self.burst = burst;
            self.tokens = self.tokens.min(burst as f64);
        }
        self.refill(now);
        self.last_used = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Process-wide token-bucket store. Scoped to the container's lifetime: the
/// sweeper must be stopped before the store itself is dropped (§9 Global state).
pub struct RateLimiterStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    ttl: Duration,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiterStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(RateLimiterStore {
            buckets: Mutex::new(HashMap::new()),
            ttl,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Fetches or creates the bucket for `key`, folds in `(rate, burst)` if
    /// they changed, and reports whether a token was available at `now`.
    pub fn allow(&self, key: &str, rate: f64, burst: u32) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(rate, burst, now));
        bucket.try_take(now, rate, burst)
    }

    /// Removes entries whose `last_used` predates `now - ttl`.
    pub fn evict(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_used) < ttl);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, "rate limiter sweeper evicted stale entries");
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the background sweeper running `evict` every `ttl`. Required:
    /// callers must start this once after every other fallible dependency has
    /// been constructed, to avoid leaking the task on a failed startup.
    pub fn start_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let cancel = self.cancel.clone();
        let ttl = self.ttl;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ttl) => store.evict(),
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Signals the sweeper to stop and releases the store. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn allows_up_to_burst_then_denies() {
        let store = RateLimiterStore::new(Duration::from_secs(60));
        assert!(store.allow("k", 1.0, 2));
        assert!(store.allow("k", 1.0, 2));
        assert!(!store.allow("k", 1.0, 2));
    }

    #[test]
    fn recovers_a_token_after_the_refill_interval() {
        let store = RateLimiterStore::new(Duration::from_secs(60));
        assert!(store.allow("k", 10.0, 1));
        assert!(!store.allow("k", 10.0, 1));
        sleep(Duration::from_millis(150));
        assert!(store.allow("k", 10.0, 1));
    }

    #[test]
    fn evict_removes_stale_entries_past_ttl() {
        let store = RateLimiterStore::new(Duration::from_millis(10));
        store.allow("k", 1.0, 1);
        sleep(Duration::from_millis(30));
        store.evict();
        assert!(store.is_empty());
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let store = RateLimiterStore::new(Duration::from_secs(60));
        assert!(store.allow("a", 1.0, 1));
        assert!(store.allow("b", 1.0, 1));
        assert!(!store.allow("a", 1.0, 1));
    }
}
