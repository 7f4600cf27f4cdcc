use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate-limiter store lifecycle knobs (§4.5): TTL drives both eviction and the
/// sweeper interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig { ttl_secs: 300 }
    }
}

impl RateLimitConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
