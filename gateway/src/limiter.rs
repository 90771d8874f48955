use crate::config::RateLimitRule;
use crate::metrics_defs::RATE_LIMITED;
use shared::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Token bucket state for one route.
///
/// Tokens are tracked as a float so fractional refill accumulates
/// across calls instead of being truncated away, which would starve
/// callers whenever the refill rate is below one token per call
/// interval.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rule: &RateLimitRule) -> Self {
        TokenBucket {
            tokens: rule.capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self, rule: &RateLimitRule) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens =
            (self.tokens + elapsed_ms * rule.refill_rate_per_ms()).min(rule.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-route rate limiter registry.
///
/// Buckets are created lazily on first use of their key and live for
/// the process lifetime, so token counts persist across requests. The
/// map lock is only held to look up or insert an entry; refill and
/// consumption take the per-bucket lock, keeping unrelated routes
/// independent.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Refills the bucket for `key` and consumes one token if available.
    ///
    /// Returns false when the bucket is empty; the caller is expected
    /// to reject the request immediately, without queueing.
    pub fn try_acquire(&self, key: &str, rule: &RateLimitRule) -> bool {
        let bucket = {
            let mut buckets = self.buckets.lock().expect("bucket map poisoned");
            buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(rule))))
                .clone()
        };

        let allowed = bucket.lock().expect("bucket poisoned").try_acquire(rule);
        if !allowed {
            counter!(RATE_LIMITED).increment(1);
            tracing::debug!(key, "rate limit exceeded");
        }
        allowed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
