//! Rate Limiter (§4.C): per-subject token bucket over a sliding window.
//!
//! Grounded on `cortex-ratelimits::tracker::RateLimitTracker`'s
//! provider-keyed map-of-state shape, swapped from `tokio::sync::RwLock` to
//! a `dashmap::DashMap` for lock-free per-subject access (the concurrency
//! model this gateway uses throughout for per-user state).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateBucket {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_ms: Option<i64>,
}

pub struct RateLimiter {
    buckets: DashMap<String, RateBucket>,
    window_ms: i64,
    max_requests: u32,
    per_channel: bool,
}

impl RateLimiter {
    pub fn new(window_ms: u64, max_requests: u32, per_channel: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            window_ms: window_ms as i64,
            max_requests,
            per_channel,
        }
    }

    fn subject_key(&self, user_id: &str, channel_id: Option<&str>) -> String {
        if self.per_channel {
            if let Some(channel_id) = channel_id {
                return format!("{user_id}:{channel_id}");
            }
        }
        user_id.to_string()
    }

    pub fn check(&self, user_id: &str, channel_id: Option<&str>) -> CheckResult {
        self.check_at(user_id, channel_id, Utc::now())
    }

    /// Same as `check`, but with an injectable clock for deterministic tests.
    pub fn check_at(&self, user_id: &str, channel_id: Option<&str>, now: DateTime<Utc>) -> CheckResult {
        let key = self.subject_key(user_id, channel_id);
        let mut entry = self.buckets.entry(key).or_insert_with(|| RateBucket {
            count: 0,
            reset_at: now + ChronoDuration::milliseconds(self.window_ms),
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + ChronoDuration::milliseconds(self.window_ms);
        }

        if entry.count >= self.max_requests {
            let retry_after_ms = (entry.reset_at - now).num_milliseconds().max(0);
            return CheckResult {
                allowed: false,
                remaining: 0,
                reset_at: entry.reset_at,
                retry_after_ms: Some(retry_after_ms),
            };
        }

        entry.count += 1;
        CheckResult {
            allowed: true,
            remaining: self.max_requests - entry.count,
            reset_at: entry.reset_at,
            retry_after_ms: None,
        }
    }

    /// Discard every bucket whose key starts with `user_id` (covers both
    /// the bare key and any `user_id:channel_id` variants).
    pub fn reset(&self, user_id: &str) {
        self.buckets.retain(|key, _| !key.starts_with(user_id));
    }

    /// Read-only snapshot of the current bucket, for dashboard status
    /// queries. Unlike `check`, never creates or mutates a bucket.
    pub fn peek(&self, user_id: &str, channel_id: Option<&str>) -> Option<RateBucket> {
        let key = self.subject_key(user_id, channel_id);
        self.buckets.get(&key).map(|b| *b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(1_000, 2, false);
        let t0 = Utc::now();

        let r1 = limiter.check_at("u1", None, t0);
        assert!(r1.allowed);
        assert_eq!(r1.remaining, 1);

        let r2 = limiter.check_at("u1", None, t0 + ChronoDuration::milliseconds(100));
        assert!(r2.allowed);
        assert_eq!(r2.remaining, 0);

        let r3 = limiter.check_at("u1", None, t0 + ChronoDuration::milliseconds(200));
        assert!(!r3.allowed);
        assert_eq!(r3.remaining, 0);
        assert!(r3.retry_after_ms.unwrap() <= 800 && r3.retry_after_ms.unwrap() > 700);
    }

    #[test]
    fn resets_to_fresh_bucket_after_window() {
        let limiter = RateLimiter::new(1_000, 2, false);
        let t0 = Utc::now();
        limiter.check_at("u1", None, t0);
        limiter.check_at("u1", None, t0);
        let blocked = limiter.check_at("u1", None, t0);
        assert!(!blocked.allowed);

        let after_window = limiter.check_at("u1", None, t0 + ChronoDuration::milliseconds(1_001));
        assert!(after_window.allowed);
        assert_eq!(after_window.remaining, 1);
    }

    #[test]
    fn per_channel_mode_separates_buckets() {
        let limiter = RateLimiter::new(1_000, 1, true);
        let t0 = Utc::now();
        let a = limiter.check_at("u1", Some("c1"), t0);
        let b = limiter.check_at("u1", Some("c2"), t0);
        assert!(a.allowed);
        assert!(b.allowed);
    }

    #[test]
    fn reset_discards_all_keys_for_user() {
        let limiter = RateLimiter::new(1_000, 1, true);
        let t0 = Utc::now();
        limiter.check_at("u1", Some("c1"), t0);
        limiter.check_at("u1", Some("c2"), t0);
        limiter.reset("u1");
        let after = limiter.check_at("u1", Some("c1"), t0);
        assert!(after.allowed);
        assert_eq!(after.remaining, 0);
    }
}
