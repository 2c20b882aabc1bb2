// Copyright (c) 2026 Isprava Engineering
//! Sliding-window rate limiting (`spec.md` SS5 "Rate limiting").
//!
//! Two keyed limiters — overall and chat-specific — both keyed by user
//! email, or client IP when unauthenticated. Grounded on the teacher's
//! `governor` dependency (present in its root `Cargo.toml` though unused
//! by any surviving module; this is the first real consumer).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use parking_lot::Mutex;

const OVERALL_PER_MINUTE: u32 = 60;
const CHAT_PER_MINUTE: u32 = 20;
const WINDOW: Duration = Duration::from_secs(60);

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { remaining: u32 },
    Limited,
}

/// Per-key request count within the current minute window, tracked
/// alongside `governor`'s own enforcement state so the `RateLimit-Remaining`
/// header can report an honest count rather than the flat quota.
struct Window {
    started_at: Instant,
    count: u32,
}

struct Counters {
    limit: u32,
    windows: DashMap<String, Mutex<Window>>,
}

impl Counters {
    fn new(limit: u32) -> Self {
        Self { limit, windows: DashMap::new() }
    }

    /// Record one request for `key` and return the quota remaining after
    /// it, resetting the window once `WINDOW` has elapsed since its start.
    fn record(&self, key: &str) -> u32 {
        let entry = self.windows.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Window { started_at: Instant::now(), count: 0 })
        });
        let mut window = entry.lock();
        if window.started_at.elapsed() >= WINDOW {
            window.started_at = Instant::now();
            window.count = 0;
        }
        window.count += 1;
        self.limit.saturating_sub(window.count)
    }
}

/// Rate-limit decisions for one key across both the overall and
/// chat-specific limiters (`spec.md` SS5: "60 requests/minute overall, 20
/// requests/minute for the two chat endpoints").
pub struct RateLimiter {
    overall: Arc<KeyedLimiter>,
    overall_counts: Counters,
    chat: Arc<KeyedLimiter>,
    chat_counts: Counters,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            overall: Arc::new(GovernorLimiter::keyed(quota(OVERALL_PER_MINUTE))),
            overall_counts: Counters::new(OVERALL_PER_MINUTE),
            chat: Arc::new(GovernorLimiter::keyed(quota(CHAT_PER_MINUTE))),
            chat_counts: Counters::new(CHAT_PER_MINUTE),
        }
    }

    pub fn check_overall(&self, key: &str) -> RateLimitOutcome {
        check(&self.overall, &self.overall_counts, key, "overall")
    }

    pub fn check_chat(&self, key: &str) -> RateLimitOutcome {
        check(&self.chat, &self.chat_counts, key, "chat")
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn quota(per_minute: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(per_minute).expect("per_minute is a nonzero constant"))
}

fn check(limiter: &KeyedLimiter, counts: &Counters, key: &str, label: &str) -> RateLimitOutcome {
    match limiter.check_key(&key.to_string()) {
        Ok(_) => RateLimitOutcome::Allowed { remaining: counts.record(key) },
        Err(_) => {
            crate::metrics::record_rate_limit_rejection(label);
            RateLimitOutcome::Limited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_limiter_trips_after_twenty_requests_per_minute() {
        let limiter = RateLimiter::new();
        for _ in 0..CHAT_PER_MINUTE {
            assert!(matches!(limiter.check_chat("user@example.com"), RateLimitOutcome::Allowed { .. }));
        }
        assert_eq!(limiter.check_chat("user@example.com"), RateLimitOutcome::Limited);
    }

    #[test]
    fn limiters_are_keyed_independently_per_caller() {
        let limiter = RateLimiter::new();
        for _ in 0..CHAT_PER_MINUTE {
            limiter.check_chat("a@example.com");
        }
        assert_eq!(limiter.check_chat("a@example.com"), RateLimitOutcome::Limited);
        assert!(matches!(limiter.check_chat("b@example.com"), RateLimitOutcome::Allowed { .. }));
    }

    #[test]
    fn overall_and_chat_limiters_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..CHAT_PER_MINUTE {
            limiter.check_chat("user@example.com");
        }
        assert!(matches!(limiter.check_overall("user@example.com"), RateLimitOutcome::Allowed { .. }));
    }

    #[test]
    fn remaining_count_decrements_with_each_request() {
        let limiter = RateLimiter::new();
        let first = limiter.check_chat("user@example.com");
        let second = limiter.check_chat("user@example.com");
        assert_eq!(first, RateLimitOutcome::Allowed { remaining: CHAT_PER_MINUTE - 1 });
        assert_eq!(second, RateLimitOutcome::Allowed { remaining: CHAT_PER_MINUTE - 2 });
    }
}
