//! Sliding-window token-budget rate limiting, per provider.
//!
//! Admission is checked against estimated tokens before a call; actual
//! usage is recorded after the call returns, so bursty large prompts are
//! throttled proportionally rather than by request count alone.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Fixed per-request overhead added to the length-based token estimate.
const TOKEN_ESTIMATE_BUFFER: u64 = 256;

/// Rough token estimate for a prompt: one token per four bytes, plus a
/// buffer for the response and message framing.
pub fn estimate_tokens(prompt: &str) -> u64 {
    (prompt.len() as u64) / 4 + TOKEN_ESTIMATE_BUFFER
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Token budget per window.
    pub budget: u64,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            budget: 90_000,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Usage {
    at: Instant,
    tokens: u64,
}

/// Sliding-window token accounting for one provider. Shared process-wide.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    usages: Mutex<VecDeque<Usage>>,
}

impl RateLimiter {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, RateLimiterConfig::default())
    }

    pub fn with_config(name: &str, config: RateLimiterConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            usages: Mutex::new(VecDeque::new()),
        }
    }

    fn used_in_window(&self, usages: &mut VecDeque<Usage>, now: Instant) -> u64 {
        while let Some(front) = usages.front() {
            if now.duration_since(front.at) >= self.config.window {
                usages.pop_front();
            } else {
                break;
            }
        }
        usages.iter().map(|u| u.tokens).sum()
    }

    /// Admission check: would `estimated` tokens fit in the current window?
    pub fn check(&self, estimated: u64) -> bool {
        self.check_at(estimated, Instant::now())
    }

    pub fn check_at(&self, estimated: u64, now: Instant) -> bool {
        let mut usages = self.usages.lock().expect("rate limiter poisoned");
        let used = self.used_in_window(&mut usages, now);
        let admitted = used + estimated <= self.config.budget;
        if !admitted {
            debug!(
                limiter = %self.name,
                used,
                estimated,
                budget = self.config.budget,
                "rate limit admission denied"
            );
        }
        admitted
    }

    /// Record post-call usage with the actual token count.
    pub fn record(&self, tokens: u64) {
        self.record_at(tokens, Instant::now());
    }

    pub fn record_at(&self, tokens: u64, now: Instant) {
        if tokens == 0 {
            return;
        }
        let mut usages = self.usages.lock().expect("rate limiter poisoned");
        usages.push_back(Usage { at: now, tokens });
    }

    /// Tokens currently counted against the window.
    pub fn used(&self) -> u64 {
        self.used_at(Instant::now())
    }

    pub fn used_at(&self, now: Instant) -> u64 {
        let mut usages = self.usages.lock().expect("rate limiter poisoned");
        self.used_in_window(&mut usages, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(budget: u64, window: Duration) -> RateLimiter {
        RateLimiter::with_config("test", RateLimiterConfig { budget, window })
    }

    #[test]
    fn test_estimate_includes_buffer() {
        assert_eq!(estimate_tokens(""), 256);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 356);
    }

    #[test]
    fn test_admits_within_budget() {
        let l = limiter(1_000, Duration::from_secs(60));
        assert!(l.check(900));
        l.record(900);
        assert!(!l.check(200));
        assert!(l.check(100));
    }

    #[test]
    fn test_denied_request_admitted_after_rollover() {
        let l = limiter(1_000, Duration::from_secs(60));
        let start = Instant::now();
        l.record_at(950, start);
        assert!(!l.check_at(100, start + Duration::from_secs(1)));

        let after_window = start + Duration::from_secs(61);
        assert!(l.check_at(100, after_window));
        assert_eq!(l.used_at(after_window), 0);
    }

    #[test]
    fn test_partial_rollover() {
        let l = limiter(1_000, Duration::from_secs(60));
        let start = Instant::now();
        l.record_at(600, start);
        l.record_at(300, start + Duration::from_secs(30));

        let mid = start + Duration::from_secs(61);
        // First usage aged out, second still counted.
        assert_eq!(l.used_at(mid), 300);
        assert!(l.check_at(700, mid));
        assert!(!l.check_at(701, mid));
    }

    #[test]
    fn test_zero_usage_not_recorded() {
        let l = limiter(1_000, Duration::from_secs(60));
        l.record(0);
        assert_eq!(l.used(), 0);
    }
}
