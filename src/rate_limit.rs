//! Sliding-window rate limiting.
//!
//! Windows are keyed by opaque identifier strings (`user_<name>`,
//! `ip_<addr>`, `failed_<addr>`) and hold epoch-millisecond hit
//! timestamps, pruned lazily against the window on every evaluation.
//! Per-identifier read-modify-write sequences are serialized by a
//! per-window mutex with bounded acquisition: if the lock cannot be taken
//! promptly the store fails open (allowed, remaining 0) instead of
//! blocking or rejecting. That availability-over-strictness tradeoff is
//! deliberate; do not tighten it silently.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::RateLimitSettings;

const LOCK_TIMEOUT: Duration = Duration::from_millis(50);

pub fn identity_key(username: &str) -> String {
    format!("user_{username}")
}

pub fn source_key(addr: IpAddr) -> String {
    format!("ip_{addr}")
}

pub fn failed_key(addr: IpAddr) -> String {
    format!("failed_{addr}")
}

/// Outcome of one window evaluation, also the source of the rate-limit
/// response headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the oldest retained hit leaves the window.
    pub reset_at: u64,
}

struct Window {
    hits: Vec<u64>,
    touched: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            hits: Vec::new(),
            touched: Instant::now(),
        }
    }

    fn prune(&mut self, now_ms: u64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        self.hits.retain(|&ts| ts >= cutoff);
    }

    fn is_idle(&self, now: Instant, retention: Duration) -> bool {
        now.duration_since(self.touched) >= retention
    }
}

pub struct RateLimiter {
    windows: DashMap<String, Arc<Mutex<Window>>>,
    lock_timeout: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_lock_timeout(LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            lock_timeout,
        }
    }

    /// Evaluate and count one request against the identifier's window.
    /// The hit is appended only when the request is allowed.
    pub fn check(&self, identifier: &str, max_count: u32, window_secs: u64) -> RateLimitDecision {
        self.mutate(identifier, max_count, window_secs, false)
    }

    /// Read-only evaluation: never appends a hit, never updates the
    /// touched stamp, and an absent identifier is not created.
    pub fn peek(&self, identifier: &str, max_count: u32, window_secs: u64) -> RateLimitDecision {
        let now_ms = epoch_ms();
        let window_ms = window_secs * 1000;

        let Some(entry) = self.windows.get(identifier) else {
            return RateLimitDecision {
                allowed: max_count > 0,
                limit: max_count,
                remaining: max_count,
                reset_at: now_ms / 1000 + window_secs,
            };
        };
        let window = entry.value().clone();
        drop(entry);

        let Some(guard) = window.try_lock_for(self.lock_timeout) else {
            return self.fail_open(identifier, max_count, window_secs);
        };
        let cutoff = now_ms.saturating_sub(window_ms);
        let count = guard.hits.iter().filter(|&&ts| ts >= cutoff).count() as u32;
        let oldest = guard.hits.iter().copied().filter(|&ts| ts >= cutoff).min();
        drop(guard);

        decision(count, count < max_count, max_count, oldest, now_ms, window_secs)
    }

    /// Append a hit unconditionally, even over the limit. Used for
    /// failed-auth tracking where every failure counts toward lockout
    /// regardless of the caller already being locked out.
    pub fn record(&self, identifier: &str, max_count: u32, window_secs: u64) -> RateLimitDecision {
        self.mutate(identifier, max_count, window_secs, true)
    }

    fn mutate(
        &self,
        identifier: &str,
        max_count: u32,
        window_secs: u64,
        force_record: bool,
    ) -> RateLimitDecision {
        let now_ms = epoch_ms();
        let window_ms = window_secs * 1000;

        let window = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Window::new())))
            .clone();

        let Some(mut guard) = window.try_lock_for(self.lock_timeout) else {
            return self.fail_open(identifier, max_count, window_secs);
        };

        guard.prune(now_ms, window_ms);
        let count = guard.hits.len() as u32;
        let allowed = count < max_count;
        if allowed || force_record {
            guard.hits.push(now_ms);
            guard.touched = Instant::now();
        }
        let counted = if allowed || force_record { count + 1 } else { count };
        let oldest = guard.hits.first().copied();
        drop(guard);

        decision(counted, allowed, max_count, oldest, now_ms, window_secs)
    }

    fn fail_open(&self, identifier: &str, max_count: u32, window_secs: u64) -> RateLimitDecision {
        warn!(
            identifier,
            "rate window lock contended past timeout, failing open"
        );
        RateLimitDecision {
            allowed: true,
            limit: max_count,
            remaining: 0,
            reset_at: epoch_ms() / 1000 + window_secs,
        }
    }

    /// Remove windows untouched for longer than the retention horizon.
    /// Returns how many were removed.
    pub fn reap(&self, retention: Duration) -> usize {
        if retention.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let stale: Vec<String> = self
            .windows
            .iter()
            .filter_map(|entry| {
                let window = entry.value().try_lock()?;
                if window.is_idle(now, retention) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();
        let mut removed = 0;
        for key in stale {
            if self.windows.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

fn decision(
    count: u32,
    allowed: bool,
    max_count: u32,
    oldest_hit_ms: Option<u64>,
    now_ms: u64,
    window_secs: u64,
) -> RateLimitDecision {
    let reset_at = match oldest_hit_ms {
        Some(oldest) => oldest / 1000 + window_secs,
        None => now_ms / 1000 + window_secs,
    };
    RateLimitDecision {
        allowed,
        limit: max_count,
        remaining: max_count.saturating_sub(count),
        reset_at,
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Stricter failed-authentication window, keyed separately from the
/// general counters. Consulted with `peek` before authentication so that
/// testing for lockout never counts as an attempt; recorded only when
/// authentication actually fails.
pub struct BruteForceGuard {
    limiter: Arc<RateLimiter>,
    max_failures: u32,
    window_secs: u64,
}

impl BruteForceGuard {
    pub fn new(limiter: Arc<RateLimiter>, settings: &RateLimitSettings) -> Self {
        Self {
            limiter,
            max_failures: settings.failed_max,
            window_secs: settings.failed_window_secs,
        }
    }

    pub fn locked_out(&self, source: IpAddr) -> bool {
        !self
            .limiter
            .peek(&failed_key(source), self.max_failures, self.window_secs)
            .allowed
    }

    pub fn record_failure(&self, source: IpAddr) {
        self.limiter
            .record(&failed_key(source), self.max_failures, self.window_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4))
    }

    #[test]
    fn n_calls_allowed_then_denied_with_remaining_zero() {
        let limiter = RateLimiter::new();
        for expected_remaining in (0..10).rev() {
            let decision = limiter.check("user_alice", 10, 60);
            assert!(decision.allowed);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.check("user_alice", 10, 60);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn peek_has_no_side_effect_on_subsequent_checks() {
        let limiter = RateLimiter::new();
        limiter.check("ip_10.0.0.1", 3, 60);

        for _ in 0..20 {
            let peeked = limiter.peek("ip_10.0.0.1", 3, 60);
            assert!(peeked.allowed);
            assert_eq!(peeked.remaining, 2);
        }

        // Two real checks still fit; peeking consumed nothing.
        assert!(limiter.check("ip_10.0.0.1", 3, 60).allowed);
        assert!(limiter.check("ip_10.0.0.1", 3, 60).allowed);
        assert!(!limiter.check("ip_10.0.0.1", 3, 60).allowed);
    }

    #[test]
    fn peek_of_unknown_identifier_creates_nothing() {
        let limiter = RateLimiter::new();
        let decision = limiter.peek("user_ghost", 5, 60);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert_eq!(limiter.window_count(), 0);
    }

    #[test]
    fn record_appends_even_over_the_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..4 {
            limiter.record("failed_10.0.0.9", 2, 300);
        }
        let window = limiter.windows.get("failed_10.0.0.9").expect("window exists");
        assert_eq!(window.value().lock().hits.len(), 4);

        let denied = limiter.peek("failed_10.0.0.9", 2, 300);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn expired_hits_are_pruned_on_evaluation() {
        let limiter = RateLimiter::new();
        let stale = epoch_ms() - 120_000;
        limiter.windows.insert(
            "user_bob".into(),
            Arc::new(Mutex::new(Window {
                hits: vec![stale, stale + 10, stale + 20],
                touched: Instant::now(),
            })),
        );

        let decision = limiter.check("user_bob", 3, 60);
        assert!(decision.allowed, "expired hits must not count");
        let window = limiter.windows.get("user_bob").expect("window exists");
        assert_eq!(window.value().lock().hits.len(), 1);
    }

    #[test]
    fn contended_lock_fails_open() {
        let limiter = RateLimiter::with_lock_timeout(Duration::from_millis(5));
        limiter.check("user_carol", 1, 60);

        let window = limiter.windows.get("user_carol").expect("window exists").clone();
        let _held = window.lock();

        // Budget is exhausted, but the lock cannot be acquired in time.
        let decision = limiter.check("user_carol", 1, 60);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn reap_removes_stale_windows_only() {
        let limiter = RateLimiter::new();
        limiter.check("user_active", 10, 60);
        limiter.windows.insert(
            "user_idle".into(),
            Arc::new(Mutex::new(Window {
                hits: vec![epoch_ms()],
                touched: Instant::now() - Duration::from_secs(7200),
            })),
        );

        let removed = limiter.reap(Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(limiter.windows.contains_key("user_active"));
        assert!(!limiter.windows.contains_key("user_idle"));
    }

    #[test]
    fn guard_locks_out_after_configured_failures() {
        let limiter = Arc::new(RateLimiter::new());
        let guard = BruteForceGuard::new(limiter, &RateLimitSettings::default());

        assert!(!guard.locked_out(source()));
        for _ in 0..5 {
            guard.record_failure(source());
        }
        assert!(guard.locked_out(source()));
    }

    #[test]
    fn lockout_probe_does_not_count_as_a_failure() {
        let limiter = Arc::new(RateLimiter::new());
        let guard = BruteForceGuard::new(limiter.clone(), &RateLimitSettings::default());

        for _ in 0..4 {
            guard.record_failure(source());
        }
        for _ in 0..50 {
            assert!(!guard.locked_out(source()));
        }
        guard.record_failure(source());
        assert!(guard.locked_out(source()));
    }

    #[test]
    fn general_keys_never_collide_across_scopes() {
        assert_ne!(identity_key("10.0.0.1"), source_key("10.0.0.1".parse().unwrap()));
        assert_ne!(
            source_key("10.0.0.1".parse().unwrap()),
            failed_key("10.0.0.1".parse().unwrap())
        );
    }
}
