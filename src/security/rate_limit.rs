//! Per-route fixed-window rate limiting.
//!
//! Handlers consult the limiter themselves because thresholds differ by
//! endpoint; the request pipeline only copies the resulting headers onto the
//! response.
//!
//! # Algorithm
//! ```text
//! key = identity:route
//! no entry, or now >= resetAt → count = 1, resetAt = now + window, allow
//! else count += 1; count > max → deny (remaining 0)
//! ```
//! Expired entries are swept lazily, at most once per sweep interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::RateLimitPolicy;
use crate::observability::metrics;
use crate::security::store::{MemoryStore, RateLimitStore};
use crate::security::unix_millis;

/// Bucket shared by all traffic that carries no usable client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Message used when a policy carries none.
pub const DEFAULT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Outcome of one limiter consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up, never below one.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }

    /// Window end as an ISO-8601 UTC timestamp with millisecond precision.
    pub fn reset_at_iso(&self) -> String {
        iso_millis(self.reset_at_ms)
    }
}

pub fn iso_millis(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fixed-window limiter over a pluggable counter store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    sweep_interval_ms: u64,
    last_sweep_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, sweep_interval_ms: u64) -> Self {
        Self {
            store,
            sweep_interval_ms,
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Limiter backed by the process-local [`MemoryStore`].
    pub fn in_memory(sweep_interval_ms: u64) -> Self {
        Self::new(Arc::new(MemoryStore::new()), sweep_interval_ms)
    }

    pub fn store(&self) -> &dyn RateLimitStore {
        self.store.as_ref()
    }

    pub fn check(&self, identity: &str, route: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(identity, route, policy, unix_millis())
    }

    pub fn check_at(
        &self,
        identity: &str,
        route: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> RateLimitDecision {
        self.maybe_sweep(now_ms);

        let key = format!("{identity}:{route}");
        let entry = self.store.increment(&key, now_ms, policy.window_ms);

        if entry.count > policy.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms: entry.reset_at_ms,
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining: policy.max_requests - entry.count,
            reset_at_ms: entry.reset_at_ms,
        }
    }

    /// Sweep at most once per interval; only the caller that wins the swap sweeps.
    fn maybe_sweep(&self, now_ms: u64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.sweep_interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let removed = self.store.sweep_expired(now_ms);
        if removed > 0 {
            tracing::debug!(removed, remaining = self.store.len(), "Rate limiter sweep");
        }
        metrics::record_rate_limit_entries(self.store.len());
    }
}

/// Client identity: explicit id first, then proxy headers, then [`UNKNOWN_CLIENT`].
pub fn resolve_identity(explicit: Option<&str>, headers: &HeaderMap) -> String {
    match explicit.filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => client_ip(headers),
    }
}

/// First hop of `x-forwarded-for`, then `cf-connecting-ip`, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header("cf-connecting-ip"))
        .or_else(|| header("x-real-ip"))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
