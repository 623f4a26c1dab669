//! Counter storage behind the rate limiter.
//!
//! The limiter only talks to [`RateLimitStore`]; the in-process
//! [`MemoryStore`] is the shipped implementation. Counters are local to one
//! process: N instances admit up to N × `max_requests` per window. A shared
//! backend implements the same trait.

use dashmap::DashMap;

/// One fixed window for one `identity:route` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    /// Window end, milliseconds since the epoch.
    pub reset_at_ms: u64,
}

impl RateLimitEntry {
    pub fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Logically gone once `now` reaches the window end.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    fn set(&self, key: &str, entry: RateLimitEntry);

    /// Open a fresh window if none is live, otherwise bump the count.
    /// Must be atomic per key: two callers never observe the same count.
    fn increment(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry;

    /// Drop every expired entry. Returns how many were removed.
    fn sweep_expired(&self, now_ms: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded concurrent map; the entry guard holds the shard lock across the
/// read-check-increment.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|r| *r.value())
    }

    fn set(&self, key: &str, entry: RateLimitEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    fn increment(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry {
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_at_ms: now_ms,
            });

        let entry = slot.value_mut();
        if entry.count == 0 || entry.is_expired(now_ms) {
            *entry = RateLimitEntry::fresh(now_ms, window_ms);
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        *entry
    }

    fn sweep_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
