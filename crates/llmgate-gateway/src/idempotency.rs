//! Idempotency cache.
//!
//! Terminal responses are cached keyed by `(principal subject,
//! idempotency key)` and replayed unmodified within the TTL. Entries are
//! pruned opportunistically on insert and cleared on shutdown.

use dashmap::DashMap;
use llmgate_core::GatewayResponse;
use std::time::{Duration, Instant};

struct CachedEntry {
    response: GatewayResponse,
    expires_at: Instant,
}

/// TTL'd concurrent cache of terminal responses.
pub struct IdempotencyCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn cache_key(subject: &str, idempotency_key: &str) -> String {
        format!("{subject}\u{1f}{idempotency_key}")
    }

    /// Look up a live cached response.
    pub fn get(&self, subject: &str, idempotency_key: &str) -> Option<GatewayResponse> {
        let key = Self::cache_key(subject, idempotency_key);
        let entry = self.entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.response.clone())
    }

    /// Cache a terminal response.
    pub fn insert(&self, subject: &str, idempotency_key: &str, response: GatewayResponse) {
        // Opportunistic pruning keeps the map from accumulating dead
        // entries between lookups.
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);

        self.entries.insert(
            Self::cache_key(subject, idempotency_key),
            CachedEntry {
                response,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything (shutdown).
    pub fn clear(&self) {
        self.entries.clear();
    }
}
