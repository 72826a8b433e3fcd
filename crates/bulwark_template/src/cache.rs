//! TTL cache of rendered responses keyed by `(template_id, error_id)`.

use bulwark_core::{ErrorResponse, Millis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

type CacheKey = (String, String);

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ErrorResponse,
    expires_at: Millis,
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that rendered afresh
    pub misses: u64,
    /// Entries dropped on expiry
    pub expired: u64,
}

/// Response cache; time is supplied by the caller
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    expired: u64,
}

impl ResponseCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live response for a key, dropping it if it has expired
    pub fn get(&mut self, template_id: &str, error_id: &str, now: Millis) -> Option<ErrorResponse> {
        let key = (template_id.to_string(), error_id.to_string());
        match self.entries.get(&key) {
            Some(entry) if now < entry.expires_at => {
                self.hits += 1;
                Some(entry.response.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                self.expired += 1;
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a response until `now + ttl_ms`
    pub fn insert(&mut self, template_id: &str, error_id: &str, response: ErrorResponse, now: Millis, ttl_ms: u64) {
        self.entries.insert(
            (template_id.to_string(), error_id.to_string()),
            CacheEntry {
                response,
                expires_at: now.saturating_add(ttl_ms),
            },
        );
    }

    /// Drop expired entries; returns how many were dropped
    pub fn sweep(&mut self, now: Millis) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let dropped = before - self.entries.len();
        self.expired += dropped as u64;
        dropped
    }

    /// Drop every entry rendered from one template
    pub fn invalidate_template(&mut self, template_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(id, _), _| id != template_id);
        before - self.entries.len()
    }

    /// Drop everything; counters are kept
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Number of live entries (expired ones not yet swept included)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            expired: self.expired,
        }
    }
}
