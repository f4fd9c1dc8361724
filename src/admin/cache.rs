use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::ledger::models::LoanStatus;

pub const STATS_TTL: Duration = Duration::from_secs(300);
pub const LISTING_TTL: Duration = Duration::from_secs(60);
pub const DETAIL_TTL: Duration = Duration::from_secs(30);

/// Cache key: one entry per distinct admin query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Stats,
    Listing(Option<LoanStatus>),
    Detail(Uuid),
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_valid(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Time-bounded cache for admin loan views.
///
/// Invalidation: any loan status change made through the admin API, and any new
/// application, clears every entry. Webhook-driven REPAID transitions show up once
/// the affected entries expire.
///
/// Readers take `generation()` before querying the ledger and hand it back to
/// `insert`; a `clear()` in between bumps the generation and the late value is dropped.
#[derive(Default)]
pub struct ListingCache {
    inner: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CachedEntry>,
    generation: u64,
}

impl ListingCache {
    pub fn get(&self, key: CacheKey) -> Option<Value> {
        let inner = self.inner.read();
        match inner.entries.get(&key) {
            Some(entry) if entry.is_valid() => {
                debug!(?key, "Admin cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(?key, "Admin cache stale");
                None
            }
            None => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Stores `value` unless the cache was cleared since `generation` was read
    pub fn insert(&self, key: CacheKey, value: Value, ttl: Duration, generation: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.generation != generation {
            debug!(?key, "Admin cache cleared mid-read; value discarded");
            return false;
        }
        inner.entries.retain(|_, entry| entry.is_valid());
        inner.entries.insert(
            key,
            CachedEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.generation = inner.generation.wrapping_add(1);
        debug!(generation = inner.generation, "Admin cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_until_expiry() {
        let cache = ListingCache::default();
        let generation = cache.generation();
        cache.insert(CacheKey::Stats, json!({"total": 3}), STATS_TTL, generation);
        assert_eq!(cache.get(CacheKey::Stats), Some(json!({"total": 3})));

        cache.insert(CacheKey::Listing(None), json!([]), Duration::ZERO, generation);
        assert_eq!(cache.get(CacheKey::Listing(None)), None);
    }

    #[test]
    fn test_keys_are_per_query() {
        let cache = ListingCache::default();
        let generation = cache.generation();
        cache.insert(
            CacheKey::Listing(Some(LoanStatus::Pending)),
            json!(["p"]),
            LISTING_TTL,
            generation,
        );
        assert!(cache.get(CacheKey::Listing(Some(LoanStatus::Approved))).is_none());
        assert!(cache.get(CacheKey::Listing(None)).is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = ListingCache::default();
        let generation = cache.generation();
        cache.insert(CacheKey::Stats, json!(1), STATS_TTL, generation);
        cache.insert(CacheKey::Detail(Uuid::new_v4()), json!(2), DETAIL_TTL, generation);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(cache.get(CacheKey::Stats).is_none());
    }

    #[test]
    fn test_insert_after_clear_is_discarded() {
        let cache = ListingCache::default();

        // a listing read starts, then an approval clears the cache before it lands
        let before_read = cache.generation();
        cache.clear();
        let stored = cache.insert(
            CacheKey::Listing(Some(LoanStatus::Pending)),
            json!(["stale"]),
            LISTING_TTL,
            before_read,
        );

        assert!(!stored);
        assert!(cache.get(CacheKey::Listing(Some(LoanStatus::Pending))).is_none());

        let fresh = cache.generation();
        assert!(cache.insert(CacheKey::Stats, json!(1), STATS_TTL, fresh));
        assert_eq!(cache.len(), 1);
    }
}
