//! Two-tier result cache
//!
//! The primary tier is an entry-bounded LRU holding live values. The
//! optional secondary tier is byte-bounded and stores serialized, possibly
//! compressed values. Primary evictions are demoted into the secondary tier;
//! secondary hits are promoted back into the primary.
//!
//! Both tiers sit behind one mutex so an eviction can never interleave with
//! a promotion of the same key. Nothing inside the lock awaits.

pub mod fingerprint;
pub mod secondary;

pub use fingerprint::Fingerprint;

use crate::config::CacheConfig;
use lru::LruCache;
use parking_lot::Mutex;
use secondary::{Lookup, SecondaryTier};
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache tier holding an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Secondary,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    expires_at: Instant,
    size_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub expirations: u64,
    pub primary_entries: usize,
    pub secondary_entries: usize,
    pub secondary_bytes: usize,
    pub hit_rate: f64,
}

struct Tiers {
    primary: LruCache<String, CacheEntry>,
    secondary: Option<SecondaryTier>,
    hits: u64,
    misses: u64,
    evictions: u64,
    promotions: u64,
    expirations: u64,
}

impl Tiers {
    /// Insert into the primary tier, demoting whatever the LRU pushes out
    fn insert_primary(&mut self, key: String, entry: CacheEntry, now: Instant) {
        let Some((evicted_key, evicted)) = self.primary.push(key.clone(), entry) else {
            return;
        };
        if evicted_key == key {
            // Replaced in place
            return;
        }

        self.evictions += 1;
        if evicted.expires_at <= now {
            return;
        }
        if let Some(secondary) = self.secondary.as_mut() {
            match serde_json::to_vec(&evicted.value) {
                Ok(bytes) => {
                    let dropped =
                        secondary.insert(evicted_key, bytes, evicted.stored_at, evicted.expires_at);
                    self.evictions += dropped as u64;
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize demoted cache entry"),
            }
        }
    }
}

pub struct ResultCache {
    tiers: Mutex<Tiers>,
    enabled: bool,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.primary_capacity).unwrap_or(NonZeroUsize::MIN);
        let secondary = config.secondary_enabled.then(|| {
            SecondaryTier::new(config.secondary_max_bytes, config.compression_threshold_bytes)
        });
        Self {
            tiers: Mutex::new(Tiers {
                primary: LruCache::new(capacity),
                secondary,
                hits: 0,
                misses: 0,
                evictions: 0,
                promotions: 0,
                expirations: 0,
            }),
            enabled: config.enabled,
            default_ttl: config.default_ttl(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a live value
    ///
    /// Expired entries are dropped on sight. A secondary hit moves the entry
    /// into the primary tier.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let key = fingerprint.as_str();
        let now = Instant::now();
        let mut tiers = self.tiers.lock();

        let primary = tiers
            .primary
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));
        match primary {
            Some((true, value)) => {
                tiers.hits += 1;
                return Some(value);
            }
            Some((false, _)) => {
                tiers.primary.pop(key);
                tiers.expirations += 1;
            }
            None => {}
        }

        let lookup = match tiers.secondary.as_mut() {
            Some(secondary) => secondary.take(key, now),
            None => Lookup::Missing,
        };
        match lookup {
            Lookup::Found(taken) => {
                let size_bytes = serialized_len(&taken.value);
                let entry = CacheEntry {
                    value: taken.value.clone(),
                    stored_at: taken.stored_at,
                    expires_at: taken.expires_at,
                    size_bytes,
                };
                tiers.insert_primary(key.to_string(), entry, now);
                tiers.promotions += 1;
                tiers.hits += 1;
                tracing::trace!(fingerprint = %key, "Promoted cache entry to primary tier");
                Some(taken.value)
            }
            Lookup::Expired => {
                tiers.expirations += 1;
                tiers.misses += 1;
                None
            }
            Lookup::Missing => {
                tiers.misses += 1;
                None
            }
        }
    }

    /// Store a value for a cacheable fingerprint
    ///
    /// Returns whether the value was stored. Non-cacheable fingerprints, a
    /// zero TTL and values larger than the secondary tier are no-ops.
    pub fn set(&self, fingerprint: &Fingerprint, value: Value, ttl: Option<Duration>) -> bool {
        if !self.enabled || !fingerprint.is_cacheable() {
            return false;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return false;
        }

        let size_bytes = serialized_len(&value);
        let now = Instant::now();
        let mut tiers = self.tiers.lock();

        if let Some(secondary) = tiers.secondary.as_mut() {
            if size_bytes > secondary.max_bytes() {
                tracing::debug!(
                    fingerprint = %fingerprint,
                    size_bytes,
                    "Value exceeds cache capacity, not stored"
                );
                return false;
            }
            secondary.remove(fingerprint.as_str());
        }

        let entry = CacheEntry {
            value,
            stored_at: now,
            expires_at: now + ttl,
            size_bytes,
        };
        tiers.insert_primary(fingerprint.as_str().to_string(), entry, now);
        true
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let key = fingerprint.as_str();
        let mut tiers = self.tiers.lock();
        let in_primary = tiers.primary.pop(key).is_some();
        let in_secondary = tiers
            .secondary
            .as_mut()
            .is_some_and(|secondary| secondary.remove(key));
        in_primary || in_secondary
    }

    /// Drop every entry; statistics are kept
    pub fn clear(&self) {
        let mut tiers = self.tiers.lock();
        tiers.primary.clear();
        if let Some(secondary) = tiers.secondary.as_mut() {
            secondary.clear();
        }
    }

    /// Which tier currently holds a live entry, without touching recency
    pub fn tier_of(&self, fingerprint: &Fingerprint) -> Option<Tier> {
        let key = fingerprint.as_str();
        let tiers = self.tiers.lock();
        if tiers.primary.peek(key).is_some() {
            Some(Tier::Primary)
        } else if tiers
            .secondary
            .as_ref()
            .is_some_and(|secondary| secondary.contains(key))
        {
            Some(Tier::Secondary)
        } else {
            None
        }
    }

    /// Remove expired entries from both tiers
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tiers = self.tiers.lock();

        let expired: Vec<String> = tiers
            .primary
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            tiers.primary.pop(key);
        }

        let mut purged = expired.len();
        if let Some(secondary) = tiers.secondary.as_mut() {
            purged += secondary.purge_expired(now);
        }
        tiers.expirations += purged as u64;
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let tiers = self.tiers.lock();
        let lookups = tiers.hits + tiers.misses;
        CacheStats {
            hits: tiers.hits,
            misses: tiers.misses,
            evictions: tiers.evictions,
            promotions: tiers.promotions,
            expirations: tiers.expirations,
            primary_entries: tiers.primary.len(),
            secondary_entries: tiers.secondary.as_ref().map_or(0, |s| s.len()),
            secondary_bytes: tiers.secondary.as_ref().map_or(0, |s| s.bytes()),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                tiers.hits as f64 / lookups as f64
            },
        }
    }

    /// Bytes held by live primary values, as serialized JSON
    pub fn primary_bytes(&self) -> usize {
        self.tiers
            .lock()
            .primary
            .iter()
            .map(|(_, entry)| entry.size_bytes)
            .sum()
    }

    pub fn start_sweep(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background cache TTL sweep"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired cache entries");
                }
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => tracing::error!(
                    "Background cache sweep task terminated unexpectedly. \
                    Expired entries will only be dropped on lookup."
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Background cache sweep task panicked. \
                    Expired entries will only be dropped on lookup."
                ),
            }
        });
    }
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}
