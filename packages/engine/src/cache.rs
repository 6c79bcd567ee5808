use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use crate::model::{DocumentKey, PointerRecord};

struct CacheEntry<T> {
    payload: T,
    record: PointerRecord,
    fetched_at: Instant,
}

/// Generation at which a key was last invalidated.
#[derive(Debug, Clone, Copy)]
struct Invalidation {
    generation: u64,
    at: Instant,
}

/// Permission to fill the cache for one key, taken before the backend read.
///
/// A ticket issued before an invalidation is rejected by [`PayloadCache::fill`],
/// so a load that raced a save cannot put the superseded payload back.
/// Tickets older than the TTL are rejected too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    generation: u64,
    issued_at: Instant,
}

/// Process-local, TTL-bounded cache of decoded payloads.
///
/// Entries older than the TTL are never returned. Uses the tokio clock so
/// tests can drive expiry with paused time.
///
/// Expired entries and invalidation marks are swept at most once per TTL,
/// so memory stays proportional to the keys touched within the last TTL.
pub struct PayloadCache<T> {
    ttl: Duration,
    entries: DashMap<DocumentKey, CacheEntry<T>>,
    invalidations: DashMap<DocumentKey, Invalidation>,
    generation: AtomicU64,
    cleared_at_generation: AtomicU64,
    // Fills hold it shared, `clear` exclusively.
    clearing: RwLock<()>,
    next_sweep: Mutex<Instant>,
}

impl<T: Clone> PayloadCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            invalidations: DashMap::new(),
            generation: AtomicU64::new(0),
            cleared_at_generation: AtomicU64::new(0),
            clearing: RwLock::new(()),
            next_sweep: Mutex::new(Instant::now() + ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`. Expired entries are evicted on the way out.
    pub fn get(&self, key: &DocumentKey) -> Option<(T, PointerRecord)> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now.duration_since(entry.fetched_at) < self.ttl {
                return Some((entry.payload.clone(), entry.record.clone()));
            }
        } else {
            return None;
        }

        if self
            .entries
            .remove_if(key, |_, entry| now.duration_since(entry.fetched_at) >= self.ttl)
            .is_some()
        {
            debug!(key = %key, "Evicted expired cache entry");
        }
        None
    }

    pub fn ticket(&self, _key: &DocumentKey) -> FillTicket {
        FillTicket {
            generation: self.generation.load(Ordering::SeqCst),
            issued_at: Instant::now(),
        }
    }

    /// Store a freshly loaded payload. Returns `false` if the key was
    /// invalidated after `ticket` was issued, or the ticket outlived the TTL.
    pub fn fill(&self, key: &DocumentKey, ticket: FillTicket, payload: T, record: PointerRecord) -> bool {
        let now = Instant::now();
        let filled = self.try_fill(key, ticket, now, payload, record);
        self.maybe_sweep(now);
        filled
    }

    fn try_fill(
        &self,
        key: &DocumentKey,
        ticket: FillTicket,
        now: Instant,
        payload: T,
        record: PointerRecord,
    ) -> bool {
        if now.duration_since(ticket.issued_at) >= self.ttl {
            debug!(key = %key, "Skipping cache fill with an expired ticket");
            return false;
        }

        let _shared = self.clearing.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.cleared_at_generation.load(Ordering::SeqCst) > ticket.generation {
            debug!(key = %key, "Skipping cache fill after clear");
            return false;
        }

        // The mark's shard stays locked until the entry is written, so an
        // invalidation cannot slip in between the check and the insert.
        let mark = self.invalidations.entry(key.clone());
        if let Entry::Occupied(existing) = &mark {
            if existing.get().generation > ticket.generation {
                debug!(key = %key, "Skipping cache fill after invalidation");
                return false;
            }
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                payload,
                record,
                fetched_at: now,
            },
        );
        drop(mark);
        true
    }

    pub fn invalidate(&self, key: &DocumentKey) {
        let now = Instant::now();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.invalidations
            .insert(key.clone(), Invalidation { generation, at: now });
        self.entries.remove(key);
        self.maybe_sweep(now);
    }

    /// Drop every entry and reject every outstanding ticket.
    pub fn clear(&self) {
        let _exclusive = self.clearing.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cleared_at_generation.store(generation, Ordering::SeqCst);
        self.entries.clear();
        self.invalidations.clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.fetched_at) < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Entries plus invalidation marks currently held.
    pub fn footprint(&self) -> usize {
        self.entries.len() + self.invalidations.len()
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut next = self
                .next_sweep
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now < *next {
                return;
            }
            *next = now + self.ttl;
        }

        let purged = self.purge_expired();
        // A mark older than the TTL predates every ticket that can still fill.
        let before = self.invalidations.len();
        self.invalidations
            .retain(|_, mark| now.duration_since(mark.at) < self.ttl);
        let pruned = before.saturating_sub(self.invalidations.len());
        if purged + pruned > 0 {
            debug!(purged, pruned, "Swept payload cache");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
