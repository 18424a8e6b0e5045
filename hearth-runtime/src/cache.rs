//! In-memory, single-flight cache over the player store.
//!
//! Every record lives behind its own async mutex. Loads and mutations for the
//! same player take that mutex, so concurrent `get`s collapse into one store
//! read and mutations are applied one at a time in lock order. Different
//! players never contend beyond the map bucket.

use hearth_db::{DbError, PlayerId, PlayerRecord};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::store::PlayerStore;

enum Slot {
    Unloaded,
    /// `None` is a cached "no record" answer.
    Loaded(Option<PlayerRecord>),
    /// Last load failed. Callers that were already waiting when it failed get
    /// the same error; later callers retry.
    Failed { attempt: u64, error: Arc<DbError> },
}

struct Entry {
    slot: AsyncMutex<Slot>,
    failed_loads: AtomicU64,
    /// References taken with `retain`.
    retained: AtomicUsize,
    /// `get`/`mutate` calls currently using the entry.
    in_flight: AtomicUsize,
}

impl Entry {
    fn new() -> Self {
        Self {
            slot: AsyncMutex::new(Slot::Unloaded),
            failed_loads: AtomicU64::new(0),
            retained: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn unhold(&self) {
        let _ = decrement(&self.in_flight);
    }

    fn is_idle(&self) -> bool {
        self.retained.load(Ordering::Acquire) == 0 && self.in_flight.load(Ordering::Acquire) == 0
    }
}

/// Decrement without wrapping. Fails if the counter is already zero.
fn decrement(counter: &AtomicUsize) -> Result<usize, usize> {
    counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
}

/// A slot guard that is known to hold a loaded value.
struct LoadedSlot<'a>(AsyncMutexGuard<'a, Slot>);

impl LoadedSlot<'_> {
    fn record(&self) -> Option<&PlayerRecord> {
        match &*self.0 {
            Slot::Loaded(record) => record.as_ref(),
            _ => None,
        }
    }

    fn publish(&mut self, record: PlayerRecord) {
        *self.0 = Slot::Loaded(Some(record));
    }
}

pub struct RecordCache {
    store: Arc<dyn PlayerStore>,
    entries: scc::HashMap<PlayerId, Arc<Entry>>,
    online: Mutex<HashSet<PlayerId>>,
    store_reads: AtomicU64,
}

impl RecordCache {
    pub fn new(store: Arc<dyn PlayerStore>) -> Self {
        Self {
            store,
            entries: scc::HashMap::new(),
            online: Mutex::new(HashSet::new()),
            store_reads: AtomicU64::new(0),
        }
    }

    /// Get a player's record, loading it from the store on a miss.
    ///
    /// Concurrent calls for the same id share one store read and its result.
    /// `Ok(None)` means the player has no record.
    pub async fn get(&self, id: PlayerId) -> Result<Option<PlayerRecord>, CacheError> {
        let entry = self.hold(id).await;
        let result = self
            .load(&entry, id)
            .await
            .map(|slot| slot.record().cloned());
        entry.unhold();
        result
    }

    /// Apply `f` to the record under per-player exclusion, persist the result,
    /// then publish it to the cache.
    ///
    /// A player without a record starts from [`PlayerRecord::blank`]. A
    /// `first_join` that is already set survives whatever `f` does. If the
    /// write fails the cached value is left untouched.
    pub async fn mutate<F>(&self, id: PlayerId, f: F) -> Result<PlayerRecord, CacheError>
    where
        F: FnOnce(&mut PlayerRecord) + Send,
    {
        let entry = self.hold(id).await;
        let result = self.write_through(&entry, id, f).await;
        entry.unhold();
        result
    }

    async fn write_through<F>(
        &self,
        entry: &Entry,
        id: PlayerId,
        f: F,
    ) -> Result<PlayerRecord, CacheError>
    where
        F: FnOnce(&mut PlayerRecord) + Send,
    {
        let mut slot = self.load(entry, id).await?;

        let previous_join = slot.record().and_then(|r| r.first_join);
        let mut next = slot
            .record()
            .cloned()
            .unwrap_or_else(|| PlayerRecord::blank(id));
        f(&mut next);
        next.id = id;
        if previous_join.is_some() {
            next.first_join = previous_join;
        }

        if let Err(err) = self.store.write(&next).await {
            warn!(player = %id, error = %err, "player record write failed");
            return Err(CacheError::StoreUnavailable(Arc::new(err)));
        }

        slot.publish(next.clone());
        debug!(player = %id, "player record updated");
        Ok(next)
    }

    /// Lock the slot and make sure it holds a loaded value.
    async fn load<'a>(&self, entry: &'a Entry, id: PlayerId) -> Result<LoadedSlot<'a>, CacheError> {
        let seen_failures = entry.failed_loads.load(Ordering::Acquire);
        let mut slot = entry.slot.lock().await;

        if let Slot::Failed { attempt, error } = &*slot {
            if *attempt > seen_failures {
                return Err(CacheError::StoreUnavailable(Arc::clone(error)));
            }
        }
        if matches!(*slot, Slot::Loaded(_)) {
            return Ok(LoadedSlot(slot));
        }

        self.store_reads.fetch_add(1, Ordering::Relaxed);
        match self.store.read(id).await {
            Ok(record) => {
                debug!(player = %id, found = record.is_some(), "loaded player record");
                *slot = Slot::Loaded(record);
                Ok(LoadedSlot(slot))
            }
            Err(err) => {
                let error = Arc::new(err);
                let attempt = entry.failed_loads.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(player = %id, error = %error, "player record load failed");
                *slot = Slot::Failed {
                    attempt,
                    error: Arc::clone(&error),
                };
                Err(CacheError::StoreUnavailable(error))
            }
        }
    }

    /// Find the entry for `id` (creating it) and mark it in use by a
    /// `get`/`mutate`. The count is taken while the map bucket is locked, so
    /// eviction can never remove an entry someone is about to use.
    async fn hold(&self, id: PlayerId) -> Arc<Entry> {
        let occupied = self
            .entries
            .entry_async(id)
            .await
            .or_insert_with(|| Arc::new(Entry::new()));
        occupied.get().in_flight.fetch_add(1, Ordering::AcqRel);
        Arc::clone(occupied.get())
    }

    /// Resolve a name to a player id through the store. Not cached.
    pub async fn resolve_name(&self, name: &str) -> Result<Option<PlayerId>, CacheError> {
        self.store.find_by_name(name).await.map_err(|err| {
            warn!(name, error = %err, "player name lookup failed");
            CacheError::StoreUnavailable(Arc::new(err))
        })
    }

    /// Count a pending operation on `id`. Pair with [`RecordCache::release`].
    pub async fn retain(&self, id: PlayerId) {
        self.entries
            .entry_async(id)
            .await
            .or_insert_with(|| Arc::new(Entry::new()))
            .get()
            .retained
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference taken with [`RecordCache::retain`]. The entry is
    /// evicted once nothing references it and the player is offline.
    pub async fn release(&self, id: PlayerId) {
        let Some(entry) = self.entries.read_async(&id, |_, entry| Arc::clone(entry)).await else {
            return;
        };
        if decrement(&entry.retained).is_err() {
            warn!(player = %id, "released a player record that was not retained");
            return;
        }
        self.evict_if_idle(id).await;
    }

    pub fn mark_online(&self, id: PlayerId) {
        self.online_set().insert(id);
    }

    /// Mark the player offline. Follow with [`RecordCache::evict_if_idle`].
    pub fn mark_offline(&self, id: PlayerId) {
        self.online_set().remove(&id);
    }

    pub fn is_online(&self, id: PlayerId) -> bool {
        self.online_set().contains(&id)
    }

    /// Evict the entry if the player is offline and nothing references it.
    pub async fn evict_if_idle(&self, id: PlayerId) -> bool {
        let evicted = self
            .entries
            .remove_if_async(&id, |entry| {
                entry.is_idle() && !self.is_online(id)
            })
            .await
            .is_some();
        if evicted {
            debug!(player = %id, "evicted player record");
        }
        evicted
    }

    /// Evict every idle entry of an offline player. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let online = self.online_set().clone();
        let mut removed = 0;
        self.entries
            .retain_async(|id, entry| {
                let keep = !entry.is_idle() || online.contains(id);
                if !keep {
                    removed += 1;
                }
                keep
            })
            .await;
        if removed > 0 {
            debug!(removed, "swept idle player records");
        }
        removed
    }

    /// Number of cache entries, loaded or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total store reads issued since startup.
    pub fn store_reads(&self) -> u64 {
        self.store_reads.load(Ordering::Relaxed)
    }

    fn online_set(&self) -> MutexGuard<'_, HashSet<PlayerId>> {
        self.online.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
