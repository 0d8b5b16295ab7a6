//! The pixmap cache itself.
//!
//! [`PixmapCache`] is an explicit context object — construct one per
//! application (or per subsystem) and share it by reference; there is no
//! process-global instance. All state lives in an [`Engine`] behind a single
//! coarse [`parking_lot::Mutex`]: every operation is a short, non-blocking
//! data-structure manipulation, so one lock is both sufficient and the
//! cheapest correct discipline.
//!
//! Entries are addressed two ways: by a caller-chosen string name, or by an
//! opaque [`Key`] handed out at insertion. Name lookups go through an index
//! that is only lazily consistent — evictions do not update it — so every
//! read re-validates and repairs stale bindings on the spot.

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::key::{Key, KeyAllocator};
use crate::lru::CostLru;
use crate::metrics::stats::{Metrics, StatsCounter};
use crate::names::NameIndex;
use crate::pixmap::{cost_kb, Pixmap};
use crate::reclaim::ReclaimState;
use crate::timer::TimerSource;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One resident pixmap plus the key that addresses it.
///
/// The key copy is what lets any eviction path hand the slot back to the
/// allocator: whoever removes the entry owns its `Key` and must release it.
struct CacheEntry<P> {
    pixmap: P,
    key: Key,
}

/// Single-owner interior: the LRU store keyed by key id, the name index,
/// the id allocator, and the reclaim schedule.
struct Engine<P> {
    store: CostLru<u32, CacheEntry<P>>,
    names: NameIndex,
    keys: KeyAllocator,
    reclaim: ReclaimState,
    timer: Box<dyn TimerSource>,
}

impl<P: Pixmap> Engine<P> {
    fn new(limit_kb: u64, timer: Box<dyn TimerSource>) -> Self {
        Engine {
            store: CostLru::new(limit_kb),
            names: NameIndex::new(),
            keys: KeyAllocator::new(),
            reclaim: ReclaimState::new(),
            timer,
        }
    }

    /// Releases the keys of evicted entries; returns how many there were.
    fn release_victims(&mut self, victims: Vec<(u32, CacheEntry<P>)>) -> u64 {
        let count = victims.len() as u64;
        for (_, entry) in victims {
            self.keys.release(&entry.key);
        }
        count
    }

    fn insert_named(&mut self, name: &str, pixmap: P, cost: u64) -> (bool, u64) {
        // Last writer wins: an existing entry under this name goes first.
        if let Some(old) = self.names.unbind(name) {
            if let Some(id) = old.id() {
                if let Some(entry) = self.store.remove(&id) {
                    self.keys.release(&entry.key);
                }
            }
        }

        let (key, id) = self.keys.create();
        let entry = CacheEntry {
            pixmap,
            key: key.clone(),
        };
        match self.store.insert(id, entry, cost) {
            Ok(victims) => {
                let evicted = self.release_victims(victims);
                self.names.bind(name, key);
                self.reclaim.ensure_watching(self.timer.as_mut());
                (true, evicted)
            }
            Err(entry) => {
                // Rejected: the fresh key dies with the entry; the name
                // stays unbound (the old binding was already dropped).
                self.keys.release(&entry.key);
                (false, 0)
            }
        }
    }

    fn insert_keyed(&mut self, pixmap: P, cost: u64) -> (Key, u64) {
        let (key, id) = self.keys.create();
        let entry = CacheEntry {
            pixmap,
            key: key.clone(),
        };
        match self.store.insert(id, entry, cost) {
            Ok(victims) => {
                let evicted = self.release_victims(victims);
                self.reclaim.ensure_watching(self.timer.as_mut());
                (key, evicted)
            }
            Err(entry) => {
                // The caller still gets the handle; it just reports invalid.
                self.keys.release(&entry.key);
                (key, 0)
            }
        }
    }

    fn replace(&mut self, key: &Key, pixmap: P, cost: u64) -> (Option<Key>, u64) {
        let Some(old_id) = key.id() else {
            return (None, 0);
        };
        match self.store.remove(&old_id) {
            Some(entry) => self.keys.release(&entry.key),
            None => self.keys.release(key),
        }

        let (new_key, id) = self.keys.create();
        let entry = CacheEntry {
            pixmap,
            key: new_key.clone(),
        };
        match self.store.insert(id, entry, cost) {
            Ok(victims) => {
                let evicted = self.release_victims(victims);
                self.reclaim.ensure_watching(self.timer.as_mut());
                (Some(new_key), evicted)
            }
            Err(entry) => {
                self.keys.release(&entry.key);
                (None, 0)
            }
        }
    }

    fn find_named(&mut self, name: &str) -> Option<P> {
        let key = self.names.get(name)?.clone();
        let Some(id) = key.id() else {
            // The entry was evicted at some point; repair the index.
            self.names.unbind(name);
            return None;
        };
        match self.store.get(&id) {
            Some(entry) => Some(entry.pixmap.clone()),
            None => {
                self.names.unbind(name);
                None
            }
        }
    }

    fn find_keyed(&mut self, key: &Key) -> Option<P> {
        let id = key.id()?;
        match self.store.get(&id) {
            Some(entry) => Some(entry.pixmap.clone()),
            None => {
                // Resident nowhere: the handle is dead, reclaim its slot.
                self.keys.release(key);
                None
            }
        }
    }

    fn remove_named(&mut self, name: &str) -> bool {
        let Some(key) = self.names.unbind(name) else {
            return false;
        };
        match key.id().and_then(|id| self.store.remove(&id)) {
            Some(entry) => {
                self.keys.release(&entry.key);
                true
            }
            None => {
                self.keys.release(&key);
                false
            }
        }
    }

    fn remove_keyed(&mut self, key: &Key) -> bool {
        let Some(id) = key.id() else {
            return false;
        };
        match self.store.remove(&id) {
            Some(entry) => {
                self.keys.release(&entry.key);
                true
            }
            None => {
                self.keys.release(key);
                false
            }
        }
    }

    fn set_limit(&mut self, limit_kb: u64) -> u64 {
        let victims = self.store.set_max_cost(limit_kb);
        self.release_victims(victims)
    }

    fn clear(&mut self) {
        // The allocator's slot array is discarded wholesale, so resident
        // keys must be marked inert by hand — their slots no longer exist
        // to be released.
        self.keys.reset();
        for (_, entry) in self.store.iter() {
            entry.key.invalidate();
        }
        self.store.clear();
        self.names.clear();
        self.reclaim.stop(self.timer.as_mut());
    }

    /// One reclamation pass: shrink the limit through the ordinary eviction
    /// path, restore it, then sweep stale name bindings.
    ///
    /// `idle` selects the aggressiveness — a quarter of the cache when
    /// nothing has changed since the last pass, a single LRU entry
    /// otherwise. Returns whether anything was reclaimed and how many
    /// entries were evicted.
    fn flush_detached(&mut self, idle: bool) -> (bool, u64) {
        if self.store.is_empty() && self.names.is_empty() {
            self.reclaim.record_total(0);
            return (false, 0);
        }

        let limit = self.store.max_cost();
        let total = self.store.total_cost();
        let target = if idle {
            total.saturating_mul(3) / 4
        } else {
            total.saturating_sub(1)
        };
        let victims = self.store.set_max_cost(target);
        self.store.set_max_cost(limit);
        let evicted_any = !victims.is_empty();
        let evicted = self.release_victims(victims);
        self.reclaim.record_total(self.store.total_cost());

        let stale = self.names.purge_stale(|key| {
            key.id().map_or(false, |id| self.store.contains(&id))
        });
        let purged_any = !stale.is_empty();
        for key in &stale {
            self.keys.release(key);
        }

        if evicted_any || purged_any {
            trace!(
                evicted,
                purged = stale.len(),
                idle,
                "reclaim pass flushed detached entries"
            );
        }
        (evicted_any || purged_any, evicted)
    }

    fn tick(&mut self) -> u64 {
        let idle = self.reclaim.idle_since_last_tick(self.store.total_cost());
        let (reclaimed_any, evicted) = self.flush_detached(idle);
        self.reclaim.settle_tick(self.timer.as_mut(), reclaimed_any, idle);
        evicted
    }
}

// ---------------------------------------------------------------------------
// PixmapCache
// ---------------------------------------------------------------------------

/// A cost-bounded cache for pixmaps, addressed by name or by [`Key`].
///
/// Storage is bounded by [`cache_limit`](PixmapCache::cache_limit) in
/// kilobytes (default 10240 KB); when an insertion would exceed the limit,
/// least-recently-used entries are evicted to make room. A background
/// reclaim schedule additionally trims entries that sit untouched — see
/// [`tick`](PixmapCache::tick) and the [`timer`](crate::timer) module for
/// how ticks are delivered.
///
/// The cache is a value, not a global: create one with
/// [`builder`](PixmapCache::builder) (or [`new`](PixmapCache::new) for
/// defaults) and share it by reference. All methods take `&self`; internal
/// state is guarded by a single mutex, so sharing across threads needs no
/// extra synchronization.
///
/// # Example
/// ```
/// use fresco::{PixmapCache, Pixmap};
///
/// #[derive(Clone, PartialEq, Debug)]
/// struct Thumb(u32, u32);
///
/// impl Pixmap for Thumb {
///     fn width(&self) -> u32 { self.0 }
///     fn height(&self) -> u32 { self.1 }
///     fn depth(&self) -> u32 { 32 }
/// }
///
/// let cache: PixmapCache<Thumb> = PixmapCache::new();
/// assert!(cache.insert("toolbar/save", Thumb(24, 24)));
/// assert_eq!(cache.find("toolbar/save"), Some(Thumb(24, 24)));
///
/// let key = cache.insert_keyed(Thumb(64, 64));
/// assert!(key.is_valid());
/// assert_eq!(cache.find_keyed(&key), Some(Thumb(64, 64)));
/// ```
pub struct PixmapCache<P> {
    engine: Mutex<Engine<P>>,
    stats: StatsCounter,
}

impl<P: Pixmap> PixmapCache<P> {
    /// A cache with the default 10240 KB limit and no timer delivery.
    pub fn new() -> Self {
        crate::builder::CacheBuilder::new().build()
    }

    /// Returns a [`CacheBuilder`](crate::CacheBuilder) for configuring a
    /// new cache.
    pub fn builder() -> crate::builder::CacheBuilder<P> {
        crate::builder::CacheBuilder::new()
    }

    pub(crate) fn from_parts(limit_kb: u64, timer: Box<dyn TimerSource>) -> Self {
        PixmapCache {
            engine: Mutex::new(Engine::new(limit_kb, timer)),
            stats: StatsCounter::new(),
        }
    }

    /// Swaps the timer source. Only safe before any insertion has armed the
    /// reclaim schedule; used by `build_shared` to wire up the thread timer.
    pub(crate) fn install_timer(&self, timer: Box<dyn TimerSource>) {
        self.engine.lock().timer = timer;
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Inserts `pixmap` under `name`, evicting LRU entries as needed.
    ///
    /// An existing entry under the same name is replaced — last writer
    /// wins, and any outstanding [`Key`] for the old entry is invalidated.
    /// Returns `false` (and stores nothing) if the pixmap alone is larger
    /// than the cache limit.
    pub fn insert(&self, name: &str, pixmap: P) -> bool {
        let cost = cost_kb(&pixmap);
        let (stored, evicted) = self.engine.lock().insert_named(name, pixmap, cost);
        self.stats.record_evictions(evicted);
        if !stored {
            warn!(name, cost_kb = cost, "pixmap larger than cache limit, not cached");
        }
        stored
    }

    /// Inserts `pixmap` and returns a [`Key`] addressing it.
    ///
    /// On capacity failure the returned key reports
    /// [`is_valid()`](Key::is_valid) `false`.
    pub fn insert_keyed(&self, pixmap: P) -> Key {
        let cost = cost_kb(&pixmap);
        let (key, evicted) = self.engine.lock().insert_keyed(pixmap, cost);
        self.stats.record_evictions(evicted);
        key
    }

    /// Replaces the entry under `key` with `pixmap`.
    ///
    /// On success the handle is rebound in place — it now addresses the new
    /// entry, and its identifier has changed. Clones of the old handle made
    /// before the call observe `is_valid() == false`. Returns `false` (and
    /// leaves no entry behind) if `key` is invalid or the new pixmap cannot
    /// fit.
    pub fn replace(&self, key: &mut Key, pixmap: P) -> bool {
        if !key.is_valid() {
            return false;
        }
        let cost = cost_kb(&pixmap);
        let (new_key, evicted) = self.engine.lock().replace(key, pixmap, cost);
        self.stats.record_evictions(evicted);
        match new_key {
            Some(new_key) => {
                *key = new_key;
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Returns a copy of the pixmap stored under `name` and refreshes its
    /// recency.
    ///
    /// A name whose entry was evicted answers `None`, indistinguishable
    /// from never-inserted; the stale binding is dropped as a side effect.
    pub fn find(&self, name: &str) -> Option<P> {
        let found = self.engine.lock().find_named(name);
        match &found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    /// Returns a copy of the pixmap addressed by `key` and refreshes its
    /// recency. Invalid keys answer `None`.
    pub fn find_keyed(&self, key: &Key) -> Option<P> {
        if !key.is_valid() {
            self.stats.record_miss();
            return None;
        }
        let found = self.engine.lock().find_keyed(key);
        match &found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes the entry stored under `name`, if any. Outstanding keys for
    /// the entry become invalid.
    pub fn remove(&self, name: &str) {
        self.engine.lock().remove_named(name);
    }

    /// Removes the entry addressed by `key`, releasing the key's slot for a
    /// future insertion. Invalid keys are ignored.
    pub fn remove_keyed(&self, key: &Key) {
        if !key.is_valid() {
            return;
        }
        self.engine.lock().remove_keyed(key);
    }

    /// Removes every entry and invalidates every outstanding key.
    ///
    /// Also stops the reclaim timer — an empty cache needs no watching.
    pub fn clear(&self) {
        self.engine.lock().clear();
    }

    // -----------------------------------------------------------------------
    // Limits and introspection
    // -----------------------------------------------------------------------

    /// The cache limit in kilobytes.
    pub fn cache_limit(&self) -> u64 {
        self.engine.lock().store.max_cost()
    }

    /// Sets the cache limit to `kb` kilobytes, evicting LRU entries if the
    /// cache currently uses more.
    pub fn set_cache_limit(&self, kb: u64) {
        let evicted = self.engine.lock().set_limit(kb);
        self.stats.record_evictions(evicted);
    }

    /// Kilobytes currently attributed to resident entries, rounded up.
    pub fn total_used(&self) -> u64 {
        (self.engine.lock().store.total_cost() + 1023) / 1024
    }

    /// Number of resident entries.
    pub fn entry_count(&self) -> usize {
        self.engine.lock().store.len()
    }

    /// Number of name bindings, including ones not yet swept.
    pub fn named_count(&self) -> usize {
        self.engine.lock().names.len()
    }

    /// A snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> Metrics {
        self.stats.snapshot()
    }

    // -----------------------------------------------------------------------
    // Reclamation
    // -----------------------------------------------------------------------

    /// Runs one aggressive reclamation pass immediately: evicts down to
    /// three quarters of the current usage and sweeps stale name bindings.
    /// Returns `true` if anything was reclaimed.
    pub fn flush_detached(&self) -> bool {
        let (any, evicted) = self.engine.lock().flush_detached(true);
        self.stats.record_reclaimed(evicted);
        any
    }

    /// Delivers one reclaim tick.
    ///
    /// Call this from whatever drives the configured
    /// [`TimerSource`](crate::timer::TimerSource) — the bundled
    /// [`ThreadTimer`](crate::timer::ThreadTimer) does it for you. The tick
    /// trims the cache, re-arms the timer at the interval matching current
    /// activity, and stops it when there is nothing left to reclaim.
    pub fn tick(&self) {
        let evicted = self.engine.lock().tick();
        self.stats.record_reclaimed(evicted);
    }
}

impl<P: Pixmap> Default for PixmapCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
