//! Cache keys and the slot allocator behind them.
//!
//! A [`Key`] is a small shared handle to one cache entry, independent of any
//! name the entry was inserted under. Holding a `Key` is cheaper than a name
//! lookup (no string hashing) and is the only way to address anonymous
//! entries. A key stops being usable the moment its entry leaves the cache —
//! copies of the handle remain legal values, they just answer
//! [`Key::is_valid`] with `false` and fail every cache operation.
//!
//! Identifiers come from [`KeyAllocator`], an array-backed free list: slot
//! `i` stores the index of the next free slot, so allocate and release are
//! both O(1). Released slots are recycled, which keeps the id space dense
//! under churn. The backing array only ever grows (it is discarded wholesale
//! when the cache is cleared).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Shared state behind a [`Key`].
///
/// `id == 0` means the handle is not (or no longer) bound to an entry.
pub(crate) struct KeyData {
    id: AtomicU32,
    valid: AtomicBool,
}

/// An opaque handle identifying one cache entry.
///
/// Obtained from [`PixmapCache::insert_keyed`](crate::PixmapCache::insert_keyed)
/// (or observed through [`PixmapCache::replace`](crate::PixmapCache::replace),
/// which rebinds the handle it is given). `Key` is `Clone`; all clones share
/// the same underlying state, so invalidation is visible through every copy.
///
/// The default-constructed key is empty: never valid, never equal to a bound
/// key, safe to store in structs before the first insertion.
#[derive(Clone, Default)]
pub struct Key {
    data: Option<Arc<KeyData>>,
}

impl Key {
    /// Returns `true` while a cached entry is associated with this key.
    ///
    /// Once the entry is evicted, replaced, removed, or the cache is
    /// cleared, this permanently becomes `false`.
    pub fn is_valid(&self) -> bool {
        self.data
            .as_ref()
            .map_or(false, |d| d.valid.load(Ordering::Relaxed))
    }

    /// The bound identifier, or `None` for empty/released keys.
    pub(crate) fn id(&self) -> Option<u32> {
        let id = self.data.as_ref()?.id.load(Ordering::Relaxed);
        (id != 0).then_some(id)
    }

    /// Marks the handle inert without going through the allocator.
    ///
    /// Used by `clear()`, which throws the whole slot array away instead of
    /// returning slots one by one.
    pub(crate) fn invalidate(&self) {
        if let Some(d) = &self.data {
            d.valid.store(false, Ordering::Relaxed);
            d.id.store(0, Ordering::Relaxed);
        }
    }

    fn bound(id: u32) -> Self {
        Key {
            data: Some(Arc::new(KeyData {
                id: AtomicU32::new(id),
                valid: AtomicBool::new(true),
            })),
        }
    }
}

/// Two keys are equal when they share the same underlying state.
///
/// Equality by identity (not by id number) means a recycled identifier never
/// makes a dead handle compare equal to the live one that inherited its slot.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(d) => f
                .debug_struct("Key")
                .field("id", &d.id.load(Ordering::Relaxed))
                .field("valid", &d.valid.load(Ordering::Relaxed))
                .finish(),
            None => f.write_str("Key(empty)"),
        }
    }
}

// ---------------------------------------------------------------------------
// KeyAllocator
// ---------------------------------------------------------------------------

/// Hands out and recycles the small integer identifiers behind [`Key`]s.
///
/// `slots[i]` holds the index of the next free slot after `i`, forming a
/// singly-linked chain through the array. `free_head == slots.len()` means
/// the chain is exhausted and the array must grow (capacity doubles, starting
/// at 2). Identifiers are `slot + 1`, so 0 stays reserved for "unbound".
pub(crate) struct KeyAllocator {
    slots: Vec<u32>,
    free_head: u32,
}

impl KeyAllocator {
    pub(crate) fn new() -> Self {
        KeyAllocator {
            slots: Vec::new(),
            free_head: 0,
        }
    }

    /// Allocates a fresh key, returning it together with its id (always
    /// non-zero). Never fails; the array grows without bound.
    pub(crate) fn create(&mut self) -> (Key, u32) {
        if self.free_head as usize == self.slots.len() {
            let target = (self.slots.len() * 2).max(2);
            self.grow(target);
        }
        let slot = self.free_head;
        self.free_head = self.slots[slot as usize];
        let id = slot + 1;
        (Key::bound(id), id)
    }

    /// Returns `key`'s slot to the free list and marks the handle inert.
    ///
    /// Silently ignores empty keys, already-released keys (id 0), and ids
    /// outside the current array — stale handle copies may legitimately
    /// reach here after a `clear()` reset.
    pub(crate) fn release(&mut self, key: &Key) {
        let Some(data) = &key.data else { return };
        let id = data.id.load(Ordering::Relaxed);
        if id == 0 || id as usize > self.slots.len() {
            return;
        }
        let slot = id - 1;
        self.slots[slot as usize] = self.free_head;
        self.free_head = slot;
        data.valid.store(false, Ordering::Relaxed);
        data.id.store(0, Ordering::Relaxed);
    }

    /// Discards the entire slot array.
    ///
    /// Callers are responsible for invalidating any keys still bound; after
    /// the reset their ids are out of range and `release` ignores them.
    pub(crate) fn reset(&mut self) {
        self.slots.clear();
        self.free_head = 0;
    }

    fn grow(&mut self, target: usize) {
        debug_assert!(target > self.slots.len());
        for i in self.slots.len()..target {
            // Each new slot chains to the one after it; the last new slot
            // points one past the end, which reads as "exhausted".
            self.slots.push(i as u32 + 1);
        }
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct_and_nonzero() {
        let mut alloc = KeyAllocator::new();
        let mut ids: Vec<u32> = (0..64).map(|_| alloc.create().1).collect();
        assert!(ids.iter().all(|&id| id >= 1));
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64, "ids must be unique");
    }

    #[test]
    fn released_slot_is_recycled_but_old_key_stays_dead() {
        let mut alloc = KeyAllocator::new();
        let (first, id) = alloc.create();
        alloc.release(&first);
        assert!(!first.is_valid());
        assert_eq!(first.id(), None);

        let (second, second_id) = alloc.create();
        assert_eq!(second_id, id, "slot should be reused LIFO");
        assert!(second.is_valid());
        assert!(!first.is_valid(), "recycling must not revive the old handle");
        assert_ne!(first, second);
    }

    #[test]
    fn release_is_idempotent() {
        let mut alloc = KeyAllocator::new();
        let (a, _) = alloc.create();
        let (b, _) = alloc.create();
        alloc.release(&a);
        alloc.release(&a); // second release is a no-op
        let (_, c_id) = alloc.create();
        let (_, d_id) = alloc.create();
        // A double-free would hand the same slot out twice.
        assert_ne!(c_id, d_id);
        assert!(b.is_valid());
    }

    #[test]
    fn array_doubles_on_exhaustion() {
        let mut alloc = KeyAllocator::new();
        let _keys: Vec<(Key, u32)> = (0..5).map(|_| alloc.create()).collect();
        assert_eq!(alloc.capacity(), 8); // 2 -> 4 -> 8
    }

    #[test]
    fn release_after_reset_is_ignored() {
        let mut alloc = KeyAllocator::new();
        let (key, _) = alloc.create();
        alloc.reset();
        // The slot array is gone; this must not panic or corrupt the chain.
        alloc.release(&key);
        let (_, next_id) = alloc.create();
        assert_eq!(next_id, 1);
    }

    #[test]
    fn empty_keys_compare_equal_bound_keys_by_identity() {
        let mut alloc = KeyAllocator::new();
        assert_eq!(Key::default(), Key::default());
        let (a, _) = alloc.create();
        let a2 = a.clone();
        let (b, _) = alloc.create();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_ne!(a, Key::default());
    }
}
