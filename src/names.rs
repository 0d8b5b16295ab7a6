//! Name → [`Key`] index backing the string-keyed convenience API.
//!
//! The index is deliberately *lazily* consistent with the store: an eviction
//! does not reach back in here, so a name may map to a key whose entry is
//! long gone. Readers re-validate on every lookup and drop the binding when
//! it turns out stale; the reclaim tick sweeps whatever readers never
//! touched. This trades a little staleness for not paying an index update on
//! every eviction.

use ahash::AHashMap;

use crate::key::Key;

pub(crate) struct NameIndex {
    map: AHashMap<String, Key>,
}

impl NameIndex {
    pub(crate) fn new() -> Self {
        NameIndex {
            map: AHashMap::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Key> {
        self.map.get(name)
    }

    /// Binds `name` to `key`, returning the previously bound key, if any.
    pub(crate) fn bind(&mut self, name: &str, key: Key) -> Option<Key> {
        self.map.insert(name.to_owned(), key)
    }

    /// Drops the binding for `name`, returning the key it pointed at.
    pub(crate) fn unbind(&mut self, name: &str) -> Option<Key> {
        self.map.remove(name)
    }

    /// Sweeps every binding whose key fails `is_resident`.
    ///
    /// The dropped keys are returned so the caller can release their slots.
    pub(crate) fn purge_stale(&mut self, is_resident: impl Fn(&Key) -> bool) -> Vec<Key> {
        let mut dropped = Vec::new();
        self.map.retain(|_, key| {
            if is_resident(key) {
                true
            } else {
                dropped.push(key.clone());
                false
            }
        });
        dropped
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAllocator;

    #[test]
    fn bind_returns_previous_key() {
        let mut alloc = KeyAllocator::new();
        let mut names = NameIndex::new();
        let (first, _) = alloc.create();
        let (second, _) = alloc.create();

        assert!(names.bind("icon", first.clone()).is_none());
        let old = names.bind("icon", second.clone());
        assert_eq!(old, Some(first));
        assert_eq!(names.get("icon"), Some(&second));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn purge_drops_only_stale_bindings() {
        let mut alloc = KeyAllocator::new();
        let mut names = NameIndex::new();
        let (live, _) = alloc.create();
        let (dead, _) = alloc.create();
        names.bind("live", live.clone());
        names.bind("dead", dead.clone());
        alloc.release(&dead);

        let dropped = names.purge_stale(|k| k.is_valid());
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0], dead);
        assert!(names.get("dead").is_none());
        assert_eq!(names.get("live"), Some(&live));
    }

    #[test]
    fn unbind_missing_name_is_none() {
        let mut names = NameIndex::new();
        assert!(names.unbind("nope").is_none());
    }
}
