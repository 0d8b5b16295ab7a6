//! Cost-bounded LRU store.
//!
//! Entries carry an explicit cost; the store keeps `Σ cost ≤ max_cost` by
//! evicting from the least-recently-used end. Nodes live in an index arena
//! (a `Vec` linked by index through HEAD/TAIL sentinels) so list surgery
//! needs no unsafe pointers, and freed slots are recycled through a free
//! list.
//!
//! Every eviction path hands the victims back to the caller instead of
//! dropping them internally — the cache layer above owes each victim's key
//! a release, and it is the only place that can pay it.

use std::hash::Hash;

use ahash::AHashMap;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used end
const TAIL: usize = 1; // least-recently-used end
const NULL: usize = usize::MAX;

struct Node<K, V> {
    /// `None` only for the HEAD and TAIL sentinels and free slots.
    key: Option<K>,
    value: Option<V>,
    cost: u64,
    /// Index toward HEAD (more recently used).
    prev: usize,
    /// Index toward TAIL (less recently used).
    next: usize,
}

/// Capacity-bounded, cost-weighted LRU container.
pub(crate) struct CostLru<K, V> {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<Node<K, V>>,
    /// Maps a key to its index in `nodes`.
    map: AHashMap<K, usize>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    total_cost: u64,
    max_cost: u64,
}

impl<K: Hash + Eq + Clone, V> CostLru<K, V> {
    pub(crate) fn new(max_cost: u64) -> Self {
        let mut nodes: Vec<Node<K, V>> = Vec::with_capacity(16);
        nodes.push(Node {
            key: None,
            value: None,
            cost: 0,
            prev: NULL,
            next: TAIL,
        });
        nodes.push(Node {
            key: None,
            value: None,
            cost: 0,
            prev: HEAD,
            next: NULL,
        });

        CostLru {
            nodes,
            map: AHashMap::new(),
            free_list: Vec::new(),
            total_cost: 0,
            max_cost,
        }
    }

    // -----------------------------------------------------------------------
    // List plumbing
    // -----------------------------------------------------------------------

    /// Links `idx` immediately after the HEAD sentinel (marks it MRU).
    fn link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].next;
        self.nodes[idx].prev = HEAD;
        self.nodes[idx].next = old_first;
        self.nodes[HEAD].next = idx;
        self.nodes[old_first].prev = idx;
    }

    /// Detaches `idx` from its current position in the list.
    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NULL;
        self.nodes[idx].next = NULL;
    }

    fn alloc_node(&mut self, key: K, value: V, cost: u64) -> usize {
        if let Some(idx) = self.free_list.pop() {
            let node = &mut self.nodes[idx];
            node.key = Some(key);
            node.value = Some(value);
            node.cost = cost;
            node.prev = NULL;
            node.next = NULL;
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(Node {
                key: Some(key),
                value: Some(value),
                cost,
                prev: NULL,
                next: NULL,
            });
            idx
        }
    }

    /// Frees `idx`, returning its payload.
    fn take_node(&mut self, idx: usize) -> Option<(K, V, u64)> {
        let key = self.nodes[idx].key.take()?;
        let value = self.nodes[idx].value.take()?;
        let cost = self.nodes[idx].cost;
        self.free_list.push(idx);
        Some((key, value, cost))
    }

    /// Removes and returns the least-recently-used entry, if any.
    fn evict_lru(&mut self) -> Option<(K, V, u64)> {
        let lru_idx = self.nodes[TAIL].prev;
        if lru_idx == HEAD {
            return None; // list is empty
        }
        self.unlink(lru_idx);
        let (key, value, cost) = self.take_node(lru_idx)?;
        self.map.remove(&key);
        Some((key, value, cost))
    }

    /// Evicts from the tail until `total_cost <= budget`, appending victims.
    fn evict_down_to(&mut self, budget: u64, victims: &mut Vec<(K, V)>) {
        while self.total_cost > budget {
            match self.evict_lru() {
                Some((k, v, cost)) => {
                    self.total_cost -= cost;
                    victims.push((k, v));
                }
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Inserts `value` at the MRU position.
    ///
    /// Returns `Ok(victims)` — the entries evicted to make room — or
    /// `Err(value)` when `cost > max_cost` and the entry can never fit.
    /// Room is made *before* the new entry is linked, so an insertion can
    /// never evict itself. An existing entry under the same key is removed
    /// first and returned among the victims.
    pub(crate) fn insert(&mut self, key: K, value: V, cost: u64) -> Result<Vec<(K, V)>, V> {
        if cost > self.max_cost {
            return Err(value);
        }

        let mut victims = Vec::new();
        if let Some(old) = self.remove(&key) {
            victims.push((key.clone(), old));
        }
        self.evict_down_to(self.max_cost - cost, &mut victims);

        let idx = self.alloc_node(key.clone(), value, cost);
        self.map.insert(key, idx);
        self.link_after_head(idx);
        self.total_cost += cost;
        Ok(victims)
    }

    /// Returns the value for `key` and promotes it to MRU.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.link_after_head(idx);
        self.nodes[idx].value.as_ref()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Removes the entry for `key`, returning its value.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let (_, value, cost) = self.take_node(idx)?;
        self.total_cost -= cost;
        Some(value)
    }

    /// Updates the cost limit. Lowering it below `total_cost` evicts from
    /// the LRU end until compliant; the victims are returned. Raising it
    /// never evicts.
    pub(crate) fn set_max_cost(&mut self, max_cost: u64) -> Vec<(K, V)> {
        self.max_cost = max_cost;
        let mut victims = Vec::new();
        self.evict_down_to(max_cost, &mut victims);
        victims
    }

    /// Drops every entry and resets the arena to just the two sentinels.
    pub(crate) fn clear(&mut self) {
        self.nodes.truncate(2);
        self.nodes[HEAD].next = TAIL;
        self.nodes[TAIL].prev = HEAD;
        self.map.clear();
        self.free_list.clear();
        self.total_cost = 0;
    }

    /// Iterates entries from MRU to LRU without touching recency.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut idx = self.nodes[HEAD].next;
        std::iter::from_fn(move || {
            if idx == TAIL {
                return None;
            }
            let node = &self.nodes[idx];
            idx = node.next;
            node.key.as_ref().zip(node.value.as_ref())
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub(crate) fn max_cost(&self) -> u64 {
        self.max_cost
    }
}
