//! LRU ordering
//!
//! Doubly linked recency list stored in a slab, plus a key → slot map.

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::CapacityPolicy;
use crate::record;

const NIL: usize = usize::MAX;

struct Node {
    key: String,
    value: Option<Bytes>,
    weight: usize,
    prev: usize,
    next: usize,
}

/// Recency-ordered entries bounded by a capacity policy
///
/// The head is the most recently used entry. Every insert is followed by
/// eviction from the tail until the tracked weight fits the capacity.
pub(crate) struct LruList {
    policy: CapacityPolicy,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    map: HashMap<String, usize>,
    head: usize,
    tail: usize,
    weight: usize,
}

impl LruList {
    pub(crate) fn new(policy: CapacityPolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
            free: Vec::new(),
            map: HashMap::new(),
            head: NIL,
            tail: NIL,
            weight: 0,
        }
    }

    /// Units `key`/`value` count against capacity
    pub(crate) fn weigh(&self, key: &str, value: Option<&Bytes>) -> usize {
        match self.policy {
            CapacityPolicy::Count(_) => 1,
            CapacityPolicy::Size(_) => {
                record::encoded_len(key.as_bytes(), value.map_or(&[][..], |v| &v[..]))
            }
        }
    }

    /// Move `key` to the head if present; insert it key-only otherwise.
    /// Returns whether it was present, plus the evicted keys.
    pub(crate) fn touch(&mut self, key: &str) -> (bool, Vec<String>) {
        if let Some(&slot) = self.map.get(key) {
            self.move_to_head(slot);
            return (true, Vec::new());
        }
        (false, self.insert_new(key.to_string(), None))
    }

    /// Insert or replace `key` with `value` at the head; returns evicted keys
    pub(crate) fn put(&mut self, key: &str, value: Option<Bytes>) -> Vec<String> {
        if let Some(&slot) = self.map.get(key) {
            let weight = self.weigh(key, value.as_ref());
            if let Some(node) = self.slots[slot].as_mut() {
                self.weight = self.weight - node.weight + weight;
                node.weight = weight;
                node.value = value;
            }
            self.move_to_head(slot);
            return self.evict();
        }
        self.insert_new(key.to_string(), value)
    }

    /// Drop the value held for `key`, keeping the key and its position
    pub(crate) fn demote(&mut self, key: &str) -> bool {
        let Some(&slot) = self.map.get(key) else {
            return false;
        };
        let weight = self.weigh(key, None);
        match self.slots[slot].as_mut() {
            Some(node) if node.value.is_some() => {
                self.weight = self.weight - node.weight + weight;
                node.weight = weight;
                node.value = None;
                true
            }
            _ => false,
        }
    }

    /// Look up `key`, moving it to the head on a hit
    pub(crate) fn get(&mut self, key: &str) -> Option<Option<Bytes>> {
        let slot = *self.map.get(key)?;
        self.move_to_head(slot);
        self.slots[slot].as_ref().map(|node| node.value.clone())
    }

    /// Presence check without touching recency
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        match self.map.get(key) {
            Some(&slot) => {
                self.release(slot);
                true
            }
            None => false,
        }
    }

    /// Entries from least to most recently used
    pub(crate) fn entries_lru_first(&self) -> Vec<(String, Option<Bytes>)> {
        let mut out = Vec::with_capacity(self.map.len());
        let mut cursor = self.tail;
        while let Some(node) = self.node(cursor) {
            out.push((node.key.clone(), node.value.clone()));
            cursor = node.prev;
        }
        out
    }

    /// Keys from most to least recently used
    pub(crate) fn keys_mru_first(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(node) = self.node(cursor) {
            out.push(node.key.clone());
            cursor = node.next;
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn weight(&self) -> usize {
        self.weight
    }

    pub(crate) fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn insert_new(&mut self, key: String, value: Option<Bytes>) -> Vec<String> {
        let weight = self.weigh(&key, value.as_ref());
        let node = Node {
            key: key.clone(),
            value,
            weight,
            prev: NIL,
            next: NIL,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.map.insert(key, slot);
        self.weight += weight;
        self.link_at_head(slot);
        self.evict()
    }

    /// Drop tail entries while over capacity
    fn evict(&mut self) -> Vec<String> {
        let capacity = self.policy.capacity();
        let mut evicted = Vec::new();
        while self.weight > capacity && self.tail != NIL {
            let tail = self.tail;
            if let Some(key) = self.release(tail) {
                evicted.push(key);
            }
        }
        evicted
    }

    /// Unlink and free a slot, returning its key
    fn release(&mut self, slot: usize) -> Option<String> {
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        self.map.remove(&node.key);
        self.weight -= node.weight;
        Some(node.key)
    }

    fn move_to_head(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.link_at_head(slot);
    }

    fn link_at_head(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = NIL;
            node.next = old_head;
        }
        match self.slots.get_mut(old_head).and_then(Option::as_mut) {
            Some(head) => head.prev = slot,
            None => self.tail = slot,
        }
        self.head = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };

        match self.slots.get_mut(prev).and_then(Option::as_mut) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match self.slots.get_mut(next).and_then(Option::as_mut) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }
}
