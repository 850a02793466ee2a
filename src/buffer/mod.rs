//! Decoded-node cache.
//!
//! The OS page cache already handles I/O; this cache exists to avoid
//! re-decoding a page's header and entries on every access. It holds
//! `Node` values, not raw bytes, and is strictly invalidated on rollback
//! since a rolled-back writer may have installed half-mutated nodes.

mod lru;

use std::collections::HashMap;

use lru::LruCache;

use crate::node::Node;
use crate::types::PageId;

/// Bounded cache of decoded nodes keyed by page. A capacity of 0 caches
/// nothing (every `get` misses, every `insert` is a no-op) rather than
/// needing a sentinel "disabled" cache type.
pub struct NodeCache<K> {
    capacity: usize,
    order: LruCache,
    nodes: HashMap<PageId, Node<K>>,
}

impl<K> NodeCache<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: LruCache::new(capacity),
            nodes: HashMap::new(),
        }
    }

    pub fn get(&mut self, page: PageId) -> Option<&Node<K>> {
        if self.capacity == 0 || !self.nodes.contains_key(&page) {
            return None;
        }
        self.order.access(page.value());
        self.nodes.get(&page)
    }

    pub fn insert(&mut self, page: PageId, node: Node<K>) {
        if self.capacity == 0 {
            return;
        }
        if !self.nodes.contains_key(&page) && self.nodes.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_lru() {
                self.nodes.remove(&PageId::new(evicted));
            }
        }
        self.order.access(page.value());
        self.nodes.insert(page, node);
    }

    pub fn remove(&mut self, page: PageId) {
        self.order.remove(page.value());
        self.nodes.remove(&page);
    }

    /// Drop every cached node. Called after a rollback, since some of them
    /// may reflect a partially applied write.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.order = LruCache::new(self.capacity);
    }
}
