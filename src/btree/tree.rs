//! B+Tree core: search, insert, batch insert, split propagation, overflow
//! chains, root growth, and range iteration on top of the [`Pager`].
//!
//! Every public operation goes through [`Transactions`], which serializes
//! writers against readers and (for writes) commits or rolls back the WAL
//! at the end of the call.

use std::path::Path;

use log::debug;
use parking_lot::RwLockReadGuard;

use crate::entry::{OpaqueData, Record, RecordValue, Reference};
use crate::error::{IndexError, LookupError, Result};
use crate::node::{Entries, Node};
use crate::serializer::Serializer;
use crate::storage::Pager;
use crate::transaction::Transactions;
use crate::types::{NodeType, PageId, TreeConfig};
use crate::util::iter_slice;

/// An embedded, ordered key/value index backed by an on-disk B+Tree with a
/// write-ahead log. See the crate-level documentation for an overview.
///
/// `K` is bounded by `Ord + Clone` on every operation: ordering decides
/// where a key lives in the tree, and nodes keep owned copies of the keys
/// they hold rather than borrowing from the caller.
pub struct BPlusTree<K: Ord + Clone> {
    transactions: Transactions<K>,
}

impl<K: Ord + Clone> BPlusTree<K> {
    /// Opens the tree file at `path`, creating it (and writing the initial
    /// `LonelyRoot` page and metadata page) if it does not already exist.
    /// If the file exists, the persisted [`TreeConfig`] in its metadata page
    /// overrides `conf`.
    pub fn open(
        path: impl AsRef<Path>,
        conf: TreeConfig,
        cache_size: usize,
        serializer: Box<dyn Serializer<K>>,
    ) -> Result<Self> {
        let mut pager: Pager<K> = Pager::open(path, conf, serializer, cache_size)?;

        if pager.last_page() == 0 {
            let root_page = pager.next_available_page()?;
            let root = Node::new_lonely_root(root_page);
            pager.set_node(&root)?;
            pager.set_metadata(Some(root_page), None)?;
            pager.commit()?;
        } else {
            pager.get_metadata()?;
        }

        Ok(Self {
            transactions: Transactions::new(pager),
        })
    }

    /// Inserts `key` with `value`. With `replace = false`, fails with
    /// `KeyExists` if the key is already present and leaves the tree
    /// unchanged; with `replace = true`, overwrites it (freeing any
    /// overflow chain the old value used).
    pub fn insert(&self, key: K, value: &[u8], replace: bool) -> Result<()> {
        self.transactions.write(|pager| {
            let path = search_in_tree(pager, &key)?;
            let leaf_page = *path.last().expect("search path is never empty");
            let mut leaf = pager.get_node(leaf_page)?;
            let conf = pager.config().clone();

            match leaf.get_record(&key) {
                Ok(_) => {
                    if !replace {
                        return Err(IndexError::KeyExists);
                    }
                    let existing = leaf.remove_record(&key).expect("just matched above");
                    if let RecordValue::Overflow(first) = existing.value {
                        delete_overflow(pager, first)?;
                    }
                    let record = Record::new(key, build_value(pager, value)?);
                    leaf.insert_record(record);
                    pager.set_node(&leaf)?;
                    Ok(())
                }
                Err(LookupError::NotFound) => {
                    let record = Record::new(key, build_value(pager, value)?);
                    if leaf.can_add_entry(&conf) {
                        leaf.insert_record(record);
                        pager.set_node(&leaf)?;
                    } else {
                        leaf.insert_record(record);
                        split_leaf(pager, &path, leaf)?;
                    }
                    Ok(())
                }
                Err(LookupError::Index(e)) => Err(e),
            }
        })
    }

    /// Looks up `key`. Returns `None` if it is absent; never fails on a
    /// missing key, only on I/O or structural errors.
    pub fn get(&self, key: &K) -> Result<Option<Vec<u8>>> {
        self.transactions.query(|pager| {
            let path = search_in_tree(pager, key)?;
            let leaf = pager.get_node(*path.last().expect("search path is never empty"))?;
            match leaf.get_record(key) {
                Ok(record) => match &record.value {
                    RecordValue::Inline(v) => Ok(Some(v.clone())),
                    RecordValue::Overflow(first) => Ok(Some(read_from_overflow(pager, *first)?)),
                },
                Err(LookupError::NotFound) => Ok(None),
                Err(LookupError::Index(e)) => Err(e),
            }
        })
    }

    /// `true` if `key` is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts every `(key, value)` pair, requiring keys strictly ascending
    /// and each greater than every key already in the tree. On
    /// `OrderViolation` the whole batch is rolled back and the tree is left
    /// unchanged, including any pairs inserted earlier in the same call.
    pub fn batch_insert(&self, items: impl IntoIterator<Item = (K, Vec<u8>)>) -> Result<()> {
        self.transactions.write(|pager| {
            let conf = pager.config().clone();
            let mut path = rightmost_path(pager)?;
            let mut leaf = pager.get_node(*path.last().expect("search path is never empty"))?;
            let mut last_key = if leaf.num_children() > 0 {
                Some(leaf.biggest_key().clone())
            } else {
                None
            };

            for (key, value) in items {
                if let Some(last) = &last_key {
                    if &key <= last {
                        return Err(IndexError::order_violation(
                            "batch_insert requires strictly ascending keys, each greater than any key already in the tree",
                        ));
                    }
                }
                last_key = Some(key.clone());

                let record = Record::new(key, build_value(pager, &value)?);
                let will_overflow = !leaf.can_add_entry(&conf);
                leaf.insert_record_at_the_end(record);

                if will_overflow {
                    split_leaf(pager, &path, leaf)?;
                    path = rightmost_path(pager)?;
                    leaf = pager.get_node(*path.last().expect("search path is never empty"))?;
                }
            }

            pager.set_node(&leaf)?;
            Ok(())
        })
    }

    /// Number of records in the tree, found by walking the leaf chain.
    pub fn len(&self) -> Result<usize> {
        self.transactions.query(|pager| {
            let mut page = left_record_node(pager)?;
            let mut total = 0usize;
            loop {
                let node = pager.get_node(page)?;
                total += node.records().len();
                match node.next_page {
                    Some(next) => page = next,
                    None => return Ok(total),
                }
            }
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// A cheap, approximate record count, analogous to Python's
    /// `__length_hint__`: exact for a `LonelyRoot`, otherwise an estimate
    /// assuming 70% of allocated pages are half-full leaves.
    pub fn size_hint(&self) -> Result<usize> {
        self.transactions.query(|pager| {
            let conf = pager.config().clone();
            let root = pager.get_node(pager.root_page())?;
            if root.kind == NodeType::LonelyRoot {
                Ok(conf.max_entries(NodeType::LonelyRoot) / 2)
            } else {
                let last_page = pager.last_page() as f64;
                let min = conf.min_entries(NodeType::Leaf) as f64;
                let max = conf.max_entries(NodeType::Leaf) as f64;
                Ok((last_page * 0.70 * (min + max) / 2.0) as usize)
            }
        })
    }

    /// Iterates over every record in ascending key order.
    pub fn items(&self) -> Result<Range<'_, K>> {
        self.range(None, None)
    }

    /// Iterates over records with `start <= key < stop`. Either bound may
    /// be omitted; `start >= stop` (when both are given) fails with
    /// `InvalidSlice`.
    pub fn range(&self, start: Option<K>, stop: Option<K>) -> Result<Range<'_, K>> {
        if let (Some(s), Some(t)) = (&start, &stop) {
            if s >= t {
                return Err(IndexError::invalid_slice(
                    "range start must be less than stop",
                ));
            }
        }

        let guard = self.transactions.hold_for_query();
        let leaf_page = match &start {
            None => left_record_node(&guard)?,
            Some(key) => {
                let path = search_in_tree(&guard, key)?;
                *path.last().expect("search path is never empty")
            }
        };
        let node = guard.get_node(leaf_page)?;
        let idx = match &start {
            None => 0,
            Some(key) => node.records().partition_point(|r| &r.key < key),
        };
        let next_page = node.next_page;
        let records = node.records().to_vec();

        Ok(Range {
            guard,
            records,
            idx,
            next_page,
            stop,
            done: false,
        })
    }

    /// Forces every committed WAL page into the tree file and reopens a
    /// fresh WAL. Calling this twice in a row on an idle tree is a no-op
    /// the second time: there is nothing left to transfer.
    pub fn checkpoint(&self) -> Result<()> {
        self.transactions.maintain(|pager| pager.perform_checkpoint(true))
    }

    /// Checkpoints and releases the underlying file handles. After this
    /// call the tree must not be used again; it also runs on `Drop`, so
    /// calling it explicitly is only useful to observe its result.
    pub fn close(&self) -> Result<()> {
        self.transactions.maintain(|pager| pager.close())
    }
}

impl<K: Ord + Clone> Drop for BPlusTree<K> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!("error while closing tree on drop: {err}");
        }
    }
}

/// Returns the descent path from the root to the Leaf/LonelyRoot where
/// `key` would live, inclusive of both ends. Used instead of mutating a
/// transient `parent` pointer on the node: split propagation walks this
/// path back up to find each ancestor that may need a new separator.
fn search_in_tree<K: Ord + Clone>(pager: &Pager<K>, key: &K) -> Result<Vec<PageId>> {
    let mut path = vec![pager.root_page()];
    loop {
        let page = *path.last().expect("path is never empty");
        let node = pager.get_node(page)?;
        if node.kind.is_leaf() {
            return Ok(path);
        }
        path.push(node.child_for_key(key));
    }
}

/// Descent path to the leftmost Leaf/LonelyRoot, used by unbounded range
/// scans and `len()`.
fn left_record_node<K: Ord + Clone>(pager: &Pager<K>) -> Result<PageId> {
    let mut page = pager.root_page();
    loop {
        let node = pager.get_node(page)?;
        if node.kind.is_leaf() {
            return Ok(page);
        }
        page = node
            .references()
            .first()
            .expect("internal node has no references")
            .before;
    }
}

/// Descent path to the rightmost Leaf/LonelyRoot, used by `batch_insert` to
/// find (and re-find, after a split) the leaf new ascending keys append to.
fn rightmost_path<K: Ord + Clone>(pager: &mut Pager<K>) -> Result<Vec<PageId>> {
    let mut path = vec![pager.root_page()];
    loop {
        let page = *path.last().expect("path is never empty");
        let node = pager.get_node(page)?;
        if node.kind.is_leaf() {
            return Ok(path);
        }
        let after = node
            .references()
            .last()
            .expect("internal node has no references")
            .after;
        path.push(after);
    }
}

/// Splits an over-full Leaf or LonelyRoot in two, propagating a new
/// separator reference up the tree (recursing into `split_parent`, or
/// growing a new root, as needed). `path` is the full descent path ending
/// in `old.page`.
fn split_leaf<K: Ord + Clone>(pager: &mut Pager<K>, path: &[PageId], mut old: Node<K>) -> Result<()> {
    let new_page = pager.next_available_page()?;
    let mut new_node = Node::new_leaf(new_page);
    new_node.next_page = old.next_page;
    let upper = old.split_records();
    new_node.set_records(upper);

    let separator = Reference::new(new_node.smallest_key().clone(), old.page, new_node.page);

    let was_lonely_root = old.kind == NodeType::LonelyRoot;
    if was_lonely_root {
        old.convert_lonely_root_to_leaf();
    }
    old.next_page = Some(new_node.page);
    pager.set_node(&old)?;
    pager.set_node(&new_node)?;

    if was_lonely_root {
        return create_new_root(pager, separator);
    }

    let conf = pager.config().clone();
    let parent_page = path[path.len() - 2];
    let mut parent = pager.get_node(parent_page)?;
    if parent.can_add_entry(&conf) {
        parent.insert_reference(separator);
        pager.set_node(&parent)
    } else {
        parent.insert_reference(separator);
        split_parent(pager, &path[..path.len() - 1], parent)
    }
}

/// Splits an over-full Root or Internal node, propagating the promoted
/// separator up the tree. `path` is the full descent path ending in
/// `old.page`.
fn split_parent<K: Ord + Clone>(pager: &mut Pager<K>, path: &[PageId], mut old: Node<K>) -> Result<()> {
    let new_page = pager.next_available_page()?;
    let mut new_node = Node::new_internal(new_page);
    let upper = old.split_references();
    new_node.set_references(upper);

    let mut separator = new_node.take_smallest_reference();
    separator.set_before(old.page);
    separator.set_after(new_node.page);

    let was_root = old.kind == NodeType::Root;
    if was_root {
        old.convert_root_to_internal();
    }
    pager.set_node(&old)?;
    pager.set_node(&new_node)?;

    if was_root {
        return create_new_root(pager, separator);
    }

    let conf = pager.config().clone();
    if path.len() < 2 {
        unreachable!("a non-root Internal node always has an ancestor in its descent path");
    }
    let grandparent_page = path[path.len() - 2];
    let mut grandparent = pager.get_node(grandparent_page)?;
    if grandparent.can_add_entry(&conf) {
        grandparent.insert_reference(separator);
        pager.set_node(&grandparent)
    } else {
        grandparent.insert_reference(separator);
        split_parent(pager, &path[..path.len() - 1], grandparent)
    }
}

/// Allocates a fresh Root page holding `separator` and points the tree's
/// metadata at it. Used whenever the prior root (LonelyRoot or Root) just
/// split and the tree grew a level.
fn create_new_root<K: Ord + Clone>(pager: &mut Pager<K>, separator: Reference<K>) -> Result<()> {
    let new_root_page = pager.next_available_page()?;
    let mut root = Node::new_root(new_root_page);
    root.insert_reference(separator);
    pager.set_node(&root)?;
    pager.set_metadata(Some(new_root_page), None)
}

/// Builds the `RecordValue` for `value`: inline if it fits within the
/// tree's configured `value_size`, otherwise spilled into a fresh overflow
/// chain.
fn build_value<K: Ord + Clone>(pager: &mut Pager<K>, value: &[u8]) -> Result<RecordValue> {
    let conf = pager.config().clone();
    if value.len() <= conf.value_size {
        return Ok(RecordValue::Inline(value.to_vec()));
    }

    let max_payload = conf.overflow_max_payload() as u64;
    if (value.len() as u64).div_ceil(max_payload) > u32::MAX as u64 {
        return Err(IndexError::invalid_argument(
            "value is too large to represent as an overflow chain",
        ));
    }
    Ok(RecordValue::Overflow(create_overflow(pager, value)?))
}

/// Chunks `value` into `max_payload`-sized Overflow pages chained by
/// `next_page`, and returns the page number of the first chunk.
fn create_overflow<K: Ord + Clone>(pager: &mut Pager<K>, value: &[u8]) -> Result<PageId> {
    let max_payload = pager.config().overflow_max_payload();

    let mut first_page = None;
    let mut prev: Option<Node<K>> = None;

    for (chunk, _is_last) in iter_slice(value, max_payload) {
        let page = pager.next_available_page()?;
        let mut node = Node::new_overflow(page);
        node.entries = Entries::Overflow(OpaqueData::new(chunk.to_vec()));

        if first_page.is_none() {
            first_page = Some(page);
        }
        if let Some(mut prev_node) = prev.take() {
            prev_node.next_page = Some(page);
            pager.set_node(&prev_node)?;
        }
        prev = Some(node);
    }

    if let Some(node) = prev {
        pager.set_node(&node)?;
    }

    first_page.ok_or_else(|| IndexError::invalid_argument("cannot store an empty value as overflow"))
}

/// Walks an overflow chain from `first`, concatenating each page's payload
/// into the original value.
fn read_from_overflow<K: Ord + Clone>(pager: &Pager<K>, first: PageId) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut page = Some(first);
    while let Some(p) = page {
        let node = pager.get_node(p)?;
        match &node.entries {
            Entries::Overflow(data) => out.extend_from_slice(&data.data),
            _ => return Err(IndexError::corrupt(format!("page {p} is not an overflow node"))),
        }
        page = node.next_page;
    }
    Ok(out)
}

/// Frees every page in an overflow chain starting at `first`.
fn delete_overflow<K: Ord + Clone>(pager: &mut Pager<K>, first: PageId) -> Result<()> {
    let mut page = Some(first);
    while let Some(p) = page {
        let node = pager.get_node(p)?;
        page = node.next_page;
        pager.del_node(&node)?;
    }
    Ok(())
}

/// A streaming, forward-only iterator over a key range, holding the
/// pager's shared read lock for its lifetime: it can run alongside any
/// number of other queries and other range scans, excluded only by an
/// active writer.
pub struct Range<'a, K: Ord + Clone> {
    guard: RwLockReadGuard<'a, Pager<K>>,
    records: Vec<Record<K>>,
    idx: usize,
    next_page: Option<PageId>,
    stop: Option<K>,
    done: bool,
}

impl<K: Ord + Clone> Iterator for Range<'_, K> {
    type Item = Result<(K, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.idx >= self.records.len() {
                let Some(next_page) = self.next_page else {
                    self.done = true;
                    return None;
                };
                match self.guard.get_node(next_page) {
                    Ok(node) => {
                        self.next_page = node.next_page;
                        self.records = node.records().to_vec();
                        self.idx = 0;
                        continue;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let record = &self.records[self.idx];
            if let Some(stop) = &self.stop {
                if &record.key >= stop {
                    self.done = true;
                    return None;
                }
            }

            let key = record.key.clone();
            let value = record.value.clone();
            self.idx += 1;

            return Some(match value {
                RecordValue::Inline(bytes) => Ok((key, bytes)),
                RecordValue::Overflow(first) => {
                    read_from_overflow(&self.guard, first).map(|bytes| (key, bytes))
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::IntSerializer;
    use tempfile::tempdir;

    fn small_tree(dir: &std::path::Path) -> BPlusTree<u64> {
        let conf = TreeConfig::new(256, 4, 8, 8);
        BPlusTree::open(dir.join("t.idx"), conf, 8, Box::new(IntSerializer)).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        tree.insert(5, b"foo", false).unwrap();
        assert_eq!(tree.get(&5).unwrap(), Some(b"foo".to_vec()));
        assert_eq!(tree.get(&6).unwrap(), None);
    }

    #[test]
    fn insert_survives_close_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        {
            let conf = TreeConfig::new(256, 4, 8, 8);
            let tree: BPlusTree<u64> =
                BPlusTree::open(&path, conf, 8, Box::new(IntSerializer)).unwrap();
            tree.insert(5, b"foo", false).unwrap();
            tree.close().unwrap();
        }
        let conf = TreeConfig::new(256, 4, 8, 8);
        let tree: BPlusTree<u64> = BPlusTree::open(&path, conf, 8, Box::new(IntSerializer)).unwrap();
        assert_eq!(tree.get(&5).unwrap(), Some(b"foo".to_vec()));
    }

    #[test]
    fn duplicate_insert_without_replace_fails_and_leaves_tree_unchanged() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        tree.insert(1, b"foo", false).unwrap();
        assert!(matches!(
            tree.insert(1, b"bar", false),
            Err(IndexError::KeyExists)
        ));
        assert_eq!(tree.get(&1).unwrap(), Some(b"foo".to_vec()));

        tree.insert(1, b"baz", true).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(b"baz".to_vec()));
    }

    #[test]
    fn insert_past_lonely_root_capacity_splits_and_grows_a_root() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        for k in 0..50u64 {
            tree.insert(k, k.to_string().as_bytes(), false).unwrap();
        }
        for k in 0..50u64 {
            assert_eq!(tree.get(&k).unwrap(), Some(k.to_string().into_bytes()));
        }
        assert_eq!(tree.len().unwrap(), 50);
    }

    #[test]
    fn items_yields_ascending_order_across_many_leaves() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        for k in (0..200u64).rev() {
            tree.insert(k, k.to_string().as_bytes(), false).unwrap();
        }
        let pairs: Vec<(u64, Vec<u8>)> =
            tree.items().unwrap().collect::<Result<Vec<_>>>().unwrap();
        let keys: Vec<u64> = pairs.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(pairs.len(), 200);
        for (k, v) in &pairs {
            assert_eq!(*v, k.to_string().into_bytes());
        }
    }

    #[test]
    fn range_respects_start_and_stop_bounds() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        for k in 0..30u64 {
            tree.insert(k, b"v", false).unwrap();
        }
        let pairs: Vec<(u64, Vec<u8>)> = tree
            .range(Some(10), Some(15))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let keys: Vec<u64> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn range_rejects_start_not_less_than_stop() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        tree.insert(1, b"v", false).unwrap();
        assert!(matches!(
            tree.range(Some(5), Some(5)),
            Err(IndexError::InvalidSlice(_))
        ));
    }

    #[test]
    fn batch_insert_rejects_non_ascending_keys_and_leaves_no_partial_state() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        let result = tree.batch_insert(vec![(2u64, b"2".to_vec()), (1u64, b"1".to_vec())]);
        assert!(matches!(result, Err(IndexError::OrderViolation(_))));
        assert_eq!(tree.get(&1).unwrap(), None);
        assert_eq!(tree.get(&2).unwrap(), None);
    }

    #[test]
    fn batch_insert_appends_many_keys_and_splits_as_needed() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        let items: Vec<(u64, Vec<u8>)> = (0..500u64).map(|k| (k, k.to_string().into_bytes())).collect();
        tree.batch_insert(items).unwrap();
        assert_eq!(tree.len().unwrap(), 500);
        for k in [0u64, 1, 250, 499] {
            assert_eq!(tree.get(&k).unwrap(), Some(k.to_string().into_bytes()));
        }
    }

    #[test]
    fn large_value_spills_into_overflow_chain() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        let value = vec![b'f'; 5000];
        tree.insert(1u64, &value, false).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(value));
    }

    #[test]
    fn replacing_an_overflow_value_frees_the_old_chain() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        tree.insert(1u64, &vec![b'a'; 5000], false).unwrap();
        tree.insert(1u64, b"small", true).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(b"small".to_vec()));
    }

    #[test]
    fn surviving_a_simulated_crash_recovers_committed_writes_and_removes_the_wal() {
        let _ = env_logger::try_init();
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let mut wal_name = path.clone().into_os_string();
        wal_name.push("-wal");
        let wal_path = std::path::PathBuf::from(wal_name);

        {
            let conf = TreeConfig::new(256, 4, 8, 8);
            let tree: BPlusTree<u64> =
                BPlusTree::open(&path, conf, 8, Box::new(IntSerializer)).unwrap();
            tree.insert(1, b"foo", false).unwrap();
            // Leaked, not closed: simulates a crash before an orderly shutdown.
            std::mem::forget(tree);
        }
        assert!(wal_path.exists());

        let conf = TreeConfig::new(256, 4, 8, 8);
        let tree: BPlusTree<u64> = BPlusTree::open(&path, conf, 8, Box::new(IntSerializer)).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(b"foo".to_vec()));
        assert!(!wal_path.exists());
    }

    #[test]
    fn checkpoint_twice_in_a_row_is_a_no_op_the_second_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let conf = TreeConfig::new(256, 4, 8, 8);
        let tree: BPlusTree<u64> = BPlusTree::open(&path, conf, 8, Box::new(IntSerializer)).unwrap();
        tree.insert(1, b"foo", false).unwrap();
        tree.checkpoint().unwrap();

        let mut wal_name = path.clone().into_os_string();
        wal_name.push("-wal");
        let wal_len_after_first = std::fs::metadata(&wal_name).unwrap().len();

        tree.checkpoint().unwrap();
        let wal_len_after_second = std::fs::metadata(&wal_name).unwrap().len();
        assert_eq!(wal_len_after_first, wal_len_after_second);
        assert_eq!(tree.get(&1).unwrap(), Some(b"foo".to_vec()));
    }

    #[test]
    fn close_is_idempotent_when_drop_runs_after_an_explicit_close() {
        let dir = tempdir().unwrap();
        let conf = TreeConfig::new(256, 4, 8, 8);
        let tree: BPlusTree<u64> =
            BPlusTree::open(dir.path().join("t.idx"), conf, 8, Box::new(IntSerializer)).unwrap();
        tree.insert(1, b"foo", false).unwrap();
        tree.close().unwrap();
        // `tree` is dropped here, invoking `Drop::close` a second time; it
        // must not panic.
    }

    #[test]
    fn order_violation_without_any_split_leaves_no_partial_state() {
        let dir = tempdir().unwrap();
        let tree = small_tree(dir.path());
        // Few enough keys that the whole run fits in the LonelyRoot without
        // splitting, so this exercises rollback of buffered-but-uncommitted
        // record inserts rather than of a page split.
        let result = tree.batch_insert(vec![
            (1u64, b"1".to_vec()),
            (2u64, b"2".to_vec()),
            (1u64, b"repeat".to_vec()),
        ]);
        assert!(matches!(result, Err(IndexError::OrderViolation(_))));
        assert_eq!(tree.len().unwrap(), 0);
        assert_eq!(tree.get(&1).unwrap(), None);
        assert_eq!(tree.get(&2).unwrap(), None);
    }

    #[test]
    fn random_distinct_keys_all_round_trip_after_reopen() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let _ = env_logger::try_init();
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");

        let mut keys: Vec<u64> = (0..300).collect();
        let mut rng = StdRng::seed_from_u64(42);
        keys.shuffle(&mut rng);

        {
            let conf = TreeConfig::new(512, 5, 8, 8);
            let tree: BPlusTree<u64> =
                BPlusTree::open(&path, conf, 16, Box::new(IntSerializer)).unwrap();
            for &k in &keys {
                tree.insert(k, k.to_string().as_bytes(), false).unwrap();
            }
        }

        let conf = TreeConfig::new(512, 5, 8, 8);
        let tree: BPlusTree<u64> = BPlusTree::open(&path, conf, 16, Box::new(IntSerializer)).unwrap();
        for &k in &keys {
            assert_eq!(tree.get(&k).unwrap(), Some(k.to_string().into_bytes()));
        }
        assert_eq!(tree.len().unwrap(), 300);
    }
}
