//! # bplustree-index
//!
//! An embedded, single-file, ordered key/value index backed by an on-disk
//! B+Tree with write-ahead logging.
//!
//! ## Architecture
//!
//! - **Types** (`types`): page addressing, node-type tags, per-tree
//!   configuration.
//! - **Entry** (`entry`) and **Node** (`node`): the fixed-width page
//!   payload codec and the six node-type variants built on top of it.
//! - **Storage** (`storage`): the write-ahead log and the page manager.
//! - **Buffer** (`buffer`): the decoded-node LRU cache.
//! - **Transaction** (`transaction`): reader/writer coordination around
//!   the pager.
//! - **B+Tree** (`btree`): search, insert, batch insert, split
//!   propagation, overflow chains, and range iteration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bplustree_index::{BPlusTree, Config, IntSerializer};
//!
//! let config = Config::new("my_index.db");
//! let tree: BPlusTree<u64> = config.open(Box::new(IntSerializer))?;
//!
//! tree.insert(1, b"hello", false)?;
//! assert_eq!(tree.get(&1)?, Some(b"hello".to_vec()));
//!
//! for pair in tree.items()? {
//!     let (key, value) = pair?;
//!     println!("{key} -> {value:?}");
//! }
//! # Ok::<(), bplustree_index::Error>(())
//! ```

pub mod btree;
pub mod buffer;
pub mod entry;
pub mod error;
pub mod node;
pub mod serializer;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod util;

pub use btree::{BPlusTree, Range};
pub use error::{IndexError as Error, Result};
pub use serializer::{DatetimeSerializer, IntSerializer, Serializer, StrSerializer, UuidSerializer};
pub use types::{NodeType, PageId, TreeConfig, DEFAULT_CACHE_SIZE};

use std::path::{Path, PathBuf};

/// Builds the parameters a tree is opened with.
///
/// Mirrors `TreeConfig`'s fields plus the two knobs that are not part of
/// the persisted on-disk configuration: the decoded-node cache size and
/// the file path.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    tree_config: TreeConfig,
    cache_size: usize,
}

impl Config {
    /// A configuration with default page size, order, key size, value
    /// size, and cache size, pointed at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            tree_config: TreeConfig::default(),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    /// Overrides every `TreeConfig` field at once. Has no effect on a tree
    /// file that already exists: its persisted metadata page wins.
    pub fn tree_config(mut self, tree_config: TreeConfig) -> Self {
        self.tree_config = tree_config;
        self
    }

    /// Page size in bytes. Ignored when reopening an existing tree file.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.tree_config.page_size = page_size;
        self
    }

    /// Branching factor. Ignored when reopening an existing tree file.
    pub fn order(mut self, order: usize) -> Self {
        self.tree_config.order = order;
        self
    }

    /// Maximum serialized key size in bytes. Ignored when reopening an
    /// existing tree file.
    pub fn key_size(mut self, key_size: usize) -> Self {
        self.tree_config.key_size = key_size;
        self
    }

    /// Maximum inline value size in bytes; larger values spill to an
    /// overflow chain. Ignored when reopening an existing tree file.
    pub fn value_size(mut self, value_size: usize) -> Self {
        self.tree_config.value_size = value_size;
        self
    }

    /// Number of decoded nodes to keep cached. 0 disables the cache.
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Opens (or creates) the tree described by this configuration.
    pub fn open<K: Ord + Clone>(&self, serializer: Box<dyn Serializer<K>>) -> Result<BPlusTree<K>> {
        BPlusTree::open(&self.path, self.tree_config.clone(), self.cache_size, serializer)
    }

    /// Path this configuration opens.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_opens_and_round_trips_a_value() {
        let dir = tempdir().unwrap();
        let tree: BPlusTree<u64> = Config::new(dir.path().join("t.idx"))
            .tree_config(TreeConfig::new(256, 4, 8, 8))
            .open(Box::new(IntSerializer))
            .unwrap();

        tree.insert(1, b"value1", false).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(b"value1".to_vec()));

        tree.insert(1, b"value2", true).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(b"value2".to_vec()));

        assert_eq!(tree.get(&2).unwrap(), None);
        assert!(matches!(tree.insert(1, b"value3", false), Err(Error::KeyExists)));
    }

    #[test]
    fn individual_setters_compose_like_tree_config() {
        let dir = tempdir().unwrap();
        let tree: BPlusTree<u64> = Config::new(dir.path().join("t.idx"))
            .page_size(256)
            .order(4)
            .key_size(8)
            .value_size(8)
            .open(Box::new(IntSerializer))
            .unwrap();

        tree.insert(3, b"three", false).unwrap();
        assert_eq!(tree.get(&3).unwrap(), Some(b"three".to_vec()));
    }

    #[test]
    fn range_scan_over_string_keys() {
        let dir = tempdir().unwrap();
        let tree: BPlusTree<String> = Config::new(dir.path().join("t.idx"))
            .tree_config(TreeConfig::new(512, 4, 16, 16))
            .open(Box::new(StrSerializer))
            .unwrap();

        tree.insert("apple".to_string(), b"1", false).unwrap();
        tree.insert("banana".to_string(), b"2", false).unwrap();
        tree.insert("cherry".to_string(), b"3", false).unwrap();
        tree.insert("date".to_string(), b"4", false).unwrap();

        let all: Vec<(String, Vec<u8>)> = tree.items().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(all.len(), 4);

        let range: Vec<(String, Vec<u8>)> = tree
            .range(Some("banana".to_string()), Some("date".to_string()))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, "banana");
        assert_eq!(range[1].0, "cherry");
    }

    #[test]
    fn tree_survives_close_and_reopen_through_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let conf = Config::new(&path).tree_config(TreeConfig::new(256, 4, 8, 8));

        {
            let tree: BPlusTree<u64> = conf.open(Box::new(IntSerializer)).unwrap();
            tree.insert(7, b"seven", false).unwrap();
        }

        let tree: BPlusTree<u64> = conf.open(Box::new(IntSerializer)).unwrap();
        assert_eq!(tree.get(&7).unwrap(), Some(b"seven".to_vec()));
    }
}
