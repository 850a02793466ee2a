//! Common types shared across the index: page addressing, node-type tags,
//! and the per-tree configuration that is persisted to the metadata page.

mod page_id;

pub use page_id::PageId;

use serde::{Deserialize, Serialize};

/// Default page size in bytes (4 KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default branching factor.
pub const DEFAULT_ORDER: usize = 100;

/// Default maximum serialized key size in bytes.
pub const DEFAULT_KEY_SIZE: usize = 16;

/// Default maximum inline value size in bytes.
pub const DEFAULT_VALUE_SIZE: usize = 32;

/// Default number of decoded nodes kept in the LRU cache.
pub const DEFAULT_CACHE_SIZE: usize = 64;

/// Bytes used to store a page reference (4 KB pages address up to 16 TB).
pub const PAGE_REFERENCE_BYTES: usize = 4;
/// Bytes used for the node-type tag in a page header.
pub const NODE_TYPE_BYTES: usize = 1;
/// Bytes used for the used-payload-length field in a page header.
pub const USED_PAGE_LENGTH_BYTES: usize = 3;
/// Bytes used for a key-length prefix inside an entry.
pub const USED_KEY_LENGTH_BYTES: usize = 2;
/// Bytes used for a value-length prefix inside a Record entry.
pub const USED_VALUE_LENGTH_BYTES: usize = 2;
/// Bytes used for the frame-type tag in the WAL.
pub const FRAME_TYPE_BYTES: usize = 1;

/// Size in bytes of a page header: 1-byte tag, 3-byte used length, 4-byte
/// next-page pointer.
pub const NODE_HEADER_BYTES: usize =
    NODE_TYPE_BYTES + USED_PAGE_LENGTH_BYTES + PAGE_REFERENCE_BYTES;

/// The tag byte identifying each of the six node types that can occupy a page.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// The only node in a tree small enough to fit in one page.
    LonelyRoot = 1,
    /// Root of a tree with more than one level.
    Root = 2,
    /// Interior node holding References.
    Internal = 3,
    /// Leaf node holding Records, chained via `next_page`.
    Leaf = 4,
    /// Page holding one chunk of an oversized value.
    Overflow = 5,
    /// Page that is free for reuse, linked into the freelist.
    Freelist = 6,
}

impl NodeType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::LonelyRoot),
            2 => Some(Self::Root),
            3 => Some(Self::Internal),
            4 => Some(Self::Leaf),
            5 => Some(Self::Overflow),
            6 => Some(Self::Freelist),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, Self::LonelyRoot | Self::Leaf)
    }

    pub fn is_internal(self) -> bool {
        matches!(self, Self::Root | Self::Internal)
    }
}

/// Immutable per-tree configuration, persisted in the metadata page (page 0)
/// and reloaded verbatim on every open so that a tree is always read back
/// with the parameters it was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeConfig {
    /// Size of a page within the tree file, in bytes.
    pub page_size: usize,
    /// Branching factor: maximum children per internal node.
    pub order: usize,
    /// Maximum size in bytes of a serialized key.
    pub key_size: usize,
    /// Maximum size in bytes of an inline value; larger values spill to
    /// an overflow chain.
    pub value_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            order: DEFAULT_ORDER,
            key_size: DEFAULT_KEY_SIZE,
            value_size: DEFAULT_VALUE_SIZE,
        }
    }
}

impl TreeConfig {
    pub fn new(page_size: usize, order: usize, key_size: usize, value_size: usize) -> Self {
        assert!(order >= 3, "order must be at least 3");
        Self {
            page_size,
            order,
            key_size,
            value_size,
        }
    }

    /// Maximum entries a Leaf/LonelyRoot/Root/Internal node of this tree can hold,
    /// derived from `order` per the branching-parameter table.
    pub fn max_entries(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::LonelyRoot => self.order - 1,
            NodeType::Leaf => self.order - 1,
            NodeType::Root => self.order,
            NodeType::Internal => self.order,
            NodeType::Overflow | NodeType::Freelist => 1,
        }
    }

    /// Minimum entries a node of this tree must hold once it is not the
    /// sole node in the tree.
    pub fn min_entries(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::LonelyRoot => 0,
            NodeType::Leaf => self.order.div_ceil(2) - 1,
            NodeType::Root => 2,
            NodeType::Internal => self.order.div_ceil(2),
            NodeType::Overflow | NodeType::Freelist => 0,
        }
    }

    /// Maximum payload bytes an Overflow node can carry: the page minus its header.
    pub fn overflow_max_payload(&self) -> usize {
        self.page_size - NODE_HEADER_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_byte() {
        for t in [
            NodeType::LonelyRoot,
            NodeType::Root,
            NodeType::Internal,
            NodeType::Leaf,
            NodeType::Overflow,
            NodeType::Freelist,
        ] {
            assert_eq!(NodeType::from_byte(t as u8), Some(t));
        }
        assert_eq!(NodeType::from_byte(0), None);
        assert_eq!(NodeType::from_byte(7), None);
    }

    #[test]
    fn branching_parameters_match_order() {
        let conf = TreeConfig::new(4096, 100, 16, 32);
        assert_eq!(conf.max_entries(NodeType::LonelyRoot), 99);
        assert_eq!(conf.max_entries(NodeType::Leaf), 99);
        assert_eq!(conf.max_entries(NodeType::Root), 100);
        assert_eq!(conf.max_entries(NodeType::Internal), 100);
        assert_eq!(conf.min_entries(NodeType::Leaf), 49);
        assert_eq!(conf.min_entries(NodeType::Internal), 50);
        assert_eq!(conf.min_entries(NodeType::Root), 2);
    }
}
