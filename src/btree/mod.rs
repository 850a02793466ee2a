//! B+Tree implementation.
//!
//! Supports point lookups, insertion (with optional overwrite), ascending
//! batch insertion, and ordered range iteration. There is no delete: see
//! DESIGN.md for why that is out of scope.

mod tree;

pub use tree::{BPlusTree, Range};
