//! Storage layer: the write-ahead log and the page manager built on top of it.

mod pager;
mod wal;

pub use pager::Pager;
