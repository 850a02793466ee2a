//! Reader/writer coordination around a [`Pager`].
//!
//! A write transaction commits the WAL on success and rolls it back (and
//! clears the decoded-node cache, since a half-mutated node may have been
//! cached along the way) on failure. A query, by contrast, takes the lock's
//! shared side: many queries run concurrently with each other, excluded
//! only by an active writer. Nothing a query touches needs the exclusive
//! side of the lock, since the decoded-node cache has its own internal
//! lock and page reads use the file's positional-read API rather than its
//! shared seek cursor; see [`Pager`]'s doc comment.

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::storage::Pager;

/// Guards a [`Pager`] behind a single reader/writer lock.
pub struct Transactions<K> {
    pager: RwLock<Pager<K>>,
}

impl<K> Transactions<K> {
    pub fn new(pager: Pager<K>) -> Self {
        Self {
            pager: RwLock::new(pager),
        }
    }

    /// Runs `f` under the lock's shared side. Any number of queries can run
    /// at once; a concurrent writer blocks until they all finish.
    pub fn query<T>(&self, f: impl FnOnce(&Pager<K>) -> Result<T>) -> Result<T>
    where
        K: Ord + Clone,
    {
        let guard = self.pager.read();
        f(&guard)
    }

    /// Runs `f` under the lock; commits on success, rolls back and clears
    /// the cache on failure.
    pub fn write<T>(&self, f: impl FnOnce(&mut Pager<K>) -> Result<T>) -> Result<T>
    where
        K: Ord + Clone,
    {
        let mut guard = self.pager.write();
        match f(&mut guard) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(err) => {
                guard.rollback();
                Err(err)
            }
        }
    }

    /// Runs `f` under the lock's exclusive side without touching the WAL's
    /// commit state. For pager maintenance (`checkpoint`/`close`) that
    /// manages the WAL's lifetime directly and must not run alongside a
    /// query or a writer, rather than for an actual read/write transaction.
    pub fn maintain<T>(&self, f: impl FnOnce(&mut Pager<K>) -> Result<T>) -> Result<T>
    where
        K: Ord + Clone,
    {
        let mut guard = self.pager.write();
        f(&mut guard)
    }

    /// Acquires the lock's shared side for the lifetime of a streaming
    /// reader, such as a range iterator that walks the leaf chain across
    /// many calls.
    pub fn hold_for_query(&self) -> RwLockReadGuard<'_, Pager<K>> {
        self.pager.read()
    }
}
