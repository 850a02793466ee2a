//! Page manager: owns the tree file, the attached WAL, the decoded-node
//! cache, and the freelist. This is the only component that touches file
//! offsets directly; everything above it deals in `Node`s and `PageId`s.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::info;
use parking_lot::Mutex;

use crate::buffer::NodeCache;
use crate::error::{IndexError, Result};
use crate::node::Node;
use crate::serializer::Serializer;
use crate::storage::wal::Wal;
use crate::types::{PageId, TreeConfig};

use super::wal::{open_file_and_dir, read_exact_at};

/// Owns the on-disk tree file and coordinates it with the WAL and the
/// decoded-node cache.
///
/// Most methods here take `&self`, not `&mut self`: `Transactions` lets many
/// readers hold a shared lock on the pager at once, so any state a read
/// touches (the decoded-node cache) needs interior mutability, and reading
/// the tree file or the WAL's buffered pages uses positional reads instead
/// of the file's shared seek cursor. Only methods that durably mutate the
/// tree (`set_node`, `next_available_page`, `del_page`, `set_metadata`,
/// `commit`/`rollback`/`close`) take `&mut self`; those only ever run under
/// a writer's exclusive lock.
pub struct Pager<K> {
    path: PathBuf,
    file: File,
    dir_file: Option<File>,
    conf: TreeConfig,
    serializer: Box<dyn Serializer<K>>,
    cache: Mutex<NodeCache<K>>,
    wal: Option<Wal>,
    last_page: u32,
    freelist_start_page: u32,
    root_node_page: u32,
}

impl<K> Pager<K> {
    pub fn open(
        path: impl AsRef<Path>,
        conf: TreeConfig,
        serializer: Box<dyn Serializer<K>>,
        cache_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (mut file, dir_file) = open_file_and_dir(&path)?;

        // An existing tree's page size always wins over whatever the caller
        // passed in: the WAL frame layout and `last_page` below both depend
        // on it, and both must agree with the page size the file was
        // actually written with, not the constructor's default.
        let existing_len = file.seek(SeekFrom::End(0))?;
        let conf = if existing_len == 0 {
            conf
        } else {
            Self::adopt_persisted_page_size(&mut file, conf)?
        };

        let (wal, needs_recovery) = Wal::open(&path, conf.page_size)?;

        let mut pager = Self {
            path,
            file,
            dir_file,
            conf,
            serializer,
            cache: Mutex::new(NodeCache::new(cache_size)),
            wal: Some(wal),
            last_page: 0,
            freelist_start_page: 0,
            root_node_page: 0,
        };

        if needs_recovery {
            pager.perform_checkpoint(true)?;
        }

        let file_len = pager.file.seek(SeekFrom::End(0))?;
        let page_size = pager.conf.page_size as u64;
        pager.last_page = if file_len < page_size {
            0
        } else {
            (file_len / page_size) as u32 - 1
        };

        Ok(pager)
    }

    /// Reads just the page-size field out of an existing metadata page, at
    /// the fixed byte offset `set_metadata`/`write_metadata` always place it
    /// at. This does not require knowing the page size itself, so it can run
    /// before the page size is known, and it lets a reopen always adopt the
    /// persisted page size rather than the one it was constructed with.
    fn adopt_persisted_page_size(file: &mut File, fallback: TreeConfig) -> Result<TreeConfig> {
        file.seek(SeekFrom::Start(4))?;
        let mut buf = [0u8; 4];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(TreeConfig {
                page_size: u32::from_le_bytes(buf) as usize,
                ..fallback
            }),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(IndexError::corrupt(
                "tree file is too short to contain a metadata page",
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.conf
    }

    pub fn serializer(&self) -> &dyn Serializer<K> {
        self.serializer.as_ref()
    }

    fn wal_mut(&mut self) -> &mut Wal {
        self.wal.as_mut().expect("pager used after close")
    }

    fn wal(&self) -> &Wal {
        self.wal.as_ref().expect("pager used after close")
    }

    pub fn get_node(&self, page: PageId) -> Result<Node<K>>
    where
        K: Ord + Clone,
    {
        if let Some(node) = self.cache.lock().get(page) {
            return Ok(node.clone());
        }

        let data = match self.wal().get_page(page.value())? {
            Some(bytes) => bytes,
            None => self.read_page_from_tree_file(page)?,
        };
        let node = Node::from_page_data(&self.conf, self.serializer.as_ref(), &data, page)?;
        self.cache.lock().insert(page, node.clone());
        Ok(node)
    }

    pub fn set_node(&mut self, node: &Node<K>) -> Result<()>
    where
        K: Ord + Clone,
    {
        let bytes = node.dump(&self.conf, self.serializer.as_ref())?;
        self.wal_mut().set_page(node.page.value(), &bytes)?;
        self.cache.lock().insert(node.page, node.clone());
        Ok(())
    }

    pub fn del_node(&mut self, node: &Node<K>) -> Result<()>
    where
        K: Ord + Clone,
    {
        self.del_page(node.page)
    }

    pub fn del_page(&mut self, page: PageId) -> Result<()>
    where
        K: Ord + Clone,
    {
        self.cache.lock().remove(page);
        self.insert_in_freelist(page)
    }

    pub fn next_available_page(&mut self) -> Result<PageId>
    where
        K: Ord + Clone,
    {
        if let Some(page) = self.pop_from_freelist()? {
            return Ok(page);
        }
        self.last_page += 1;
        Ok(PageId::new(self.last_page))
    }

    fn traverse_free_list(&mut self) -> Result<(Option<PageId>, Option<PageId>)>
    where
        K: Ord + Clone,
    {
        if self.freelist_start_page == 0 {
            return Ok((None, None));
        }

        let mut second_to_last = None;
        let mut last = PageId::new(self.freelist_start_page);
        let mut last_node = self.get_node(last)?;
        while let Some(next) = last_node.next_page {
            second_to_last = Some(last);
            last = next;
            last_node = self.get_node(last)?;
        }
        Ok((second_to_last, Some(last)))
    }

    fn insert_in_freelist(&mut self, page: PageId) -> Result<()>
    where
        K: Ord + Clone,
    {
        let (_, last) = self.traverse_free_list()?;
        self.set_node(&Node::<K>::new_freelist(page))?;

        match last {
            None => {
                self.freelist_start_page = page.value();
                self.write_metadata()?;
            }
            Some(last_page) => {
                let mut last_node = self.get_node(last_page)?;
                last_node.next_page = Some(page);
                self.set_node(&last_node)?;
            }
        }
        Ok(())
    }

    fn pop_from_freelist(&mut self) -> Result<Option<PageId>>
    where
        K: Ord + Clone,
    {
        let (second_to_last, last) = self.traverse_free_list()?;
        let Some(last_page) = last else {
            return Ok(None);
        };

        match second_to_last {
            None => {
                self.freelist_start_page = 0;
                self.write_metadata()?;
            }
            Some(prev_page) => {
                let mut prev_node = self.get_node(prev_page)?;
                prev_node.next_page = None;
                self.set_node(&prev_node)?;
            }
        }
        Ok(Some(last_page))
    }

    /// Reads the metadata page and adopts its `TreeConfig` as authoritative,
    /// overriding whatever config this pager was constructed with.
    pub fn get_metadata(&mut self) -> Result<(PageId, TreeConfig)> {
        let data = self.read_page_from_tree_file(PageId::HEADER)?;
        let root_node_page = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let page_size = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        let order = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let key_size = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
        let value_size = u32::from_le_bytes(data[16..20].try_into().unwrap()) as usize;
        let freelist_start_page = u32::from_le_bytes(data[20..24].try_into().unwrap());

        self.freelist_start_page = freelist_start_page;
        self.root_node_page = root_node_page;
        self.conf = TreeConfig::new(page_size, order, key_size, value_size);
        Ok((PageId::new(root_node_page), self.conf.clone()))
    }

    /// Writes the metadata page directly to the tree file (bypassing the
    /// WAL) and fsyncs it immediately. `None` arguments keep the current
    /// value. This page is never torn-protected by the WAL: a crash between
    /// writing it and the next operation can only misplace the root
    /// pointer or freelist head, never corrupt a live node.
    pub fn set_metadata(&mut self, root_node_page: Option<PageId>, conf: Option<TreeConfig>) -> Result<()> {
        if let Some(page) = root_node_page {
            self.root_node_page = page.value();
        }
        if let Some(conf) = conf {
            self.conf = conf;
        }
        self.write_metadata()
    }

    fn write_metadata(&mut self) -> Result<()> {
        let mut data = Vec::with_capacity(self.conf.page_size);
        data.extend_from_slice(&self.root_node_page.to_le_bytes());
        data.extend_from_slice(&(self.conf.page_size as u32).to_le_bytes());
        data.extend_from_slice(&(self.conf.order as u32).to_le_bytes());
        data.extend_from_slice(&(self.conf.key_size as u32).to_le_bytes());
        data.extend_from_slice(&(self.conf.value_size as u32).to_le_bytes());
        data.extend_from_slice(&self.freelist_start_page.to_le_bytes());
        data.resize(self.conf.page_size, 0);
        self.write_page_to_tree_file(PageId::HEADER, &data, true)
    }

    pub fn root_page(&self) -> PageId {
        PageId::new(self.root_node_page)
    }

    /// Highest page number currently allocated in the tree file. Used only
    /// to estimate `size_hint`; never persisted on its own.
    pub fn last_page(&self) -> u32 {
        self.last_page
    }

    /// No-op if the pager was already closed: `BPlusTree::close` is called
    /// explicitly and again from `Drop`, and the latter must not panic.
    pub fn perform_checkpoint(&mut self, reopen_wal: bool) -> Result<()> {
        let Some(wal) = self.wal.take() else {
            return Ok(());
        };
        info!("performing checkpoint of {}", self.path.display());
        let pages = wal.checkpoint()?;
        for (page, data) in pages {
            self.write_page_to_tree_file(PageId::new(page), &data, false)?;
        }
        self.file.sync_all()?;
        if let Some(dir) = &self.dir_file {
            dir.sync_all()?;
        }
        if reopen_wal {
            let (new_wal, _) = Wal::open(&self.path, self.conf.page_size)?;
            self.wal = Some(new_wal);
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.perform_checkpoint(false)
    }

    /// Commits the pending WAL frames for the transaction that just
    /// finished. A fresh pager or one that made no writes has nothing
    /// pending, so this is cheap to call unconditionally.
    pub fn commit(&mut self) -> Result<()> {
        self.wal_mut().commit()
    }

    /// Discards the pending WAL frames for a transaction that failed
    /// partway through, and drops any node the failed transaction cached,
    /// since it may reflect a write that never took effect.
    pub fn rollback(&mut self) {
        if let Err(err) = self.wal_mut().rollback() {
            log::warn!("failed to write WAL rollback frame: {err}");
        }
        self.cache.lock().clear();
    }

    fn read_page_from_tree_file(&self, page: PageId) -> Result<Vec<u8>> {
        let start = page.file_offset(self.conf.page_size);
        let mut buf = vec![0u8; self.conf.page_size];
        match read_exact_at(&self.file, start, &mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(IndexError::corrupt(format!("page {page} does not exist yet")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_page_to_tree_file(&mut self, page: PageId, data: &[u8], fsync: bool) -> Result<()> {
        assert_eq!(data.len(), self.conf.page_size);
        self.file.seek(SeekFrom::Start(page.file_offset(self.conf.page_size)))?;
        self.file.write_all(data)?;
        if fsync {
            self.file.sync_all()?;
            if let Some(dir) = &self.dir_file {
                dir.sync_all()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Record, RecordValue};
    use crate::serializer::IntSerializer;
    use tempfile::tempdir;

    fn conf() -> TreeConfig {
        TreeConfig::new(128, 4, 8, 8)
    }

    #[test]
    fn fresh_pager_allocates_from_page_one() {
        let dir = tempdir().unwrap();
        let mut pager: Pager<u64> =
            Pager::open(dir.path().join("t.idx"), conf(), Box::new(IntSerializer), 8).unwrap();
        assert_eq!(pager.next_available_page().unwrap(), PageId::new(1));
        assert_eq!(pager.next_available_page().unwrap(), PageId::new(2));
    }

    #[test]
    fn set_node_survives_checkpoint_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        {
            let mut pager: Pager<u64> =
                Pager::open(&path, conf(), Box::new(IntSerializer), 8).unwrap();
            let page = pager.next_available_page().unwrap();
            let mut leaf = Node::new_leaf(page);
            leaf.insert_record(Record::new(1u64, RecordValue::Inline(b"x".to_vec())));
            pager.set_node(&leaf).unwrap();
            pager.set_metadata(Some(page), None).unwrap();
            pager.commit().unwrap();
            pager.close().unwrap();
        }

        let mut pager: Pager<u64> =
            Pager::open(&path, conf(), Box::new(IntSerializer), 8).unwrap();
        let (root, _) = pager.get_metadata().unwrap();
        let node = pager.get_node(root).unwrap();
        assert_eq!(node.records()[0].key, 1);
    }

    #[test]
    fn reopen_adopts_persisted_page_size_over_the_callers_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        {
            let mut pager: Pager<u64> =
                Pager::open(&path, conf(), Box::new(IntSerializer), 8).unwrap();
            let page = pager.next_available_page().unwrap();
            let mut leaf = Node::new_leaf(page);
            leaf.insert_record(Record::new(1u64, RecordValue::Inline(b"x".to_vec())));
            pager.set_node(&leaf).unwrap();
            pager.set_metadata(Some(page), None).unwrap();
            pager.commit().unwrap();
            pager.close().unwrap();
        }

        // Reopen with a default-sized config that does not match the 128-byte
        // pages the file was actually created with. The persisted page size
        // must win, or `last_page` (and every page offset derived from it)
        // would be computed against the wrong stride.
        let mismatched_default = TreeConfig::new(4096, 4, 8, 8);
        let mut pager: Pager<u64> =
            Pager::open(&path, mismatched_default, Box::new(IntSerializer), 8).unwrap();
        assert_eq!(pager.config().page_size, 128);
        assert_eq!(pager.last_page(), 1);

        let (root, _) = pager.get_metadata().unwrap();
        let node = pager.get_node(root).unwrap();
        assert_eq!(node.records()[0].key, 1);
    }

    #[test]
    fn freed_page_is_reused_before_growing_the_file() {
        let dir = tempdir().unwrap();
        let mut pager: Pager<u64> =
            Pager::open(dir.path().join("t.idx"), conf(), Box::new(IntSerializer), 8).unwrap();
        let page = pager.next_available_page().unwrap();
        pager.del_page(page).unwrap();
        assert_eq!(pager.next_available_page().unwrap(), page);
    }
}
