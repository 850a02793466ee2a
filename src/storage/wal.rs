//! Write-ahead log.
//!
//! A sidecar file, sibling to the tree file with `-wal` appended to its
//! name, that buffers page writes until a transaction commits. PAGE frames
//! are written unsynced; COMMIT and ROLLBACK frames are fsynced together
//! with the containing directory, so a crash never leaves the tree file
//! itself torn.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{IndexError, Result};
use crate::types::{FRAME_TYPE_BYTES, PAGE_REFERENCE_BYTES};

const WAL_HEADER_LEN: usize = 4;
const FRAME_HEADER_LEN: usize = FRAME_TYPE_BYTES + PAGE_REFERENCE_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameType {
    Page = 1,
    Commit = 2,
    Rollback = 3,
}

impl FrameType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Self::Page),
            2 => Ok(Self::Commit),
            3 => Ok(Self::Rollback),
            other => Err(IndexError::corrupt(format!("unknown WAL frame tag {other}"))),
        }
    }
}

fn wal_path_for(tree_path: &Path) -> PathBuf {
    let mut name = tree_path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

/// Reads `buf.len()` bytes starting at `offset` through a shared reference,
/// using the platform's positional-read syscall instead of `Seek`, so
/// concurrent readers never fight over (or have to synchronize) the file's
/// shared cursor position.
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0;
    while read < buf.len() {
        match file.seek_read(&mut buf[read..], offset + read as u64)? {
            0 => return Err(ErrorKind::UnexpectedEof.into()),
            n => read += n,
        }
    }
    Ok(())
}

pub(crate) fn open_file_and_dir(path: &Path) -> Result<(File, Option<File>)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    let dir_file = if cfg!(windows) {
        None
    } else {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(File::open)
            .transpose()?
    };
    Ok((file, dir_file))
}

fn fsync_file_and_dir(file: &File, dir_file: Option<&File>) -> Result<()> {
    file.sync_all()?;
    if let Some(dir) = dir_file {
        dir.sync_all()?;
    }
    Ok(())
}

/// Buffers page writes for one tree file until they are committed, and
/// replays them into the tree file on checkpoint.
pub struct Wal {
    path: PathBuf,
    file: File,
    dir_file: Option<File>,
    page_size: usize,
    committed_order: Vec<u32>,
    committed_pages: HashMap<u32, u64>,
    not_committed_pages: HashMap<u32, u64>,
}

impl Wal {
    /// Opens (or creates) the WAL sibling of `tree_path`. Returns the WAL
    /// and whether it found uncommitted state from an unclean shutdown
    /// that the caller must now recover via `checkpoint`.
    pub fn open(tree_path: &Path, page_size: usize) -> Result<(Self, bool)> {
        let path = wal_path_for(tree_path);
        let (mut file, dir_file) = open_file_and_dir(&path)?;
        let len = file.seek(SeekFrom::End(0))?;

        let mut wal = Self {
            path,
            file,
            dir_file,
            page_size,
            committed_order: Vec::new(),
            committed_pages: HashMap::new(),
            not_committed_pages: HashMap::new(),
        };

        let needs_recovery = if len == 0 {
            wal.write_header()?;
            false
        } else {
            warn!(
                "found an existing WAL at {}; the tree was not closed cleanly",
                wal.path.display()
            );
            wal.load_existing()?;
            true
        };

        Ok((wal, needs_recovery))
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&(self.page_size as u32).to_le_bytes())?;
        fsync_file_and_dir(&self.file, self.dir_file.as_ref())
    }

    fn load_existing(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; WAL_HEADER_LEN];
        self.file.read_exact(&mut header)?;
        let stored_page_size = u32::from_le_bytes(header) as usize;
        if stored_page_size != self.page_size {
            return Err(IndexError::corrupt(format!(
                "WAL page size {stored_page_size} does not match tree page size {}",
                self.page_size
            )));
        }

        while self.load_next_frame()? {}

        if !self.not_committed_pages.is_empty() {
            warn!("WAL has uncommitted data after recovery scan; discarding it");
            self.not_committed_pages.clear();
        }
        Ok(())
    }

    /// Reads one frame and indexes it. Returns `false` at a clean
    /// end-of-file, treating a short read as "no more frames" rather than
    /// an error.
    fn load_next_frame(&mut self) -> Result<bool> {
        let start = self.file.stream_position()?;
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let frame_type = FrameType::from_byte(header[0])?;
        let page = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let payload_start = start + FRAME_HEADER_LEN as u64;

        if frame_type == FrameType::Page {
            let after_payload = payload_start + self.page_size as u64;
            self.file.seek(SeekFrom::Start(after_payload))?;
        }

        self.index_frame(frame_type, page, payload_start);
        Ok(true)
    }

    fn index_frame(&mut self, frame_type: FrameType, page: u32, payload_start: u64) {
        match frame_type {
            FrameType::Page => {
                self.not_committed_pages.insert(page, payload_start);
            }
            FrameType::Commit => {
                for (page, offset) in self.not_committed_pages.drain() {
                    if !self.committed_pages.contains_key(&page) {
                        self.committed_order.push(page);
                    }
                    self.committed_pages.insert(page, offset);
                }
            }
            FrameType::Rollback => {
                self.not_committed_pages.clear();
            }
        }
    }

    fn add_frame(&mut self, frame_type: FrameType, page: u32, page_data: Option<&[u8]>) -> Result<()> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + page_data.map_or(0, <[u8]>::len));
        frame.push(frame_type as u8);
        frame.extend_from_slice(&page.to_le_bytes());
        if let Some(data) = page_data {
            if data.len() != self.page_size {
                return Err(IndexError::invalid_argument("page data length mismatch"));
            }
            frame.extend_from_slice(data);
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&frame)?;
        if frame_type != FrameType::Page {
            fsync_file_and_dir(&self.file, self.dir_file.as_ref())?;
        }

        let end = self.file.stream_position()?;
        let payload_start = end - page_data.map_or(0, |d| d.len() as u64);
        self.index_frame(frame_type, page, payload_start);
        Ok(())
    }

    pub fn set_page(&mut self, page: u32, data: &[u8]) -> Result<()> {
        self.add_frame(FrameType::Page, page, Some(data))
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.not_committed_pages.is_empty() {
            return Ok(());
        }
        self.add_frame(FrameType::Commit, 0, None)
    }

    pub fn rollback(&mut self) -> Result<()> {
        if self.not_committed_pages.is_empty() {
            return Ok(());
        }
        self.add_frame(FrameType::Rollback, 0, None)
    }

    /// Reads within a writer's own transaction see its uncommitted writes.
    /// Takes `&self`: concurrent readers call this too, and since a writer
    /// holds the pager's lock exclusively, no reader ever observes this
    /// WAL's `not_committed_pages` while a writer is populating it.
    pub fn get_page(&self, page: u32) -> Result<Option<Vec<u8>>> {
        let offset = self
            .not_committed_pages
            .get(&page)
            .or_else(|| self.committed_pages.get(&page))
            .copied();
        let Some(offset) = offset else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.page_size];
        read_exact_at(&self.file, offset, &mut buf)?;
        Ok(Some(buf))
    }

    /// Drains every committed page (in the order it was first committed)
    /// back to the caller, then deletes the WAL file. After this call the
    /// WAL is consumed; `set_page` must not be called again.
    pub fn checkpoint(mut self) -> Result<Vec<(u32, Vec<u8>)>> {
        if !self.not_committed_pages.is_empty() {
            warn!("checkpointing WAL with uncommitted data; discarding it");
        }
        fsync_file_and_dir(&self.file, self.dir_file.as_ref())?;

        let mut pages = Vec::with_capacity(self.committed_order.len());
        for page in &self.committed_order {
            let offset = self.committed_pages[page];
            let mut buf = vec![0u8; self.page_size];
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut buf)?;
            pages.push((*page, buf));
        }

        drop(self.file);
        std::fs::remove_file(&self.path)?;
        if let Some(dir) = &self.dir_file {
            dir.sync_all()?;
        }
        Ok(pages)
    }
}
