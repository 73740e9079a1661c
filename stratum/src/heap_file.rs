//! The heap file page manager: one random-access file per table,
//! partitioned into `page_size()`-byte pages with no ordering between
//! tuples. All page traffic goes through the buffer pool so that latching
//! and caching stay in one place.

use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer_pool::BufferPool;
use crate::error::StorageError;
use crate::latch::Permissions;
use crate::page::{HeapPage, PageId};
use crate::page_size;
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

/// A heap file backing one table.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    id: u32,
    desc: Arc<TupleDesc>,
}

impl HeapFile {
    /// Opens (creating if absent) the backing file. The table id is a
    /// hash of the canonical path, so reopening the same file yields the
    /// same id.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;

        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let id = hasher.finish() as u32;
        debug!("opened heap file {} as table {id}", path.display());

        Ok(HeapFile {
            file: Mutex::new(file),
            path,
            id,
            desc,
        })
    }

    /// Stable identifier shared by every handle on the same file.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Pages in the file, rounding the trailing partial page up; an empty
    /// file has zero pages.
    pub fn num_pages(&self) -> Result<usize, StorageError> {
        let len = self.file.lock().metadata()?.len();
        Ok((len as usize).div_ceil(page_size()))
    }

    /// Reads the page at `pid.index` straight from disk. Only the buffer
    /// pool should call this; everyone else goes through `get_page`.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage, StorageError> {
        let mut file = self.file.lock();
        let offset = (pid.index * page_size()) as u64;
        if offset >= file.metadata()?.len() {
            return Err(StorageError::InvalidPage(pid));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; page_size()];
        file.read_exact(&mut buf)?;
        HeapPage::from_bytes(pid, &buf, Arc::clone(&self.desc))
    }

    /// Writes the page at its index and syncs, so a flushed page is
    /// durable once this returns.
    pub fn write_page(&self, page: &HeapPage) -> Result<(), StorageError> {
        let mut file = self.file.lock();
        let offset = (page.id().index * page_size()) as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends one blank page and returns its index.
    fn append_blank_page(&self) -> Result<usize, StorageError> {
        let mut file = self.file.lock();
        let index = file.metadata()?.len() as usize / page_size();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&HeapPage::empty_data())?;
        debug!("table {} grew to {} pages", self.id, index + 1);
        Ok(index)
    }

    /// Finds a page with a free slot — the last page first, then the rest
    /// of the file — extending the file by one blank page when every page
    /// is full. Returns the page it dirtied.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageId>, StorageError> {
        if !tuple.desc().compatible(&self.desc) {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple {} does not fit table schema {}",
                tuple.desc(),
                self.desc
            )));
        }

        let num_pages = self.num_pages()?;
        let mut candidates = Vec::with_capacity(num_pages);
        if num_pages > 0 {
            candidates.push(num_pages - 1);
            candidates.extend(0..num_pages - 1);
        }

        for index in candidates {
            let pid = PageId::new(self.id, index);
            let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let keep_latch = {
                let mut page = handle.write();
                if page.free_slots() > 0 {
                    page.insert_tuple(tuple)?;
                    // Marked under the write guard so eviction can never
                    // see this page clean between the insert and the
                    // buffer pool's own bookkeeping.
                    page.mark_dirty(tid);
                    return Ok(vec![pid]);
                }
                // A page this transaction already dirtied must stay
                // latched until commit.
                page.dirtier().is_some()
            };
            drop(handle);
            if !keep_latch {
                // Only the slot header of a clean full page was examined,
                // so its write latch can go straight back.
                pool.release_page(tid, pid);
            }
        }

        let pid = PageId::new(self.id, self.append_blank_page()?);
        let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        {
            let mut page = handle.write();
            page.insert_tuple(tuple)?;
            page.mark_dirty(tid);
        }
        Ok(vec![pid])
    }

    /// Removes the tuple named by its record id. Returns the page it
    /// dirtied.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>, StorageError> {
        let rid = tuple.record_id().ok_or_else(|| {
            StorageError::NoSuchTuple("tuple has no record id".to_string())
        })?;
        if rid.page.table != self.id {
            return Err(StorageError::NoSuchTuple(format!(
                "record {} belongs to another table",
                rid.page
            )));
        }

        let handle = pool.get_page(tid, rid.page, Permissions::ReadWrite)?;
        {
            let mut page = handle.write();
            page.delete_tuple(&rid)?;
            page.mark_dirty(tid);
        }
        Ok(vec![rid.page])
    }

    /// An iterator over every tuple in the file, in page-index then
    /// in-page slot order, fetching each page read-only through the
    /// buffer pool one at a time.
    pub fn iter(self: &Arc<Self>, pool: Arc<BufferPool>, tid: TransactionId) -> HeapFileIterator {
        HeapFileIterator {
            file: Arc::clone(self),
            pool,
            tid,
            next_page: 0,
            current: None,
        }
    }
}

/// Pull-based tuple iterator over a heap file. `open` positions it before
/// the first tuple, `next` yields `Ok(None)` at the end, and `rewind`
/// restarts at page 0.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    next_page: usize,
    current: Option<std::vec::IntoIter<Tuple>>,
}

impl HeapFileIterator {
    pub fn open(&mut self) -> Result<(), StorageError> {
        self.next_page = 0;
        self.current = None;
        self.advance_page()?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.next_page = 0;
        self.current = None;
    }

    pub fn rewind(&mut self) -> Result<(), StorageError> {
        self.close();
        self.open()
    }

    /// The next tuple, or `None` once the last page is exhausted (and
    /// always `None` before `open`).
    pub fn next(&mut self) -> Result<Option<Tuple>, StorageError> {
        loop {
            let Some(tuples) = self.current.as_mut() else {
                return Ok(None);
            };
            if let Some(tuple) = tuples.next() {
                return Ok(Some(tuple));
            }
            if !self.advance_page()? {
                self.current = None;
                return Ok(None);
            }
        }
    }

    /// Loads the next page's tuples, one page resident at a time.
    fn advance_page(&mut self) -> Result<bool, StorageError> {
        if self.next_page >= self.file.num_pages()? {
            return Ok(false);
        }
        let pid = PageId::new(self.file.id(), self.next_page);
        self.next_page += 1;

        let handle = self
            .pool
            .get_page(self.tid, pid, Permissions::ReadOnly)?;
        let tuples: Vec<Tuple> = handle.read().iter().cloned().collect();
        self.current = Some(tuples.into_iter());
        Ok(true)
    }
}
