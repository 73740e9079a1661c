//! The bounded page cache: every page access in the engine funnels
//! through [`BufferPool::get_page`], which loads on miss, evicts clean
//! pages LRU-first when full, and grants the requested page latch.
//!
//! The pool follows a FORCE / NO-STEAL discipline: commit flushes every
//! page a transaction dirtied, abort discards them, and eviction refuses
//! dirty pages outright.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::Catalog;
use crate::error::StorageError;
use crate::latch::{PageLatch, Permissions};
use crate::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

/// One cached page together with its transaction latch. The latch
/// serializes transactions; the inner `RwLock` only guards the bytes
/// against concurrent readers of a shared page.
struct PageEntry {
    latch: PageLatch,
    page: RwLock<HeapPage>,
}

impl PageEntry {
    fn new(page: HeapPage) -> Arc<Self> {
        Arc::new(PageEntry {
            latch: PageLatch::new(),
            page: RwLock::new(page),
        })
    }
}

/// A borrowed view of a cached page, scoped to a single operator call.
/// The transaction latch stays held after the handle is dropped; it is
/// only released by `release_page` or `transaction_complete`.
pub struct PageHandle {
    entry: Arc<PageEntry>,
}

impl PageHandle {
    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.entry.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapPage> {
        self.entry.page.write()
    }
}

struct PoolInner {
    entries: HashMap<PageId, Arc<PageEntry>>,
    /// Front = most recently used.
    lru: VecDeque<PageId>,
}

impl PoolInner {
    fn touch(&mut self, pid: PageId) {
        if let Some(pos) = self.lru.iter().position(|cached| *cached == pid) {
            self.lru.remove(pos);
        }
        self.lru.push_front(pid);
    }

    fn remove(&mut self, pid: PageId) -> Option<Arc<PageEntry>> {
        self.lru.retain(|cached| *cached != pid);
        self.entries.remove(&pid)
    }
}

/// The bounded in-memory page cache.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_capacity(catalog, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(catalog: Arc<Catalog>, capacity: usize) -> Self {
        BufferPool {
            catalog,
            capacity,
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cached_pages(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn contains_page(&self, pid: PageId) -> bool {
        self.inner.lock().entries.contains_key(&pid)
    }

    /// Fetches a page under the requested permission, loading it from its
    /// heap file on miss and evicting first when the pool is full.
    ///
    /// May block on the page latch; a lock timeout surfaces as
    /// [`StorageError::TransactionAborted`], after which the caller is
    /// expected to abort via [`transaction_complete`](Self::transaction_complete).
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageHandle, StorageError> {
        let entry = {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.get(&pid) {
                let entry = Arc::clone(entry);
                inner.touch(pid);
                entry
            } else {
                if inner.entries.len() >= self.capacity {
                    self.evict_one(&mut inner)?;
                }
                debug!("loading {pid} from disk");
                let page = self.catalog.table(pid.table)?.read_page(pid)?;
                let entry = PageEntry::new(page);
                inner.entries.insert(pid, Arc::clone(&entry));
                inner.lru.push_front(pid);
                entry
            }
        };

        // Block on the latch only after the pool mutex is gone; holding
        // it across a wait would stall every other page access.
        entry.latch.acquire(tid, perm.as_mode())?;
        Ok(PageHandle { entry })
    }

    /// Releases one lock record on the page. Early release is only safe
    /// for pages whose content the transaction has not observed.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        let entry = {
            let inner = self.inner.lock();
            inner.entries.get(&pid).map(Arc::clone)
        };
        if let Some(entry) = entry {
            entry.latch.release(tid);
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let entry = {
            let inner = self.inner.lock();
            inner.entries.get(&pid).map(Arc::clone)
        };
        entry.is_some_and(|entry| entry.latch.holds(tid))
    }

    /// Commits or aborts a transaction's page set, then releases every
    /// lock it holds.
    ///
    /// Commit forces each page the transaction dirtied to disk; abort
    /// drops those pages from the cache unwritten, so the authoritative
    /// on-disk copy rolls the transaction back.
    pub fn transaction_complete(
        &self,
        tid: TransactionId,
        commit: bool,
    ) -> Result<(), StorageError> {
        debug!("{tid} complete, commit={commit}");
        let snapshot: Vec<(PageId, Arc<PageEntry>)> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .map(|(pid, entry)| (*pid, Arc::clone(entry)))
                .collect()
        };

        for (pid, entry) in &snapshot {
            if entry.page.read().dirtier() != Some(tid) {
                continue;
            }
            if commit {
                self.flush_page(*pid)?;
            } else {
                self.discard_page(*pid);
            }
        }

        for (_, entry) in &snapshot {
            if entry.latch.holds(tid) {
                entry.latch.release(tid);
            }
        }
        Ok(())
    }

    /// Adds a tuple to the table on behalf of `tid`, write-latching the
    /// page it lands on and marking that page dirty.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table: u32,
        tuple: Tuple,
    ) -> Result<(), StorageError> {
        let file = self.catalog.table(table)?;
        let dirtied = file.insert_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &dirtied);
        Ok(())
    }

    /// Removes a tuple, resolving its page from the record id.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<(), StorageError> {
        let rid = tuple.record_id().ok_or_else(|| {
            StorageError::NoSuchTuple("tuple has no record id".to_string())
        })?;
        let file = self.catalog.table(rid.page.table)?;
        let dirtied = file.delete_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &dirtied);
        Ok(())
    }

    fn mark_dirty(&self, tid: TransactionId, pids: &[PageId]) {
        let entries: Vec<Arc<PageEntry>> = {
            let inner = self.inner.lock();
            pids.iter()
                .filter_map(|pid| inner.entries.get(pid).map(Arc::clone))
                .collect()
        };
        for entry in entries {
            entry.page.write().mark_dirty(tid);
        }
    }

    /// Writes the page out if it is dirty and clears the marker. The
    /// entry stays cached; only eviction and discard remove entries.
    pub fn flush_page(&self, pid: PageId) -> Result<(), StorageError> {
        let entry = {
            let inner = self.inner.lock();
            inner.entries.get(&pid).map(Arc::clone)
        };
        let Some(entry) = entry else { return Ok(()) };

        let mut page = entry.page.write();
        if page.dirtier().is_none() {
            return Ok(());
        }
        debug!("flushing dirty page {pid}");
        self.catalog.table(pid.table)?.write_page(&page)?;
        page.mark_clean();
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<(), StorageError> {
        for pid in self.cached_page_ids() {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Flushes the pages held by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<(), StorageError> {
        for pid in self.cached_page_ids() {
            if self.holds_lock(tid, pid) {
                self.flush_page(pid)?;
            }
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.inner.lock().remove(pid);
    }

    fn cached_page_ids(&self) -> Vec<PageId> {
        self.inner.lock().entries.keys().copied().collect()
    }

    /// Walks the LRU list from least recent toward most recent and
    /// evicts the first clean page. Dirty pages are never evicted (NO
    /// STEAL); if every cached page is dirty the pool is wedged until
    /// some transaction completes, which is the caller's problem.
    fn evict_one(&self, inner: &mut PoolInner) -> Result<(), StorageError> {
        let victim = inner.lru.iter().rev().copied().find(|pid| {
            inner
                .entries
                .get(pid)
                .is_some_and(|entry| entry.page.read().dirtier().is_none())
        });
        let Some(pid) = victim else {
            return Err(StorageError::BufferFull);
        };

        // Same code path as an explicit flush; a no-op on a clean page.
        if let Some(entry) = inner.entries.get(&pid) {
            let mut page = entry.page.write();
            if page.dirtier().is_some() {
                self.catalog.table(pid.table)?.write_page(&page)?;
                page.mark_clean();
            }
        }
        debug!("evicting {pid}");
        inner.remove(pid);
        Ok(())
    }
}
