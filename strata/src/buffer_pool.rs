//! The buffer pool: a bounded cache of page images shared by every
//! transaction, fronted by the lock manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::catalog::Catalog;
use crate::error::DbError;
use crate::lock_manager::LockManager;
use crate::page::{Page, PageId, Permissions};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::Db;

/// Default number of cached pages.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// A shared handle to a cached page. Exactly one in-memory image exists per
/// PageId; all cross-page references are PageIds, never direct references.
pub type PageRef = Arc<RwLock<Page>>;

/// Fixed-capacity page cache. Pages enter through `get_page`, leave through
/// eviction (clean pages only) or transaction completion. Structural
/// mutations (insert/eviction) serialize under the pool mutex; page access
/// itself happens under each page's own rwlock.
#[derive(Debug)]
pub struct BufferPool {
    page_size: usize,
    capacity: usize,
    pages: Mutex<HashMap<PageId, PageRef>>,
    lock_manager: LockManager,
}

impl BufferPool {
    pub fn new(page_size: usize, capacity: usize) -> BufferPool {
        BufferPool {
            page_size,
            capacity,
            pages: Mutex::new(HashMap::new()),
            lock_manager: LockManager::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Fetch a page on behalf of `tid` with the given permission. Blocks in
    /// the lock manager until the lock is granted; a detected deadlock
    /// surfaces as `TransactionAborted`.
    pub fn get_page(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef, DbError> {
        self.lock_manager.acquire(tid, pid, perm)?;

        let mut pages = self.pages.lock().unwrap();
        if let Some(page) = pages.get(&pid) {
            return Ok(Arc::clone(page));
        }
        if pages.len() >= self.capacity {
            Self::evict_one(&mut pages)?;
        }
        let file = catalog.get_database_file(pid.table_id())?;
        let page = file.read_page(pid, self.page_size)?;
        let page = Arc::new(RwLock::new(page));
        pages.insert(pid, Arc::clone(&page));
        crate::strata_debug_log!(
            "[BufferPool::get_page] loaded {:?} ({} cached)",
            pid,
            pages.len()
        );
        Ok(page)
    }

    // Evict any clean page. Dirty pages are never stolen; pages whose rwlock
    // is momentarily held are skipped so the pool mutex never waits on a
    // page lock.
    fn evict_one(pages: &mut HashMap<PageId, PageRef>) -> Result<(), DbError> {
        let victim = pages.iter().find_map(|(pid, page)| {
            page.try_read()
                .ok()
                .filter(|guard| guard.dirtier().is_none())
                .map(|_| *pid)
        });
        match victim {
            Some(pid) => {
                pages.remove(&pid);
                crate::strata_debug_log!("[BufferPool::evict_one] evicted {:?}", pid);
                Ok(())
            }
            None => Err(DbError::BufferPoolFull),
        }
    }

    /// Unconditionally release `tid`'s lock on `pid`. Only safe when the
    /// page was not mutated; used to back out of a full-page insert probe.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Insert `t` into the table, marking every page the file dirtied.
    pub fn insert_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        table_id: u32,
        t: &mut Tuple,
    ) -> Result<(), DbError> {
        let file = db.catalog().get_database_file(table_id)?;
        let dirtied = file.insert_tuple(db, tid, t)?;
        self.admit_dirty(tid, dirtied);
        Ok(())
    }

    /// Delete `t` from the table owning it, marking dirtied pages.
    pub fn delete_tuple(&self, db: &Db, tid: TransactionId, t: &Tuple) -> Result<(), DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        let file = db.catalog().get_database_file(rid.page_id.table_id())?;
        let dirtied = file.delete_tuple(db, tid, t)?;
        self.admit_dirty(tid, dirtied);
        Ok(())
    }

    // Mark pages dirty with their dirtier and (re)install them in the
    // cache: a structural operation may have been working on a page the
    // pool already evicted. The cache may briefly exceed capacity here.
    fn admit_dirty(&self, tid: TransactionId, dirtied: Vec<PageRef>) {
        for page in dirtied {
            let pid = {
                let mut guard = page.write().unwrap();
                guard.mark_dirty(Some(tid));
                guard.id()
            };
            self.pages.lock().unwrap().insert(pid, page);
        }
    }

    /// Finish a transaction. Commit flushes the pages it dirtied and resets
    /// their before-images; abort discards them so the next access reloads
    /// from disk. Either way every lock the transaction holds is released.
    pub fn transaction_complete(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        commit: bool,
    ) -> Result<(), DbError> {
        let cached: Vec<(PageId, PageRef)> = {
            let pages = self.pages.lock().unwrap();
            pages.iter().map(|(pid, p)| (*pid, Arc::clone(p))).collect()
        };

        for (pid, page) in cached {
            let mine = page.read().unwrap().dirtier() == Some(tid);
            if !mine {
                continue;
            }
            if commit {
                let mut guard = page.write().unwrap();
                let file = catalog.get_database_file(pid.table_id())?;
                file.write_page(&guard, self.page_size)?;
                guard.mark_dirty(None);
                guard.set_before_image();
            } else {
                self.pages.lock().unwrap().remove(&pid);
            }
        }

        self.lock_manager.release_all(tid);
        crate::strata_debug_log!(
            "[BufferPool::transaction_complete] tid {} {}",
            tid,
            if commit { "committed" } else { "aborted" }
        );
        Ok(())
    }

    /// Write one cached page to disk if it is dirty.
    pub fn flush_page(&self, catalog: &Catalog, pid: PageId) -> Result<(), DbError> {
        let page = {
            let pages = self.pages.lock().unwrap();
            pages.get(&pid).cloned()
        };
        if let Some(page) = page {
            let mut guard = page.write().unwrap();
            if guard.dirtier().is_some() {
                let file = catalog.get_database_file(pid.table_id())?;
                file.write_page(&guard, self.page_size)?;
                guard.mark_dirty(None);
            }
        }
        Ok(())
    }

    /// Write every dirty cached page to disk.
    pub fn flush_all_pages(&self, catalog: &Catalog) -> Result<(), DbError> {
        let pids: Vec<PageId> = {
            let pages = self.pages.lock().unwrap();
            pages.keys().copied().collect()
        };
        for pid in pids {
            self.flush_page(catalog, pid)?;
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it. Used when a page on
    /// disk is being recycled and any cached image is stale.
    pub fn discard_page(&self, pid: PageId) {
        self.pages.lock().unwrap().remove(&pid);
    }

    #[cfg(test)]
    pub(crate) fn cached_count(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}
