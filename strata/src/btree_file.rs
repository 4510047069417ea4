//! B+ tree files: sorted tuples in leaf pages under a tree of internal
//! pages, with full split/steal/merge maintenance.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::btree_page::{
    BTreeEntry, BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreeRootPtrPage,
};
use crate::buffer_pool::PageRef;
use crate::catalog::{table_id_for_path, DbFileIterator};
use crate::error::DbError;
use crate::page::{BTreePageId, Page, PageCategory, PageId, Permissions};
use crate::transaction::TransactionId;
use crate::tuple::{Field, Op, Tuple, TupleDesc};
use crate::Db;

/// The shadow cache threaded through a structural operation: every page the
/// operation has fetched read-write, so recursive calls observe each other's
/// in-progress mutations before the buffer pool does.
type DirtyPages = HashMap<PageId, PageRef>;

/// A search condition for an index scan: `key <op> field`.
#[derive(Debug, Clone)]
pub struct IndexPredicate {
    pub op: Op,
    pub field: Field,
}

impl IndexPredicate {
    pub fn new(op: Op, field: Field) -> IndexPredicate {
        IndexPredicate { op, field }
    }
}

/// A file storing a B+ tree: a root pointer page at byte 0, then data pages
/// (leaf, internal, header) in fixed-size blocks numbered from 1.
#[derive(Debug)]
pub struct BTreeFile {
    // Guards reads, writes and appends; growing the file happens entirely
    // under this mutex.
    file: Mutex<File>,
    path: PathBuf,
    table_id: u32,
    td: TupleDesc,
    key_field: usize,
}

impl BTreeFile {
    pub fn new<P: AsRef<Path>>(
        path: P,
        key_field: usize,
        td: TupleDesc,
    ) -> Result<BTreeFile, DbError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let abs = path.canonicalize()?;
        let table_id = table_id_for_path(&abs);
        td.field_type(key_field)?;
        crate::strata_debug_log!(
            "[BTreeFile::new] opened {:?} as table {} keyed on field {}",
            abs,
            table_id,
            key_field
        );
        Ok(BTreeFile {
            file: Mutex::new(file),
            path: abs,
            table_id,
            td,
            key_field,
        })
    }

    pub fn id(&self) -> u32 {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    /// The field this index is keyed on.
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    fn data_offset(page_no: usize, page_size: usize) -> u64 {
        (BTreeRootPtrPage::PAGE_SIZE + (page_no - 1) * page_size) as u64
    }

    /// Number of data pages. Only whole pages are ever written.
    pub fn num_pages(&self, page_size: usize) -> Result<usize, DbError> {
        let len = self.file.lock().unwrap().metadata()?.len() as usize;
        Ok(len.saturating_sub(BTreeRootPtrPage::PAGE_SIZE) / page_size)
    }

    pub fn read_page(&self, pid: BTreePageId, page_size: usize) -> Result<Page, DbError> {
        if pid.table_id != self.table_id {
            return Err(DbError::InvalidArgument(format!(
                "page {:?} does not belong to table {}",
                pid, self.table_id
            )));
        }
        let mut file = self.file.lock().unwrap();
        if pid.category == PageCategory::RootPtr {
            let mut buf = vec![0u8; BTreeRootPtrPage::PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            return Ok(Page::RootPtr(BTreeRootPtrPage::new(self.table_id, &buf)?));
        }
        let offset = Self::data_offset(pid.page_no, page_size);
        if offset + page_size as u64 > file.metadata()?.len() {
            return Err(DbError::InvalidArgument(format!(
                "read past end of B+ tree file: page {}",
                pid.page_no
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; page_size];
        file.read_exact(&mut buf)?;
        drop(file);
        crate::strata_debug_log!("[BTreeFile::read_page] read page {:?}", pid);
        match pid.category {
            PageCategory::Leaf => Ok(Page::Leaf(BTreeLeafPage::new(
                pid,
                &buf,
                &self.td,
                self.key_field,
                page_size,
            )?)),
            PageCategory::Internal => Ok(Page::Internal(BTreeInternalPage::new(
                pid,
                &buf,
                &self.td,
                self.key_field,
                page_size,
            )?)),
            PageCategory::Header => Ok(Page::Header(BTreeHeaderPage::new(pid, &buf, page_size)?)),
            PageCategory::RootPtr => unreachable!("handled above"),
        }
    }

    pub fn write_page(&self, page: &Page, page_size: usize) -> Result<(), DbError> {
        let data = page.serialize();
        let pid = match page.id() {
            PageId::BTree(pid) => pid,
            other => {
                return Err(DbError::InvalidArgument(format!(
                    "page {:?} does not belong to a B+ tree file",
                    other
                )))
            }
        };
        let mut file = self.file.lock().unwrap();
        let offset = if pid.category == PageCategory::RootPtr {
            0
        } else {
            Self::data_offset(pid.page_no, page_size)
        };
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        crate::strata_debug_log!("[BTreeFile::write_page] wrote page {:?}", pid);
        Ok(())
    }

    // Fetch through the shadow cache first, then the buffer pool. Pages
    // fetched read-write join the shadow cache: the operation is about to
    // dirty them, and later phases must see the in-progress state.
    fn get_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        pid: BTreePageId,
        perm: Permissions,
    ) -> Result<PageRef, DbError> {
        if let Some(page) = dirty.get(&PageId::BTree(pid)) {
            return Ok(Arc::clone(page));
        }
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), tid, PageId::BTree(pid), perm)?;
        if perm == Permissions::ReadWrite {
            dirty.insert(PageId::BTree(pid), Arc::clone(&page));
        }
        Ok(page)
    }

    fn btree_id(page: &PageRef) -> Result<BTreePageId, DbError> {
        match page.read().unwrap().id() {
            PageId::BTree(pid) => Ok(pid),
            other => Err(DbError::InvalidArgument(format!(
                "expected a B+ tree page id, got {:?}",
                other
            ))),
        }
    }

    /// Get the root pointer page with a read lock, creating the file's root
    /// pointer and first (empty) leaf if the file is brand new.
    fn get_root_ptr_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
    ) -> Result<PageRef, DbError> {
        {
            let mut file = self.file.lock().unwrap();
            if file.metadata()?.len() == 0 {
                file.write_all(&BTreeRootPtrPage::empty_page_data())?;
                file.write_all(&BTreeLeafPage::empty_page_data(db.page_size()))?;
                crate::strata_debug_log!(
                    "[BTreeFile::get_root_ptr_page] initialized table {}",
                    self.table_id
                );
            }
        }
        self.get_page(
            db,
            tid,
            dirty,
            BTreePageId::root_ptr(self.table_id),
            Permissions::ReadOnly,
        )
    }

    /// Descend to the left-most leaf that could contain `key`, read-locking
    /// internal pages on the way and locking the leaf with `perm`. A missing
    /// key descends the left-most path.
    fn find_leaf_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        pid: BTreePageId,
        perm: Permissions,
        key: Option<&Field>,
    ) -> Result<PageRef, DbError> {
        if pid.category == PageCategory::Leaf {
            return self.get_page(db, tid, dirty, pid, perm);
        }
        let page = self.get_page(db, tid, dirty, pid, Permissions::ReadOnly)?;
        let next = {
            let guard = page.read().unwrap();
            let internal = guard.as_internal()?;
            let entries = internal.iter();
            let mut entry = entries
                .first()
                .cloned()
                .ok_or_else(|| DbError::Corrupt("internal page with no entries".to_string()))?;
            match key {
                None => entry.left_child(),
                Some(k) => {
                    let mut idx = 0;
                    while k.compare(Op::GreaterThan, entry.key())? && idx + 1 < entries.len() {
                        idx += 1;
                        entry = entries[idx].clone();
                    }
                    if k.compare(Op::LessThanOrEq, entry.key())? {
                        entry.left_child()
                    } else {
                        entry.right_child()
                    }
                }
            }
        };
        self.find_leaf_page(db, tid, dirty, next, perm, key)
    }

    /// Mirror of `find_leaf_page` for reverse iteration: descend to the
    /// right-most leaf that could contain `key`.
    fn find_leaf_page_reverse(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        pid: BTreePageId,
        perm: Permissions,
        key: Option<&Field>,
    ) -> Result<PageRef, DbError> {
        let mut cur = pid;
        while cur.category != PageCategory::Leaf {
            let page = self.get_page(db, tid, dirty, cur, Permissions::ReadOnly)?;
            let guard = page.read().unwrap();
            let entries = guard.as_internal()?.rev_iter();
            if entries.is_empty() {
                return Err(DbError::Corrupt("internal page with no entries".to_string()));
            }
            let mut chosen = None;
            for entry in &entries {
                match key {
                    None => {
                        chosen = Some(entry.right_child());
                        break;
                    }
                    Some(k) => {
                        if k.compare(Op::GreaterThanOrEq, entry.key())? {
                            chosen = Some(entry.right_child());
                            break;
                        }
                    }
                }
            }
            // Every key on this page exceeds the target: take the left-most
            // child.
            cur = match chosen {
                Some(pid) => pid,
                None => entries[entries.len() - 1].left_child(),
            };
        }
        self.get_page(db, tid, dirty, cur, perm)
    }

    /// Insert `t` in sorted position, splitting the target leaf (and any
    /// full ancestors) as needed. Returns every page the operation dirtied.
    pub fn insert_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &mut Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        let mut dirty: DirtyPages = HashMap::new();
        let key = t.field(self.key_field)?.clone();

        let root_ptr = self.get_root_ptr_page(db, tid, &mut dirty)?;
        let root_id = root_ptr.read().unwrap().as_root_ptr()?.root_id();
        let root_id = match root_id {
            Some(id) => id,
            None => {
                // The file was just created with a single empty leaf; point
                // the root at it.
                let root_id = BTreePageId::new(
                    self.table_id,
                    self.num_pages(db.page_size())?,
                    PageCategory::Leaf,
                );
                let root_ptr = self.get_page(
                    db,
                    tid,
                    &mut dirty,
                    BTreePageId::root_ptr(self.table_id),
                    Permissions::ReadWrite,
                )?;
                root_ptr
                    .write()
                    .unwrap()
                    .as_root_ptr_mut()?
                    .set_root_id(root_id);
                root_id
            }
        };

        let leaf = self.find_leaf_page(
            db,
            tid,
            &mut dirty,
            root_id,
            Permissions::ReadWrite,
            Some(&key),
        )?;
        let full = leaf.read().unwrap().as_leaf()?.num_empty_slots() == 0;
        let leaf = if full {
            self.split_leaf_page(db, tid, &mut dirty, leaf, &key)?
        } else {
            leaf
        };
        leaf.write().unwrap().as_leaf_mut()?.insert_tuple(t)?;
        Ok(dirty.into_values().collect())
    }

    /// Split a full leaf: allocate a new right neighbor, move the upper half
    /// of the tuples across, stitch the sibling chain, and copy the first
    /// key of the new page up into the parent. Returns the leaf the incoming
    /// key belongs in.
    fn split_leaf_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        field: &Field,
    ) -> Result<PageRef, DbError> {
        let new_page = self.get_empty_page(db, tid, dirty, PageCategory::Leaf)?;

        let (promoted, old_right, page_pid, new_pid, parent_id) = {
            let mut old_guard = page.write().unwrap();
            let old_leaf = old_guard.as_leaf_mut()?;
            let mut new_guard = new_page.write().unwrap();
            let new_leaf = new_guard.as_leaf_mut()?;

            let tuples: Vec<Tuple> = old_leaf.iter().cloned().collect();
            let mid = tuples.len() / 2;
            let promoted = tuples[mid].field(self.key_field)?.clone();
            for t in &tuples[mid..] {
                old_leaf.delete_tuple(t)?;
                let mut moved = t.clone();
                new_leaf.insert_tuple(&mut moved)?;
            }

            let old_right = old_leaf.right_sibling_id();
            new_leaf.set_right_sibling_id(old_right);
            new_leaf.set_left_sibling_id(Some(old_leaf.id()));
            old_leaf.set_right_sibling_id(Some(new_leaf.id()));

            (
                promoted,
                old_right,
                old_leaf.id(),
                new_leaf.id(),
                old_leaf.parent_id(),
            )
        };

        if let Some(right_pid) = old_right {
            let right = self.get_page(db, tid, dirty, right_pid, Permissions::ReadWrite)?;
            right
                .write()
                .unwrap()
                .as_leaf_mut()?
                .set_left_sibling_id(Some(new_pid));
        }

        let parent = self.get_parent_with_empty_slots(db, tid, dirty, parent_id, &promoted)?;
        let parent_pid = Self::btree_id(&parent)?;
        {
            let mut guard = parent.write().unwrap();
            let mut entry = BTreeEntry::new(promoted.clone(), page_pid, new_pid);
            guard.as_internal_mut()?.insert_entry(&mut entry)?;
        }
        page.write().unwrap().set_parent_id(parent_pid)?;
        new_page.write().unwrap().set_parent_id(parent_pid)?;

        crate::strata_debug_log!(
            "[BTreeFile::split_leaf_page] split {:?} -> {:?}, promoted {}",
            page_pid,
            new_pid,
            promoted
        );
        if field.compare(Op::LessThanOrEq, &promoted)? {
            Ok(page)
        } else {
            Ok(new_page)
        }
    }

    /// Split a full internal page: move the upper half of the entries to a
    /// new right neighbor, push the median key up to the parent (removing it
    /// from both halves), and reparent the children that moved.
    fn split_internal_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        field: &Field,
    ) -> Result<PageRef, DbError> {
        let new_page = self.get_empty_page(db, tid, dirty, PageCategory::Internal)?;

        let (pushed_up, page_pid, new_pid, parent_id, moved_children) = {
            let mut old_guard = page.write().unwrap();
            let old = old_guard.as_internal_mut()?;
            let mut new_guard = new_page.write().unwrap();
            let newp = new_guard.as_internal_mut()?;

            let entries = old.iter();
            let mid = entries.len() / 2;
            let pushed_up = entries[mid].clone();
            old.delete_key_and_right_child(&pushed_up)?;

            let mut moved_children = vec![pushed_up.right_child()];
            for entry in &entries[mid + 1..] {
                old.delete_key_and_right_child(entry)?;
                let mut moved = entry.clone();
                newp.insert_entry(&mut moved)?;
                moved_children.push(entry.right_child());
            }

            (pushed_up, old.id(), newp.id(), old.parent_id(), moved_children)
        };

        for child in moved_children {
            self.update_parent_pointer(db, tid, dirty, new_pid, child)?;
        }

        let parent =
            self.get_parent_with_empty_slots(db, tid, dirty, parent_id, pushed_up.key())?;
        let parent_pid = Self::btree_id(&parent)?;
        {
            let mut guard = parent.write().unwrap();
            let mut entry = BTreeEntry::new(pushed_up.key().clone(), page_pid, new_pid);
            guard.as_internal_mut()?.insert_entry(&mut entry)?;
        }
        page.write().unwrap().set_parent_id(parent_pid)?;
        new_page.write().unwrap().set_parent_id(parent_pid)?;

        crate::strata_debug_log!(
            "[BTreeFile::split_internal_page] split {:?} -> {:?}, pushed up {}",
            page_pid,
            new_pid,
            pushed_up.key()
        );
        if field.compare(Op::LessThanOrEq, pushed_up.key())? {
            Ok(page)
        } else {
            Ok(new_page)
        }
    }

    /// Lock and return a parent guaranteed to have a free entry slot:
    /// allocate a fresh root (updating the root pointer and reparenting the
    /// old root) when the parent is the root pointer, and split the parent
    /// when it is full.
    fn get_parent_with_empty_slots(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        parent_id: BTreePageId,
        field: &Field,
    ) -> Result<PageRef, DbError> {
        let parent = if parent_id.category == PageCategory::RootPtr {
            let parent = self.get_empty_page(db, tid, dirty, PageCategory::Internal)?;
            let parent_pid = Self::btree_id(&parent)?;

            let root_ptr = self.get_page(
                db,
                tid,
                dirty,
                BTreePageId::root_ptr(self.table_id),
                Permissions::ReadWrite,
            )?;
            let prev_root_id = {
                let mut guard = root_ptr.write().unwrap();
                let root_ptr = guard.as_root_ptr_mut()?;
                let prev = root_ptr.root_id().ok_or_else(|| {
                    DbError::Corrupt("root pointer names no root during split".to_string())
                })?;
                root_ptr.set_root_id(parent_pid);
                prev
            };

            let prev_root =
                self.get_page(db, tid, dirty, prev_root_id, Permissions::ReadWrite)?;
            prev_root.write().unwrap().set_parent_id(parent_pid)?;
            crate::strata_debug_log!(
                "[BTreeFile::get_parent_with_empty_slots] new root {:?} over {:?}",
                parent_pid,
                prev_root_id
            );
            parent
        } else {
            self.get_page(db, tid, dirty, parent_id, Permissions::ReadWrite)?
        };

        let full = parent.read().unwrap().as_internal()?.num_empty_slots() == 0;
        if full {
            self.split_internal_page(db, tid, dirty, parent, field)
        } else {
            Ok(parent)
        }
    }

    // Point `child`'s parent pointer at `pid` if it does not already.
    fn update_parent_pointer(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        pid: BTreePageId,
        child: BTreePageId,
    ) -> Result<(), DbError> {
        let page = self.get_page(db, tid, dirty, child, Permissions::ReadOnly)?;
        let current = page.read().unwrap().parent_id()?;
        if current != pid {
            let page = self.get_page(db, tid, dirty, child, Permissions::ReadWrite)?;
            page.write().unwrap().set_parent_id(pid)?;
        }
        Ok(())
    }

    // Point every child of `page` back at it.
    fn update_parent_pointers(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &PageRef,
    ) -> Result<(), DbError> {
        let (pid, children) = {
            let guard = page.read().unwrap();
            let internal = guard.as_internal()?;
            let entries = internal.iter();
            let mut children: Vec<BTreePageId> =
                entries.iter().map(|e| e.left_child()).collect();
            if let Some(last) = entries.last() {
                children.push(last.right_child());
            }
            (internal.id(), children)
        };
        for child in children {
            self.update_parent_pointer(db, tid, dirty, pid, child)?;
        }
        Ok(())
    }

    /// Delete `t` from its leaf, restoring minimum occupancy by stealing
    /// from or merging with a sibling when the leaf drops below half full.
    /// Returns every page the operation dirtied.
    pub fn delete_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        let mut dirty: DirtyPages = HashMap::new();
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        let pid = BTreePageId::new(self.table_id, rid.page_id.page_no(), PageCategory::Leaf);

        let page = self.get_page(db, tid, &mut dirty, pid, Permissions::ReadWrite)?;
        let below_min = {
            let mut guard = page.write().unwrap();
            let leaf = guard.as_leaf_mut()?;
            leaf.delete_tuple(t)?;
            let max_empty = leaf.capacity() - leaf.capacity() / 2;
            leaf.num_empty_slots() > max_empty
        };
        if below_min {
            self.handle_min_occupancy_page(db, tid, &mut dirty, page)?;
        }
        Ok(dirty.into_values().collect())
    }

    /// A page fell below minimum occupancy: find its siblings through the
    /// parent (so they share the parent's entry) and steal or merge. A root
    /// has no parent entry and is exempt.
    fn handle_min_occupancy_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
    ) -> Result<(), DbError> {
        let page_pid = Self::btree_id(&page)?;
        let parent_id = page.read().unwrap().parent_id()?;
        if parent_id.category == PageCategory::RootPtr {
            return Ok(());
        }

        let parent = self.get_page(db, tid, dirty, parent_id, Permissions::ReadWrite)?;
        let (left_entry, right_entry) = {
            let guard = parent.read().unwrap();
            let mut left_entry = None;
            let mut right_entry = None;
            for entry in guard.as_internal()?.iter() {
                if entry.left_child() == page_pid {
                    right_entry = Some(entry);
                    break;
                } else if entry.right_child() == page_pid {
                    left_entry = Some(entry);
                }
            }
            (left_entry, right_entry)
        };

        match page_pid.category {
            PageCategory::Leaf => self.handle_min_occupancy_leaf_page(
                db,
                tid,
                dirty,
                page,
                parent,
                left_entry,
                right_entry,
            ),
            PageCategory::Internal => self.handle_min_occupancy_internal_page(
                db,
                tid,
                dirty,
                page,
                parent,
                left_entry,
                right_entry,
            ),
            _ => Err(DbError::InvalidArgument(format!(
                "page {:?} cannot rebalance",
                page_pid
            ))),
        }
    }

    fn handle_min_occupancy_leaf_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        parent: PageRef,
        left_entry: Option<BTreeEntry>,
        right_entry: Option<BTreeEntry>,
    ) -> Result<(), DbError> {
        let max_empty = {
            let guard = page.read().unwrap();
            let leaf = guard.as_leaf()?;
            leaf.capacity() - leaf.capacity() / 2
        };

        if let Some(entry) = left_entry {
            let sibling =
                self.get_page(db, tid, dirty, entry.left_child(), Permissions::ReadWrite)?;
            let at_minimum =
                sibling.read().unwrap().as_leaf()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_leaf_pages(db, tid, dirty, sibling, page, parent, entry)
            } else {
                self.steal_from_leaf_page(&page, &sibling, &parent, entry, false)
            }
        } else if let Some(entry) = right_entry {
            let sibling =
                self.get_page(db, tid, dirty, entry.right_child(), Permissions::ReadWrite)?;
            let at_minimum =
                sibling.read().unwrap().as_leaf()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_leaf_pages(db, tid, dirty, page, sibling, parent, entry)
            } else {
                self.steal_from_leaf_page(&page, &sibling, &parent, entry, true)
            }
        } else {
            Ok(())
        }
    }

    /// Move tuples one at a time from the sibling until the two pages hold
    /// equal counts, updating the parent's key after each move so it always
    /// names the first tuple of the right-hand page.
    fn steal_from_leaf_page(
        &self,
        page: &PageRef,
        sibling: &PageRef,
        parent: &PageRef,
        mut entry: BTreeEntry,
        is_right_sibling: bool,
    ) -> Result<(), DbError> {
        loop {
            let page_tuples = page.read().unwrap().as_leaf()?.num_tuples();
            let sibling_tuples = sibling.read().unwrap().as_leaf()?.num_tuples();
            if page_tuples >= sibling_tuples {
                break;
            }

            let stolen = {
                let guard = sibling.read().unwrap();
                let leaf = guard.as_leaf()?;
                let next = if is_right_sibling {
                    leaf.iter().next()
                } else {
                    leaf.rev_iter().next()
                };
                next.cloned().ok_or_else(|| {
                    DbError::Corrupt("sibling ran out of tuples mid-steal".to_string())
                })?
            };

            sibling.write().unwrap().as_leaf_mut()?.delete_tuple(&stolen)?;
            let mut moved = stolen.clone();
            page.write().unwrap().as_leaf_mut()?.insert_tuple(&mut moved)?;

            entry.set_key(moved.field(self.key_field)?.clone());
            parent.write().unwrap().as_internal_mut()?.update_entry(&entry)?;
        }
        Ok(())
    }

    fn handle_min_occupancy_internal_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        parent: PageRef,
        left_entry: Option<BTreeEntry>,
        right_entry: Option<BTreeEntry>,
    ) -> Result<(), DbError> {
        let max_empty = {
            let guard = page.read().unwrap();
            let internal = guard.as_internal()?;
            internal.capacity() - internal.capacity() / 2
        };

        if let Some(entry) = left_entry {
            let sibling =
                self.get_page(db, tid, dirty, entry.left_child(), Permissions::ReadWrite)?;
            let at_minimum =
                sibling.read().unwrap().as_internal()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_internal_pages(db, tid, dirty, sibling, page, parent, entry)
            } else {
                self.steal_from_left_internal_page(db, tid, dirty, page, sibling, parent, entry)
            }
        } else if let Some(entry) = right_entry {
            let sibling =
                self.get_page(db, tid, dirty, entry.right_child(), Permissions::ReadWrite)?;
            let at_minimum =
                sibling.read().unwrap().as_internal()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_internal_pages(db, tid, dirty, page, sibling, parent, entry)
            } else {
                self.steal_from_right_internal_page(db, tid, dirty, page, sibling, parent, entry)
            }
        } else {
            Ok(())
        }
    }

    /// Rotate entries in from the left sibling: the parent's key comes down
    /// as the page's new first entry, the sibling's last key goes up to the
    /// parent, and the stolen entry's right child becomes the page's
    /// left-most child.
    fn steal_from_left_internal_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        left_sibling: PageRef,
        parent: PageRef,
        mut parent_entry: BTreeEntry,
    ) -> Result<(), DbError> {
        loop {
            let sibling_entries = left_sibling.read().unwrap().as_internal()?.num_entries();
            let page_entries = page.read().unwrap().as_internal()?.num_entries();
            if sibling_entries <= page_entries {
                break;
            }

            let sibling_last = left_sibling
                .read()
                .unwrap()
                .as_internal()?
                .rev_iter()
                .first()
                .cloned()
                .ok_or_else(|| {
                    DbError::Corrupt("left sibling ran out of entries mid-steal".to_string())
                })?;
            let page_first = page
                .read()
                .unwrap()
                .as_internal()?
                .iter()
                .first()
                .cloned()
                .ok_or_else(|| {
                    DbError::Corrupt("page being refilled has no entries".to_string())
                })?;

            let mut pulled_down = BTreeEntry::new(
                parent_entry.key().clone(),
                sibling_last.right_child(),
                page_first.left_child(),
            );
            page.write()
                .unwrap()
                .as_internal_mut()?
                .insert_entry(&mut pulled_down)?;

            parent_entry.set_key(sibling_last.key().clone());
            parent
                .write()
                .unwrap()
                .as_internal_mut()?
                .update_entry(&parent_entry)?;

            left_sibling
                .write()
                .unwrap()
                .as_internal_mut()?
                .delete_key_and_right_child(&sibling_last)?;

            self.update_parent_pointers(db, tid, dirty, &page)?;
        }
        Ok(())
    }

    /// Mirror of `steal_from_left_internal_page`, rotating through the
    /// parent from the right sibling.
    fn steal_from_right_internal_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: PageRef,
        right_sibling: PageRef,
        parent: PageRef,
        mut parent_entry: BTreeEntry,
    ) -> Result<(), DbError> {
        loop {
            let sibling_entries = right_sibling.read().unwrap().as_internal()?.num_entries();
            let page_entries = page.read().unwrap().as_internal()?.num_entries();
            if sibling_entries <= page_entries {
                break;
            }

            let sibling_first = right_sibling
                .read()
                .unwrap()
                .as_internal()?
                .iter()
                .first()
                .cloned()
                .ok_or_else(|| {
                    DbError::Corrupt("right sibling ran out of entries mid-steal".to_string())
                })?;
            let page_last = page
                .read()
                .unwrap()
                .as_internal()?
                .rev_iter()
                .first()
                .cloned()
                .ok_or_else(|| {
                    DbError::Corrupt("page being refilled has no entries".to_string())
                })?;

            let mut pulled_down = BTreeEntry::new(
                parent_entry.key().clone(),
                page_last.right_child(),
                sibling_first.left_child(),
            );
            page.write()
                .unwrap()
                .as_internal_mut()?
                .insert_entry(&mut pulled_down)?;

            parent_entry.set_key(sibling_first.key().clone());
            parent
                .write()
                .unwrap()
                .as_internal_mut()?
                .update_entry(&parent_entry)?;

            right_sibling
                .write()
                .unwrap()
                .as_internal_mut()?
                .delete_key_and_left_child(&sibling_first)?;

            self.update_parent_pointers(db, tid, dirty, &page)?;
        }
        Ok(())
    }

    /// Merge two leaves: the left absorbs the right's tuples, the sibling
    /// chain skips the right page, the right page returns to the free list,
    /// and the bridging parent entry is deleted.
    fn merge_leaf_pages(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        left: PageRef,
        right: PageRef,
        parent: PageRef,
        parent_entry: BTreeEntry,
    ) -> Result<(), DbError> {
        let right_pid = Self::btree_id(&right)?;
        let left_pid = Self::btree_id(&left)?;

        let moved: Vec<Tuple> = right.read().unwrap().as_leaf()?.iter().cloned().collect();
        for t in moved {
            right.write().unwrap().as_leaf_mut()?.delete_tuple(&t)?;
            let mut m = t.clone();
            left.write().unwrap().as_leaf_mut()?.insert_tuple(&mut m)?;
        }

        self.set_empty_page(db, tid, dirty, right_pid.page_no)?;

        let right_right = right.read().unwrap().as_leaf()?.right_sibling_id();
        match right_right {
            Some(rr_pid) => {
                let rr = self.get_page(db, tid, dirty, rr_pid, Permissions::ReadWrite)?;
                left.write()
                    .unwrap()
                    .as_leaf_mut()?
                    .set_right_sibling_id(Some(rr_pid));
                rr.write()
                    .unwrap()
                    .as_leaf_mut()?
                    .set_left_sibling_id(Some(left_pid));
            }
            None => {
                left.write().unwrap().as_leaf_mut()?.set_right_sibling_id(None);
            }
        }

        crate::strata_debug_log!(
            "[BTreeFile::merge_leaf_pages] {:?} absorbed {:?}",
            left_pid,
            right_pid
        );
        self.delete_parent_entry(db, tid, dirty, &left, &parent, &parent_entry)
    }

    /// Merge two internal pages: the parent's bridging key is pulled down
    /// between them, the left absorbs the right's entries (reparenting the
    /// moved children), and the right page returns to the free list.
    fn merge_internal_pages(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        left: PageRef,
        right: PageRef,
        parent: PageRef,
        parent_entry: BTreeEntry,
    ) -> Result<(), DbError> {
        let left_pid = Self::btree_id(&left)?;
        let right_pid = Self::btree_id(&right)?;

        self.delete_parent_entry(db, tid, dirty, &left, &parent, &parent_entry)?;

        // Pull the parent's key down so it bridges the two pages' child
        // lists.
        let left_last_child = left
            .read()
            .unwrap()
            .as_internal()?
            .rev_iter()
            .first()
            .map(|e| e.right_child())
            .ok_or_else(|| DbError::Corrupt("merging an empty internal page".to_string()))?;
        let right_first_child = right
            .read()
            .unwrap()
            .as_internal()?
            .iter()
            .first()
            .map(|e| e.left_child())
            .ok_or_else(|| DbError::Corrupt("merging an empty internal page".to_string()))?;

        let mut pulled_down = BTreeEntry::new(
            parent_entry.key().clone(),
            left_last_child,
            right_first_child,
        );
        left.write()
            .unwrap()
            .as_internal_mut()?
            .insert_entry(&mut pulled_down)?;

        let moved = right.read().unwrap().as_internal()?.iter();
        for entry in moved {
            right
                .write()
                .unwrap()
                .as_internal_mut()?
                .delete_key_and_left_child(&entry)?;
            self.update_parent_pointer(db, tid, dirty, left_pid, entry.left_child())?;
            self.update_parent_pointer(db, tid, dirty, left_pid, entry.right_child())?;
            let mut m = entry.clone();
            left.write().unwrap().as_internal_mut()?.insert_entry(&mut m)?;
        }

        crate::strata_debug_log!(
            "[BTreeFile::merge_internal_pages] {:?} absorbed {:?}",
            left_pid,
            right_pid
        );
        self.set_empty_page(db, tid, dirty, right_pid.page_no)
    }

    /// Remove a key and right-child pointer from a parent. An emptied root
    /// hands its place to `left_page` through the root pointer; any other
    /// parent below minimum occupancy rebalances recursively.
    fn delete_parent_entry(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        left_page: &PageRef,
        parent: &PageRef,
        parent_entry: &BTreeEntry,
    ) -> Result<(), DbError> {
        parent
            .write()
            .unwrap()
            .as_internal_mut()?
            .delete_key_and_right_child(parent_entry)?;

        let (emptied, below_min, parent_parent, parent_pid) = {
            let guard = parent.read().unwrap();
            let internal = guard.as_internal()?;
            let max_empty = internal.capacity() - internal.capacity() / 2;
            (
                internal.num_entries() == 0,
                internal.num_empty_slots() > max_empty,
                internal.parent_id(),
                internal.id(),
            )
        };

        if emptied {
            // The last entry left the root: promote the surviving child.
            if parent_parent.category != PageCategory::RootPtr {
                return Err(DbError::Corrupt(
                    "non-root internal page emptied by delete".to_string(),
                ));
            }
            let root_ptr_pid = BTreePageId::root_ptr(self.table_id);
            let root_ptr =
                self.get_page(db, tid, dirty, root_ptr_pid, Permissions::ReadWrite)?;
            let left_pid = Self::btree_id(left_page)?;
            left_page.write().unwrap().set_parent_id(root_ptr_pid)?;
            root_ptr
                .write()
                .unwrap()
                .as_root_ptr_mut()?
                .set_root_id(left_pid);
            crate::strata_debug_log!(
                "[BTreeFile::delete_parent_entry] root {:?} replaced by {:?}",
                parent_pid,
                left_pid
            );
            self.set_empty_page(db, tid, dirty, parent_pid.page_no)?;
        } else if below_min {
            self.handle_min_occupancy_page(db, tid, dirty, Arc::clone(parent))?;
        }
        Ok(())
    }

    /// The page number of the first free data page, scanning the header
    /// chain; appends a fresh block when no tracked page is free.
    fn get_empty_page_no(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
    ) -> Result<usize, DbError> {
        let page_size = db.page_size();
        let root_ptr = self.get_root_ptr_page(db, tid, dirty)?;
        let header_id = root_ptr.read().unwrap().as_root_ptr()?.header_id();
        let slots_per_header = BTreeHeaderPage::num_slots(page_size);

        if let Some(first_header) = header_id {
            let mut current = first_header;
            let mut header_count = 0usize;
            loop {
                let header = self.get_page(db, tid, dirty, current, Permissions::ReadOnly)?;
                let (has_free, next) = {
                    let guard = header.read().unwrap();
                    let hp = guard.as_header()?;
                    (hp.get_empty_slot().is_some(), hp.next_page_id())
                };
                if has_free {
                    let header =
                        self.get_page(db, tid, dirty, current, Permissions::ReadWrite)?;
                    let slot = {
                        let mut guard = header.write().unwrap();
                        let hp = guard.as_header_mut()?;
                        let slot = hp.get_empty_slot().ok_or_else(|| {
                            DbError::Corrupt("free slot vanished under write lock".to_string())
                        })?;
                        hp.mark_slot_used(slot, true);
                        slot
                    };
                    return Ok(header_count * slots_per_header + slot);
                }
                match next {
                    Some(next_id) => {
                        current = next_id;
                        header_count += 1;
                    }
                    None => break,
                }
            }
        }

        // No header pages, or none with a free slot: grow the file.
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&vec![0u8; page_size])?;
        let len = file.metadata()?.len() as usize;
        let page_no = len.saturating_sub(BTreeRootPtrPage::PAGE_SIZE) / page_size;
        crate::strata_debug_log!(
            "[BTreeFile::get_empty_page_no] table {} grew to page {}",
            self.table_id,
            page_no
        );
        Ok(page_no)
    }

    /// Allocate an empty page of the given category: reuse a free page when
    /// possible, wipe its block on disk, drop any stale cached image, and
    /// fetch it back through the buffer pool read-write.
    fn get_empty_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        category: PageCategory,
    ) -> Result<PageRef, DbError> {
        let page_size = db.page_size();
        let page_no = self.get_empty_page_no(db, tid, dirty)?;
        let pid = BTreePageId::new(self.table_id, page_no, category);

        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(Self::data_offset(page_no, page_size)))?;
            file.write_all(&vec![0u8; page_size])?;
        }

        db.buffer_pool().discard_page(PageId::BTree(pid));
        dirty.remove(&PageId::BTree(pid));

        self.get_page(db, tid, dirty, pid, Permissions::ReadWrite)
    }

    /// Mark a data page free in the header chain, lazily creating and
    /// linking header pages until one covers the page number.
    fn set_empty_page(
        &self,
        db: &Db,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        empty_page_no: usize,
    ) -> Result<(), DbError> {
        let page_size = db.page_size();
        let slots_per_header = BTreeHeaderPage::num_slots(page_size);

        let root_ptr = self.get_root_ptr_page(db, tid, dirty)?;
        let mut header_id = root_ptr.read().unwrap().as_root_ptr()?.header_id();
        let mut prev_id: Option<BTreePageId> = None;
        let mut header_count = 0usize;

        if header_id.is_none() {
            let root_ptr = self.get_page(
                db,
                tid,
                dirty,
                BTreePageId::root_ptr(self.table_id),
                Permissions::ReadWrite,
            )?;
            let header = self.get_empty_page(db, tid, dirty, PageCategory::Header)?;
            let hid = {
                let mut guard = header.write().unwrap();
                let hp = guard.as_header_mut()?;
                hp.init();
                hp.id()
            };
            root_ptr
                .write()
                .unwrap()
                .as_root_ptr_mut()?
                .set_header_id(hid);
            header_id = Some(hid);
        }

        // Walk the chain to the header page covering empty_page_no.
        while let Some(hid) = header_id {
            if (header_count + 1) * slots_per_header >= empty_page_no {
                break;
            }
            let header = self.get_page(db, tid, dirty, hid, Permissions::ReadOnly)?;
            prev_id = Some(hid);
            header_id = header.read().unwrap().as_header()?.next_page_id();
            header_count += 1;
        }

        // Extend the chain until a header page covers the slot.
        while (header_count + 1) * slots_per_header < empty_page_no {
            let prev = prev_id.ok_or_else(|| {
                DbError::Corrupt("header chain ended with no predecessor".to_string())
            })?;
            let prev_page = self.get_page(db, tid, dirty, prev, Permissions::ReadWrite)?;
            let header = self.get_empty_page(db, tid, dirty, PageCategory::Header)?;
            let hid = {
                let mut guard = header.write().unwrap();
                let hp = guard.as_header_mut()?;
                hp.init();
                hp.set_prev_page_id(Some(prev));
                hp.id()
            };
            prev_page
                .write()
                .unwrap()
                .as_header_mut()?
                .set_next_page_id(Some(hid));
            header_count += 1;
            prev_id = Some(hid);
            header_id = Some(hid);
        }

        let hid = header_id.ok_or_else(|| {
            DbError::Corrupt("no header page covers the freed slot".to_string())
        })?;
        let header = self.get_page(db, tid, dirty, hid, Permissions::ReadWrite)?;
        let slot = empty_page_no - header_count * slots_per_header;
        header
            .write()
            .unwrap()
            .as_header_mut()?
            .mark_slot_used(slot, false);
        crate::strata_debug_log!(
            "[BTreeFile::set_empty_page] freed page {} of table {}",
            empty_page_no,
            self.table_id
        );
        Ok(())
    }

    /// All tuples in key order.
    pub fn iterator(&self, db: Arc<Db>, tid: TransactionId) -> BTreeFileIterator {
        BTreeFileIterator {
            db,
            tid,
            table_id: self.table_id,
            tuples: VecDeque::new(),
            next_leaf: None,
            opened: false,
        }
    }

    /// All tuples in reverse key order.
    pub fn reverse_iterator(&self, db: Arc<Db>, tid: TransactionId) -> BTreeFileReverseIterator {
        BTreeFileReverseIterator {
            db,
            tid,
            table_id: self.table_id,
            tuples: VecDeque::new(),
            next_leaf: None,
            opened: false,
        }
    }

    /// Tuples matching an index predicate, in key order, starting at the
    /// first leaf that could match.
    pub fn index_iterator(
        &self,
        db: Arc<Db>,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> BTreeSearchIterator {
        BTreeSearchIterator {
            db,
            tid,
            table_id: self.table_id,
            key_field: self.key_field,
            predicate,
            tuples: VecDeque::new(),
            next_leaf: None,
            done: false,
            opened: false,
        }
    }

    /// Tuples matching an index predicate, in reverse key order.
    pub fn index_reverse_iterator(
        &self,
        db: Arc<Db>,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> BTreeReverseSearchIterator {
        BTreeReverseSearchIterator {
            db,
            tid,
            table_id: self.table_id,
            key_field: self.key_field,
            predicate,
            tuples: VecDeque::new(),
            next_leaf: None,
            done: false,
            opened: false,
        }
    }
}

// Shared plumbing for the file iterators: resolve the root, descend to a
// starting leaf, and load one leaf's tuples at a time.

fn btree_file_of(db: &Db, table_id: u32) -> Result<Arc<crate::catalog::DbFile>, DbError> {
    db.catalog().get_database_file(table_id)
}

fn root_id(db: &Db, tid: TransactionId, table_id: u32) -> Result<Option<BTreePageId>, DbError> {
    let file = btree_file_of(db, table_id)?;
    if file.num_pages(db.page_size())? == 0 {
        return Ok(None);
    }
    let root_ptr = db.buffer_pool().get_page(
        db.catalog(),
        tid,
        PageId::BTree(BTreePageId::root_ptr(table_id)),
        Permissions::ReadOnly,
    )?;
    let id = root_ptr.read().unwrap().as_root_ptr()?.root_id();
    Ok(id)
}

// A leaf's live tuples plus its neighbors, loaded under a read lock.
fn leaf_tuples(
    db: &Db,
    tid: TransactionId,
    pid: BTreePageId,
    reverse: bool,
) -> Result<(VecDeque<Tuple>, Option<BTreePageId>, Option<BTreePageId>), DbError> {
    let page = db
        .buffer_pool()
        .get_page(db.catalog(), tid, PageId::BTree(pid), Permissions::ReadOnly)?;
    let guard = page.read().unwrap();
    let leaf = guard.as_leaf()?;
    let tuples = if reverse {
        leaf.rev_iter().cloned().collect()
    } else {
        leaf.iter().cloned().collect()
    };
    Ok((tuples, leaf.left_sibling_id(), leaf.right_sibling_id()))
}

/// Forward scan of every tuple, walking the leaf chain left to right.
pub struct BTreeFileIterator {
    db: Arc<Db>,
    tid: TransactionId,
    table_id: u32,
    tuples: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
    opened: bool,
}

impl DbFileIterator for BTreeFileIterator {
    fn open(&mut self) -> Result<(), DbError> {
        self.tuples.clear();
        self.next_leaf = None;
        if let Some(root) = root_id(&self.db, self.tid, self.table_id)? {
            let file = btree_file_of(&self.db, self.table_id)?;
            let btree = file.as_btree()?;
            let leaf = btree.find_leaf_page(
                &self.db,
                self.tid,
                &mut HashMap::new(),
                root,
                Permissions::ReadOnly,
                None,
            )?;
            let pid = BTreeFile::btree_id(&leaf)?;
            let (tuples, _, right) = leaf_tuples(&self.db, self.tid, pid, false)?;
            self.tuples = tuples;
            self.next_leaf = right;
        }
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if let Some(t) = self.tuples.pop_front() {
                return Ok(Some(t));
            }
            match self.next_leaf.take() {
                Some(pid) => {
                    let (tuples, _, right) = leaf_tuples(&self.db, self.tid, pid, false)?;
                    self.tuples = tuples;
                    self.next_leaf = right;
                }
                None => return Ok(None),
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.tuples.clear();
        self.next_leaf = None;
        self.opened = false;
    }
}

/// Reverse scan of every tuple, walking the leaf chain right to left.
pub struct BTreeFileReverseIterator {
    db: Arc<Db>,
    tid: TransactionId,
    table_id: u32,
    tuples: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
    opened: bool,
}

impl DbFileIterator for BTreeFileReverseIterator {
    fn open(&mut self) -> Result<(), DbError> {
        self.tuples.clear();
        self.next_leaf = None;
        if let Some(root) = root_id(&self.db, self.tid, self.table_id)? {
            let file = btree_file_of(&self.db, self.table_id)?;
            let btree = file.as_btree()?;
            let leaf = btree.find_leaf_page_reverse(
                &self.db,
                self.tid,
                &mut HashMap::new(),
                root,
                Permissions::ReadOnly,
                None,
            )?;
            let pid = BTreeFile::btree_id(&leaf)?;
            let (tuples, left, _) = leaf_tuples(&self.db, self.tid, pid, true)?;
            self.tuples = tuples;
            self.next_leaf = left;
        }
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if let Some(t) = self.tuples.pop_front() {
                return Ok(Some(t));
            }
            match self.next_leaf.take() {
                Some(pid) => {
                    let (tuples, left, _) = leaf_tuples(&self.db, self.tid, pid, true)?;
                    self.tuples = tuples;
                    self.next_leaf = left;
                }
                None => return Ok(None),
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.tuples.clear();
        self.next_leaf = None;
        self.opened = false;
    }
}

/// Forward index scan: starts at the first leaf that could satisfy the
/// predicate and stops as soon as no further tuple can match.
pub struct BTreeSearchIterator {
    db: Arc<Db>,
    tid: TransactionId,
    table_id: u32,
    key_field: usize,
    predicate: IndexPredicate,
    tuples: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
    done: bool,
    opened: bool,
}

impl DbFileIterator for BTreeSearchIterator {
    fn open(&mut self) -> Result<(), DbError> {
        self.tuples.clear();
        self.next_leaf = None;
        self.done = false;
        if let Some(root) = root_id(&self.db, self.tid, self.table_id)? {
            let file = btree_file_of(&self.db, self.table_id)?;
            let btree = file.as_btree()?;
            let key = match self.predicate.op {
                Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => {
                    Some(&self.predicate.field)
                }
                _ => None,
            };
            let leaf = btree.find_leaf_page(
                &self.db,
                self.tid,
                &mut HashMap::new(),
                root,
                Permissions::ReadOnly,
                key,
            )?;
            let pid = BTreeFile::btree_id(&leaf)?;
            let (tuples, _, right) = leaf_tuples(&self.db, self.tid, pid, false)?;
            self.tuples = tuples;
            self.next_leaf = right;
        } else {
            self.done = true;
        }
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened || self.done {
            return Ok(None);
        }
        loop {
            while let Some(t) = self.tuples.pop_front() {
                let key = t.field(self.key_field)?;
                if key.compare(self.predicate.op, &self.predicate.field)? {
                    return Ok(Some(t));
                }
                match self.predicate.op {
                    // Scanning forward past the last possible match.
                    Op::LessThan | Op::LessThanOrEq => {
                        self.done = true;
                        return Ok(None);
                    }
                    Op::Equals
                        if key.compare(Op::GreaterThan, &self.predicate.field)? =>
                    {
                        self.done = true;
                        return Ok(None);
                    }
                    _ => {}
                }
            }
            match self.next_leaf.take() {
                Some(pid) => {
                    let (tuples, _, right) = leaf_tuples(&self.db, self.tid, pid, false)?;
                    self.tuples = tuples;
                    self.next_leaf = right;
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.tuples.clear();
        self.next_leaf = None;
        self.opened = false;
    }
}

/// Reverse index scan: mirror of `BTreeSearchIterator` over the left
/// sibling chain.
pub struct BTreeReverseSearchIterator {
    db: Arc<Db>,
    tid: TransactionId,
    table_id: u32,
    key_field: usize,
    predicate: IndexPredicate,
    tuples: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
    done: bool,
    opened: bool,
}

impl DbFileIterator for BTreeReverseSearchIterator {
    fn open(&mut self) -> Result<(), DbError> {
        self.tuples.clear();
        self.next_leaf = None;
        self.done = false;
        if let Some(root) = root_id(&self.db, self.tid, self.table_id)? {
            let file = btree_file_of(&self.db, self.table_id)?;
            let btree = file.as_btree()?;
            let key = match self.predicate.op {
                Op::GreaterThan | Op::GreaterThanOrEq => None,
                _ => Some(&self.predicate.field),
            };
            let leaf = btree.find_leaf_page_reverse(
                &self.db,
                self.tid,
                &mut HashMap::new(),
                root,
                Permissions::ReadOnly,
                key,
            )?;
            let pid = BTreeFile::btree_id(&leaf)?;
            let (tuples, left, _) = leaf_tuples(&self.db, self.tid, pid, true)?;
            self.tuples = tuples;
            self.next_leaf = left;
        } else {
            self.done = true;
        }
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened || self.done {
            return Ok(None);
        }
        loop {
            while let Some(t) = self.tuples.pop_front() {
                let key = t.field(self.key_field)?;
                if key.compare(self.predicate.op, &self.predicate.field)? {
                    return Ok(Some(t));
                }
                match self.predicate.op {
                    // Scanning backward past the last possible match.
                    Op::GreaterThan | Op::GreaterThanOrEq => {
                        self.done = true;
                        return Ok(None);
                    }
                    Op::Equals if key.compare(Op::LessThan, &self.predicate.field)? => {
                        self.done = true;
                        return Ok(None);
                    }
                    _ => {}
                }
            }
            match self.next_leaf.take() {
                Some(pid) => {
                    let (tuples, left, _) = leaf_tuples(&self.db, self.tid, pid, true)?;
                    self.tuples = tuples;
                    self.next_leaf = left;
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.tuples.clear();
        self.next_leaf = None;
        self.opened = false;
    }
}
