//! Heap files: unordered tuples across fixed-size pages.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::PageRef;
use crate::catalog::{table_id_for_path, DbFileIterator};
use crate::error::DbError;
use crate::page::{HeapPage, HeapPageId, Page, PageId, Permissions};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::Db;

/// A file of heap pages, in no particular tuple order. Page `i` occupies
/// bytes `[i * page_size, (i + 1) * page_size)`; there is no file header.
#[derive(Debug)]
pub struct HeapFile {
    // Guards reads, writes and appends; appending under this mutex is what
    // keeps concurrent growers from producing overlapping blocks.
    file: Mutex<File>,
    path: PathBuf,
    table_id: u32,
    td: TupleDesc,
}

impl HeapFile {
    pub fn new<P: AsRef<Path>>(path: P, td: TupleDesc) -> Result<HeapFile, DbError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let abs = path.canonicalize()?;
        let table_id = table_id_for_path(&abs);
        crate::strata_debug_log!(
            "[HeapFile::new] opened {:?} as table {}",
            abs,
            table_id
        );
        Ok(HeapFile {
            file: Mutex::new(file),
            path: abs,
            table_id,
            td,
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

    /// The file length is kept an exact multiple of the page size; only
    /// whole pages are ever written.
    pub fn num_pages(&self, page_size: usize) -> Result<usize, DbError> {
        let len = self.file.lock().unwrap().metadata()?.len();
        Ok(len as usize / page_size)
    }

    pub fn read_page(&self, pid: HeapPageId, page_size: usize) -> Result<Page, DbError> {
        if pid.table_id != self.table_id {
            return Err(DbError::InvalidArgument(format!(
                "page {:?} does not belong to table {}",
                pid, self.table_id
            )));
        }
        let mut file = self.file.lock().unwrap();
        let offset = (pid.page_no * page_size) as u64;
        if offset + page_size as u64 > file.metadata()?.len() {
            return Err(DbError::InvalidArgument(format!(
                "read past end of heap file: page {}",
                pid.page_no
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; page_size];
        file.read_exact(&mut buf)?;
        drop(file);
        crate::strata_debug_log!("[HeapFile::read_page] read page {}", pid.page_no);
        Ok(Page::Heap(HeapPage::new(pid, &buf, &self.td, page_size)?))
    }

    pub fn write_page(&self, page: &Page, page_size: usize) -> Result<(), DbError> {
        let heap = page.as_heap()?;
        let offset = (heap.id().page_no * page_size) as u64;
        let data = heap.serialize();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        crate::strata_debug_log!("[HeapFile::write_page] wrote page {}", heap.id().page_no);
        Ok(())
    }

    // Append a freshly initialized empty page and return its number. Runs
    // outside the buffer pool; the caller fetches the page back through it.
    fn append_empty_page(&self, page_size: usize) -> Result<usize, DbError> {
        let mut file = self.file.lock().unwrap();
        let len = file.metadata()?.len() as usize;
        let page_no = len / page_size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(&HeapPage::empty_page_data(page_size))?;
        crate::strata_debug_log!(
            "[HeapFile::append_empty_page] table {} grew to page {}",
            self.table_id,
            page_no
        );
        Ok(page_no)
    }

    /// Insert into the first page with an empty slot, probing pages in
    /// order. A full page's lock is released before moving on (nothing was
    /// mutated); when every page is full, the file grows by one page.
    pub fn insert_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &mut Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        let page_size = db.page_size();
        for page_no in 0..self.num_pages(page_size)? {
            let pid = PageId::Heap(HeapPageId::new(self.table_id, page_no));
            let page = db
                .buffer_pool()
                .get_page(db.catalog(), tid, pid, Permissions::ReadWrite)?;
            let has_room = page.read().unwrap().as_heap()?.num_empty_slots() > 0;
            if has_room {
                page.write().unwrap().as_heap_mut()?.insert_tuple(t)?;
                return Ok(vec![page]);
            }
            db.buffer_pool().release_page(tid, pid);
        }

        let page_no = self.append_empty_page(page_size)?;
        let pid = PageId::Heap(HeapPageId::new(self.table_id, page_no));
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), tid, pid, Permissions::ReadWrite)?;
        page.write().unwrap().as_heap_mut()?.insert_tuple(t)?;
        Ok(vec![page])
    }

    /// Delete the tuple from the page its RecordId names.
    pub fn delete_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        let pid = match rid.page_id {
            PageId::Heap(hpid) if hpid.table_id == self.table_id => rid.page_id,
            _ => {
                return Err(DbError::InvalidArgument(format!(
                    "tuple {:?} is not in table {}",
                    rid, self.table_id
                )))
            }
        };
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), tid, pid, Permissions::ReadWrite)?;
        page.write().unwrap().as_heap_mut()?.delete_tuple(t)?;
        Ok(vec![page])
    }

    pub fn iterator(&self, db: Arc<Db>, tid: TransactionId) -> HeapFileIterator {
        HeapFileIterator {
            db,
            tid,
            table_id: self.table_id,
            page_no: 0,
            tuples: VecDeque::new(),
            opened: false,
        }
    }
}

/// Walks the file page by page, yielding live tuples under READ_ONLY locks.
/// Each page's tuples are materialized while its lock is held.
pub struct HeapFileIterator {
    db: Arc<Db>,
    tid: TransactionId,
    table_id: u32,
    page_no: usize,
    tuples: VecDeque<Tuple>,
    opened: bool,
}

impl HeapFileIterator {
    fn page_tuples(&self, page_no: usize) -> Result<VecDeque<Tuple>, DbError> {
        let pid = PageId::Heap(HeapPageId::new(self.table_id, page_no));
        let page = self.db.buffer_pool().get_page(
            self.db.catalog(),
            self.tid,
            pid,
            Permissions::ReadOnly,
        )?;
        let guard = page.read().unwrap();
        Ok(guard.as_heap()?.iter().cloned().collect())
    }

    fn num_pages(&self) -> Result<usize, DbError> {
        let file = self.db.catalog().get_database_file(self.table_id)?;
        file.num_pages(self.db.page_size())
    }
}

impl DbFileIterator for HeapFileIterator {
    fn open(&mut self) -> Result<(), DbError> {
        self.page_no = 0;
        self.tuples = if self.num_pages()? > 0 {
            self.page_tuples(0)?
        } else {
            VecDeque::new()
        };
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
            if self.page_no + 1 < self.num_pages()? {
                self.page_no += 1;
                self.tuples = self.page_tuples(self.page_no)?;
            } else {
                return Ok(None);
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.tuples.clear();
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, FieldType};
    use tempfile::tempdir;

    #[test]
    fn pages_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.dat");
        let td = TupleDesc::from_types(vec![FieldType::Int, FieldType::Int]);
        let file = HeapFile::new(&path, td.clone()).unwrap();
        assert_eq!(file.num_pages(256).unwrap(), 0);

        let pid = HeapPageId::new(file.id(), 0);
        let mut page = HeapPage::new(pid, &HeapPage::empty_page_data(256), &td, 256).unwrap();
        for i in 0..5 {
            let mut t = Tuple::new(td.clone());
            t.set_field(0, Field::Int(i)).unwrap();
            t.set_field(1, Field::Int(i * 2)).unwrap();
            page.insert_tuple(&mut t).unwrap();
        }
        file.write_page(&Page::Heap(page), 256).unwrap();
        assert_eq!(file.num_pages(256).unwrap(), 1);

        let reread = file.read_page(pid, 256).unwrap();
        assert_eq!(reread.as_heap().unwrap().iter().count(), 5);
    }

    #[test]
    fn reading_past_the_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.dat");
        let td = TupleDesc::from_types(vec![FieldType::Int]);
        let file = HeapFile::new(&path, td).unwrap();

        let pid = HeapPageId::new(file.id(), 3);
        assert!(file.read_page(pid, 256).is_err());
    }

    #[test]
    fn table_id_is_stable_across_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.dat");
        let td = TupleDesc::from_types(vec![FieldType::Int]);

        let first = HeapFile::new(&path, td.clone()).unwrap().id();
        let second = HeapFile::new(&path, td).unwrap().id();
        assert_eq!(first, second);
    }
}
