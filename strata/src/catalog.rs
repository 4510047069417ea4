//! The table registry and the file-of-tuples abstraction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::btree_file::BTreeFile;
use crate::buffer_pool::PageRef;
use crate::error::DbError;
use crate::heap_file::HeapFile;
use crate::page::{Page, PageId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::Db;

/// Stable 32-bit fingerprint of a file path, used as the table id. FNV-1a so
/// the id survives process restarts.
pub fn table_id_for_path(path: &Path) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in path.to_string_lossy().as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Pull-based tuple producer over a file's contents, restartable via
/// `rewind`. The operator layer wraps these in executors.
pub trait DbFileIterator: Send {
    fn open(&mut self) -> Result<(), DbError>;
    fn next(&mut self) -> Result<Option<Tuple>, DbError>;
    fn rewind(&mut self) -> Result<(), DbError>;
    fn close(&mut self);
}

/// A file of tuples: either a heap file or a B+ tree file, behind one
/// uniform scan/insert/delete interface. Callers needing the concrete shape
/// dispatch on the tag.
#[derive(Debug)]
pub enum DbFile {
    Heap(HeapFile),
    BTree(BTreeFile),
}

impl DbFile {
    pub fn id(&self) -> u32 {
        match self {
            DbFile::Heap(f) => f.id(),
            DbFile::BTree(f) => f.id(),
        }
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        match self {
            DbFile::Heap(f) => f.tuple_desc(),
            DbFile::BTree(f) => f.tuple_desc(),
        }
    }

    pub fn num_pages(&self, page_size: usize) -> Result<usize, DbError> {
        match self {
            DbFile::Heap(f) => f.num_pages(page_size),
            DbFile::BTree(f) => f.num_pages(page_size),
        }
    }

    pub fn read_page(&self, pid: PageId, page_size: usize) -> Result<Page, DbError> {
        match (self, pid) {
            (DbFile::Heap(f), PageId::Heap(hpid)) => f.read_page(hpid, page_size),
            (DbFile::BTree(f), PageId::BTree(bpid)) => f.read_page(bpid, page_size),
            _ => Err(DbError::InvalidArgument(format!(
                "page id {:?} does not match file kind",
                pid
            ))),
        }
    }

    pub fn write_page(&self, page: &Page, page_size: usize) -> Result<(), DbError> {
        match self {
            DbFile::Heap(f) => f.write_page(page, page_size),
            DbFile::BTree(f) => f.write_page(page, page_size),
        }
    }

    /// Insert through the owning file, returning every page the operation
    /// dirtied.
    pub fn insert_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &mut Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        match self {
            DbFile::Heap(f) => f.insert_tuple(db, tid, t),
            DbFile::BTree(f) => f.insert_tuple(db, tid, t),
        }
    }

    pub fn delete_tuple(
        &self,
        db: &Db,
        tid: TransactionId,
        t: &Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        match self {
            DbFile::Heap(f) => f.delete_tuple(db, tid, t),
            DbFile::BTree(f) => f.delete_tuple(db, tid, t),
        }
    }

    pub fn iterator(&self, db: Arc<Db>, tid: TransactionId) -> Box<dyn DbFileIterator> {
        match self {
            DbFile::Heap(f) => Box::new(f.iterator(db, tid)),
            DbFile::BTree(f) => Box::new(f.iterator(db, tid)),
        }
    }

    pub fn as_btree(&self) -> Result<&BTreeFile, DbError> {
        match self {
            DbFile::BTree(f) => Ok(f),
            DbFile::Heap(_) => Err(DbError::InvalidArgument(
                "expected a B+ tree file, got a heap file".to_string(),
            )),
        }
    }
}

#[derive(Debug)]
struct TableInfo {
    file: Arc<DbFile>,
    name: String,
    primary_key: String,
}

/// The table registry: table id to file, plus name lookups.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u32, Arc<TableInfo>>>,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog::default()
    }

    /// Register a table. A table with the same name or id is replaced.
    pub fn add_table(&self, file: DbFile, name: &str, primary_key: &str) -> u32 {
        let table_id = file.id();
        let info = Arc::new(TableInfo {
            file: Arc::new(file),
            name: name.to_string(),
            primary_key: primary_key.to_string(),
        });
        let mut tables = self.tables.write().unwrap();
        tables.retain(|_, t| t.name != name);
        tables.insert(table_id, info);
        crate::strata_debug_log!("[Catalog::add_table] {} -> table {}", name, table_id);
        table_id
    }

    pub fn get_database_file(&self, table_id: u32) -> Result<Arc<DbFile>, DbError> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|t| Arc::clone(&t.file))
            .ok_or_else(|| DbError::NoSuchTable(format!("id {}", table_id)))
    }

    pub fn get_tuple_desc(&self, table_id: u32) -> Result<TupleDesc, DbError> {
        Ok(self.get_database_file(table_id)?.tuple_desc().clone())
    }

    pub fn get_table_id(&self, name: &str) -> Result<u32, DbError> {
        self.tables
            .read()
            .unwrap()
            .values()
            .find(|t| t.name == name)
            .map(|t| t.file.id())
            .ok_or_else(|| DbError::NoSuchTable(name.to_string()))
    }

    pub fn get_table_name(&self, table_id: u32) -> Result<String, DbError> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|t| t.name.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("id {}", table_id)))
    }

    pub fn get_primary_key(&self, table_id: u32) -> Result<String, DbError> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|t| t.primary_key.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("id {}", table_id)))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.tables.read().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_fingerprint_is_stable() {
        let a = table_id_for_path(Path::new("/tmp/t1.dat"));
        let b = table_id_for_path(Path::new("/tmp/t1.dat"));
        let c = table_id_for_path(Path::new("/tmp/t2.dat"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
