//! Shared fixtures for the engine tests.
#![allow(dead_code)]

use std::sync::Arc;

use strata::btree_file::BTreeFile;
use strata::catalog::{DbFile, DbFileIterator};
use strata::heap_file::HeapFile;
use strata::page::{BTreePageId, PageCategory, PageId, Permissions};
use strata::tuple::{Field, FieldType, Tuple, TupleDesc};
use strata::{Db, DbConfig, TransactionId};
use tempfile::TempDir;

/// A database over a temp directory; the directory lives as long as the
/// fixture.
pub struct TestDb {
    pub db: Arc<Db>,
    pub dir: TempDir,
}

pub fn setup(page_size: usize, pool_pages: usize) -> TestDb {
    let dir = TempDir::new().expect("temp dir");
    let db = Arc::new(Db::with_config(DbConfig {
        page_size,
        pool_pages,
    }));
    TestDb { db, dir }
}

pub fn int_desc(names: &[&str]) -> TupleDesc {
    TupleDesc::new(
        vec![FieldType::Int; names.len()],
        names.iter().map(|n| Some(n.to_string())).collect(),
    )
}

pub fn int_tuple(td: &TupleDesc, values: &[i32]) -> Tuple {
    let mut t = Tuple::new(td.clone());
    for (i, v) in values.iter().enumerate() {
        t.set_field(i, Field::Int(*v)).expect("set field");
    }
    t
}

pub fn int_of(t: &Tuple, field: usize) -> i32 {
    match t.field(field).expect("field") {
        Field::Int(v) => *v,
        other => panic!("expected an int field, got {:?}", other),
    }
}

impl TestDb {
    pub fn create_heap_table(&self, name: &str, fields: &[&str]) -> u32 {
        let td = int_desc(fields);
        let path = self.dir.path().join(format!("{}.dat", name));
        std::fs::write(&path, b"").expect("touch heap file");
        let file = HeapFile::new(&path, td).expect("heap file");
        self.db
            .catalog()
            .add_table(DbFile::Heap(file), name, fields[0])
    }

    pub fn create_btree_table(&self, name: &str, fields: &[&str], key_field: usize) -> u32 {
        let td = int_desc(fields);
        let path = self.dir.path().join(format!("{}.idx", name));
        std::fs::write(&path, b"").expect("touch index file");
        let file = BTreeFile::new(&path, key_field, td).expect("btree file");
        self.db
            .catalog()
            .add_table(DbFile::BTree(file), name, fields[key_field])
    }

    /// Insert rows through the buffer pool under one transaction.
    pub fn load_rows(&self, tid: TransactionId, table_id: u32, rows: &[Vec<i32>]) {
        let td = self
            .db
            .catalog()
            .get_tuple_desc(table_id)
            .expect("tuple desc");
        for row in rows {
            let mut t = int_tuple(&td, row);
            self.db.insert_tuple(tid, table_id, &mut t).expect("insert");
        }
    }

    /// Every tuple a fresh scan yields, as its key-field ints.
    pub fn scan_keys(&self, tid: TransactionId, table_id: u32, field: usize) -> Vec<i32> {
        let file = self
            .db
            .catalog()
            .get_database_file(table_id)
            .expect("file");
        let mut it = file.iterator(Arc::clone(&self.db), tid);
        it.open().expect("open");
        let mut keys = Vec::new();
        while let Some(t) = it.next().expect("next") {
            keys.push(int_of(&t, field));
        }
        it.close();
        keys
    }
}

/// Walk a B+ tree checking the structural invariants: sorted keys within
/// bounds, minimum occupancy on every non-root page, and parent pointers
/// that agree with the internal entries referencing each page.
pub fn check_tree(db: &Arc<Db>, tid: TransactionId, table_id: u32) {
    let root_ptr = db
        .get_page(
            tid,
            PageId::BTree(BTreePageId::root_ptr(table_id)),
            Permissions::ReadOnly,
        )
        .expect("root ptr");
    let root_id = root_ptr
        .read()
        .unwrap()
        .as_root_ptr()
        .expect("root ptr page")
        .root_id();
    let root_id = match root_id {
        Some(id) => id,
        None => return,
    };
    check_subtree(db, tid, root_id, true, None, None, BTreePageId::root_ptr(table_id));
    check_leaf_chain(db, tid, root_id);
}

fn check_subtree(
    db: &Arc<Db>,
    tid: TransactionId,
    pid: BTreePageId,
    is_root: bool,
    lower: Option<i32>,
    upper: Option<i32>,
    expected_parent: BTreePageId,
) {
    let page = db
        .get_page(tid, PageId::BTree(pid), Permissions::ReadOnly)
        .expect("page");
    let guard = page.read().unwrap();
    match pid.category {
        PageCategory::Leaf => {
            let leaf = guard.as_leaf().expect("leaf");
            assert_eq!(leaf.parent_id(), expected_parent, "leaf parent pointer");
            if !is_root {
                // A fresh split leaves exactly half behind, so floor is the
                // steady-state bound.
                let min = leaf.capacity() / 2;
                assert!(
                    leaf.num_tuples() >= min,
                    "leaf {:?} below minimum occupancy: {} < {}",
                    pid,
                    leaf.num_tuples(),
                    min
                );
            }
            let mut prev: Option<i32> = None;
            for t in leaf.iter() {
                let k = int_of(t, leaf.key_field());
                if let Some(p) = prev {
                    assert!(p <= k, "leaf keys out of order: {} then {}", p, k);
                }
                if let Some(lo) = lower {
                    assert!(k > lo, "leaf key {} not above lower bound {}", k, lo);
                }
                if let Some(hi) = upper {
                    assert!(k <= hi, "leaf key {} not within upper bound {}", k, hi);
                }
                prev = Some(k);
            }
        }
        PageCategory::Internal => {
            let internal = guard.as_internal().expect("internal");
            assert_eq!(
                internal.parent_id(),
                expected_parent,
                "internal parent pointer"
            );
            if !is_root {
                // An internal split pushes the median up, so the new page
                // starts one entry shy of half.
                let min = (internal.capacity() / 2).saturating_sub(1).max(1);
                assert!(
                    internal.num_entries() >= min,
                    "internal {:?} below minimum occupancy: {} < {}",
                    pid,
                    internal.num_entries(),
                    min
                );
            }
            let entries = internal.iter();
            assert!(!entries.is_empty(), "internal page with no entries");
            drop(guard);

            let mut child_lower = lower;
            let mut prev_key: Option<i32> = None;
            for entry in &entries {
                let k = match entry.key() {
                    Field::Int(v) => *v,
                    other => panic!("unexpected key type {:?}", other),
                };
                if let Some(p) = prev_key {
                    assert!(p <= k, "internal keys out of order: {} then {}", p, k);
                }
                check_subtree(db, tid, entry.left_child(), false, child_lower, Some(k), pid);
                child_lower = Some(k);
                prev_key = Some(k);
            }
            if let Some(last) = entries.last() {
                check_subtree(db, tid, last.right_child(), false, child_lower, upper, pid);
            }
        }
        other => panic!("unexpected page category in tree: {:?}", other),
    }
}

fn check_leaf_chain(db: &Arc<Db>, tid: TransactionId, root_id: BTreePageId) {
    // Descend to the left-most leaf.
    let mut pid = root_id;
    while pid.category == PageCategory::Internal {
        let page = db
            .get_page(tid, PageId::BTree(pid), Permissions::ReadOnly)
            .expect("page");
        let guard = page.read().unwrap();
        let entries = guard.as_internal().expect("internal").iter();
        pid = entries.first().expect("entries").left_child();
    }

    let mut prev: Option<(BTreePageId, Option<i32>)> = None;
    let mut current = Some(pid);
    while let Some(cur) = current {
        let page = db
            .get_page(tid, PageId::BTree(cur), Permissions::ReadOnly)
            .expect("page");
        let guard = page.read().unwrap();
        let leaf = guard.as_leaf().expect("leaf");

        if let Some((prev_pid, prev_last)) = prev {
            assert_eq!(
                leaf.left_sibling_id(),
                Some(prev_pid),
                "leaf chain broken: left pointer of {:?}",
                cur
            );
            if let (Some(last), Some(first)) = (
                prev_last,
                leaf.iter().next().map(|t| int_of(t, leaf.key_field())),
            ) {
                assert!(
                    last <= first,
                    "sort does not continue across siblings: {} then {}",
                    last,
                    first
                );
            }
        }

        let last_key = leaf.rev_iter().next().map(|t| int_of(t, leaf.key_field()));
        prev = Some((cur, last_key));
        current = leaf.right_sibling_id();
    }
}
