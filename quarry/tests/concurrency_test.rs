//! Transactions, locking and buffer-pool policy under concurrency.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{int_tuple, setup};
use serial_test::serial;
use strata::error::DbError;
use strata::page::{HeapPageId, PageId, Permissions};
use strata::TransactionId;

#[test]
#[serial]
fn cross_acquisition_aborts_exactly_one_transaction() {
    let fixture = setup(64, 64);
    let table_id = fixture.create_heap_table("accounts", &["id", "balance"]);

    // Two pages worth of rows: 64-byte pages hold seven 8-byte tuples.
    let loader = TransactionId::new();
    let rows: Vec<Vec<i32>> = (0..14).map(|i| vec![i, i * 100]).collect();
    fixture.load_rows(loader, table_id, &rows);
    fixture.db.transaction_complete(loader, true).unwrap();

    let p1 = PageId::Heap(HeapPageId::new(table_id, 0));
    let p2 = PageId::Heap(HeapPageId::new(table_id, 1));

    let barrier = Arc::new(Barrier::new(2));
    let worker = |tid: TransactionId, first: PageId, second: PageId| {
        let db = Arc::clone(&fixture.db);
        let barrier = Arc::clone(&barrier);
        move || -> bool {
            db.get_page(tid, first, Permissions::ReadWrite).unwrap();
            barrier.wait();
            match db.get_page(tid, second, Permissions::ReadWrite) {
                Ok(_) => {
                    db.transaction_complete(tid, true).unwrap();
                    true
                }
                Err(DbError::TransactionAborted(aborted)) => {
                    assert_eq!(aborted, tid);
                    db.transaction_complete(tid, false).unwrap();
                    false
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    };

    let t1 = TransactionId::new();
    let t2 = TransactionId::new();
    let h1 = thread::spawn(worker(t1, p1, p2));
    let h2 = thread::spawn(worker(t2, p2, p1));
    let r1 = h1.join().unwrap();
    let r2 = h2.join().unwrap();

    assert!(
        r1 != r2,
        "exactly one of the two transactions must abort (got {} and {})",
        r1,
        r2
    );
}

#[test]
#[serial]
fn eviction_never_steals_a_dirty_page() {
    let fixture = setup(64, 2);
    let table_id = fixture.create_heap_table("rows", &["id", "v"]);

    // Fill three pages (seven tuples each), one committed transaction per
    // page so the two-slot pool never holds more than one dirty page.
    for batch in 0..3 {
        let loader = TransactionId::new();
        let rows: Vec<Vec<i32>> = (batch * 7..batch * 7 + 7).map(|i| vec![i, i]).collect();
        fixture.load_rows(loader, table_id, &rows);
        fixture.db.transaction_complete(loader, true).unwrap();
    }

    // Dirty both cached slots, then ask for a third page.
    let tid = TransactionId::new();
    for page_no in 0..2 {
        let pid = PageId::Heap(HeapPageId::new(table_id, page_no));
        let page = fixture
            .db
            .get_page(tid, pid, Permissions::ReadWrite)
            .unwrap();
        page.write().unwrap().mark_dirty(Some(tid));
    }

    let third = PageId::Heap(HeapPageId::new(table_id, 2));
    let err = fixture
        .db
        .get_page(tid, third, Permissions::ReadWrite)
        .unwrap_err();
    assert!(matches!(err, DbError::BufferPoolFull));

    // Committing cleans the pages; the fetch then succeeds by evicting.
    fixture.db.transaction_complete(tid, true).unwrap();
    let tid = TransactionId::new();
    fixture
        .db
        .get_page(tid, third, Permissions::ReadOnly)
        .unwrap();
}

#[test]
#[serial]
fn committed_writes_are_visible_and_aborted_writes_are_not() {
    let fixture = setup(256, 64);
    let table_id = fixture.create_heap_table("rows", &["id", "v"]);
    let td = fixture.db.catalog().get_tuple_desc(table_id).unwrap();

    let t1 = TransactionId::new();
    let mut committed = int_tuple(&td, &[1, 10]);
    fixture
        .db
        .insert_tuple(t1, table_id, &mut committed)
        .unwrap();
    fixture.db.transaction_complete(t1, true).unwrap();

    let t2 = TransactionId::new();
    let mut doomed = int_tuple(&td, &[2, 20]);
    fixture.db.insert_tuple(t2, table_id, &mut doomed).unwrap();
    fixture.db.transaction_complete(t2, false).unwrap();

    let reader = TransactionId::new();
    let ids = fixture.scan_keys(reader, table_id, 0);
    assert_eq!(ids, vec![1]);
    fixture.db.transaction_complete(reader, true).unwrap();
}

#[test]
#[serial]
fn release_page_lets_a_writer_through() {
    let fixture = setup(256, 64);
    let table_id = fixture.create_heap_table("rows", &["id", "v"]);

    let loader = TransactionId::new();
    fixture.load_rows(loader, table_id, &[vec![1, 10]]);
    fixture.db.transaction_complete(loader, true).unwrap();

    let pid = PageId::Heap(HeapPageId::new(table_id, 0));
    let t1 = TransactionId::new();
    fixture.db.get_page(t1, pid, Permissions::ReadWrite).unwrap();
    assert!(fixture.db.buffer_pool().holds_lock(t1, pid));

    // Backing out of a probe releases the lock without a transaction end.
    fixture.db.buffer_pool().release_page(t1, pid);
    assert!(!fixture.db.buffer_pool().holds_lock(t1, pid));

    let t2 = TransactionId::new();
    fixture.db.get_page(t2, pid, Permissions::ReadWrite).unwrap();
    fixture.db.transaction_complete(t2, true).unwrap();
    fixture.db.transaction_complete(t1, true).unwrap();
}

#[test]
#[serial]
fn concurrent_readers_share_heap_pages() {
    let fixture = setup(256, 64);
    let table_id = fixture.create_heap_table("rows", &["id", "v"]);

    let loader = TransactionId::new();
    let rows: Vec<Vec<i32>> = (0..50).map(|i| vec![i, i * 2]).collect();
    fixture.load_rows(loader, table_id, &rows);
    fixture.db.transaction_complete(loader, true).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = Arc::clone(&fixture.db);
        handles.push(thread::spawn(move || {
            use strata::catalog::DbFileIterator;

            let tid = TransactionId::new();
            let file = db.catalog().get_database_file(table_id).unwrap();
            let mut it = file.iterator(Arc::clone(&db), tid);
            it.open().unwrap();
            let mut count = 0;
            while let Some(_t) = it.next().unwrap() {
                count += 1;
            }
            it.close();
            db.transaction_complete(tid, true).unwrap();
            count
        }));
    }
    for h in handles {
        assert_eq!(h.join().unwrap(), 50);
    }
}
