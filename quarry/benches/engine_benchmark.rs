use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

use quarry::executor::Executor;
use quarry::scan_executor::SeqScan;
use strata::btree_file::BTreeFile;
use strata::catalog::DbFile;
use strata::heap_file::HeapFile;
use strata::tuple::{Field, FieldType, Tuple, TupleDesc};
use strata::{Db, DbConfig, TransactionId};
use tempfile::TempDir;

fn row_desc() -> TupleDesc {
    TupleDesc::new(
        vec![FieldType::Int, FieldType::Int],
        vec![Some("id".to_string()), Some("v".to_string())],
    )
}

fn row(td: &TupleDesc, id: i32, v: i32) -> Tuple {
    let mut t = Tuple::new(td.clone());
    t.set_field(0, Field::Int(id)).unwrap();
    t.set_field(1, Field::Int(v)).unwrap();
    t
}

fn setup_heap_db(rows: i32) -> (TempDir, Arc<Db>, u32) {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Db::with_config(DbConfig {
        page_size: 4096,
        pool_pages: 256,
    }));
    let path = dir.path().join("bench.dat");
    std::fs::write(&path, b"").unwrap();
    let file = HeapFile::new(&path, row_desc()).unwrap();
    let table_id = db.catalog().add_table(DbFile::Heap(file), "bench", "id");

    let tid = TransactionId::new();
    let td = row_desc();
    for i in 0..rows {
        let mut t = row(&td, i, i * 7);
        db.insert_tuple(tid, table_id, &mut t).unwrap();
    }
    db.transaction_complete(tid, true).unwrap();
    (dir, db, table_id)
}

fn benchmark_seq_scan(c: &mut Criterion) {
    let (_dir, db, table_id) = setup_heap_db(2000);

    c.bench_function("seq_scan_2000_rows", |b| {
        b.iter(|| {
            let tid = TransactionId::new();
            let mut scan = SeqScan::new(Arc::clone(&db), tid, table_id, None).unwrap();
            scan.open().unwrap();
            let mut count = 0;
            while let Some(t) = scan.next().unwrap() {
                black_box(&t);
                count += 1;
            }
            scan.close();
            db.transaction_complete(tid, true).unwrap();
            count
        })
    });
}

fn benchmark_btree_load(c: &mut Criterion) {
    c.bench_function("btree_load_500_keys", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = Arc::new(Db::with_config(DbConfig {
                    page_size: 1024,
                    pool_pages: 512,
                }));
                let path = dir.path().join("bench.idx");
                std::fs::write(&path, b"").unwrap();
                let file = BTreeFile::new(&path, 0, row_desc()).unwrap();
                let table_id = db.catalog().add_table(DbFile::BTree(file), "bench", "id");
                (dir, db, table_id)
            },
            |(_dir, db, table_id)| {
                let tid = TransactionId::new();
                let td = row_desc();
                for i in 0..500 {
                    let mut t = row(&td, i, i);
                    db.insert_tuple(tid, table_id, &mut t).unwrap();
                }
                db.transaction_complete(tid, true).unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_seq_scan, benchmark_btree_load);
criterion_main!(benches);
