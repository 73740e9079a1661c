#![allow(dead_code)]

use std::sync::Arc;

use quarry::executor::SeqScan;
use quarry::OpIterator;
use stratum::{
    BufferPool, Catalog, Field, FieldType, HeapFile, TransactionId, Tuple, TupleDesc,
};
use tempfile::TempDir;

/// A database fixture: a catalog, a pool over it, and the temp directory
/// that owns every data file for the test's lifetime.
pub struct TestDb {
    pub catalog: Arc<Catalog>,
    pub pool: Arc<BufferPool>,
    dir: TempDir,
}

pub fn setup(capacity: usize) -> TestDb {
    let _ = env_logger::builder().is_test(true).try_init();
    let catalog = Arc::new(Catalog::new());
    let pool = Arc::new(BufferPool::with_capacity(Arc::clone(&catalog), capacity));
    TestDb {
        catalog,
        pool,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl TestDb {
    pub fn create_table(&self, name: &str, desc: TupleDesc) -> u32 {
        let path = self.dir.path().join(format!("{name}.dat"));
        let file = Arc::new(HeapFile::open(path, Arc::new(desc)).unwrap());
        self.catalog.add_table(file, name, "")
    }

    /// A fresh pool over the same catalog, for tests that need a
    /// deterministic cache state.
    pub fn fresh_pool(&self, capacity: usize) -> Arc<BufferPool> {
        Arc::new(BufferPool::with_capacity(Arc::clone(&self.catalog), capacity))
    }

    /// Scans the whole table under its own committed transaction.
    pub fn scan_all(&self, table: u32) -> Vec<Tuple> {
        let tid = TransactionId::new();
        let mut scan = SeqScan::new(&self.pool, tid, table).unwrap();
        scan.open().unwrap();
        let mut rows = Vec::new();
        while scan.has_next().unwrap() {
            rows.push(scan.next().unwrap());
        }
        scan.close();
        self.pool.transaction_complete(tid, true).unwrap();
        rows
    }
}

pub fn two_int_desc() -> TupleDesc {
    TupleDesc::new(vec![
        (FieldType::Int, "a".to_string()),
        (FieldType::Int, "b".to_string()),
    ])
}

pub fn one_int_desc() -> TupleDesc {
    TupleDesc::new(vec![(FieldType::Int, "v".to_string())])
}

pub fn int_tuple(desc: &Arc<TupleDesc>, values: &[i32]) -> Tuple {
    Tuple::new(
        Arc::clone(desc),
        values.iter().map(|v| Field::Int(*v)).collect(),
    )
    .unwrap()
}

pub fn int_value(tuple: &Tuple, index: usize) -> i32 {
    match tuple.field(index) {
        Some(Field::Int(v)) => *v,
        other => panic!("expected an int field, got {other:?}"),
    }
}
