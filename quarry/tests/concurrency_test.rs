//! Cross-thread locking scenarios: writer/writer conflict with
//! timeout-then-abort, strict 2PL isolation, and lost-update prevention
//! through abort-and-retry.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{int_tuple, int_value, setup, two_int_desc};
use stratum::{PageId, Permissions, StorageError, TransactionId};

#[test]
fn conflicting_writers_abort_within_four_seconds() {
    let db = setup(4);
    let table = db.create_table("t", two_int_desc());
    let desc = db.catalog.schema(table).unwrap();

    let t1 = TransactionId::new();
    db.pool
        .insert_tuple(t1, table, int_tuple(&desc, &[1, 10]))
        .unwrap();
    db.pool.transaction_complete(t1, true).unwrap();

    // T1 takes the exclusive latch on page 0 and sits on it.
    let t1 = TransactionId::new();
    let pid = PageId::new(table, 0);
    let handle = db.pool.get_page(t1, pid, Permissions::ReadWrite).unwrap();
    drop(handle);

    // T2's exclusive request must abort rather than wait forever.
    let pool = Arc::clone(&db.pool);
    let start = Instant::now();
    let result = thread::spawn(move || {
        let t2 = TransactionId::new();
        let result = pool.get_page(t2, pid, Permissions::ReadWrite).map(|_| ());
        pool.transaction_complete(t2, false).unwrap();
        result
    })
    .join()
    .unwrap();

    assert!(matches!(result, Err(StorageError::TransactionAborted)));
    assert!(start.elapsed() <= Duration::from_secs(4));

    // T1 and its data are intact.
    assert!(db.pool.holds_lock(t1, pid));
    db.pool.transaction_complete(t1, true).unwrap();
    let rows = db.scan_all(table);
    assert_eq!(rows.len(), 1);
    assert_eq!(int_value(&rows[0], 1), 10);
}

#[test]
fn readers_share_a_page_concurrently() {
    let db = setup(4);
    let table = db.create_table("t", two_int_desc());
    let desc = db.catalog.schema(table).unwrap();

    let tid = TransactionId::new();
    db.pool
        .insert_tuple(tid, table, int_tuple(&desc, &[1, 1]))
        .unwrap();
    db.pool.transaction_complete(tid, true).unwrap();

    let pid = PageId::new(table, 0);
    let readers: Vec<TransactionId> = (0..4).map(|_| TransactionId::new()).collect();
    let handles: Vec<_> = readers
        .iter()
        .map(|tid| {
            let pool = Arc::clone(&db.pool);
            let tid = *tid;
            thread::spawn(move || pool.get_page(tid, pid, Permissions::ReadOnly).map(|_| ()))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    for tid in &readers {
        assert!(db.pool.holds_lock(*tid, pid));
        db.pool.transaction_complete(*tid, true).unwrap();
    }
}

#[test]
fn uncommitted_writes_stay_isolated_until_commit() {
    let db = setup(4);
    let table = db.create_table("t", two_int_desc());
    let desc = db.catalog.schema(table).unwrap();

    let writer = TransactionId::new();
    db.pool
        .insert_tuple(writer, table, int_tuple(&desc, &[5, 50]))
        .unwrap();

    // A reader cannot latch the page while the writer holds it; its scan
    // aborts instead of observing the uncommitted tuple.
    let pool = Arc::clone(&db.pool);
    let pid = PageId::new(table, 0);
    let read_result = thread::spawn(move || {
        let reader = TransactionId::new();
        let result = pool.get_page(reader, pid, Permissions::ReadOnly).map(|_| ());
        pool.transaction_complete(reader, false).unwrap();
        result
    })
    .join()
    .unwrap();
    assert!(matches!(
        read_result,
        Err(StorageError::TransactionAborted)
    ));

    db.pool.transaction_complete(writer, true).unwrap();
    assert_eq!(db.scan_all(table).len(), 1);
}

/// Increment a one-row counter from two threads, each retrying on
/// abort. Whatever the interleaving, the final value must equal the
/// number of successful increments: no update is lost.
#[test]
fn no_lost_updates_across_retrying_writers() {
    let db = setup(4);
    let table = db.create_table("counter", two_int_desc());
    let desc = db.catalog.schema(table).unwrap();

    let tid = TransactionId::new();
    db.pool
        .insert_tuple(tid, table, int_tuple(&desc, &[0, 0]))
        .unwrap();
    db.pool.transaction_complete(tid, true).unwrap();

    let increment = move |pool: Arc<stratum::BufferPool>,
                     catalog: Arc<stratum::Catalog>|
     -> Result<(), StorageError> {
        let file = catalog.table(table)?;
        for _attempt in 0..20 {
            let tid = TransactionId::new();
            let outcome = (|| -> Result<(), StorageError> {
                let mut iter = file.iter(Arc::clone(&pool), tid);
                iter.open()?;
                let current = iter
                    .next()?
                    .ok_or_else(|| StorageError::NoSuchTuple("counter row".to_string()))?;
                iter.close();

                let value = match current.field(0) {
                    Some(stratum::Field::Int(v)) => *v,
                    _ => 0,
                };
                pool.delete_tuple(tid, &current)?;
                pool.insert_tuple(tid, table, int_tuple(file.desc(), &[value + 1, 0]))?;
                Ok(())
            })();

            match outcome {
                Ok(()) => {
                    pool.transaction_complete(tid, true)?;
                    return Ok(());
                }
                Err(StorageError::TransactionAborted) => {
                    pool.transaction_complete(tid, false)?;
                    // Deadlock broken by timeout; try again.
                }
                Err(other) => {
                    pool.transaction_complete(tid, false)?;
                    return Err(other);
                }
            }
        }
        Err(StorageError::NoSuchTuple("increment never succeeded".to_string()))
    };

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&db.pool);
            let catalog = Arc::clone(&db.catalog);
            thread::spawn(move || increment(pool, catalog))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    let rows = db.scan_all(table);
    assert_eq!(rows.len(), 1);
    assert_eq!(int_value(&rows[0], 0), 2);
}

#[test]
fn batch_writers_serialize_to_the_union_of_their_inserts() {
    let db = setup(8);
    let table = db.create_table("t", two_int_desc());

    let workers: Vec<_> = (0..3)
        .map(|worker| {
            let pool = Arc::clone(&db.pool);
            let catalog = Arc::clone(&db.catalog);
            thread::spawn(move || {
                let desc = catalog.schema(table).unwrap();
                // Retry the whole batch on a timeout abort.
                'retry: for _attempt in 0..20 {
                    let tid = TransactionId::new();
                    for i in 0..50 {
                        match pool.insert_tuple(tid, table, int_tuple(&desc, &[worker, i])) {
                            Ok(()) => {}
                            Err(StorageError::TransactionAborted) => {
                                pool.transaction_complete(tid, false).unwrap();
                                continue 'retry;
                            }
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    pool.transaction_complete(tid, true).unwrap();
                    return;
                }
                panic!("batch insert never succeeded");
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let rows = db.scan_all(table);
    assert_eq!(rows.len(), 150);
    for worker in 0..3 {
        let count = rows
            .iter()
            .filter(|t| int_value(t, 0) == worker)
            .count();
        assert_eq!(count, 50, "worker {worker} lost inserts");
    }
}
