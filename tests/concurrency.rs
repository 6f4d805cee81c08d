//! Several threads sharing one registry.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use sqlite_connection_core::{Error, Handle, OpenFlags, Registry, Step};

const THREADS: usize = 8;

#[test]
fn test_concurrent_opens_get_unique_handles() {
    let db = Arc::new(Registry::builder().capacity(THREADS * 4).build().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..4)
                    .map(|_| db.open(":memory:", OpenFlags::default()).unwrap())
                    .collect::<Vec<Handle>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for handle in worker.join().unwrap() {
            assert!(seen.insert(handle), "handle {} issued twice", handle);
        }
    }
    let expected: HashSet<Handle> = (1..=(THREADS * 4) as i32).map(Handle::from_raw).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_capacity_never_exceeded_under_contention() {
    let capacity = 5;
    let db = Arc::new(Registry::builder().capacity(capacity).build().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.open(":memory:", OpenFlags::default())
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let opened = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(opened, capacity);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err(), &Error::CapacityExhausted(capacity));
    }
    assert_eq!(db.issued_handles(), capacity);
}

#[test]
fn test_independent_handles_in_parallel() {
    let db = Arc::new(Registry::builder().capacity(THREADS).build().unwrap());

    let workers: Vec<_> = (0..THREADS)
        .map(|n| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let h = db.open(":memory:", OpenFlags::default()).unwrap();
                db.begin(h, "CREATE TABLE t(n INTEGER)").unwrap();
                db.step(h).unwrap();
                db.end(h).unwrap();
                for i in 0..100 {
                    db.begin(h, "INSERT INTO t VALUES (?)").unwrap();
                    db.bind_long(h, 1, (n * 1000 + i) as i64).unwrap();
                    assert_eq!(db.step(h).unwrap(), Step::Done);
                    db.end(h).unwrap();
                }
                db.begin(h, "SELECT count(*), sum(n) FROM t").unwrap();
                assert_eq!(db.step(h).unwrap(), Step::Row);
                let count = db.column_long(h, 0).unwrap();
                let sum = db.column_long(h, 1).unwrap();
                db.end(h).unwrap();
                (n, count, sum)
            })
        })
        .collect();

    for worker in workers {
        let (n, count, sum) = worker.join().unwrap();
        assert_eq!(count, 100);
        assert_eq!(sum, (0..100).map(|i| (n * 1000 + i) as i64).sum::<i64>());
    }
}

#[test]
fn test_shared_handle_is_serialized() {
    let db = Arc::new(Registry::builder().capacity(1).build().unwrap());
    let h = db.open(":memory:", OpenFlags::default()).unwrap();
    db.begin(h, "CREATE TABLE t(a)").unwrap();
    db.step(h).unwrap();
    db.end(h).unwrap();

    // Every thread retries until it owns the statement slot; a second
    // `begin` is rejected, never queued.
    let workers: Vec<_> = (0..THREADS)
        .map(|n| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut rejected = 0;
                for i in 0..50 {
                    loop {
                        match db.begin(h, "INSERT INTO t VALUES (?)") {
                            Ok(()) => break,
                            Err(e) => {
                                assert!(e.is_misuse());
                                rejected += 1;
                                thread::yield_now();
                            }
                        }
                    }
                    // Until `end`, no other thread can replace this statement.
                    db.bind_long(h, 1, (n * 100 + i) as i64).unwrap();
                    assert_eq!(db.step(h).unwrap(), Step::Done);
                    db.end(h).unwrap();
                }
                rejected
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    db.begin(h, "SELECT count(DISTINCT a) FROM t").unwrap();
    assert_eq!(db.step(h).unwrap(), Step::Row);
    assert_eq!(db.column_long(h, 0).unwrap(), (THREADS * 50) as i64);
    db.end(h).unwrap();
    assert_eq!(db.total_changes(h).unwrap(), (THREADS * 50) as i32);
}
