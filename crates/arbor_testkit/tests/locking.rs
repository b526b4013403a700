//! Lock interplay between brokers of one pool.

use arbor_core::{CoreError, LockMode, ResourceId};
use arbor_testkit::prelude::*;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn readers_share_a_document() {
    let db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    let first = db.admin();
    let second = db.admin();
    let a = first.open_document("/db/books/a.xml", LockMode::Read).unwrap().unwrap();
    let b = second.open_document("/db/books/a.xml", LockMode::Read).unwrap().unwrap();
    let id = a.id();
    assert_eq!(id, b.id());
    a.release().unwrap();
    assert!(db.lock_manager().is_locked(&ResourceId::Document(id)));
    b.release().unwrap();
    assert!(!db.lock_manager().is_locked(&ResourceId::Document(id)));
}

#[test]
fn writer_waits_for_reader() {
    let db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    let reader = db.admin();
    let handle = reader.open_document("/db/books/a.xml", LockMode::Read).unwrap().unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let pool = db.pool.clone();
    let writer = thread::spawn(move || {
        let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
        started_tx.send(()).unwrap();
        let start = Instant::now();
        let handle = broker.open_document("/db/books/a.xml", LockMode::Write).unwrap().unwrap();
        let waited = start.elapsed();
        handle.release().unwrap();
        waited
    });

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));
    handle.release().unwrap();

    let waited = writer.join().unwrap();
    assert!(waited >= Duration::from_millis(50), "writer did not block: {waited:?}");
}

#[test]
fn blocked_writer_times_out() {
    let db = TestPool::memory_with(test_config().lock_timeout(Duration::from_millis(50)));
    create_collection(&db.admin(), "/db/books");

    let holder = db.admin();
    let held = holder.open_collection("/db/books", LockMode::Read).unwrap().unwrap();

    let other = db.admin();
    let err = other.open_collection("/db/books", LockMode::Write).unwrap_err();
    assert!(matches!(err, CoreError::LockFailure { .. }));
    assert!(err.is_transient());
    assert_eq!(other.held_locks(), 0);

    held.release().unwrap();
    other
        .open_collection("/db/books", LockMode::Write)
        .unwrap()
        .unwrap()
        .release()
        .unwrap();
}

#[test]
fn sole_reader_upgrades_through_broker() {
    let db = TestPool::memory();
    create_collection(&db.admin(), "/db/books");
    let broker = db.admin();
    let resource = ResourceId::collection("/db/books");

    broker.acquire_lock(&resource, LockMode::Read).unwrap();
    broker.acquire_lock(&resource, LockMode::Write).unwrap();
    assert_eq!(broker.held_locks(), 2);
    assert_eq!(db.lock_manager().held_mode(&resource, broker.id()), Some(LockMode::Write));

    broker.release_lock(&resource, LockMode::Write).unwrap();
    broker.release_lock(&resource, LockMode::Read).unwrap();
    assert!(!db.lock_manager().is_locked(&resource));
}

#[test]
fn creating_collection_waits_for_locked_parent() {
    let db = TestPool::memory();
    create_collection(&db.admin(), "/db/books");

    let holder = db.admin();
    let parent = holder.open_collection("/db/books", LockMode::Write).unwrap().unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let pool = db.pool.clone();
    let creator = thread::spawn(move || {
        let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
        started_tx.send(()).unwrap();
        create_collection(&broker, "/db/books/novels");
    });

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!db.tree().contains("/db/books/novels"));
    parent.release().unwrap();

    creator.join().unwrap();
    assert!(db.tree().contains("/db/books/novels"));
}
