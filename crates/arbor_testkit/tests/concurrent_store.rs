//! Many brokers storing, reading and removing at once.

use arbor_core::{Config, LockMode};
use arbor_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 4;
const DOCS_PER_WORKER: usize = 10;

fn concurrent_config() -> Config {
    test_config()
        .brokers(1, WORKERS + 1)
        .lock_timeout(Duration::from_secs(10))
}

#[test]
fn parallel_stores_in_separate_collections() {
    let mut db = TestPool::memory_with(concurrent_config());
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let pool = db.pool.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
                barrier.wait();
                for i in 0..DOCS_PER_WORKER {
                    store(&broker, &format!("/db/w{worker}"), &format!("d{i}.xml"), BOOK);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total: usize = (0..WORKERS)
        .map(|w| db.tree().get(&format!("/db/w{w}")).unwrap().read().document_count())
        .sum();
    assert_eq!(total, WORKERS * DOCS_PER_WORKER);
    assert_eq!(db.lock_manager().active_resources(), 0);

    db.crash_and_restart();
    let total: usize = (0..WORKERS)
        .map(|w| db.tree().get(&format!("/db/w{w}")).unwrap().read().document_count())
        .sum();
    assert_eq!(total, WORKERS * DOCS_PER_WORKER);
}

#[test]
fn parallel_stores_into_one_collection() {
    let db = TestPool::memory_with(concurrent_config());
    create_collection(&db.admin(), "/db/shared");

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let pool = &db.pool;
            scope.spawn(move || {
                let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
                for i in 0..DOCS_PER_WORKER {
                    store(&broker, "/db/shared", &format!("w{worker}-{i}.xml"), SHOP);
                }
            });
        }
    });

    let shared = db.tree().get("/db/shared").unwrap();
    assert_eq!(shared.read().document_count(), WORKERS * DOCS_PER_WORKER);
}

#[test]
fn readers_see_whole_documents_while_writers_replace() {
    let db = TestPool::memory_with(concurrent_config());
    let versions = [BOOK, SHOP];
    store(&db.admin(), "/db/hot", "doc.xml", versions[0]);

    thread::scope(|scope| {
        let pool = &db.pool;
        scope.spawn(move || {
            let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
            for round in 1..=20 {
                store(&broker, "/db/hot", "doc.xml", versions[round % 2]);
            }
        });
        for _ in 0..2 {
            scope.spawn(move || {
                let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
                for _ in 0..20 {
                    let handle = broker
                        .open_document("/db/hot/doc.xml", LockMode::Read)
                        .unwrap()
                        .unwrap();
                    let content = handle.document().unwrap().content;
                    handle.release().unwrap();
                    assert!(versions.contains(&content.as_str()));
                }
            });
        }
    });
}

#[test]
fn store_and_remove_race_leaves_consistent_tree() {
    let db = TestPool::memory_with(concurrent_config());
    create_collection(&db.admin(), "/db/churn");

    thread::scope(|scope| {
        let pool = &db.pool;
        scope.spawn(move || {
            let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
            for i in 0..DOCS_PER_WORKER {
                store(&broker, "/db/churn", &format!("d{i}.xml"), BOOK);
            }
        });
        scope.spawn(move || {
            let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
            for i in 0..DOCS_PER_WORKER {
                let mut txn = broker.begin().unwrap();
                let coll = broker.get_or_create_collection(&mut txn, "/db/churn").unwrap();
                let exists = coll.read().document(&format!("d{i}.xml")).is_some();
                if exists {
                    broker.remove_document(&mut txn, &coll, &format!("d{i}.xml")).unwrap();
                }
                coll.release().unwrap();
                broker.commit(&mut txn).unwrap();
            }
        });
    });

    let broker = db.admin();
    let churn = db.tree().get("/db/churn").unwrap();
    let names: Vec<String> = churn.read().documents().map(|d| d.name.clone()).collect();
    for name in names {
        assert!(read_document(&broker, &format!("/db/churn/{name}")).is_some());
    }
    assert_eq!(db.stats().active_transactions, 0);
}

#[test]
fn remove_and_replace_during_bulk_store() {
    const N: usize = 20;
    let mut db = TestPool::memory_with(concurrent_config());
    let (halfway_tx, halfway_rx) = std::sync::mpsc::channel();

    thread::scope(|scope| {
        let pool = &db.pool;
        scope.spawn(move || {
            let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
            let mut txn = broker.begin().unwrap();
            let coll = broker.get_or_create_collection(&mut txn, "/db/test/test1").unwrap();
            for i in 0..N {
                let name = format!("doc{i}.xml");
                let info = broker.validate_document(&txn, &coll, &name, BOOK).unwrap();
                broker.store_document(&mut txn, &coll, info, BOOK).unwrap();
                if i == N / 4 {
                    halfway_tx.send(()).unwrap();
                }
            }
            broker.commit(&mut txn).unwrap();
            coll.release().unwrap();
            pool.flush_to_log(true).unwrap();
        });
        scope.spawn(move || {
            let broker = pool.checkout(arbor_core::Subject::system()).unwrap();
            halfway_rx.recv().unwrap();
            let mut txn = broker.begin().unwrap();
            let coll = broker.get_or_create_collection(&mut txn, "/db/test/test1").unwrap();
            broker.remove_document(&mut txn, &coll, "doc0.xml").unwrap();
            let info = broker
                .validate_document(&txn, &coll, "replacement.xml", SHOP)
                .unwrap();
            broker.store_document(&mut txn, &coll, info, SHOP).unwrap();
            coll.release().unwrap();
            broker.commit(&mut txn).unwrap();
        });
    });

    let check = |db: &TestPool| {
        let broker = db.admin();
        let coll = db.tree().get("/db/test/test1").unwrap();
        assert_eq!(coll.read().document_count(), N);
        assert!(read_document(&broker, "/db/test/test1/doc0.xml").is_none());
        assert_eq!(
            read_document(&broker, "/db/test/test1/replacement.xml").as_deref(),
            Some(SHOP)
        );
        for i in 1..N {
            let content = read_document(&broker, &format!("/db/test/test1/doc{i}.xml"));
            assert_eq!(content.as_deref(), Some(BOOK));
        }
    };
    check(&db);
    db.crash_and_restart();
    check(&db);
}
