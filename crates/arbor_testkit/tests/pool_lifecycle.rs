//! Checkout, leak recovery, shutdown and the instance registry.

use arbor_core::{BrokerPool, Config, CoreError, LockMode, PoolRegistry, ResourceId, Subject};
use arbor_testkit::prelude::*;
use std::thread;
use std::time::Duration;

#[test]
fn exhausted_pool_times_out() {
    let db = TestPool::memory_with(
        test_config()
            .brokers(0, 2)
            .checkout_timeout(Duration::from_millis(50)),
    );
    let _a = db.admin();
    let _b = db.admin();

    let err = db.pool.checkout(Subject::system()).unwrap_err();
    assert!(matches!(err, CoreError::PoolExhausted { max: 2, .. }));
    assert!(err.is_transient());
    assert_eq!(db.stats().active, 2);
}

#[test]
fn returned_broker_wakes_waiting_checkout() {
    let db = TestPool::memory_with(test_config().brokers(1, 1));
    let held = db.admin();
    let held_id = held.id();

    let pool = db.pool.clone();
    let waiter = thread::spawn(move || pool.checkout(Subject::guest()).map(|b| b.id()));

    thread::sleep(Duration::from_millis(50));
    db.checkin(Some(held));

    assert_eq!(waiter.join().unwrap().unwrap(), held_id);
    assert_eq!(db.stats().created, 1);
}

#[test]
fn leaked_locks_are_released_on_return() {
    let db = TestPool::memory();
    create_collection(&db.admin(), "/db/books");
    let resource = ResourceId::collection("/db/books");

    {
        let broker = db.admin();
        broker.acquire_lock(&resource, LockMode::Write).unwrap();
        let handle = broker.open_collection("/db/books", LockMode::Read).unwrap().unwrap();
        std::mem::forget(handle);
    }

    assert!(!db.lock_manager().is_locked(&resource));
    assert_eq!(db.stats().leaked_locks, 2);

    let other = db.admin();
    other
        .open_collection("/db/books", LockMode::Write)
        .unwrap()
        .unwrap()
        .release()
        .unwrap();
}

#[test]
fn shutdown_waits_for_checked_out_brokers() {
    let db = TestPool::memory_with(test_config().shutdown_timeout(Duration::from_secs(5)));
    let broker = db.admin();

    let returner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        drop(broker);
    });

    db.shutdown(false).unwrap();
    returner.join().unwrap();

    assert!(db.is_shut_down());
    assert_eq!(db.stats().active, 0);
    assert!(matches!(
        db.pool.checkout(Subject::system()),
        Err(CoreError::DatabaseClosed)
    ));
}

#[test]
fn shutdown_timeout_interrupts_open_transaction() {
    let db = TestPool::memory_with(test_config().shutdown_timeout(Duration::from_millis(50)));
    let broker = db.admin();
    let mut txn = broker.begin().unwrap();

    db.shutdown(false).unwrap();

    let err = broker.get_or_create_collection(&mut txn, "/db/late").unwrap_err();
    assert!(matches!(err, CoreError::IllegalState { .. }));
    assert!(!txn.is_active());
    assert!(!db.tree().contains("/db/late"));
}

#[test]
fn registry_hands_out_one_instance_per_name() {
    let registry = PoolRegistry::new();
    let open = |name: &str| {
        let name = name.to_string();
        move || {
            BrokerPool::open_with_backends(
                Config::new().instance_name(name),
                Box::new(CrashableBackend::new().0),
                Box::new(CrashableBackend::new().0),
            )
        }
    };

    let first = registry.configure("main", open("main")).unwrap();
    let again = registry.configure("main", open("main")).unwrap();
    assert!(first.same_instance(&again));

    let other = registry.configure("backup", open("backup")).unwrap();
    assert!(!first.same_instance(&other));
    assert_eq!(registry.names(), ["backup", "main"]);

    assert!(registry.stop("main", false).unwrap());
    assert!(!registry.is_configured("main"));
    assert!(first.is_shut_down());

    let restarted = registry.configure("main", open("main")).unwrap();
    assert!(!first.same_instance(&restarted));

    registry.stop_all(true).unwrap();
    assert!(other.is_shut_down());
    assert!(restarted.is_shut_down());
}

#[test]
fn file_database_is_locked_while_open() {
    let db = TestPool::file();
    let path = db.path().unwrap().to_path_buf();

    let err = BrokerPool::open(&path, test_config()).unwrap_err();
    assert!(matches!(err, CoreError::DatabaseLocked));

    db.shutdown(false).unwrap();
    let reopened = BrokerPool::open(&path, test_config().create_if_missing(false)).unwrap();
    assert!(reopened.tree().contains("/db"));
    reopened.shutdown(false).unwrap();
}
