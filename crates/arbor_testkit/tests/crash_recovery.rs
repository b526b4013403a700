//! Durability and atomicity across simulated kills.

use arbor_core::{CoreError, LockMode};
use arbor_testkit::prelude::*;

fn document_exists(db: &TestPool, path: &str) -> bool {
    read_document(&db.admin(), path).is_some()
}

#[test]
fn committed_store_survives_kill() {
    let mut db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);
    store(&db.admin(), "/db/shop", "items.xml", SHOP);

    db.crash_and_restart();

    let report = db.recovery_report();
    assert!(report.committed >= 2);
    assert!(report.losers.is_empty());
    assert_eq!(read_document(&db.admin(), "/db/books/a.xml").as_deref(), Some(BOOK));
    assert_eq!(read_document(&db.admin(), "/db/shop/items.xml").as_deref(), Some(SHOP));
}

#[test]
fn aborted_transaction_leaves_nothing() {
    let mut db = TestPool::memory();
    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        let coll = broker.get_or_create_collection(&mut txn, "/db/draft").unwrap();
        for name in ["a.xml", "b.xml"] {
            let info = broker.validate_document(&txn, &coll, name, BOOK).unwrap();
            broker.store_document(&mut txn, &coll, info, BOOK).unwrap();
        }
        coll.release().unwrap();
        broker.abort(&mut txn).unwrap();
        broker.abort(&mut txn).unwrap();
    }
    assert!(!db.tree().contains("/db/draft"));
    // A later forced commit carries the abort marker to disk.
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    db.crash_and_restart();
    assert!(!db.tree().contains("/db/draft"));
    assert!(db.recovery_report().aborted >= 1);
}

#[test]
fn dropped_transaction_is_rolled_back() {
    let db = TestPool::memory();
    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        let coll = broker.get_or_create_collection(&mut txn, "/db/draft").unwrap();
        coll.release().unwrap();
    }
    assert!(!db.tree().contains("/db/draft"));
    assert_eq!(db.stats().active_transactions, 0);
}

#[test]
fn uncommitted_work_is_undone_by_recovery() {
    let mut db = TestPool::memory();
    create_collection(&db.admin(), "/db/pending");
    create_collection(&db.admin(), "/db/done");

    let loser = db.admin();
    let mut txn = loser.begin().unwrap();
    let coll = loser.get_or_create_collection(&mut txn, "/db/pending").unwrap();
    let info = loser.validate_document(&txn, &coll, "a.xml", BOOK).unwrap();
    loser.store_document(&mut txn, &coll, info, BOOK).unwrap();
    coll.release().unwrap();

    // This commit syncs the journal, loser records included.
    store(&db.admin(), "/db/done", "b.xml", SHOP);

    std::mem::forget(txn);
    drop(loser);
    db.crash_and_restart();

    assert_eq!(db.recovery_report().losers.len(), 1);
    assert!(!document_exists(&db, "/db/pending/a.xml"));
    assert!(document_exists(&db, "/db/done/b.xml"));
}

#[test]
fn checkpoint_during_transaction_keeps_it_undoable() {
    let mut db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    let loser = db.admin();
    let mut txn = loser.begin().unwrap();
    loser
        .get_or_create_collection(&mut txn, "/db/half")
        .unwrap()
        .release()
        .unwrap();

    // The snapshot now holds /db/half; recovery must still remove it.
    db.checkpoint().unwrap();
    store(&db.admin(), "/db/books", "b.xml", BOOK);

    std::mem::forget(txn);
    drop(loser);
    db.crash_and_restart();

    assert!(db.recovery_report().scan_from > 0);
    assert!(!db.tree().contains("/db/half"));
    assert!(document_exists(&db, "/db/books/a.xml"));
    assert!(document_exists(&db, "/db/books/b.xml"));
}

#[test]
fn collection_removed_after_busy_checkpoint_stays_removed() {
    let mut db = TestPool::memory();
    store(&db.admin(), "/db/old", "a.xml", BOOK);
    db.checkpoint().unwrap();

    // An open transaction makes the next checkpoint keep its BEGIN in range.
    let loser = db.admin();
    let txn = loser.begin().unwrap();

    store(&db.admin(), "/db/old/nested", "b.xml", SHOP);
    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        let nested = broker
            .open_collection("/db/old/nested", LockMode::Write)
            .unwrap()
            .unwrap();
        broker.remove_collection(&mut txn, nested).unwrap();
        let old = broker.open_collection("/db/old", LockMode::Write).unwrap().unwrap();
        broker.remove_collection(&mut txn, old).unwrap();
        broker.commit(&mut txn).unwrap();
    }
    db.checkpoint().unwrap();
    store(&db.admin(), "/db/books", "c.xml", BOOK);

    std::mem::forget(txn);
    drop(loser);
    db.crash_and_restart();

    let report = db.recovery_report();
    assert!(report.scan_from > 0);
    assert!(report.superseded >= 2);
    assert_eq!(report.losers.len(), 1);
    assert!(!db.tree().contains("/db/old"));
    assert!(!db.tree().contains("/db/old/nested"));
    assert!(document_exists(&db, "/db/books/c.xml"));

    db.restart();
    assert!(!db.tree().contains("/db/old"));
}

#[test]
fn buffered_commit_is_lost_without_flush() {
    let mut db = TestPool::memory_with(test_config().sync_on_commit(false));
    store(&db.admin(), "/db/books", "a.xml", BOOK);
    db.flush_to_log(true).unwrap();
    store(&db.admin(), "/db/books", "b.xml", BOOK);

    db.crash_and_restart();

    assert!(document_exists(&db, "/db/books/a.xml"));
    assert!(!document_exists(&db, "/db/books/b.xml"));
}

#[test]
fn torn_journal_write_aborts_transaction() {
    let mut db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        db.journal_control().unwrap().crash_after(5);
        let err = broker.get_or_create_collection(&mut txn, "/db/failed").unwrap_err();
        assert!(matches!(err, CoreError::TransactionLog { .. }));
        assert!(!txn.is_active());
        assert_eq!(broker.held_locks(), 0);
    }
    let control = db.journal_control().unwrap().clone();
    assert!(control.has_crashed());
    assert!(!db.tree().contains("/db/failed"));
    assert!(!db.transaction_manager().journal().is_poisoned());

    control.reset();
    store(&db.admin(), "/db/books", "b.xml", BOOK);

    db.crash_and_restart();
    assert!(!db.tree().contains("/db/failed"));
    assert!(document_exists(&db, "/db/books/a.xml"));
    assert!(document_exists(&db, "/db/books/b.xml"));
}

#[test]
fn uncut_torn_write_poisons_until_checkpoint() {
    let db = TestPool::memory();
    let control = db.journal_control().unwrap().clone();

    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        control.crash_after(5);
        control.set_fail_on_truncate(true);
        assert!(broker.get_or_create_collection(&mut txn, "/db/failed").is_err());
    }
    assert!(db.transaction_manager().journal().is_poisoned());

    control.reset();
    let err = try_store(&db.admin(), "/db/books", "a.xml", BOOK).unwrap_err();
    assert!(matches!(err, CoreError::TransactionLog { .. }));

    db.checkpoint().unwrap();
    assert!(!db.transaction_manager().journal().is_poisoned());
    store(&db.admin(), "/db/books", "a.xml", BOOK);
}

#[test]
fn forced_corruption_skips_final_checkpoint() {
    let mut db = TestPool::file_with(test_config().force_corruption(true));
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    db.restart();

    let report = db.recovery_report();
    assert!(report.redone > 0);
    assert!(report.losers.is_empty());
    assert!(document_exists(&db, "/db/books/a.xml"));
}

#[test]
fn clean_shutdown_leaves_nothing_to_redo() {
    let mut db = TestPool::file();
    store(&db.admin(), "/db/books", "a.xml", BOOK);

    db.restart();

    let report = db.recovery_report();
    assert_eq!(report.redone, 0);
    assert!(!report.torn_tail);
    assert!(document_exists(&db, "/db/books/a.xml"));
}

#[test]
fn permissions_and_user_locks_survive_kill() {
    let mut db = TestPool::memory();
    store(&db.admin(), "/db/books", "a.xml", BOOK);
    {
        let broker = db.admin();
        let mut txn = broker.begin().unwrap();
        let doc = broker.open_document("/db/books/a.xml", LockMode::Write).unwrap().unwrap();
        broker.lock_document(&mut txn, &doc, "editor").unwrap();
        doc.release().unwrap();
        broker.commit(&mut txn).unwrap();
    }

    db.crash_and_restart();

    let broker = db.admin();
    let doc = broker.open_document("/db/books/a.xml", LockMode::Read).unwrap().unwrap();
    assert_eq!(broker.user_lock(&doc).unwrap().as_deref(), Some("editor"));
    doc.release().unwrap();
}
