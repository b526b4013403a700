//! Crash recovery.

use crate::error::CoreResult;
use crate::journal::record::{JournalRecord, LogEntry};
use crate::journal::writer::Journal;
use crate::tree::{path, TreeStore};
use crate::types::TransactionId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// What a recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Offset recovery started reading at.
    pub scan_from: u64,
    /// Records read from `scan_from` on.
    pub records_scanned: usize,
    /// Entries re-applied.
    pub redone: usize,
    /// Entries rolled back, for recorded aborts and for losers.
    pub undone: usize,
    /// Redo or undo steps skipped because their collection was removed
    /// later in the scanned history.
    pub superseded: usize,
    /// Transactions with a commit marker.
    pub committed: usize,
    /// Transactions with an abort marker.
    pub aborted: usize,
    /// Transactions with neither, rolled back by this pass.
    pub losers: Vec<TransactionId>,
    /// Next free transaction id.
    pub next_txid: u64,
    /// Next free commit sequence.
    pub next_sequence: u64,
    /// Whether an incomplete record was cut off the end.
    pub torn_tail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Open,
    Committed,
    Aborted,
}

/// Brings `tree` (restored from the last snapshot) up to date with the
/// journal.
///
/// History is repeated from the last checkpoint's scan offset: every entry is
/// redone in log order and every recorded abort is replayed as undo at the
/// point it was logged. Transactions that never reached a commit or abort
/// marker are then undone in reverse log order and an abort marker is
/// appended for each, so a later recovery treats them as finished.
///
/// A checkpoint taken while transactions were active leaves a snapshot that
/// is ahead of `scan_from`. A step whose collection is missing from the tree
/// is skipped when that collection, or an ancestor, is removed in the
/// scanned range or created there by a transaction that never committed.
/// Any other missing collection is corruption.
///
/// # Errors
///
/// Fails on journal corruption, on an entry that cannot be applied, or if the
/// abort markers for losers cannot be written.
pub fn recover(journal: &Journal, tree: &TreeStore) -> CoreResult<RecoveryReport> {
    let (records, end, torn_tail) = {
        let mut iter = journal.iter()?;
        let mut records = Vec::new();
        for item in iter.by_ref() {
            records.push(item?);
        }
        (records, iter.position(), iter.has_torn_tail())
    };

    if torn_tail {
        warn!(offset = end, "discarding incomplete journal record");
        journal.truncate(end)?;
    }

    let scan_from = records
        .iter()
        .rev()
        .find_map(|(_, record)| match record {
            JournalRecord::Checkpoint { scan_from, .. } => Some(*scan_from),
            _ => None,
        })
        .unwrap_or(0);

    let mut report = RecoveryReport {
        scan_from,
        torn_tail,
        ..RecoveryReport::default()
    };

    let mut max_txid = 0;
    let mut max_sequence = 0;
    for (_, record) in &records {
        if let Some(txid) = record.txid() {
            max_txid = max_txid.max(txid.as_u64());
        }
        match record {
            JournalRecord::Commit { sequence, .. } | JournalRecord::Checkpoint { sequence, .. } => {
                max_sequence = max_sequence.max(sequence.as_u64());
            }
            _ => {}
        }
    }
    report.next_txid = max_txid + 1;
    report.next_sequence = max_sequence + 1;

    let scanned: Vec<&JournalRecord> = records
        .iter()
        .filter(|(offset, _)| *offset >= scan_from)
        .map(|(_, record)| record)
        .collect();
    let vanishing = vanishing_collections(&scanned);

    let mut outcomes: BTreeMap<TransactionId, Outcome> = BTreeMap::new();
    let mut applied: Vec<(TransactionId, &LogEntry)> = Vec::new();

    for record in scanned.iter().copied() {
        report.records_scanned += 1;
        match record {
            JournalRecord::Begin { txid } => {
                outcomes.insert(*txid, Outcome::Open);
            }
            JournalRecord::Entry { txid, entry } => {
                if replay(tree, entry, &vanishing)? {
                    report.redone += 1;
                } else {
                    report.superseded += 1;
                }
                applied.push((*txid, entry));
                outcomes.entry(*txid).or_insert(Outcome::Open);
            }
            JournalRecord::Commit { txid, .. } => {
                outcomes.insert(*txid, Outcome::Committed);
                report.committed += 1;
            }
            JournalRecord::Abort { txid } => {
                for (_, entry) in applied.iter().rev().filter(|(owner, _)| owner == txid) {
                    if replay(tree, &entry.inverse(), &vanishing)? {
                        report.undone += 1;
                    } else {
                        report.superseded += 1;
                    }
                }
                outcomes.insert(*txid, Outcome::Aborted);
                report.aborted += 1;
            }
            JournalRecord::Checkpoint { .. } => {}
        }
    }

    report.losers = outcomes
        .iter()
        .filter(|(_, outcome)| **outcome == Outcome::Open)
        .map(|(txid, _)| *txid)
        .collect();

    if !report.losers.is_empty() {
        for (txid, entry) in applied.iter().rev() {
            if report.losers.contains(txid) {
                if replay(tree, &entry.inverse(), &vanishing)? {
                    report.undone += 1;
                } else {
                    report.superseded += 1;
                }
            }
        }
        for txid in &report.losers {
            journal.append(&JournalRecord::Abort { txid: *txid })?;
        }
        journal.flush(true)?;
    }

    info!(
        scan_from = report.scan_from,
        records = report.records_scanned,
        redone = report.redone,
        undone = report.undone,
        superseded = report.superseded,
        committed = report.committed,
        aborted = report.aborted,
        losers = report.losers.len(),
        "journal recovery complete"
    );
    Ok(report)
}

/// Collections that may legitimately be absent while replaying `scanned`:
/// those removed there and those created by transactions without a commit
/// marker in it.
fn vanishing_collections<'r>(scanned: &[&'r JournalRecord]) -> BTreeSet<&'r str> {
    let committed: BTreeSet<TransactionId> = scanned
        .iter()
        .copied()
        .filter_map(|record| match record {
            JournalRecord::Commit { txid, .. } => Some(*txid),
            _ => None,
        })
        .collect();
    scanned
        .iter()
        .copied()
        .filter_map(|record| match record {
            JournalRecord::Entry {
                entry: LogEntry::Collection { path, after: None, .. },
                ..
            } => Some(path.as_str()),
            JournalRecord::Entry {
                txid,
                entry: LogEntry::Collection {
                    path,
                    before: None,
                    after: Some(_),
                },
            } if !committed.contains(txid) => Some(path.as_str()),
            _ => None,
        })
        .collect()
}

/// Installs `entry`, or skips it when the collection it needs is missing
/// because of a removal recorded in `vanishing`. Returns whether it was
/// installed.
fn replay(tree: &TreeStore, entry: &LogEntry, vanishing: &BTreeSet<&str>) -> CoreResult<bool> {
    if let Some(container) = tree.missing_container(entry) {
        let mut current = Some(container);
        while let Some(p) = current {
            if vanishing.contains(p) {
                debug!(change = %entry.describe(), container, "skipping step for removed collection");
                return Ok(false);
            }
            current = path::parent(p);
        }
    }
    tree.redo(entry)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::index::IndexSummary;
    use crate::tree::{CollectionMeta, Document, Permission};
    use crate::types::{DocumentId, SequenceNumber};
    use arbor_storage::{InMemoryBackend, StorageBackend};

    fn create(path: &str) -> LogEntry {
        LogEntry::Collection {
            path: path.into(),
            before: None,
            after: Some(CollectionMeta {
                path: path.into(),
                created: 1,
                permission: Permission::new("admin", "dba", 0o755),
                index_config: None,
            }),
        }
    }

    fn root() -> LogEntry {
        create("/db")
    }

    fn store(id: u64, name: &str) -> LogEntry {
        store_in("/db", id, name)
    }

    fn store_in(collection: &str, id: u64, name: &str) -> LogEntry {
        LogEntry::Document {
            collection: collection.into(),
            name: name.into(),
            before: None,
            after: Some(Box::new(Document {
                id: DocumentId::new(id),
                name: name.into(),
                mime_type: "application/xml".into(),
                content: "<a/>".into(),
                content_length: 4,
                digest: String::new(),
                created: 1,
                modified: 1,
                permission: Permission::new("admin", "dba", 0o644),
                user_lock: None,
                index: IndexSummary::default(),
            })),
        }
    }

    fn write(journal: &Journal, records: Vec<JournalRecord>) {
        for record in records {
            journal.append(&record).unwrap();
        }
    }

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn committed(n: u64, entries: Vec<LogEntry>) -> Vec<JournalRecord> {
        let mut records = vec![JournalRecord::Begin { txid: tx(n) }];
        records.extend(entries.into_iter().map(|entry| JournalRecord::Entry { txid: tx(n), entry }));
        records.push(JournalRecord::Commit {
            txid: tx(n),
            sequence: SequenceNumber::new(n),
        });
        records
    }

    fn documents(tree: &TreeStore) -> Vec<String> {
        tree.get("/db")
            .map(|c| c.read().documents().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn committed_work_is_redone() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        write(&journal, committed(1, vec![root(), store(1, "a.xml")]));

        let tree = TreeStore::new(1);
        let report = recover(&journal, &tree).unwrap();
        assert_eq!(documents(&tree), ["a.xml"]);
        assert_eq!(report.redone, 2);
        assert_eq!(report.committed, 1);
        assert_eq!(report.next_txid, 2);
        assert_eq!(report.next_sequence, 2);
        assert!(report.losers.is_empty());
    }

    #[test]
    fn loser_is_undone_and_marked_aborted() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        write(&journal, committed(1, vec![root()]));
        write(
            &journal,
            vec![
                JournalRecord::Begin { txid: tx(2) },
                JournalRecord::Entry {
                    txid: tx(2),
                    entry: store(1, "lost.xml"),
                },
            ],
        );

        let tree = TreeStore::new(1);
        let report = recover(&journal, &tree).unwrap();
        assert_eq!(report.losers, [tx(2)]);
        assert!(documents(&tree).is_empty());

        let last = journal.read_all().unwrap().pop().unwrap().1;
        assert_eq!(last, JournalRecord::Abort { txid: tx(2) });

        let again = TreeStore::new(1);
        let second = recover(&journal, &again).unwrap();
        assert!(second.losers.is_empty());
        assert_eq!(second.aborted, 1);
        assert!(documents(&again).is_empty());
    }

    #[test]
    fn recorded_abort_is_replayed_in_place() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        write(&journal, committed(1, vec![root()]));
        write(
            &journal,
            vec![
                JournalRecord::Begin { txid: tx(2) },
                JournalRecord::Entry {
                    txid: tx(2),
                    entry: store(1, "a.xml"),
                },
                JournalRecord::Abort { txid: tx(2) },
            ],
        );
        write(&journal, committed(3, vec![store(2, "a.xml")]));

        let tree = TreeStore::new(1);
        let report = recover(&journal, &tree).unwrap();
        let coll = tree.get("/db").unwrap();
        assert_eq!(coll.read().document("a.xml").unwrap().id, DocumentId::new(2));
        assert_eq!(report.undone, 1);
    }

    #[test]
    fn scan_starts_at_last_checkpoint() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        write(&journal, committed(1, vec![root()]));
        let from = journal.size().unwrap();
        write(
            &journal,
            vec![JournalRecord::Checkpoint {
                sequence: SequenceNumber::new(1),
                scan_from: from,
            }],
        );

        // The snapshot already holds /db; the checkpoint hides its creation.
        let tree = TreeStore::new(1);
        let report = recover(&journal, &tree).unwrap();
        assert_eq!(report.scan_from, from);
        assert_eq!(report.redone, 0);
        assert_eq!(report.next_txid, 2);
        assert!(tree.is_empty());
    }

    #[test]
    fn work_under_later_removed_collection_is_skipped() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        // A transaction left open across the checkpoint pins scan_from to 0.
        write(&journal, vec![JournalRecord::Begin { txid: tx(1) }]);
        write(
            &journal,
            committed(2, vec![create("/db/y/z"), store_in("/db/y/z", 7, "a.xml")]),
        );
        write(
            &journal,
            committed(
                3,
                vec![
                    store_in("/db/y/z", 7, "a.xml").inverse(),
                    create("/db/y/z").inverse(),
                    create("/db/y").inverse(),
                ],
            ),
        );
        write(
            &journal,
            vec![JournalRecord::Checkpoint {
                sequence: SequenceNumber::new(3),
                scan_from: 0,
            }],
        );

        // The snapshot was taken after /db/y was removed.
        let tree = TreeStore::new(1);
        tree.redo(&root()).unwrap();

        let report = recover(&journal, &tree).unwrap();
        assert_eq!(tree.paths(), ["/db"]);
        assert_eq!(report.superseded, 2);
        assert_eq!(report.losers, [tx(1)]);

        let again = TreeStore::restore(tree.snapshot(), 1).unwrap();
        recover(&journal, &again).unwrap();
        assert_eq!(again.paths(), ["/db"]);
    }

    #[test]
    fn missing_parent_without_removal_is_corruption() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        write(&journal, committed(1, vec![root(), create("/db/q/r")]));

        let err = recover(&journal, &TreeStore::new(1)).unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()));
        write(&journal, committed(1, vec![root()]));
        let clean = backend.size().unwrap();
        let mut raw = backend.clone();
        raw.append(&[b'A', b'J']).unwrap();

        let report = recover(&journal, &TreeStore::new(1)).unwrap();
        assert!(report.torn_tail);
        assert_eq!(backend.size().unwrap(), clean);
    }
}
