//! Dump-log command implementation.

use crate::Format;
use arbor_core::{Journal, JournalRecord, JOURNAL_FILE};
use arbor_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Transaction ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Commit or checkpoint sequence (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Recovery start offset of a checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_from: Option<u64>,
    /// Description of a logged change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
}

impl LogRecordInfo {
    /// Builds the output form of `record` found at `offset`.
    pub fn new(offset: u64, record: &JournalRecord) -> Self {
        let mut info = Self {
            offset,
            record_type: format!("{:?}", record.record_type()).to_uppercase(),
            txid: record.txid().map(|t| t.as_u64()),
            sequence: None,
            scan_from: None,
            change: None,
        };
        match record {
            JournalRecord::Entry { entry, .. } => info.change = Some(entry.describe()),
            JournalRecord::Commit { sequence, .. } => info.sequence = Some(sequence.as_u64()),
            JournalRecord::Checkpoint {
                sequence,
                scan_from,
            } => {
                info.sequence = Some(sequence.as_u64());
                info.scan_from = Some(*scan_from);
            }
            JournalRecord::Begin { .. } | JournalRecord::Abort { .. } => {}
        }
        info
    }
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let journal_path = path.join(JOURNAL_FILE);
    if !journal_path.exists() {
        return Err("Journal file not found".into());
    }

    let journal = Journal::new(Box::new(FileBackend::open(&journal_path)?));
    let (records, torn_tail) = read_records(&journal, start_offset, limit)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            print_text_output(&records);
            if torn_tail {
                println!("(incomplete record at end of journal)");
            }
        }
    }
    Ok(())
}

/// Reads up to `limit` records starting at `start_offset`. Also reports
/// whether the scan stopped at an incomplete tail record.
pub fn read_records(
    journal: &Journal,
    start_offset: u64,
    limit: Option<usize>,
) -> Result<(Vec<LogRecordInfo>, bool), Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut iter = journal.iter_from(start_offset)?;
    let mut records = Vec::new();
    while records.len() < max_records {
        match iter.next() {
            Some(item) => {
                let (offset, record) = item?;
                records.push(LogRecordInfo::new(offset, &record));
            }
            None => break,
        }
    }
    Ok((records, iter.has_torn_tail()))
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("{:>10}  {:<10}  {:>8}  DETAILS", "OFFSET", "TYPE", "TXID");
    println!("{}", "-".repeat(60));
    for r in records {
        let txid = r.txid.map_or_else(|| "-".to_string(), |t| t.to_string());
        let details = match (&r.change, r.sequence, r.scan_from) {
            (Some(change), _, _) => change.clone(),
            (None, Some(seq), Some(scan_from)) => format!("seq={seq} scan_from={scan_from}"),
            (None, Some(seq), None) => format!("seq={seq}"),
            _ => String::new(),
        };
        println!("{:>10}  {:<10}  {:>8}  {}", r.offset, r.record_type, txid, details);
    }
    println!();
    println!("Total: {} records", records.len());
}
