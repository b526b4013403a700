//! Inspect command implementation.

use super::{format_size, load_view};
use crate::Format;
use arbor_core::{RecoveryReport, TreeStore, JOURNAL_FILE, SNAPSHOT_FILE};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Journal file size in bytes.
    pub journal_size: u64,
    /// Snapshot file size in bytes.
    pub snapshot_size: u64,
    /// Number of collections.
    pub collection_count: usize,
    /// Number of documents across all collections.
    pub document_count: usize,
    /// What replaying the journal found.
    pub recovery: RecoveryReport,
    /// Per-collection details.
    pub collections: Vec<CollectionStats>,
}

/// Details of one collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection path.
    pub path: String,
    /// Permission in `rwu` notation.
    pub permission: String,
    /// Number of child collections.
    pub children: usize,
    /// Number of documents.
    pub documents: usize,
    /// Whether the collection has its own index configuration.
    pub indexed: bool,
    /// Document names (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_names: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_documents: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let (tree, recovery) = load_view(path, arbor_core::index::DEFAULT_INDEX_DEPTH)?;
    let collections = collect(&tree, show_documents);
    let result = InspectResult {
        path: path.display().to_string(),
        journal_size: file_size(&path.join(JOURNAL_FILE)),
        snapshot_size: file_size(&path.join(SNAPSHOT_FILE)),
        collection_count: collections.len(),
        document_count: collections.iter().map(|c| c.documents).sum(),
        recovery,
        collections,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Collects collection details in path order.
pub fn collect(tree: &TreeStore, show_documents: bool) -> Vec<CollectionStats> {
    tree.paths()
        .into_iter()
        .filter_map(|path| tree.get(&path).map(|c| (path, c)))
        .map(|(path, collection)| {
            let collection = collection.read();
            CollectionStats {
                permission: collection.permission().to_string(),
                children: collection.child_names().count(),
                documents: collection.document_count(),
                indexed: collection.own_index_spec().is_some(),
                document_names: show_documents
                    .then(|| collection.documents().map(|d| d.name.clone()).collect()),
                path,
            }
        })
        .collect()
}

fn print_text_output(result: &InspectResult) {
    println!("Arbor Database Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Journal size:  {}", format_size(result.journal_size));
    println!("  Snapshot size: {}", format_size(result.snapshot_size));
    println!();
    println!("Journal:");
    println!("  Records since checkpoint: {}", result.recovery.records_scanned);
    println!("  Committed transactions:   {}", result.recovery.committed);
    println!("  Aborted transactions:     {}", result.recovery.aborted);
    println!("  Unfinished transactions:  {}", result.recovery.losers.len());
    if result.recovery.torn_tail {
        println!("  Torn tail record present");
    }
    println!();
    println!(
        "Collections: {} ({} documents)",
        result.collection_count, result.document_count
    );
    for col in &result.collections {
        println!(
            "  {:<40} {} {} docs{}",
            col.path,
            col.permission,
            col.documents,
            if col.indexed { ", indexed" } else { "" }
        );
        if let Some(names) = &col.document_names {
            for name in names {
                println!("      {name}");
            }
        }
    }
}
