//! Check-index command implementation.

use crate::Format;
use arbor_core::index::{analyze, xml, IndexSummary};
use arbor_core::IndexSpec;
use serde::Serialize;
use std::path::Path;

/// What a compiled index configuration contains.
#[derive(Debug, Serialize)]
pub struct SpecSummary {
    /// Effective index depth.
    pub index_depth: u32,
    /// Fulltext rules, if a `fulltext` element was present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulltext: Option<FulltextSummary>,
    /// Range rules in declaration order.
    pub ranges: Vec<String>,
    /// Prefixes declared on the `index` element.
    pub namespaces: Vec<(String, String)>,
    /// Analysis of the sample document, if one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<IndexSummary>,
}

/// The fulltext part of a specification.
#[derive(Debug, Serialize)]
pub struct FulltextSummary {
    /// Whether nodes are indexed unless excluded.
    pub default_all: bool,
    /// Whether attribute values are indexed.
    pub attributes: bool,
    /// Include patterns.
    pub includes: Vec<String>,
    /// Exclude patterns.
    pub excludes: Vec<String>,
}

/// Compiles `file` and optionally applies it to `document`.
pub fn run(
    file: &Path,
    document: Option<&Path>,
    default_depth: u32,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(file)?;
    let sample = document.map(std::fs::read_to_string).transpose()?;
    let summary = check(&source, sample.as_deref(), default_depth)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        Format::Text => print_text_output(&summary),
    }
    Ok(())
}

/// Compiles `source`; with `sample`, also reports what it would index.
pub fn check(
    source: &str,
    sample: Option<&str>,
    default_depth: u32,
) -> Result<SpecSummary, Box<dyn std::error::Error>> {
    let spec = IndexSpec::from_config_str(source, default_depth)?;
    let document = sample
        .map(|xml_text| -> Result<IndexSummary, Box<dyn std::error::Error>> {
            let root = xml::parse(xml_text)?;
            Ok(analyze(Some(&spec), &root, default_depth)?)
        })
        .transpose()?;

    Ok(SpecSummary {
        index_depth: spec.index_depth(),
        fulltext: spec.fulltext().map(|ft| FulltextSummary {
            default_all: ft.include_by_default(),
            attributes: ft.include_attributes(),
            includes: ft.includes().iter().map(ToString::to_string).collect(),
            excludes: ft.excludes().iter().map(ToString::to_string).collect(),
        }),
        ranges: spec.ranges().paths().chain(spec.ranges().qnames()).map(ToString::to_string).collect(),
        namespaces: spec
            .namespaces()
            .iter()
            .map(|(p, u)| (p.clone(), u.clone()))
            .collect(),
        document,
    })
}

fn print_text_output(summary: &SpecSummary) {
    println!("Index configuration OK");
    println!("  Index depth: {}", summary.index_depth);
    for (prefix, uri) in &summary.namespaces {
        println!("  xmlns:{prefix} = {uri}");
    }
    match &summary.fulltext {
        Some(ft) => {
            println!(
                "  Fulltext: default={} attributes={}",
                if ft.default_all { "all" } else { "none" },
                ft.attributes
            );
            for p in &ft.includes {
                println!("    include {p}");
            }
            for p in &ft.excludes {
                println!("    exclude {p}");
            }
        }
        None => println!("  Fulltext: not configured (everything indexed)"),
    }
    println!("  Range indexes: {}", summary.ranges.len());
    for r in &summary.ranges {
        println!("    {r}");
    }
    if let Some(doc) = &summary.document {
        println!();
        println!("Sample document:");
        println!("  Elements:          {}", doc.element_count);
        println!("  Structural entries: {}", doc.structural_entries);
        println!("  Fulltext nodes:    {}", doc.fulltext_nodes);
        println!("  Range keys:        {}", doc.range_entries.len());
        for e in &doc.range_entries {
            println!("    {} = {:?}", e.path, e.value);
        }
        if doc.rejected_values > 0 {
            println!("  Rejected values:   {}", doc.rejected_values);
        }
    }
}
