//! Index specification compiler.
//!
//! Turns an `<index>` configuration element into an immutable [`IndexSpec`]
//! (index depth, fulltext rules, path and qualified-name range rules) and
//! applies it to documents at validation time.

mod analysis;
mod fulltext;
mod node_path;
mod qname;
mod range;
mod spec;
pub mod xml;

pub use analysis::{analyze, IndexSummary, RangeEntry};
pub use fulltext::FulltextIndexSpec;
pub use node_path::{NodePath, PathPattern};
pub use qname::{NameKind, NamespaceScope, QName, XML_NAMESPACE};
pub use range::{IndexType, IndexValue, RangeIndex, RangeIndexTable, Selector};
pub use spec::{IndexSpec, DEFAULT_INDEX_DEPTH};
