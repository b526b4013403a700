//! Typed range index descriptors.

use crate::error::{CoreError, CoreResult};
use crate::index::node_path::{NodePath, PathPattern};
use crate::index::qname::QName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Value type a range index stores its keys as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// `xs:string`
    String,
    /// `xs:integer` (and `xs:int`, `xs:long`)
    Integer,
    /// `xs:decimal`
    Decimal,
    /// `xs:double`
    Double,
    /// `xs:float`
    Float,
    /// `xs:boolean`
    Boolean,
    /// `xs:date`
    Date,
    /// `xs:dateTime`
    DateTime,
}

impl IndexType {
    /// Parses a schema type name. Accepts the `xs:` or `xsd:` prefix or none.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unsupported type.
    pub fn parse(name: &str) -> CoreResult<Self> {
        let local = name
            .trim()
            .strip_prefix("xs:")
            .or_else(|| name.trim().strip_prefix("xsd:"))
            .unwrap_or(name.trim());
        Ok(match local {
            "string" => Self::String,
            "integer" | "int" | "long" => Self::Integer,
            "decimal" => Self::Decimal,
            "double" => Self::Double,
            "float" => Self::Float,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "dateTime" => Self::DateTime,
            _ => {
                return Err(CoreError::configuration(format!(
                    "unsupported index type '{name}'"
                )))
            }
        })
    }

    /// Converts a node's string value to a key of this type, or `None` if
    /// it is not a valid lexical value.
    #[must_use]
    pub fn coerce(self, raw: &str) -> Option<IndexValue> {
        let s = raw.trim();
        match self {
            Self::String => Some(IndexValue::String(raw.to_string())),
            Self::Integer => s.parse().ok().map(IndexValue::Integer),
            Self::Decimal | Self::Double | Self::Float => {
                s.parse::<f64>().ok().filter(|v| v.is_finite()).map(IndexValue::Number)
            }
            Self::Boolean => match s {
                "true" | "1" => Some(IndexValue::Boolean(true)),
                "false" | "0" => Some(IndexValue::Boolean(false)),
                _ => None,
            },
            Self::Date => is_date(s).then(|| IndexValue::Temporal(s.to_string())),
            Self::DateTime => s
                .split_once('T')
                .filter(|(date, time)| is_date(date) && is_time(time))
                .map(|_| IndexValue::Temporal(s.to_string())),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "xs:string",
            Self::Integer => "xs:integer",
            Self::Decimal => "xs:decimal",
            Self::Double => "xs:double",
            Self::Float => "xs:float",
            Self::Boolean => "xs:boolean",
            Self::Date => "xs:date",
            Self::DateTime => "xs:dateTime",
        };
        f.write_str(name)
    }
}

fn is_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b[..4].iter().chain(&b[5..7]).chain(&b[8..10]).all(u8::is_ascii_digit)
}

fn is_time(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 8
        && b[2] == b':'
        && b[5] == b':'
        && b[..2].iter().chain(&b[3..5]).chain(&b[6..8]).all(u8::is_ascii_digit)
}

/// A typed index key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// String key.
    String(String),
    /// Integer key.
    Integer(i64),
    /// Decimal, double or float key.
    Number(f64),
    /// Boolean key.
    Boolean(bool),
    /// Date or date-time key, kept in lexical form.
    Temporal(String),
}

/// How a range index picks its nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Nodes whose path matches a pattern.
    Path(PathPattern),
    /// Nodes with exactly this name.
    QName(QName),
}

/// One `create` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeIndex {
    selector: Selector,
    index_type: IndexType,
}

impl RangeIndex {
    /// Creates a rule.
    #[must_use]
    pub fn new(selector: Selector, index_type: IndexType) -> Self {
        Self {
            selector,
            index_type,
        }
    }

    /// The node selector.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The key type.
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// The selected name, for a qualified-name rule.
    #[must_use]
    pub fn qname(&self) -> Option<&QName> {
        match &self.selector {
            Selector::QName(q) => Some(q),
            Selector::Path(_) => None,
        }
    }

    /// Whether this rule selects the node at `path`.
    #[must_use]
    pub fn matches(&self, path: &NodePath) -> bool {
        match &self.selector {
            Selector::Path(p) => p.matches(path),
            Selector::QName(q) => path.components().last() == Some(q),
        }
    }
}

impl fmt::Display for RangeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Selector::Path(p) => write!(f, "path {p} as {}", self.index_type),
            Selector::QName(q) => write!(f, "qname {q} as {}", self.index_type),
        }
    }
}

/// The range rules of one index specification, in declaration order.
///
/// Path rules and name rules share one list. A name declared again replaces
/// its earlier rule in place, so the list and the name lookup never drift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeIndexTable {
    entries: Vec<RangeIndex>,
    by_qname: HashMap<QName, usize>,
}

impl RangeIndexTable {
    /// Adds a rule. A qualified-name rule replaces any earlier rule for the
    /// same name.
    pub fn insert(&mut self, index: RangeIndex) {
        if let Some(name) = index.qname() {
            if let Some(&slot) = self.by_qname.get(name) {
                self.entries[slot] = index;
                return;
            }
            self.by_qname.insert(name.clone(), self.entries.len());
        }
        self.entries.push(index);
    }

    /// First path rule, in declaration order, matching `path`.
    #[must_use]
    pub fn by_path(&self, path: &NodePath) -> Option<&RangeIndex> {
        self.paths().find(|idx| idx.matches(path))
    }

    /// The rule declared for exactly `name`.
    #[must_use]
    pub fn by_qname(&self, name: &QName) -> Option<&RangeIndex> {
        self.by_qname.get(name).map(|&slot| &self.entries[slot])
    }

    /// Path rules in declaration order.
    pub fn paths(&self) -> impl Iterator<Item = &RangeIndex> {
        self.entries
            .iter()
            .filter(|idx| matches!(idx.selector, Selector::Path(_)))
    }

    /// Name rules in declaration order of their first declaration.
    pub fn qnames(&self) -> impl Iterator<Item = &RangeIndex> {
        self.entries.iter().filter(|idx| idx.qname().is_some())
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
