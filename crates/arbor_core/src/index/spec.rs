//! The compiled index specification of a collection.

use crate::error::{CoreError, CoreResult};
use crate::index::fulltext::FulltextIndexSpec;
use crate::index::node_path::{NodePath, PathPattern};
use crate::index::qname::{declared_prefixes, QName};
use crate::index::range::{IndexType, RangeIndex, RangeIndexTable, Selector};
use crate::index::xml::{self, Element};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Index depth used when neither the configuration nor the caller sets one.
pub const DEFAULT_INDEX_DEPTH: u32 = 1;

const INDEX_ELEMENT: &str = "index";
const INDEX_DEPTH_ATTRIB: &str = "index-depth";
const FULLTEXT_ELEMENT: &str = "fulltext";
const CREATE_ELEMENT: &str = "create";
const QNAME_ATTRIB: &str = "qname";
const PATH_ATTRIB: &str = "path";
const TYPE_ATTRIB: &str = "type";

/// Immutable index rules compiled from one `<index>` element:
///
/// ```xml
/// <index index-depth="3" xmlns:x="urn:test">
///     <fulltext default="all|none" attributes="true|false">
///         <include path="..."/>
///         <exclude path="..."/>
///     </fulltext>
///     <create qname="x:foo" type="xs:string"/>
///     <create path="//bar" type="xs:integer"/>
/// </index>
/// ```
///
/// Prefixes in selectors resolve only against `xmlns:*` attributes on the
/// `index` element itself. Compilation is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    depth: u32,
    fulltext: Option<FulltextIndexSpec>,
    ranges: RangeIndexTable,
    namespaces: BTreeMap<String, String>,
}

impl IndexSpec {
    /// Compiles `index` with [`DEFAULT_INDEX_DEPTH`] as the fallback depth.
    ///
    /// # Errors
    ///
    /// See [`IndexSpec::compile_with_depth`].
    pub fn compile(index: &Element) -> CoreResult<Self> {
        Self::compile_with_depth(index, DEFAULT_INDEX_DEPTH)
    }

    /// Compiles `index`. An `index-depth` that is not a valid 32-bit
    /// integer (non-numeric or out of range) is ignored with a warning and
    /// `fallback_depth` is kept.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when the element is not `index`, the depth is
    /// negative, a `create` has neither `qname` nor `path` or lacks a valid
    /// `type`, a selector uses an undeclared prefix, or the fulltext section
    /// is malformed.
    pub fn compile_with_depth(index: &Element, fallback_depth: u32) -> CoreResult<Self> {
        if index.local_name() != INDEX_ELEMENT {
            return Err(CoreError::configuration(format!(
                "expected <{INDEX_ELEMENT}>, found <{}>",
                index.name
            )));
        }
        debug!("compiling index configuration");
        let namespaces = declared_prefixes(index);

        let mut depth = fallback_depth;
        if let Some(raw) = index.attribute(INDEX_DEPTH_ATTRIB).filter(|v| !v.is_empty()) {
            match raw.parse::<i32>() {
                Ok(n) if n < 0 => {
                    return Err(CoreError::configuration(format!(
                        "{INDEX_DEPTH_ATTRIB} must not be negative, got {n}"
                    )))
                }
                Ok(n) => depth = n.unsigned_abs(),
                Err(_) => warn!(
                    value = raw,
                    kept = depth,
                    "ignoring {INDEX_DEPTH_ATTRIB}: not a valid integer"
                ),
            }
        }

        let mut fulltext = None;
        let mut ranges = RangeIndexTable::default();
        for child in index.child_elements() {
            match child.local_name() {
                FULLTEXT_ELEMENT => {
                    fulltext = Some(FulltextIndexSpec::from_element(child, &namespaces)?);
                }
                CREATE_ELEMENT => ranges.insert(compile_create(child, &namespaces)?),
                _ => {}
            }
        }

        Ok(Self {
            depth,
            fulltext,
            ranges,
            namespaces,
        })
    }

    /// Parses `source` and compiles its index rules. `source` may be a bare
    /// `<index>` element or a `<collection>` wrapper holding one.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for malformed XML, a wrapper without an
    /// `index` child, or any error from [`IndexSpec::compile_with_depth`].
    pub fn from_config_str(source: &str, fallback_depth: u32) -> CoreResult<Self> {
        let root = xml::parse(source).map_err(|e| CoreError::configuration(e.to_string()))?;
        if root.local_name() == "collection" {
            let index = root
                .child_elements()
                .find(|e| e.local_name() == INDEX_ELEMENT)
                .ok_or_else(|| CoreError::configuration("collection configuration has no <index>"))?;
            return Self::compile_with_depth(index, fallback_depth);
        }
        Self::compile_with_depth(&root, fallback_depth)
    }

    /// Tree depth up to which structural node ids are indexed.
    #[must_use]
    pub fn index_depth(&self) -> u32 {
        self.depth
    }

    /// The fulltext rules, if a `fulltext` element was present.
    #[must_use]
    pub fn fulltext(&self) -> Option<&FulltextIndexSpec> {
        self.fulltext.as_ref()
    }

    /// First path rule, in declaration order, matching `path`.
    #[must_use]
    pub fn index_by_path(&self, path: &NodePath) -> Option<&RangeIndex> {
        self.ranges.by_path(path)
    }

    /// The rule declared for exactly `name`.
    #[must_use]
    pub fn index_by_qname(&self, name: &QName) -> Option<&RangeIndex> {
        self.ranges.by_qname(name)
    }

    /// All range rules.
    #[must_use]
    pub fn ranges(&self) -> &RangeIndexTable {
        &self.ranges
    }

    /// Prefix bindings declared on the index element.
    #[must_use]
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }
}

fn compile_create(create: &Element, namespaces: &BTreeMap<String, String>) -> CoreResult<RangeIndex> {
    let type_name = create.attribute(TYPE_ATTRIB).ok_or_else(|| {
        CoreError::configuration(format!("element {} must have attribute {TYPE_ATTRIB}", create.name))
    })?;
    let index_type = IndexType::parse(type_name)?;

    let selector = if let Some(qname) = create.attribute(QNAME_ATTRIB) {
        Selector::QName(QName::parse(qname, namespaces)?)
    } else if let Some(path) = create.attribute(PATH_ATTRIB) {
        Selector::Path(PathPattern::parse(path, namespaces)?)
    } else {
        return Err(CoreError::configuration(format!(
            "element {} must have attribute {PATH_ATTRIB} or {QNAME_ATTRIB}",
            create.name
        )));
    };
    Ok(RangeIndex::new(selector, index_type))
}
