//! Applies an index specification to a parsed document.

use crate::error::CoreResult;
use crate::index::fulltext::FulltextIndexSpec;
use crate::index::node_path::NodePath;
use crate::index::qname::{is_namespace_declaration, NamespaceScope};
use crate::index::range::{IndexType, IndexValue, RangeIndex};
use crate::index::spec::IndexSpec;
use crate::index::xml::Element;
use serde::{Deserialize, Serialize};

/// One range index key computed from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    /// Node path, e.g. `/shop/item/@id`.
    pub path: String,
    /// Key type.
    pub index_type: IndexType,
    /// Typed key.
    pub value: IndexValue,
    /// Whether the entry came from a qualified-name rule.
    pub by_qname: bool,
}

/// What storing a document will index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Depth bound for structural ids.
    pub index_depth: u32,
    /// Elements in the document.
    pub element_count: usize,
    /// Elements at or above the depth bound.
    pub structural_entries: usize,
    /// Deepest element level (root = 1).
    pub max_level: usize,
    /// Elements and attributes whose text feeds the fulltext index.
    pub fulltext_nodes: usize,
    /// Range index keys.
    pub range_entries: Vec<RangeEntry>,
    /// Selected nodes whose value did not convert to the index type.
    pub rejected_values: usize,
}

/// Walks `root` and computes its [`IndexSummary`] under `spec`. Without a
/// spec, every node is fulltext indexed and no range keys are produced.
///
/// # Errors
///
/// Returns `InvalidDocument` if the document uses an undeclared namespace
/// prefix.
pub fn analyze(spec: Option<&IndexSpec>, root: &Element, fallback_depth: u32) -> CoreResult<IndexSummary> {
    let default_fulltext = FulltextIndexSpec::default();
    let mut walker = Walker {
        spec,
        fulltext: spec.and_then(IndexSpec::fulltext).unwrap_or(&default_fulltext),
        scope: NamespaceScope::new(),
        path: NodePath::new(),
        summary: IndexSummary {
            index_depth: spec.map_or(fallback_depth, IndexSpec::index_depth),
            ..IndexSummary::default()
        },
    };
    walker.element(root)?;
    Ok(walker.summary)
}

struct Walker<'a> {
    spec: Option<&'a IndexSpec>,
    fulltext: &'a FulltextIndexSpec,
    scope: NamespaceScope,
    path: NodePath,
    summary: IndexSummary,
}

impl Walker<'_> {
    fn element(&mut self, element: &Element) -> CoreResult<()> {
        self.scope.push(element);
        let name = self.scope.element_name(&element.name)?;
        self.path.push(name);

        let level = self.path.len();
        let summary = &mut self.summary;
        summary.element_count += 1;
        summary.max_level = summary.max_level.max(level);
        if level <= summary.index_depth as usize {
            summary.structural_entries += 1;
        }
        if element.has_text() && self.fulltext.match_path(&self.path) {
            self.summary.fulltext_nodes += 1;
        }
        if self.spec.is_some() {
            let text = element.text();
            self.range_keys(&text);
        }

        for attr in &element.attributes {
            if is_namespace_declaration(&attr.name) {
                continue;
            }
            let attr_name = self.scope.attribute_name(&attr.name)?;
            self.path.push(attr_name);
            if self.fulltext.match_attribute(&self.path) {
                self.summary.fulltext_nodes += 1;
            }
            self.range_keys(&attr.value);
            self.path.pop();
        }

        for child in element.child_elements() {
            self.element(child)?;
        }

        self.path.pop();
        self.scope.pop();
        Ok(())
    }

    /// Records keys for the node at the current path from both rule kinds.
    fn range_keys(&mut self, value: &str) {
        let Some(spec) = self.spec else {
            return;
        };
        let by_path = spec.index_by_path(&self.path);
        let by_qname = self
            .path
            .components()
            .last()
            .and_then(|name| spec.index_by_qname(name));
        for (rule, is_qname) in [(by_path, false), (by_qname, true)] {
            if let Some(rule) = rule {
                self.record(rule, value, is_qname);
            }
        }
    }

    fn record(&mut self, rule: &RangeIndex, value: &str, by_qname: bool) {
        match rule.index_type().coerce(value) {
            Some(value) => self.summary.range_entries.push(RangeEntry {
                path: self.path.to_string(),
                index_type: rule.index_type(),
                value,
                by_qname,
            }),
            None => self.summary.rejected_values += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::xml::parse;

    fn spec(source: &str) -> IndexSpec {
        IndexSpec::compile(&parse(source).unwrap()).unwrap()
    }

    const SHOP: &str = r#"<shop xmlns:x="urn:test">
        <item id="1"><name>Pen</name><price>1.50</price><x:foo>tagged</x:foo></item>
        <item id="2"><name>Ink</name><price>n/a</price></item>
    </shop>"#;

    #[test]
    fn without_spec_everything_is_fulltext() {
        let summary = analyze(None, &parse(SHOP).unwrap(), 2).unwrap();
        assert_eq!(summary.index_depth, 2);
        assert_eq!(summary.element_count, 8);
        assert_eq!(summary.structural_entries, 3);
        assert_eq!(summary.max_level, 3);
        // 5 text-bearing elements + 2 id attributes
        assert_eq!(summary.fulltext_nodes, 7);
        assert!(summary.range_entries.is_empty());
    }

    #[test]
    fn range_keys_by_path_and_qname() {
        let spec = spec(
            r#"<index xmlns:t="urn:test" index-depth="1">
                 <fulltext default="none" attributes="false"><include path="//name"/></fulltext>
                 <create path="//price" type="xs:double"/>
                 <create path="//item/@id" type="xs:integer"/>
                 <create qname="t:foo" type="xs:string"/>
               </index>"#,
        );
        let summary = analyze(Some(&spec), &parse(SHOP).unwrap(), 5).unwrap();

        assert_eq!(summary.index_depth, 1);
        assert_eq!(summary.structural_entries, 1);
        assert_eq!(summary.fulltext_nodes, 2);
        assert_eq!(summary.rejected_values, 1);

        let keys: Vec<_> = summary
            .range_entries
            .iter()
            .map(|e| (e.path.as_str(), e.value.clone(), e.by_qname))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("/shop/item/@id", IndexValue::Integer(1), false),
                ("/shop/item/price", IndexValue::Number(1.5), false),
                ("/shop/item/{urn:test}foo", IndexValue::String("tagged".into()), true),
                ("/shop/item/@id", IndexValue::Integer(2), false),
            ]
        );
    }

    #[test]
    fn undeclared_prefix_is_invalid() {
        assert!(analyze(None, &parse("<a><p:b/></a>").unwrap(), 1).is_err());
    }
}
