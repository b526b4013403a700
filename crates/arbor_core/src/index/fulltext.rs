//! Fulltext index rules.

use crate::error::{CoreError, CoreResult};
use crate::index::node_path::{NodePath, PathPattern};
use crate::index::xml::Element;
use std::collections::BTreeMap;

/// Which text nodes and attributes feed the fulltext index.
///
/// With `default="all"` everything is indexed except subtrees under an
/// `exclude` path; with `default="none"` only subtrees under an `include`
/// path are. Excludes win over includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextIndexSpec {
    include_by_default: bool,
    include_attributes: bool,
    includes: Vec<PathPattern>,
    excludes: Vec<PathPattern>,
}

impl Default for FulltextIndexSpec {
    fn default() -> Self {
        Self {
            include_by_default: true,
            include_attributes: true,
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

impl FulltextIndexSpec {
    /// Reads a `fulltext` element.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unknown `default` or `attributes`
    /// value, or an `include`/`exclude` without a valid `path`.
    pub fn from_element(
        element: &Element,
        namespaces: &BTreeMap<String, String>,
    ) -> CoreResult<Self> {
        let include_by_default = match element.attribute("default") {
            None | Some("all") => true,
            Some("none") => false,
            Some(other) => {
                return Err(CoreError::configuration(format!(
                    "fulltext default must be 'all' or 'none', got '{other}'"
                )))
            }
        };
        let include_attributes = match element.attribute("attributes") {
            None | Some("true" | "yes") => true,
            Some("false" | "no") => false,
            Some(other) => {
                return Err(CoreError::configuration(format!(
                    "fulltext attributes must be 'true' or 'false', got '{other}'"
                )))
            }
        };

        let mut spec = Self {
            include_by_default,
            include_attributes,
            ..Self::default()
        };
        for child in element.child_elements() {
            let target = match child.local_name() {
                "include" => &mut spec.includes,
                "exclude" => &mut spec.excludes,
                _ => continue,
            };
            let path = child.attribute("path").ok_or_else(|| {
                CoreError::configuration(format!("fulltext {} needs a path", child.local_name()))
            })?;
            target.push(PathPattern::parse(path, namespaces)?);
        }
        Ok(spec)
    }

    /// Whether nodes are indexed unless excluded.
    #[must_use]
    pub fn include_by_default(&self) -> bool {
        self.include_by_default
    }

    /// Whether attribute values are indexed.
    #[must_use]
    pub fn include_attributes(&self) -> bool {
        self.include_attributes
    }

    /// Configured include patterns.
    #[must_use]
    pub fn includes(&self) -> &[PathPattern] {
        &self.includes
    }

    /// Configured exclude patterns.
    #[must_use]
    pub fn excludes(&self) -> &[PathPattern] {
        &self.excludes
    }

    /// Whether the text content of the element at `path` is indexed.
    #[must_use]
    pub fn match_path(&self, path: &NodePath) -> bool {
        if self.excludes.iter().any(|p| p.matches_self_or_ancestor(path)) {
            return false;
        }
        self.include_by_default || self.includes.iter().any(|p| p.matches_self_or_ancestor(path))
    }

    /// Whether the attribute at `path` (ending in the attribute name) is
    /// indexed.
    #[must_use]
    pub fn match_attribute(&self, path: &NodePath) -> bool {
        self.include_attributes && self.match_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::qname::QName;
    use crate::index::xml::parse;

    fn spec(xml: &str) -> CoreResult<FulltextIndexSpec> {
        FulltextIndexSpec::from_element(&parse(xml)?, &BTreeMap::new())
    }

    fn path(names: &[&str]) -> NodePath {
        names.iter().map(|n| QName::element("", *n)).collect()
    }

    #[test]
    fn default_all_with_exclude() {
        let ft = spec(r#"<fulltext default="all"><exclude path="/doc/meta"/></fulltext>"#).unwrap();
        assert!(ft.match_path(&path(&["doc", "body"])));
        assert!(!ft.match_path(&path(&["doc", "meta"])));
        assert!(!ft.match_path(&path(&["doc", "meta", "author"])));
    }

    #[test]
    fn default_none_with_include() {
        let ft = spec(
            r#"<fulltext default="none" attributes="false">
                 <include path="//para"/>
                 <exclude path="//para/note"/>
               </fulltext>"#,
        )
        .unwrap();
        assert!(!ft.include_by_default());
        assert!(ft.match_path(&path(&["book", "para"])));
        assert!(ft.match_path(&path(&["book", "para", "em"])));
        assert!(!ft.match_path(&path(&["book", "para", "note"])));
        assert!(!ft.match_path(&path(&["book", "title"])));

        let mut attr = path(&["book", "para"]);
        attr.push(QName::attribute("", "lang"));
        assert!(!ft.match_attribute(&attr));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(spec(r#"<fulltext default="some"/>"#).is_err());
        assert!(spec(r#"<fulltext attributes="maybe"/>"#).is_err());
        assert!(spec(r#"<fulltext><include/></fulltext>"#).is_err());
    }
}
