//! Concrete node paths and the path patterns index rules select them with.

use crate::error::{CoreError, CoreResult};
use crate::index::qname::{NameKind, QName};
use std::collections::BTreeMap;
use std::fmt;

/// The root-to-node chain of names leading to one node in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath {
    components: Vec<QName>,
}

impl NodePath {
    /// An empty path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a component.
    pub fn push(&mut self, name: QName) {
        self.components.push(name);
    }

    /// Removes the last component.
    pub fn pop(&mut self) -> Option<QName> {
        self.components.pop()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the path has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The components, root first.
    #[must_use]
    pub fn components(&self) -> &[QName] {
        &self.components
    }
}

impl FromIterator<QName> for NodePath {
    fn from_iter<I: IntoIterator<Item = QName>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any(NameKind),
    Name(QName),
}

impl NameTest {
    fn matches(&self, name: &QName) -> bool {
        match self {
            Self::Any(kind) => name.kind == *kind,
            Self::Name(q) => q == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Child(NameTest),
    Descendant(NameTest),
}

/// A compiled path selector such as `//bar`, `/root/item/@id` or `a/*/b`.
///
/// Supported steps are `/` (child), `//` (descendant-or-self), name tests,
/// `*` and `@name` / `@*` for a final attribute step. A pattern that does not
/// start with `/` matches anywhere, as if it started with `//`. A pattern
/// must match the whole node path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    steps: Vec<Step>,
}

impl PathPattern {
    /// Compiles `pattern`, resolving prefixes against `namespaces`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty pattern, an empty step, an
    /// attribute step that is not last, or an undeclared prefix.
    pub fn parse(pattern: &str, namespaces: &BTreeMap<String, String>) -> CoreResult<Self> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(CoreError::configuration("empty path pattern"));
        }
        let invalid = |why: &str| CoreError::configuration(format!("path '{source}': {why}"));

        let mut steps = Vec::new();
        let mut rest = source;
        let mut descendant = !source.starts_with('/');
        loop {
            if let Some(r) = rest.strip_prefix("//") {
                descendant = true;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('/') {
                rest = r;
            }
            let end = rest.find('/').unwrap_or(rest.len());
            let token = &rest[..end];
            if token.is_empty() {
                return Err(invalid("empty step"));
            }
            if steps.last().is_some_and(step_is_attribute) {
                return Err(invalid("attribute step must be last"));
            }
            let test = match token {
                "*" => NameTest::Any(NameKind::Element),
                "@*" => NameTest::Any(NameKind::Attribute),
                _ => NameTest::Name(QName::parse(token, namespaces)?),
            };
            steps.push(if descendant {
                Step::Descendant(test)
            } else {
                Step::Child(test)
            });
            descendant = false;
            rest = &rest[end..];
            if rest.is_empty() {
                break;
            }
            if rest == "/" || rest == "//" {
                return Err(invalid("trailing slash"));
            }
        }

        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches the whole of `path`.
    #[must_use]
    pub fn matches(&self, path: &NodePath) -> bool {
        match_from(&self.steps, path.components())
    }

    /// Whether the pattern matches `path` or one of its ancestors.
    #[must_use]
    pub fn matches_self_or_ancestor(&self, path: &NodePath) -> bool {
        let components = path.components();
        (1..=components.len()).any(|n| match_from(&self.steps, &components[..n]))
    }

    /// Whether the pattern ends in an attribute step.
    #[must_use]
    pub fn selects_attributes(&self) -> bool {
        self.steps.last().is_some_and(step_is_attribute)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn step_is_attribute(step: &Step) -> bool {
    let test = match step {
        Step::Child(t) | Step::Descendant(t) => t,
    };
    match test {
        NameTest::Any(kind) => *kind == NameKind::Attribute,
        NameTest::Name(q) => q.is_attribute(),
    }
}

fn match_from(steps: &[Step], path: &[QName]) -> bool {
    let Some((step, rest)) = steps.split_first() else {
        return path.is_empty();
    };
    match step {
        Step::Child(test) => path
            .split_first()
            .is_some_and(|(head, tail)| test.matches(head) && match_from(rest, tail)),
        Step::Descendant(test) => (0..path.len())
            .any(|i| test.matches(&path[i]) && match_from(rest, &path[i + 1..])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ns() -> BTreeMap<String, String> {
        [("x".to_string(), "urn:x".to_string())].into()
    }

    fn path(names: &[&str]) -> NodePath {
        names
            .iter()
            .map(|n| match n.strip_prefix('@') {
                Some(a) => QName::attribute("", a),
                None => QName::element("", *n),
            })
            .collect()
    }

    fn pattern(p: &str) -> PathPattern {
        PathPattern::parse(p, &ns()).unwrap()
    }

    #[test]
    fn descendant_step_matches_any_depth() {
        let p = pattern("//bar");
        assert!(p.matches(&path(&["bar"])));
        assert!(p.matches(&path(&["a", "b", "bar"])));
        assert!(!p.matches(&path(&["bar", "c"])));
    }

    #[test]
    fn absolute_path_is_anchored() {
        let p = pattern("/root/item");
        assert!(p.matches(&path(&["root", "item"])));
        assert!(!p.matches(&path(&["x", "root", "item"])));
        assert!(!p.matches(&path(&["root"])));
    }

    #[test]
    fn relative_pattern_matches_anywhere() {
        let p = pattern("item/price");
        assert!(p.matches(&path(&["shop", "item", "price"])));
        assert!(!p.matches(&path(&["shop", "item", "x", "price"])));
    }

    #[test]
    fn wildcards_and_attributes() {
        let p = pattern("/a/*/@id");
        assert!(p.matches(&path(&["a", "b", "@id"])));
        assert!(!p.matches(&path(&["a", "@id"])));
        assert!(p.selects_attributes());
        assert!(pattern("//@*").matches(&path(&["a", "@k"])));
        assert!(!pattern("//*").matches(&path(&["a", "@k"])));
    }

    #[test]
    fn namespaced_steps() {
        let p = pattern("//x:foo");
        let ns_path: NodePath = [QName::element("urn:x", "foo")].into_iter().collect();
        assert!(p.matches(&ns_path));
        assert!(!p.matches(&path(&["foo"])));
    }

    #[test]
    fn ancestor_matching() {
        let p = pattern("/a/b");
        assert!(p.matches_self_or_ancestor(&path(&["a", "b", "c"])));
        assert!(!p.matches_self_or_ancestor(&path(&["a", "c", "b"])));
    }

    #[test]
    fn malformed_patterns() {
        for bad in ["", "/", "a//", "a/", "/a/@id/b", "y:foo", "a///b"] {
            assert!(
                PathPattern::parse(bad, &ns()).is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn display_paths() {
        assert_eq!(path(&["a", "@id"]).to_string(), "/a/@id");
        assert_eq!(pattern("//bar").to_string(), "//bar");
    }

    proptest! {
        #[test]
        fn descendant_pattern_matches_exactly_paths_ending_in_name(
            names in prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..6)
        ) {
            let p = pattern("//c");
            let expected = names.last() == Some(&"c");
            prop_assert_eq!(p.matches(&path(&names)), expected);
        }

        #[test]
        fn absolute_pattern_of_path_matches_itself(
            names in prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..6)
        ) {
            let p = pattern(&format!("/{}", names.join("/")));
            prop_assert!(p.matches(&path(&names)));
            let mut longer = names.clone();
            longer.push("a");
            prop_assert!(!p.matches(&path(&longer)));
        }
    }
}
