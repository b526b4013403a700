//! Qualified names and namespace scopes.

use crate::error::{CoreError, CoreResult};
use crate::index::xml::{split_name, Element};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Whether a name denotes an element or an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NameKind {
    /// Element name.
    Element,
    /// Attribute name.
    Attribute,
}

/// A namespace-qualified node name. Two names are equal when namespace,
/// local part and kind agree; the prefix used to write them is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QName {
    /// Namespace URI; empty for no namespace.
    pub namespace: String,
    /// Local part.
    pub local: String,
    /// Element or attribute.
    pub kind: NameKind,
}

impl QName {
    /// An element name.
    pub fn element(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
            kind: NameKind::Element,
        }
    }

    /// An attribute name.
    pub fn attribute(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
            kind: NameKind::Attribute,
        }
    }

    /// Resolves a lexical selector such as `x:foo` or `@x:id` against
    /// `namespaces` (prefix to URI). A leading `@` selects an attribute name.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty name or an undeclared prefix.
    pub fn parse(lexical: &str, namespaces: &BTreeMap<String, String>) -> CoreResult<Self> {
        let (kind, name) = match lexical.trim().strip_prefix('@') {
            Some(rest) => (NameKind::Attribute, rest),
            None => (NameKind::Element, lexical.trim()),
        };
        let (prefix, local) = split_name(name);
        if local.is_empty() || prefix.is_some_and(str::is_empty) {
            return Err(CoreError::configuration(format!(
                "invalid qualified name '{lexical}'"
            )));
        }
        let namespace = match prefix {
            None => String::new(),
            Some("xml") => XML_NAMESPACE.to_string(),
            Some(p) => namespaces.get(p).cloned().ok_or_else(|| {
                CoreError::configuration(format!(
                    "prefix '{p}' in '{lexical}' is not declared on the index element"
                ))
            })?,
        };
        Ok(Self {
            namespace,
            local: local.to_string(),
            kind,
        })
    }

    /// Whether this is an attribute name.
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        self.kind == NameKind::Attribute
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_attribute() {
            f.write_str("@")?;
        }
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// The `xmlns:prefix` declarations made directly on `element`.
#[must_use]
pub fn declared_prefixes(element: &Element) -> BTreeMap<String, String> {
    element
        .attributes
        .iter()
        .filter_map(|a| {
            a.name
                .strip_prefix("xmlns:")
                .map(|prefix| (prefix.to_string(), a.value.clone()))
        })
        .collect()
}

/// In-scope namespace bindings while walking a document.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Frame>,
}

#[derive(Debug, Clone, Default)]
struct Frame {
    default: Option<String>,
    prefixes: BTreeMap<String, String>,
}

impl NamespaceScope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters `element`, binding its declarations.
    pub fn push(&mut self, element: &Element) {
        self.frames.push(Frame {
            default: element.attribute("xmlns").map(str::to_string),
            prefixes: declared_prefixes(element),
        });
    }

    /// Leaves the innermost element.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.prefixes.get(prefix))
            .map(String::as_str)
    }

    fn default_namespace(&self) -> &str {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.default.as_deref())
            .unwrap_or("")
    }

    /// Resolves an element name. Unprefixed names take the default namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` for an undeclared prefix.
    pub fn element_name(&self, lexical: &str) -> CoreResult<QName> {
        match split_name(lexical) {
            (None, local) => Ok(QName::element(self.default_namespace(), local)),
            (Some(prefix), local) => Ok(QName::element(self.resolve(prefix, lexical)?, local)),
        }
    }

    /// Resolves an attribute name. Unprefixed attributes have no namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` for an undeclared prefix.
    pub fn attribute_name(&self, lexical: &str) -> CoreResult<QName> {
        match split_name(lexical) {
            (None, local) => Ok(QName::attribute("", local)),
            (Some(prefix), local) => Ok(QName::attribute(self.resolve(prefix, lexical)?, local)),
        }
    }

    fn resolve(&self, prefix: &str, lexical: &str) -> CoreResult<String> {
        self.lookup(prefix).map(str::to_string).ok_or_else(|| {
            CoreError::invalid_document(format!("undeclared namespace prefix in '{lexical}'"))
        })
    }
}

/// Whether an attribute is a namespace declaration rather than data.
#[must_use]
pub fn is_namespace_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}
