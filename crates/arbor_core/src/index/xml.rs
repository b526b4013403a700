//! A small XML reader for index configuration and stored documents.
//!
//! Supports elements, attributes, text, CDATA sections, comments, processing
//! instructions, the five predefined entities and numeric character
//! references. Document type declarations are rejected, and so is element
//! nesting beyond a fixed depth.

use crate::error::{CoreError, CoreResult};

/// Element nesting accepted by [`parse`].
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// An element with its attributes and children, names kept lexical
/// (`prefix:local`). Namespace resolution happens later against in-scope
/// `xmlns` declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lexical name, possibly prefixed.
    pub name: String,
    /// Attributes in document order, including `xmlns` declarations.
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

/// One attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lexical name, possibly prefixed.
    pub name: String,
    /// Value with entities expanded.
    pub value: String,
}

/// A child node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element.
    Element(Element),
    /// Character data (text and CDATA).
    Text(String),
}

impl Element {
    /// Prefix of the element name, if any.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        split_name(&self.name).0
    }

    /// Name without its prefix.
    #[must_use]
    pub fn local_name(&self) -> &str {
        split_name(&self.name).1
    }

    /// Value of the attribute with lexical name `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Child elements in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated character data of this element and its descendants.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    /// Whether the element has direct non-whitespace character data.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.children
            .iter()
            .any(|n| matches!(n, Node::Text(t) if !t.trim().is_empty()))
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }
}

/// Splits `prefix:local`.
#[must_use]
pub fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Parses a complete document and returns its root element.
///
/// # Errors
///
/// Returns `InvalidDocument` describing the first syntax error.
pub fn parse(input: &str) -> CoreResult<Element> {
    parse_with_max_depth(input, DEFAULT_MAX_DEPTH)
}

/// Like [`parse`], refusing elements nested more than `max_depth` deep
/// (the root is at depth 1).
///
/// # Errors
///
/// Returns `InvalidDocument` for a syntax error or for nesting past
/// `max_depth`.
pub fn parse_with_max_depth(input: &str, max_depth: usize) -> CoreResult<Element> {
    let mut parser = Parser {
        src: input.strip_prefix('\u{feff}').unwrap_or(input),
        pos: 0,
        depth: 0,
        max_depth,
    };
    parser.skip_misc()?;
    if parser.starts_with("<!DOCTYPE") {
        return Err(parser.error("document type declarations are not supported"));
    }
    if !parser.starts_with("<") {
        return Err(parser.error("expected root element"));
    }
    let root = parser.element()?;
    parser.skip_misc()?;
    if !parser.at_end() {
        return Err(parser.error("content after root element"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self, n: usize) {
        self.pos += n;
    }

    fn error(&self, message: &str) -> CoreError {
        CoreError::invalid_document(format!("{message} at byte {}", self.pos))
    }

    fn expect(&mut self, s: &str) -> CoreResult<()> {
        if self.starts_with(s) {
            self.bump(s.len());
            Ok(())
        } else {
            Err(self.error(&format!("expected '{s}'")))
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    /// Reads up to `end` and skips past it.
    fn until(&mut self, end: &str) -> CoreResult<&str> {
        let start = self.pos;
        match self.rest().find(end) {
            Some(i) => {
                self.pos += i + end.len();
                Ok(&self.src[start..start + i])
            }
            None => Err(self.error(&format!("unterminated construct, missing '{end}'"))),
        }
    }

    /// Whitespace, comments and processing instructions outside the root.
    fn skip_misc(&mut self) -> CoreResult<()> {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                self.until("?>")?;
            } else if self.starts_with("<!--") {
                self.until("-->")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> CoreResult<String> {
        let len = self
            .rest()
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '=' | '<' | '"' | '\''))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        let name = self.rest()[..len].to_string();
        self.bump(len);
        Ok(name)
    }

    fn element(&mut self) -> CoreResult<Element> {
        if self.depth >= self.max_depth {
            return Err(self.error(&format!(
                "elements nested deeper than {}",
                self.max_depth
            )));
        }
        self.depth += 1;
        let element = self.element_body()?;
        self.depth -= 1;
        Ok(element)
    }

    fn element_body(&mut self) -> CoreResult<Element> {
        self.expect("<")?;
        let name = self.name()?;
        let mut attributes: Vec<Attribute> = Vec::new();

        loop {
            self.skip_ws();
            if self.starts_with("/>") {
                self.bump(2);
                return Ok(Element {
                    name,
                    attributes,
                    children: Vec::new(),
                });
            }
            if self.starts_with(">") {
                self.bump(1);
                break;
            }
            let attr_name = self.name()?;
            self.skip_ws();
            self.expect("=")?;
            self.skip_ws();
            let quote = match self.peek() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.error("expected quoted attribute value")),
            };
            self.bump(1);
            let raw = self.until(&quote.to_string())?.to_string();
            if raw.contains('<') {
                return Err(self.error("'<' in attribute value"));
            }
            if attributes.iter().any(|a| a.name == attr_name) {
                return Err(self.error(&format!("duplicate attribute '{attr_name}'")));
            }
            let value = self.unescape(&raw)?;
            attributes.push(Attribute {
                name: attr_name,
                value,
            });
        }

        let mut children = Vec::new();
        let mut text = String::new();
        loop {
            if self.at_end() {
                return Err(self.error(&format!("unclosed element '{name}'")));
            }
            if self.starts_with("</") {
                self.bump(2);
                let end = self.name()?;
                if end != name {
                    return Err(self.error(&format!("expected '</{name}>', found '</{end}>'")));
                }
                self.skip_ws();
                self.expect(">")?;
                break;
            } else if self.starts_with("<!--") {
                self.until("-->")?;
            } else if self.starts_with("<![CDATA[") {
                self.bump("<![CDATA[".len());
                text.push_str(self.until("]]>")?);
            } else if self.starts_with("<?") {
                self.until("?>")?;
            } else if self.starts_with("<") {
                flush_text(&mut text, &mut children);
                children.push(Node::Element(self.element()?));
            } else {
                let len = self.rest().find('<').unwrap_or(self.rest().len());
                let raw = self.rest()[..len].to_string();
                self.bump(len);
                text.push_str(&self.unescape(&raw)?);
            }
        }
        flush_text(&mut text, &mut children);

        Ok(Element {
            name,
            attributes,
            children,
        })
    }

    fn unescape(&self, raw: &str) -> CoreResult<String> {
        if !raw.contains('&') {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let after = &rest[amp + 1..];
            let semi = after
                .find(';')
                .ok_or_else(|| self.error("unterminated entity reference"))?;
            let entity = &after[..semi];
            let ch = match entity {
                "lt" => '<',
                "gt" => '>',
                "amp" => '&',
                "quot" => '"',
                "apos" => '\'',
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                        .ok_or_else(|| self.error(&format!("unknown entity '&{entity};'")))?
                }
            };
            out.push(ch);
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn flush_text(text: &mut String, children: &mut Vec<Node>) {
    if !text.is_empty() {
        children.push(Node::Text(std::mem::take(text)));
    }
}
