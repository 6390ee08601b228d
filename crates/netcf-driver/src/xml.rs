//! Transient XML documents.
//!
//! Both forms this layer handles (the abstract interface description and
//! the store projection) are small trees built per operation and dropped
//! when the operation returns. [`Document`] owns such a tree; it is parsed
//! with `roxmltree` and serialized back with an XML declaration.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A parse failure with the line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at line {line}: {message}")]
pub struct XmlError {
    pub line: u32,
    pub message: String,
}

/// Child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with its attributes, namespace declarations and children.
///
/// Names are kept qualified (`prefix:local`) exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    namespaces: Vec<(Option<String>, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder form of [`Element::set_attr`].
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, overwriting an existing value in place.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declares a namespace on this element (`None` prefix is the default).
    pub fn declare_namespace(&mut self, prefix: Option<&str>, uri: impl Into<String>) {
        self.namespaces.push((prefix.map(str::to_owned), uri.into()));
    }

    /// Namespaces declared on this element, not those inherited.
    pub fn namespaces(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.namespaces
            .iter()
            .map(|(p, u)| (p.as_deref(), u.as_str()))
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// Position among all children of the first element matching `pred`.
    pub fn find_child_position<F>(&self, mut pred: F) -> Option<usize>
    where
        F: FnMut(&Element) -> bool,
    {
        self.children.iter().position(|n| match n {
            Node::Element(e) => pred(e),
            Node::Text(_) => false,
        })
    }

    /// Mutable access to the element child at `pos`.
    pub fn element_at_mut(&mut self, pos: usize) -> Option<&mut Element> {
        match self.children.get_mut(pos) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Appends a child element and returns its position.
    pub fn append_child(&mut self, child: Element) -> usize {
        self.children.push(Node::Element(child));
        self.children.len() - 1
    }

    pub fn append_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Removes every child element named `name`, returning how many went.
    pub fn remove_children(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.name == name));
        before - self.children.len()
    }

    /// Concatenated text content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

fn escape(raw: &str, in_attr: bool) -> Cow<'_, str> {
    let needs = |c: char| matches!(c, '&' | '<' | '>') || (in_attr && matches!(c, '"' | '\n' | '\t' | '\r'));
    if !raw.chars().any(needs) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            '\n' if in_attr => out.push_str("&#10;"),
            '\t' if in_attr => out.push_str("&#9;"),
            '\r' if in_attr => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (prefix, uri) in &self.namespaces {
            match prefix {
                Some(p) => write!(f, " xmlns:{}=\"{}\"", p, escape(uri, true))?,
                None => write!(f, " xmlns=\"{}\"", escape(uri, true))?,
            }
        }
        for (name, value) in &self.attributes {
            write!(f, " {}=\"{}\"", name, escape(value, true))?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for child in &self.children {
            match child {
                Node::Element(e) => write!(f, "{}", e)?,
                Node::Text(t) => f.write_str(&escape(t, false))?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

/// A parsed or constructed XML document; it always has a root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parses `text`; DTDs (and their entities) are accepted, nothing is
    /// fetched from the network.
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let opts = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, opts).map_err(|e| XmlError {
            line: e.pos().row,
            message: e.to_string(),
        })?;
        Ok(Self {
            root: convert_element(doc.root_element()),
        })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// Serializes the document, XML declaration included.
    pub fn to_xml_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<?xml version=\"1.0\"?>")?;
        writeln!(f, "{}", self.root)
    }
}

fn qualified(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|ns| node.lookup_prefix(ns)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
        _ => local.to_string(),
    }
}

fn convert_element(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(qualified(node, tag.namespace(), tag.name()));

    // Declarations are re-emitted on the element that introduces them.
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.uri() == XML_NAMESPACE || inherited.contains(&(ns.name(), ns.uri())) {
            continue;
        }
        element.declare_namespace(ns.name(), ns.uri());
    }

    for attr in node.attributes() {
        let name = qualified(node, attr.namespace(), attr.name());
        element.set_attr(name, attr.value());
    }

    for child in node.children() {
        if child.is_element() {
            element.append_child(convert_element(child));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                element.append_text(text);
            }
        }
    }
    element
}
