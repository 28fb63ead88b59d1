//! Owned XML element tree.
//!
//! Parsing and serialization sit on top of quick-xml, which never expands
//! external entities. DOCTYPE declarations are rejected outright.
//!
//! Element and attribute names carry resolved namespace URIs. Each element
//! also keeps the prefix bindings in scope where it was read, so a subtree
//! lifted out of a document still resolves QName-valued content such as
//! `xsi:type="m:T"` or a fault code. Text, comments and processing
//! instructions are kept as read, whitespace included.

use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use quick_xml::{NsReader, Writer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix to namespace URI. The empty prefix is the default namespace; an
/// empty URI undeclares it.
pub type Namespaces = BTreeMap<String, String>;

/// Errors raised while reading or writing XML.
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parsing error: {0}")]
    Parse(String),

    #[error("XML writing error: {0}")]
    Write(String),

    #[error("DOCTYPE declarations are not allowed")]
    DocType,

    #[error("Unexpected document structure: {0}")]
    Structure(String),
}

/// Namespace-qualified element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    /// Namespace URI, `None` for unqualified names
    pub namespace: Option<String>,
    /// Local part of the name
    pub local: String,
}

impl QualifiedName {
    /// Create an unqualified name.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    /// Create a name in the given namespace.
    pub fn with_namespace(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    /// Check namespace and local name at once.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Resolve a `prefix:local` value against `namespaces`.
///
/// Unprefixed values take the default namespace. Returns `None` when the
/// prefix is not bound.
pub fn resolve_qname(namespaces: &Namespaces, value: &str) -> Option<QualifiedName> {
    let bound = |prefix: &str| namespaces.get(prefix).filter(|ns| !ns.is_empty());
    match value.trim().split_once(':') {
        Some(("xml", local)) => Some(QualifiedName::with_namespace(XML_NS, local)),
        Some((prefix, local)) => bound(prefix).map(|ns| QualifiedName::with_namespace(ns.clone(), local)),
        None => Some(match bound("") {
            Some(ns) => QualifiedName::with_namespace(ns.clone(), value.trim()),
            None => QualifiedName::new(value.trim()),
        }),
    }
}

/// A single attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: QualifiedName,
    pub value: String,
}

/// Child node of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
    /// Target and data, as written between `<?` and `?>`
    ProcessingInstruction(String),
}

/// An element with its attributes and children.
///
/// Equality compares names, attributes and children. Prefix bindings are
/// not compared: two trees read from documents that chose different
/// prefixes are equal.
#[derive(Debug, Clone)]
pub struct XmlElement {
    pub name: QualifiedName,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
    /// Prefix bindings in scope for this element
    pub namespaces: Namespaces,
}

impl PartialEq for XmlElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.attributes == other.attributes && self.children == other.children
    }
}

impl Eq for XmlElement {}

impl XmlElement {
    /// Create an unqualified, empty element.
    pub fn new(local: impl Into<String>) -> Self {
        Self::with_name(QualifiedName::new(local))
    }

    /// Create an empty element in a namespace.
    pub fn qualified(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self::with_name(QualifiedName::with_namespace(namespace, local))
    }

    /// Create an empty element from a name.
    pub fn with_name(name: QualifiedName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            namespaces: Namespaces::new(),
        }
    }

    /// Bind `prefix` on this element. The empty prefix sets the default namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), namespace.into());
        self
    }

    /// Add an unqualified attribute.
    pub fn with_attribute(mut self, local: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            name: QualifiedName::new(local),
            value: value.into(),
        });
        self
    }

    /// Add a namespaced attribute.
    pub fn with_qualified_attribute(mut self, name: QualifiedName, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            name,
            value: value.into(),
        });
        self
    }

    /// Append a child element.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Append a text node. Empty strings are ignored.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(XmlNode::Text(text));
        }
        self
    }

    /// Value of the first attribute with the given local name.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Iterate over child elements, skipping other nodes.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First child element with the given local name, in any namespace.
    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name.local == local)
    }

    /// First child element with the given namespace and local name.
    pub fn child_ns(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name.is(namespace, local))
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Resolve a QName-valued attribute or text with this element's bindings.
    pub fn resolve_qname(&self, value: &str) -> Option<QualifiedName> {
        resolve_qname(&self.namespaces, value)
    }

    /// Parse a document and return its root element.
    pub fn parse(data: &[u8]) -> Result<Self, XmlError> {
        parse_document(data)
    }

    /// Serialize as a fragment, without declaration.
    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = TreeWriter::new();
        writer.write_element(self, &Scope::default(), &[])?;
        Ok(writer.finish())
    }

    /// Serialize as a full document, binding `prefixes` (prefix, namespace) on the root.
    pub fn to_document(&self, prefixes: &[(&str, &str)]) -> Result<Vec<u8>, XmlError> {
        let mut writer = TreeWriter::new();
        writer.emit(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_element(self, &Scope::default(), prefixes)?;
        Ok(writer.finish())
    }
}

fn parse_document(data: &[u8]) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_reader(data);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let element = open_element(&reader, e, stack.last())?;
                stack.push(element);
            }

            Ok(Event::Empty(ref e)) => {
                let element = open_element(&reader, e, stack.last())?;
                close_element(element, &mut stack, &mut root)?;
            }

            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Parse("unbalanced end tag".to_string()))?;
                close_element(element, &mut stack, &mut root)?;
            }

            Ok(Event::Text(ref e)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = e.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                    push_text(parent, &text);
                }
            }

            Ok(Event::CData(e)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8(e.into_inner().into_owned())
                        .map_err(|e| XmlError::Parse(format!("Invalid UTF-8: {}", e)))?;
                    push_text(parent, &text);
                }
            }

            Ok(Event::Comment(ref e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Comment(utf8(e)?));
                }
            }

            Ok(Event::PI(ref e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::ProcessingInstruction(utf8(e)?));
                }
            }

            Ok(Event::DocType(_)) => return Err(XmlError::DocType),

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(XmlError::Parse(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                )));
            }

            _ => {}
        }

        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Parse("unexpected end of document".to_string()));
    }

    root.ok_or_else(|| XmlError::Structure("document has no root element".to_string()))
}

fn open_element(
    reader: &NsReader<&[u8]>,
    e: &BytesStart,
    parent: Option<&XmlElement>,
) -> Result<XmlElement, XmlError> {
    let mut namespaces = parent.map(|p| p.namespaces.clone()).unwrap_or_default();
    let mut attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();

        match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Default) => {
                namespaces.insert(String::new(), value);
            }
            Some(PrefixDeclaration::Named(prefix)) => {
                namespaces.insert(utf8(prefix)?, value);
            }
            None => {
                let (resolved, local) = reader.resolve_attribute(attr.key);
                attributes.push(XmlAttribute {
                    name: QualifiedName {
                        namespace: namespace_of(resolved)?,
                        local: utf8(local.as_ref())?,
                    },
                    value,
                });
            }
        }
    }

    let (resolved, local) = reader.resolve_element(e.name());
    let name = QualifiedName {
        namespace: namespace_of(resolved)?,
        local: utf8(local.as_ref())?,
    };

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
        namespaces,
    })
}

fn close_element(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_some() => {
            return Err(XmlError::Structure("multiple root elements".to_string()));
        }
        None => *root = Some(element),
    }
    Ok(())
}

fn push_text(parent: &mut XmlElement, text: &str) {
    if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else if !text.is_empty() {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

fn namespace_of(resolved: ResolveResult) -> Result<Option<String>, XmlError> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(Some(utf8(ns.as_ref())?)),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) if prefix == b"xml" => Ok(Some(XML_NS.to_string())),
        ResolveResult::Unknown(prefix) => Err(XmlError::Parse(format!(
            "unknown namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| XmlError::Parse(format!("Invalid UTF-8: {}", e)))
}

/// Namespace bindings in effect while writing an element.
#[derive(Debug, Clone, Default)]
struct Scope {
    default_ns: Option<String>,
    /// (prefix, namespace), innermost last
    bindings: Vec<(String, String)>,
}

impl Scope {
    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// Innermost prefix still bound to `namespace` (not shadowed by a rebinding).
    fn prefix_for(&self, namespace: &str) -> Option<String> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, ns)| ns == namespace && self.lookup(p) == Some(namespace))
            .map(|(p, _)| p.clone())
    }

    fn bind(&mut self, prefix: &str, namespace: &str, declarations: &mut Declarations) {
        if self.lookup(prefix) != Some(namespace) {
            self.bindings.push((prefix.to_string(), namespace.to_string()));
            declarations.set(format!("xmlns:{}", prefix), namespace);
        }
    }

    /// Make `namespace` the default; empty means no default namespace.
    fn set_default(&mut self, namespace: &str, declarations: &mut Declarations) {
        let wanted = (!namespace.is_empty()).then_some(namespace);
        if self.default_ns.as_deref() != wanted {
            declarations.set("xmlns".to_string(), namespace);
            self.default_ns = wanted.map(str::to_string);
        }
    }

    fn unused_prefix(&self, counter: &mut usize) -> String {
        loop {
            let prefix = format!("ns{}", counter);
            *counter += 1;
            if self.lookup(&prefix).is_none() {
                return prefix;
            }
        }
    }
}

/// `xmlns` attributes of one start tag; a later setting of the same key wins.
#[derive(Default)]
struct Declarations(Vec<(String, String)>);

impl Declarations {
    fn set(&mut self, key: String, value: &str) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value.to_string(),
            None => self.0.push((key, value.to_string())),
        }
    }
}

struct TreeWriter {
    writer: Writer<Vec<u8>>,
    generated: usize,
}

impl TreeWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            generated: 0,
        }
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    fn emit(&mut self, event: Event<'_>) -> Result<(), XmlError> {
        self.writer
            .write_event(event)
            .map_err(|e| XmlError::Write(e.to_string()))
    }

    fn write_element(
        &mut self,
        element: &XmlElement,
        parent: &Scope,
        prefixes: &[(&str, &str)],
    ) -> Result<(), XmlError> {
        let mut scope = parent.clone();
        let mut declarations = Declarations::default();

        for (prefix, ns) in prefixes {
            scope.bind(prefix, ns, &mut declarations);
        }
        for (prefix, ns) in &element.namespaces {
            match prefix.as_str() {
                "" => scope.set_default(ns, &mut declarations),
                "xml" => {}
                prefix => scope.bind(prefix, ns, &mut declarations),
            }
        }

        let tag = match element.name.namespace.as_deref() {
            Some(ns) if scope.default_ns.as_deref() == Some(ns) => element.name.local.clone(),
            Some(ns) => match scope.prefix_for(ns) {
                Some(prefix) => format!("{}:{}", prefix, element.name.local),
                None => {
                    scope.set_default(ns, &mut declarations);
                    element.name.local.clone()
                }
            },
            None => {
                scope.set_default("", &mut declarations);
                element.name.local.clone()
            }
        };

        let mut attributes: Vec<(String, String)> = Vec::with_capacity(element.attributes.len());
        for attr in &element.attributes {
            let key = match attr.name.namespace.as_deref() {
                None => attr.name.local.clone(),
                Some(XML_NS) => format!("xml:{}", attr.name.local),
                Some(ns) => {
                    let prefix = match scope.prefix_for(ns) {
                        Some(prefix) => prefix,
                        None => {
                            let prefix = scope.unused_prefix(&mut self.generated);
                            scope.bind(&prefix, ns, &mut declarations);
                            prefix
                        }
                    };
                    format!("{}:{}", prefix, attr.name.local)
                }
            };
            attributes.push((key, attr.value.clone()));
        }

        let mut start = BytesStart::new(tag.as_str());
        for (key, value) in declarations.0.iter().chain(attributes.iter()) {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if element.children.is_empty() {
            return self.emit(Event::Empty(start));
        }

        self.emit(Event::Start(start))?;
        for child in &element.children {
            match child {
                XmlNode::Element(e) => self.write_element(e, &scope, &[])?,
                XmlNode::Text(t) => self.emit(Event::Text(BytesText::new(t)))?,
                XmlNode::Comment(c) => self.emit(Event::Comment(BytesText::from_escaped(c.as_str())))?,
                XmlNode::ProcessingInstruction(pi) => self.emit(Event::PI(BytesPI::new(pi.as_str())))?,
            }
        }
        self.emit(Event::End(BytesEnd::new(tag.as_str())))
    }
}
