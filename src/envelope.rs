//! SOAP envelope model and its mapping to and from XML.
//!
//! The protocol version is not stored in the envelope. It travels next to
//! it, fixed for a whole request, and selects the namespace used by
//! [`serialize`] and expected by [`deserialize`].

use crate::config::SoapVersion;
use crate::error::SoapError;
use crate::fault::Fault;
use crate::xml::{QualifiedName, XmlElement, XmlError};

/// Prefix bound to the envelope namespace in serialized documents.
pub const ENVELOPE_PREFIX: &str = "soap";

/// Header entries in document order.
///
/// A name may repeat: received headers keep every block, and [`push`](Self::push)
/// appends. [`insert`](Self::insert) and [`remove`](Self::remove) act on all
/// entries sharing the name, so after `insert` exactly one entry has it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapHeader {
    entries: Vec<XmlElement>,
}

impl SoapHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry for its name. It takes the position of the first entry
    /// with that name, which is returned; later duplicates are dropped.
    pub fn insert(&mut self, entry: XmlElement) -> Option<XmlElement> {
        let Some(index) = self.entries.iter().position(|e| e.name == entry.name) else {
            self.entries.push(entry);
            return None;
        };
        let name = entry.name.clone();
        let old = std::mem::replace(&mut self.entries[index], entry);
        let mut position = 0;
        self.entries.retain(|e| {
            let keep = position <= index || e.name != name;
            position += 1;
            keep
        });
        Some(old)
    }

    /// Append an entry, keeping any with the same name.
    pub fn push(&mut self, entry: XmlElement) {
        self.entries.push(entry);
    }

    /// First entry with the given name.
    pub fn get(&self, name: &QualifiedName) -> Option<&XmlElement> {
        self.entries.iter().find(|e| &e.name == name)
    }

    /// Every entry with the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a QualifiedName) -> impl Iterator<Item = &'a XmlElement> {
        self.entries.iter().filter(move |e| &e.name == name)
    }

    /// First entry with the given local name, in any namespace.
    pub fn find(&self, local: &str) -> Option<&XmlElement> {
        self.entries.iter().find(|e| e.name.local == local)
    }

    /// Remove every entry with the given name, returning the first.
    pub fn remove(&mut self, name: &QualifiedName) -> Option<XmlElement> {
        let index = self.entries.iter().position(|e| &e.name == name)?;
        let first = self.entries.remove(index);
        self.entries.retain(|e| &e.name != name);
        Some(first)
    }

    pub fn iter(&self) -> impl Iterator<Item = &XmlElement> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Body content elements, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapBody {
    pub content: Vec<XmlElement>,
}

impl SoapBody {
    pub fn push(&mut self, element: XmlElement) {
        self.content.push(element);
    }

    /// First content element, usually the operation or its response.
    pub fn first(&self) -> Option<&XmlElement> {
        self.content.first()
    }

    /// First content element with the given local name.
    pub fn element(&self, local: &str) -> Option<&XmlElement> {
        self.content.iter().find(|e| e.name.local == local)
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A SOAP envelope. The body is always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapEnvelope {
    pub header: Option<SoapHeader>,
    pub body: SoapBody,
}

impl SoapEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header, created empty on first use.
    pub fn header_mut(&mut self) -> &mut SoapHeader {
        self.header.get_or_insert_with(SoapHeader::new)
    }

    pub fn with_header_entry(mut self, entry: XmlElement) -> Self {
        self.header_mut().insert(entry);
        self
    }

    pub fn with_body_element(mut self, element: XmlElement) -> Self {
        self.body.push(element);
        self
    }
}

/// Build the envelope element tree for `version`.
pub fn serialize(envelope: &SoapEnvelope, version: SoapVersion) -> XmlElement {
    let ns = version.namespace();
    let mut root = XmlElement::qualified(ns, "Envelope");

    if let Some(header) = &envelope.header {
        let mut element = XmlElement::qualified(ns, "Header");
        for entry in header.iter() {
            element = element.with_child(entry.clone());
        }
        root = root.with_child(element);
    }

    let mut body = XmlElement::qualified(ns, "Body");
    for content in &envelope.body.content {
        body = body.with_child(content.clone());
    }
    root.with_child(body)
}

/// Read an envelope of `version` from its element tree.
///
/// A body holding the version's `Fault` element yields [`SoapError::Fault`]
/// instead of an envelope.
pub fn deserialize(root: &XmlElement, version: SoapVersion) -> Result<SoapEnvelope, SoapError> {
    let ns = version.namespace();

    if root.name.local != "Envelope" {
        return Err(SoapError::malformed(format!(
            "expected Envelope root element, found {}",
            root.name
        )));
    }
    if root.name.namespace.as_deref() != Some(ns) {
        let other = match version {
            SoapVersion::Soap11 => SoapVersion::Soap12,
            SoapVersion::Soap12 => SoapVersion::Soap11,
        };
        let reason = if root.name.namespace.as_deref() == Some(other.namespace()) {
            format!("expected a SOAP {} envelope, received SOAP {}", version, other)
        } else {
            format!("unrecognized envelope namespace in {}", root.name)
        };
        return Err(SoapError::malformed(reason));
    }

    let header = root.child_ns(ns, "Header").map(|header| SoapHeader {
        entries: header.elements().cloned().collect(),
    });

    let body = root
        .child_ns(ns, "Body")
        .ok_or_else(|| SoapError::malformed("envelope has no Body"))?;

    if let Some(fault) = body.elements().find(|e| e.name.is(ns, "Fault")) {
        return Err(Fault::from_element(version, fault).into());
    }

    Ok(SoapEnvelope {
        header,
        body: SoapBody {
            content: body.elements().cloned().collect(),
        },
    })
}

/// Serialize straight to a UTF-8 document.
pub fn to_bytes(envelope: &SoapEnvelope, version: SoapVersion) -> Result<Vec<u8>, XmlError> {
    serialize(envelope, version).to_document(&[(ENVELOPE_PREFIX, version.namespace())])
}

/// Parse a document and read the envelope from it.
pub fn from_bytes(data: &[u8], version: SoapVersion) -> Result<SoapEnvelope, SoapError> {
    let root = XmlElement::parse(data).map_err(|e| SoapError::MalformedResponse {
        reason: "response is not well-formed XML".to_string(),
        source: Some(e),
    })?;
    deserialize(&root, version)
}
