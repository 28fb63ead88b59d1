//! SOAP faults returned by a server, one type per protocol version.
//!
//! A fault always has a human-readable message: the explicit one when given,
//! otherwise a fixed per-version default. The wire fields stay untouched so
//! callers can inspect exactly what the server sent. A fault synthesized
//! locally (for example from a fault element missing its required children)
//! carries the underlying error as its [`std::error::Error::source`].
//!
//! Fault codes are QNames. Each fault keeps the prefix bindings that were in
//! scope for its code so the code can be resolved after the envelope is gone,
//! and writes them back when rendered.

use crate::config::{SoapVersion, SOAP_11_NS, SOAP_12_NS};
use crate::envelope::{self, SoapEnvelope, ENVELOPE_PREFIX};
use crate::error::BoxError;
use crate::xml::{resolve_qname, Namespaces, QualifiedName, XmlElement, XmlError, XML_NS};
use std::fmt;
use thiserror::Error;

/// Message used by [`FaultV11`] when none was supplied.
pub const DEFAULT_V11_MESSAGE: &str = "A SOAP 1.1 Fault was returned by the server";
/// Message used by [`FaultV12`] when none was supplied.
pub const DEFAULT_V12_MESSAGE: &str = "A SOAP 1.2 Fault was returned by the server";

/// A SOAP 1.1 fault.
#[derive(Debug, Default)]
pub struct FaultV11 {
    /// `faultcode`, usually a QName such as `soap:Server`
    pub code: String,
    /// `faultstring`
    pub string: String,
    /// `faultactor`
    pub actor: Option<String>,
    /// `detail` element, kept as received
    pub detail: Option<XmlElement>,
    namespaces: Namespaces,
    message: Option<String>,
    source: Option<BoxError>,
}

impl FaultV11 {
    /// Create a fault with the default message.
    pub fn new(code: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            string: string.into(),
            ..Default::default()
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_detail(mut self, detail: XmlElement) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Bind `prefix` for the code and written on the `Fault` element.
    pub fn with_namespace(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), namespace.into());
        self
    }

    /// Replace the default message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the error this fault was synthesized from.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Explicit message, or [`DEFAULT_V11_MESSAGE`].
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_V11_MESSAGE)
    }

    /// Fault code without its namespace prefix.
    pub fn local_code(&self) -> &str {
        local_part(&self.code)
    }

    /// Resolve a QName such as a fault code.
    pub fn resolve(&self, value: &str) -> Option<QualifiedName> {
        resolve_code(&self.namespaces, SOAP_11_NS, value)
    }

    /// `faultcode` with its prefix resolved.
    pub fn code_name(&self) -> Option<QualifiedName> {
        self.resolve(&self.code)
    }

    /// Read a fault from a 1.1 `Fault` element.
    ///
    /// Never fails: a fault lacking `faultcode` or `faultstring` is returned
    /// with the structural error attached as its source.
    pub fn from_element(fault: &XmlElement) -> Self {
        let code_element = fault.child("faultcode");
        let code = code_element.map(XmlElement::text);
        let string = fault.child("faultstring").map(XmlElement::text);
        let missing = code.is_none() || string.is_none();

        let parsed = Self {
            code: code.unwrap_or_default(),
            string: string.unwrap_or_default(),
            actor: fault.child("faultactor").map(XmlElement::text),
            detail: fault.child("detail").cloned(),
            namespaces: code_element.unwrap_or(fault).namespaces.clone(),
            message: None,
            source: None,
        };

        if missing {
            parsed.with_source(XmlError::Structure(
                "SOAP 1.1 Fault is missing faultcode or faultstring".to_string(),
            ))
        } else {
            parsed
        }
    }

    /// Render as a 1.1 `Fault` element.
    pub fn to_element(&self) -> XmlElement {
        let mut fault = XmlElement::qualified(SOAP_11_NS, "Fault");
        fault.namespaces = self.namespaces.clone();
        fault = fault
            .with_child(XmlElement::new("faultcode").with_text(&self.code))
            .with_child(XmlElement::new("faultstring").with_text(&self.string));
        if let Some(actor) = &self.actor {
            fault = fault.with_child(XmlElement::new("faultactor").with_text(actor));
        }
        if let Some(detail) = &self.detail {
            fault = fault.with_child(detail.clone());
        }
        fault
    }
}

impl fmt::Display for FaultV11 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for FaultV11 {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// SOAP 1.2 fault code: a value plus nested subcodes, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultCode {
    pub value: String,
    pub subcodes: Vec<String>,
}

impl FaultCode {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            subcodes: Vec::new(),
        }
    }

    pub fn with_subcode(mut self, subcode: impl Into<String>) -> Self {
        self.subcodes.push(subcode.into());
        self
    }

    /// Dotted path, e.g. `soap:Sender.m:InvalidInput`.
    pub fn path(&self) -> String {
        std::iter::once(self.value.as_str())
            .chain(self.subcodes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// One localized `Reason/Text` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReason {
    /// `xml:lang`
    pub lang: Option<String>,
    pub text: String,
}

impl FaultReason {
    pub fn new(lang: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            lang: Some(lang.into()),
            text: text.into(),
        }
    }
}

/// A SOAP 1.2 fault.
#[derive(Debug, Default)]
pub struct FaultV12 {
    /// `Code`
    pub code: FaultCode,
    /// `Reason/Text` entries in document order
    pub reason: Vec<FaultReason>,
    /// `Node`
    pub node: Option<String>,
    /// `Role`
    pub role: Option<String>,
    /// `Detail` element, kept as received
    pub detail: Option<XmlElement>,
    namespaces: Namespaces,
    message: Option<String>,
    source: Option<BoxError>,
}

impl FaultV12 {
    /// Create a fault with the default message.
    pub fn new(code: FaultCode, reason: FaultReason) -> Self {
        Self {
            code,
            reason: vec![reason],
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: FaultReason) -> Self {
        self.reason.push(reason);
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_detail(mut self, detail: XmlElement) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Bind `prefix` for the code and written on the `Fault` element.
    pub fn with_namespace(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), namespace.into());
        self
    }

    /// Replace the default message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the error this fault was synthesized from.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Explicit message, or [`DEFAULT_V12_MESSAGE`].
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_V12_MESSAGE)
    }

    /// Reason text for `lang`, falling back to the first entry.
    pub fn reason_text(&self, lang: Option<&str>) -> Option<&str> {
        lang.and_then(|lang| {
            self.reason
                .iter()
                .find(|r| r.lang.as_deref() == Some(lang))
        })
        .or_else(|| self.reason.first())
        .map(|r| r.text.as_str())
    }

    /// Resolve a QName such as a code value or subcode.
    pub fn resolve(&self, value: &str) -> Option<QualifiedName> {
        resolve_code(&self.namespaces, SOAP_12_NS, value)
    }

    /// `Code/Value` with its prefix resolved.
    pub fn code_name(&self) -> Option<QualifiedName> {
        self.resolve(&self.code.value)
    }

    /// Read a fault from a 1.2 `Fault` element.
    ///
    /// Never fails: a fault lacking `Code/Value` or any `Reason/Text` is
    /// returned with the structural error attached as its source.
    pub fn from_element(fault: &XmlElement) -> Self {
        let code = fault.child("Code").and_then(read_code);
        let reason: Vec<FaultReason> = fault
            .child("Reason")
            .map(|reason| {
                reason
                    .elements()
                    .filter(|e| e.name.local == "Text")
                    .map(|text| FaultReason {
                        lang: text.attribute("lang").map(str::to_string),
                        text: text.text(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let missing = code.is_none() || reason.is_empty();

        let parsed = Self {
            code: code.unwrap_or_default(),
            reason,
            node: fault.child("Node").map(XmlElement::text),
            role: fault.child("Role").map(XmlElement::text),
            detail: fault.child("Detail").cloned(),
            namespaces: fault
                .child("Code")
                .and_then(|code| code.child("Value"))
                .unwrap_or(fault)
                .namespaces
                .clone(),
            message: None,
            source: None,
        };

        if missing {
            parsed.with_source(XmlError::Structure(
                "SOAP 1.2 Fault is missing Code/Value or Reason/Text".to_string(),
            ))
        } else {
            parsed
        }
    }

    /// Render as a 1.2 `Fault` element.
    pub fn to_element(&self) -> XmlElement {
        let mut code = XmlElement::qualified(SOAP_12_NS, "Code")
            .with_child(XmlElement::qualified(SOAP_12_NS, "Value").with_text(&self.code.value));
        // Subcodes nest: Code/Subcode/Subcode/...
        let nested = self.code.subcodes.iter().rev().fold(None, |inner: Option<XmlElement>, value| {
            let subcode = XmlElement::qualified(SOAP_12_NS, "Subcode")
                .with_child(XmlElement::qualified(SOAP_12_NS, "Value").with_text(value));
            Some(match inner {
                Some(inner) => subcode.with_child(inner),
                None => subcode,
            })
        });
        if let Some(subcode) = nested {
            code = code.with_child(subcode);
        }

        let mut reason = XmlElement::qualified(SOAP_12_NS, "Reason");
        for entry in &self.reason {
            let mut text = XmlElement::qualified(SOAP_12_NS, "Text");
            if let Some(lang) = &entry.lang {
                text = text.with_qualified_attribute(QualifiedName::with_namespace(XML_NS, "lang"), lang);
            }
            reason = reason.with_child(text.with_text(&entry.text));
        }

        let mut fault = XmlElement::qualified(SOAP_12_NS, "Fault");
        fault.namespaces = self.namespaces.clone();
        fault = fault
            .with_child(code)
            .with_child(reason);
        if let Some(node) = &self.node {
            fault = fault.with_child(XmlElement::qualified(SOAP_12_NS, "Node").with_text(node));
        }
        if let Some(role) = &self.role {
            fault = fault.with_child(XmlElement::qualified(SOAP_12_NS, "Role").with_text(role));
        }
        if let Some(detail) = &self.detail {
            fault = fault.with_child(detail.clone());
        }
        fault
    }
}

impl fmt::Display for FaultV12 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for FaultV12 {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

fn read_code(code: &XmlElement) -> Option<FaultCode> {
    let value = code.child("Value")?.text();
    let mut subcodes = Vec::new();
    let mut current = code.child("Subcode");
    while let Some(subcode) = current {
        match subcode.child("Value") {
            Some(value) => subcodes.push(value.text()),
            None => break,
        }
        current = subcode.child("Subcode");
    }
    Some(FaultCode { value, subcodes })
}

/// The envelope prefix resolves to the version namespace even when unbound,
/// matching the binding [`envelope::to_bytes`] puts on the root.
fn resolve_code(namespaces: &Namespaces, version_ns: &str, value: &str) -> Option<QualifiedName> {
    resolve_qname(namespaces, value).or_else(|| match value.trim().split_once(':') {
        Some((ENVELOPE_PREFIX, local)) => Some(QualifiedName::with_namespace(version_ns, local)),
        _ => None,
    })
}

fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

/// A fault of either protocol version.
#[derive(Error, Debug)]
pub enum Fault {
    #[error(transparent)]
    V11(#[from] FaultV11),

    #[error(transparent)]
    V12(#[from] FaultV12),
}

impl Fault {
    pub fn version(&self) -> SoapVersion {
        match self {
            Self::V11(_) => SoapVersion::Soap11,
            Self::V12(_) => SoapVersion::Soap12,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::V11(f) => f.message(),
            Self::V12(f) => f.message(),
        }
    }

    /// `faultcode` for 1.1, dotted code path for 1.2.
    pub fn code(&self) -> String {
        match self {
            Self::V11(f) => f.code.clone(),
            Self::V12(f) => f.code.path(),
        }
    }

    /// `faultstring` for 1.1, first reason text for 1.2.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::V11(f) => Some(f.string.as_str()),
            Self::V12(f) => f.reason_text(None),
        }
    }

    /// `faultactor` for 1.1, `Role` for 1.2.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::V11(f) => f.actor.as_deref(),
            Self::V12(f) => f.role.as_deref(),
        }
    }

    /// Code (1.2: `Code/Value`) with its prefix resolved.
    pub fn code_name(&self) -> Option<QualifiedName> {
        match self {
            Self::V11(f) => f.code_name(),
            Self::V12(f) => f.code_name(),
        }
    }

    pub fn detail(&self) -> Option<&XmlElement> {
        match self {
            Self::V11(f) => f.detail.as_ref(),
            Self::V12(f) => f.detail.as_ref(),
        }
    }

    /// Parse the fault element of `version`.
    pub fn from_element(version: SoapVersion, fault: &XmlElement) -> Self {
        match version {
            SoapVersion::Soap11 => Self::V11(FaultV11::from_element(fault)),
            SoapVersion::Soap12 => Self::V12(FaultV12::from_element(fault)),
        }
    }

    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::V11(f) => f.to_element(),
            Self::V12(f) => f.to_element(),
        }
    }

    /// Full fault response document, as a server would send it.
    pub fn envelope_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let envelope = SoapEnvelope::new().with_body_element(self.to_element());
        envelope::to_bytes(&envelope, self.version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_default_messages() {
        let v11 = FaultV11::new("soap:Server", "boom");
        assert_eq!(v11.to_string(), DEFAULT_V11_MESSAGE);

        let v12 = FaultV12::new(FaultCode::new("soap:Receiver"), FaultReason::new("en", "boom"));
        assert_eq!(v12.to_string(), DEFAULT_V12_MESSAGE);
    }

    #[test]
    fn test_explicit_message_is_verbatim() {
        let v11 = FaultV11::new("soap:Server", "boom").with_message("upstream rejected order 42");
        assert_eq!(v11.to_string(), "upstream rejected order 42");

        let fault = Fault::from(
            FaultV12::new(FaultCode::new("soap:Sender"), FaultReason::new("en", "x")).with_message("custom"),
        );
        assert_eq!(fault.message(), "custom");
        assert_eq!(fault.to_string(), "custom");
    }

    #[test]
    fn test_local_code() {
        assert_eq!(FaultV11::new("soap:Client", "").local_code(), "Client");
        assert_eq!(FaultV11::new("Server", "").local_code(), "Server");
    }

    #[test]
    fn test_code_path() {
        let code = FaultCode::new("soap:Sender")
            .with_subcode("m:InvalidInput")
            .with_subcode("m:MissingField");
        assert_eq!(code.path(), "soap:Sender.m:InvalidInput.m:MissingField");
        assert_eq!(FaultCode::new("soap:Receiver").path(), "soap:Receiver");
    }

    #[test]
    fn test_v11_element_round_trip() {
        let detail = XmlElement::new("detail").with_child(
            XmlElement::qualified("urn:errors", "Error").with_attribute("code", "E17").with_text("stock"),
        );
        let fault = FaultV11::new("soap:Server", "bad input")
            .with_actor("http://gateway.example.org")
            .with_detail(detail.clone());

        let parsed = FaultV11::from_element(&fault.to_element());
        assert_eq!(parsed.code, "soap:Server");
        assert_eq!(parsed.string, "bad input");
        assert_eq!(parsed.actor.as_deref(), Some("http://gateway.example.org"));
        assert_eq!(parsed.detail, Some(detail));
        assert!(parsed.source().is_none());
    }

    #[test]
    fn test_v12_element_round_trip() {
        let fault = FaultV12::new(
            FaultCode::new("soap:Sender").with_subcode("m:Timeout").with_subcode("m:Upstream"),
            FaultReason::new("en", "Took too long"),
        )
        .with_reason(FaultReason::new("de", "Zu langsam"))
        .with_node("http://node.example.org")
        .with_role("http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver");

        let parsed = FaultV12::from_element(&fault.to_element());
        assert_eq!(parsed.code, fault.code);
        assert_eq!(parsed.reason, fault.reason);
        assert_eq!(parsed.reason_text(Some("de")), Some("Zu langsam"));
        assert_eq!(parsed.reason_text(Some("fr")), Some("Took too long"));
        assert_eq!(parsed.node, fault.node);
        assert_eq!(parsed.role, fault.role);
        assert!(parsed.detail.is_none());
    }

    #[test]
    fn test_incomplete_v11_fault_carries_source() {
        let element = XmlElement::qualified(SOAP_11_NS, "Fault")
            .with_child(XmlElement::new("faultstring").with_text("no code"));
        let fault = FaultV11::from_element(&element);
        assert_eq!(fault.string, "no code");
        assert_eq!(fault.to_string(), DEFAULT_V11_MESSAGE);
        let source = fault.source().unwrap();
        assert!(source.to_string().contains("faultcode"));
    }

    #[test]
    fn test_incomplete_v12_fault_carries_source() {
        let element = XmlElement::qualified(SOAP_12_NS, "Fault");
        let fault = FaultV12::from_element(&element);
        assert!(fault.reason.is_empty());
        assert!(fault.source().is_some());
    }

    #[test]
    fn test_fault_accessors() {
        let fault = Fault::from(FaultV11::new("soap:Client", "nope").with_actor("urn:gw"));
        assert_eq!(fault.version(), SoapVersion::Soap11);
        assert_eq!(fault.code(), "soap:Client");
        assert_eq!(fault.reason(), Some("nope"));
        assert_eq!(fault.actor(), Some("urn:gw"));
        assert!(fault.detail().is_none());
    }

    #[test]
    fn test_envelope_bytes() {
        let fault = Fault::from(FaultV12::new(FaultCode::new("soap:Sender"), FaultReason::new("en", "bad")));
        let xml = String::from_utf8(fault.envelope_bytes().unwrap()).unwrap();
        assert!(xml.contains(SOAP_12_NS));
        assert!(xml.contains("<soap:Fault>"));
        assert!(xml.contains("<soap:Value>soap:Sender</soap:Value>"));
        assert!(xml.contains("xml:lang=\"en\""));
    }

    #[test]
    fn test_code_prefixes_are_declared_and_resolved() {
        let fault = Fault::from(
            FaultV12::new(
                FaultCode::new("env:Sender").with_subcode("m:InvalidPing"),
                FaultReason::new("en", "bad ping"),
            )
            .with_namespace("env", SOAP_12_NS)
            .with_namespace("m", "urn:example:errors"),
        );
        let bytes = fault.envelope_bytes().unwrap();
        let xml = String::from_utf8(bytes.clone()).unwrap();
        assert!(xml.contains("xmlns:env=\"http://www.w3.org/2003/05/soap-envelope\""));
        assert!(xml.contains("xmlns:m=\"urn:example:errors\""));

        let envelope = XmlElement::parse(&bytes).unwrap();
        let element = envelope.child("Body").unwrap().child("Fault").unwrap();
        let parsed = FaultV12::from_element(element);
        assert_eq!(parsed.code_name(), Some(QualifiedName::with_namespace(SOAP_12_NS, "Sender")));
        assert_eq!(
            parsed.resolve(&parsed.code.subcodes[0]),
            Some(QualifiedName::with_namespace("urn:example:errors", "InvalidPing"))
        );
    }

    #[test]
    fn test_v11_code_resolves_against_received_bindings() {
        let doc = br#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode><faultstring>down</faultstring></s:Fault></s:Body></s:Envelope>"#;
        let envelope = XmlElement::parse(doc).unwrap();
        let fault = FaultV11::from_element(envelope.child("Body").unwrap().child("Fault").unwrap());
        assert_eq!(fault.code_name(), Some(QualifiedName::with_namespace(SOAP_11_NS, "Server")));
        assert_eq!(fault.resolve("x:Other"), None);

        // Re-rendering keeps `s` bound for the code.
        let xml = String::from_utf8(Fault::from(fault).envelope_bytes().unwrap()).unwrap();
        assert!(xml.contains("xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\""));
        assert!(xml.contains("<faultcode>s:Server</faultcode>"));
    }

    #[test]
    fn test_envelope_prefix_resolves_without_binding() {
        let fault = FaultV11::new("soap:Client", "nope");
        assert_eq!(fault.code_name(), Some(QualifiedName::with_namespace(SOAP_11_NS, "Client")));
    }
}
