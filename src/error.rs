//! Error types for the SOAP client.

use crate::fault::{Fault, FaultV11, FaultV12};
use crate::xml::XmlError;
use thiserror::Error;

/// Boxed error used for transport and handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SOAP client errors.
#[derive(Error, Debug)]
pub enum SoapError {
    /// The server answered with a protocol fault.
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Malformed SOAP response: {reason}")]
    MalformedResponse {
        reason: String,
        #[source]
        source: Option<XmlError>,
    },

    #[error("HTTP {status} returned with an empty body")]
    UnexpectedStatus { status: http::StatusCode },

    #[error("Response body size {size} exceeds maximum {max}")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("XML error: {0}")]
    Xml(#[from] XmlError),

    #[error("Invalid HTTP request: {0}")]
    Http(#[from] http::Error),

    /// Raised by a registered handler.
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoapError {
    /// Wrap any error raised inside a handler.
    pub fn handler(error: impl Into<BoxError>) -> Self {
        Self::Handler(error.into())
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
            source: None,
        }
    }

    /// The fault, if this error is one.
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<FaultV11> for SoapError {
    fn from(fault: FaultV11) -> Self {
        Self::Fault(Fault::V11(fault))
    }
}

impl From<FaultV12> for SoapError {
    fn from(fault: FaultV12) -> Self {
        Self::Fault(Fault::V12(fault))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::DEFAULT_V11_MESSAGE;
    use std::error::Error as _;

    #[test]
    fn test_fault_display_is_transparent() {
        let err = SoapError::from(FaultV11::new("soap:Server", "bad input"));
        assert_eq!(err.to_string(), DEFAULT_V11_MESSAGE);
        assert_eq!(err.as_fault().unwrap().code(), "soap:Server");
    }

    #[test]
    fn test_malformed_response_keeps_cause() {
        let err = SoapError::MalformedResponse {
            reason: "response is not XML".to_string(),
            source: Some(XmlError::Parse("unexpected EOF".to_string())),
        };
        assert_eq!(err.to_string(), "Malformed SOAP response: response is not XML");
        assert!(err.source().unwrap().to_string().contains("unexpected EOF"));
        assert!(err.as_fault().is_none());
    }

    #[test]
    fn test_handler_error() {
        let err = SoapError::handler("signature key missing");
        assert_eq!(err.to_string(), "Handler error: signature key missing");
    }
}
