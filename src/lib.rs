//! SOAP client protocol engine for Zentinel
//!
//! Sends SOAP 1.1 and 1.2 envelopes over HTTP and runs an ordered chain of
//! handlers around the wire boundary, so that cross-cutting concerns
//! (security headers, logging, message rewriting) can be layered onto every
//! request without touching the call sites.
//!
//! # Features
//!
//! - SOAP 1.1 and 1.2 envelope serialization and parsing
//! - Typed faults for both versions, detail kept as an XML subtree
//! - Handler pipeline with stable ordering and fail-fast dispatch
//! - Blocking and async send paths, with cancellation on the async one
//! - Pluggable HTTP transports (reqwest and ureq bundled behind features)
//!
//! # Example
//!
//! ```ignore
//! use zentinel_soap_client::{
//!     DelegatingHandler, ReqwestTransport, SoapClient, SoapClientConfig, SoapEnvelope,
//!     SoapVersion, XmlElement,
//! };
//!
//! let config = SoapClientConfig::default();
//! let transport = ReqwestTransport::from_config(&config.http)?;
//! let mut client = SoapClient::new(config).with_async_transport(transport);
//! client.use_handler(DelegatingHandler::new().http_request(|_, args| {
//!     args.request.headers_mut().insert("X-Trace", http::HeaderValue::from_static("1"));
//!     Ok(())
//! }));
//!
//! let request = SoapEnvelope::new()
//!     .with_body_element(XmlElement::qualified("urn:example", "Ping"));
//! let response = client
//!     .send_async("http://localhost:8080/svc", Some("urn:Ping"), SoapVersion::Soap12, request)
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod delegating;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod handler;
pub mod pipeline;
pub mod transport;
pub mod xml;

pub use client::SoapClient;
pub use config::{SoapClientConfig, SoapVersion};
pub use delegating::DelegatingHandler;
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader};
pub use error::{BoxError, SoapError};
pub use fault::{Fault, FaultCode, FaultReason, FaultV11, FaultV12};
pub use handler::{
    EnvelopeRequestArgs, EnvelopeResponseArgs, HttpRequestArgs, HttpResponseArgs, SoapHandler,
};
pub use pipeline::HandlerPipeline;
pub use transport::{AsyncHttpTransport, HttpRequest, HttpResponse, HttpTransport};
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
#[cfg(feature = "blocking")]
pub use transport::UreqTransport;
pub use xml::{Namespaces, QualifiedName, XmlElement, XmlError, XmlNode};
