//! The handler capability: extension points around the wire boundary.
//!
//! Every method defaults to a no-op, so a handler only implements the
//! points it cares about. Each point comes in a synchronous form, used by
//! [`SoapClient::send`](crate::SoapClient::send), and an asynchronous form,
//! used by [`SoapClient::send_async`](crate::SoapClient::send_async). The two
//! call paths are independent: the blocking path never invokes an `_async`
//! method and vice versa.
//!
//! Arguments are handed over by exclusive reference for the duration of one
//! call. Whatever a handler leaves in them is what the next handler, and
//! then the client, sees.

use crate::client::SoapClient;
use crate::envelope::SoapEnvelope;
use crate::error::SoapError;
use crate::transport::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Arguments of the before-serialize points.
#[derive(Debug)]
pub struct EnvelopeRequestArgs {
    /// Target endpoint
    pub url: String,
    /// SOAP action
    pub action: Option<String>,
    /// Envelope about to be serialized
    pub envelope: SoapEnvelope,
}

/// Arguments of the before-send point.
#[derive(Debug)]
pub struct HttpRequestArgs {
    pub url: String,
    pub action: Option<String>,
    /// Request about to be handed to the transport
    pub request: HttpRequest,
}

/// Arguments of the after-receive point.
#[derive(Debug)]
pub struct HttpResponseArgs {
    pub url: String,
    pub action: Option<String>,
    /// Response as returned by the transport, before parsing
    pub response: HttpResponse,
}

/// Arguments of the after-deserialize points.
#[derive(Debug)]
pub struct EnvelopeResponseArgs {
    pub url: String,
    pub action: Option<String>,
    /// Envelope about to be returned to the caller
    pub envelope: SoapEnvelope,
}

/// An extension of the client request cycle.
///
/// Handlers run in ascending [`order`](SoapHandler::order); handlers with
/// equal order run in registration sequence. An error returned from any
/// method aborts the request: later handlers of that phase are not invoked
/// and the error reaches the caller as is.
#[async_trait]
pub trait SoapHandler: Send + Sync {
    /// Sort key, read once at registration.
    fn order(&self) -> i32 {
        0
    }

    /// Before a SOAP 1.1 envelope is serialized.
    fn on_envelope_v11_request(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeRequestArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_envelope_v11_request_async(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeRequestArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    /// Before a SOAP 1.2 envelope is serialized.
    fn on_envelope_v12_request(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeRequestArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_envelope_v12_request_async(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeRequestArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    /// Before the HTTP request is sent.
    fn on_http_request(
        &self,
        _client: &SoapClient,
        _args: &mut HttpRequestArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_http_request_async(
        &self,
        _client: &SoapClient,
        _args: &mut HttpRequestArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    /// After the HTTP response is received, before it is parsed.
    fn on_http_response(
        &self,
        _client: &SoapClient,
        _args: &mut HttpResponseArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_http_response_async(
        &self,
        _client: &SoapClient,
        _args: &mut HttpResponseArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    /// After a SOAP 1.1 response envelope is deserialized. Not invoked for faults.
    fn on_envelope_v11_response(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeResponseArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_envelope_v11_response_async(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeResponseArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    /// After a SOAP 1.2 response envelope is deserialized. Not invoked for faults.
    fn on_envelope_v12_response(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeResponseArgs,
    ) -> Result<(), SoapError> {
        Ok(())
    }

    async fn on_envelope_v12_response_async(
        &self,
        _client: &SoapClient,
        _args: &mut EnvelopeResponseArgs,
        _cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        Ok(())
    }
}
