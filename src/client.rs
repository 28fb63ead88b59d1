//! SOAP client: drives one request/response cycle through the handler
//! pipeline.
//!
//! A call moves through these stages, never revisiting one:
//!
//! 1. before-serialize hooks (1.1 or 1.2 point, per the request version)
//! 2. envelope serialization and HTTP request construction
//! 3. before-send hooks
//! 4. transport send
//! 5. after-receive hooks
//! 6. envelope deserialization, where a fault ends the call with
//!    [`SoapError::Fault`]
//! 7. after-deserialize hooks (1.1 or 1.2 point)
//!
//! Every call ends in one terminal stage: done, faulted (the server answered
//! with a SOAP fault) or failed (any other error, including a handler error).
//!
//! The blocking [`SoapClient::send`] only calls synchronous handler methods
//! and the blocking transport; [`SoapClient::send_async`] only calls the
//! asynchronous ones.

use crate::config::{SoapClientConfig, SoapVersion};
use crate::envelope::{self, SoapEnvelope};
use crate::error::SoapError;
use crate::handler::{
    EnvelopeRequestArgs, EnvelopeResponseArgs, HttpRequestArgs, HttpResponseArgs, SoapHandler,
};
use crate::pipeline::{
    EnvelopeV11Request, EnvelopeV11Response, EnvelopeV12Request, EnvelopeV12Response,
    HandlerPipeline, HttpRequestPoint, HttpResponsePoint,
};
use crate::transport::{AsyncHttpTransport, HttpRequest, HttpResponse, HttpTransport};
use http::header::{CONTENT_TYPE, USER_AGENT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
enum Stage {
    PreSerializeHooks,
    Serialized,
    PreSendHooks,
    AwaitingTransport,
    PostReceiveHooks,
    Deserialized,
    PostDeserializeHooks,
    Done,
    Faulted,
    Failed,
}

impl Stage {
    fn terminal<T>(result: &Result<T, SoapError>) -> Self {
        match result {
            Ok(_) => Stage::Done,
            Err(e) if e.as_fault().is_some() => Stage::Faulted,
            Err(_) => Stage::Failed,
        }
    }
}

fn enter(stage: Stage) {
    trace!(stage = ?stage, "SOAP request stage");
}

fn finish<T>(result: Result<T, SoapError>) -> Result<T, SoapError> {
    match (Stage::terminal(&result), &result) {
        (stage, Err(e)) => trace!(stage = ?stage, error = %e, "SOAP request stage"),
        (stage, Ok(_)) => enter(stage),
    }
    result
}

/// `value` as an HTTP quoted-string, escaping `"` and `\`.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// SOAP client.
///
/// Handlers are registered through `&mut self`, so registration cannot
/// overlap with a request in flight on the same client.
pub struct SoapClient {
    config: SoapClientConfig,
    pipeline: HandlerPipeline,
    transport: Option<Arc<dyn HttpTransport>>,
    async_transport: Option<Arc<dyn AsyncHttpTransport>>,
    /// Metrics tracking
    requests_sent: AtomicU64,
    faults_received: AtomicU64,
}

impl SoapClient {
    /// Create a client with no transport and no handlers.
    pub fn new(config: SoapClientConfig) -> Self {
        Self {
            config,
            pipeline: HandlerPipeline::new(),
            transport: None,
            async_transport: None,
            requests_sent: AtomicU64::new(0),
            faults_received: AtomicU64::new(0),
        }
    }

    /// Set the transport used by [`send`](Self::send).
    pub fn with_transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set the transport used by [`send_async`](Self::send_async).
    pub fn with_async_transport(mut self, transport: impl AsyncHttpTransport + 'static) -> Self {
        self.async_transport = Some(Arc::new(transport));
        self
    }

    /// Register a handler.
    pub fn use_handler(&mut self, handler: impl SoapHandler + 'static) -> &mut Self {
        self.use_shared_handler(Arc::new(handler))
    }

    /// Register a handler that is also referenced elsewhere.
    pub fn use_shared_handler(&mut self, handler: Arc<dyn SoapHandler>) -> &mut Self {
        debug!(order = handler.order(), "Registering SOAP handler");
        self.pipeline.add(handler);
        self
    }

    pub fn config(&self) -> &SoapClientConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &HandlerPipeline {
        &self.pipeline
    }

    /// Requests that reached the before-serialize stage.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Responses that carried a SOAP fault.
    pub fn faults_received(&self) -> u64 {
        self.faults_received.load(Ordering::Relaxed)
    }

    /// Send `envelope` to `url` and return the response envelope.
    pub fn send(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
    ) -> Result<SoapEnvelope, SoapError> {
        finish(self.run(url, action, version, envelope))
    }

    fn run(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
    ) -> Result<SoapEnvelope, SoapError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| SoapError::Config("no blocking transport configured".to_string()))?;

        let mut args = self.begin(url, action, version, envelope);

        enter(Stage::PreSerializeHooks);
        match version {
            SoapVersion::Soap11 => self.pipeline.dispatch::<EnvelopeV11Request>(self, &mut args)?,
            SoapVersion::Soap12 => self.pipeline.dispatch::<EnvelopeV12Request>(self, &mut args)?,
        }

        let mut args = self.serialize(version, args)?;

        enter(Stage::PreSendHooks);
        self.pipeline.dispatch::<HttpRequestPoint>(self, &mut args)?;

        enter(Stage::AwaitingTransport);
        let HttpRequestArgs { url, action, request } = args;
        let response = transport.send(request).map_err(SoapError::Transport)?;
        let mut args = HttpResponseArgs { url, action, response };

        enter(Stage::PostReceiveHooks);
        self.pipeline.dispatch::<HttpResponsePoint>(self, &mut args)?;

        let mut args = self.deserialize(version, args)?;

        enter(Stage::PostDeserializeHooks);
        match version {
            SoapVersion::Soap11 => self.pipeline.dispatch::<EnvelopeV11Response>(self, &mut args)?,
            SoapVersion::Soap12 => self.pipeline.dispatch::<EnvelopeV12Response>(self, &mut args)?,
        }

        Ok(args.envelope)
    }

    /// Asynchronous [`send`](Self::send) that cannot be cancelled.
    pub async fn send_async(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
    ) -> Result<SoapEnvelope, SoapError> {
        self.send_async_with_cancellation(url, action, version, envelope, &CancellationToken::new())
            .await
    }

    /// Asynchronous [`send`](Self::send).
    ///
    /// `cancel` is checked before every handler and raced against the
    /// transport; cancellation yields [`SoapError::Cancelled`].
    pub async fn send_async_with_cancellation(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
        cancel: &CancellationToken,
    ) -> Result<SoapEnvelope, SoapError> {
        finish(self.run_async(url, action, version, envelope, cancel).await)
    }

    async fn run_async(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
        cancel: &CancellationToken,
    ) -> Result<SoapEnvelope, SoapError> {
        let transport = self
            .async_transport
            .as_ref()
            .ok_or_else(|| SoapError::Config("no async transport configured".to_string()))?;
        if cancel.is_cancelled() {
            return Err(SoapError::Cancelled);
        }

        let mut args = self.begin(url, action, version, envelope);

        enter(Stage::PreSerializeHooks);
        match version {
            SoapVersion::Soap11 => {
                self.pipeline
                    .dispatch_async::<EnvelopeV11Request>(self, &mut args, cancel)
                    .await?
            }
            SoapVersion::Soap12 => {
                self.pipeline
                    .dispatch_async::<EnvelopeV12Request>(self, &mut args, cancel)
                    .await?
            }
        }

        let mut args = self.serialize(version, args)?;

        enter(Stage::PreSendHooks);
        self.pipeline
            .dispatch_async::<HttpRequestPoint>(self, &mut args, cancel)
            .await?;

        enter(Stage::AwaitingTransport);
        let HttpRequestArgs { url, action, request } = args;
        let response = tokio::select! {
            result = transport.send(request) => result.map_err(SoapError::Transport)?,
            _ = cancel.cancelled() => return Err(SoapError::Cancelled),
        };
        let mut args = HttpResponseArgs { url, action, response };

        enter(Stage::PostReceiveHooks);
        self.pipeline
            .dispatch_async::<HttpResponsePoint>(self, &mut args, cancel)
            .await?;

        let mut args = self.deserialize(version, args)?;

        enter(Stage::PostDeserializeHooks);
        match version {
            SoapVersion::Soap11 => {
                self.pipeline
                    .dispatch_async::<EnvelopeV11Response>(self, &mut args, cancel)
                    .await?
            }
            SoapVersion::Soap12 => {
                self.pipeline
                    .dispatch_async::<EnvelopeV12Response>(self, &mut args, cancel)
                    .await?
            }
        }

        Ok(args.envelope)
    }

    fn begin(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        envelope: SoapEnvelope,
    ) -> EnvelopeRequestArgs {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            url = %url,
            action = ?action,
            version = %version,
            handlers = self.pipeline.len(),
            "Sending SOAP request"
        );
        EnvelopeRequestArgs {
            url: url.to_string(),
            action: action.map(str::to_string),
            envelope,
        }
    }

    fn serialize(
        &self,
        version: SoapVersion,
        args: EnvelopeRequestArgs,
    ) -> Result<HttpRequestArgs, SoapError> {
        let EnvelopeRequestArgs { url, action, envelope } = args;
        let body = envelope::to_bytes(&envelope, version)?;
        enter(Stage::Serialized);

        let request = self.build_request(&url, action.as_deref(), version, body)?;
        Ok(HttpRequestArgs { url, action, request })
    }

    fn deserialize(
        &self,
        version: SoapVersion,
        args: HttpResponseArgs,
    ) -> Result<EnvelopeResponseArgs, SoapError> {
        let HttpResponseArgs { url, action, response } = args;
        let envelope = self.read_response(version, &response).inspect_err(|e| {
            if e.as_fault().is_some() {
                self.faults_received.fetch_add(1, Ordering::Relaxed);
            }
        })?;
        enter(Stage::Deserialized);
        Ok(EnvelopeResponseArgs { url, action, envelope })
    }

    /// Build the POST request carrying a serialized envelope.
    fn build_request(
        &self,
        url: &str,
        action: Option<&str>,
        version: SoapVersion,
        body: Vec<u8>,
    ) -> Result<HttpRequest, SoapError> {
        let content_type = match (version, action) {
            (SoapVersion::Soap12, Some(action)) => {
                format!("{}; charset=utf-8; action={}", version.media_type(), quoted(action))
            }
            _ => format!("{}; charset=utf-8", version.media_type()),
        };

        let mut builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, content_type);

        if version == SoapVersion::Soap11 {
            builder = builder.header("SOAPAction", quoted(action.unwrap_or_default()));
        }
        if let Some(user_agent) = &self.config.settings.user_agent {
            builder = builder.header(USER_AGENT, user_agent);
        }
        for (name, value) in &self.config.http.headers {
            builder = builder.header(name, value);
        }

        Ok(builder.body(body)?)
    }

    fn read_response(
        &self,
        version: SoapVersion,
        response: &HttpResponse,
    ) -> Result<SoapEnvelope, SoapError> {
        let body = response.body();
        let max = self.config.settings.max_response_size;
        if body.len() > max {
            return Err(SoapError::ResponseTooLarge {
                size: body.len(),
                max,
            });
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            let status = response.status();
            return Err(if status.is_success() {
                SoapError::malformed(format!("HTTP {} returned with an empty body", status))
            } else {
                SoapError::UnexpectedStatus { status }
            });
        }

        envelope::from_bytes(body, version)
    }
}

impl std::fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapClient")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("has_transport", &self.transport.is_some())
            .field("has_async_transport", &self.async_transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlElement;

    fn test_config() -> SoapClientConfig {
        let mut config = SoapClientConfig::default();
        config.settings.user_agent = Some("zentinel-test".to_string());
        config
            .http
            .headers
            .insert("X-Correlation-Id".to_string(), "abc-123".to_string());
        config
    }

    #[test]
    fn test_soap_11_request_headers() {
        let client = SoapClient::new(test_config());
        let request = client
            .build_request("http://localhost/svc", Some("urn:GetUser"), SoapVersion::Soap11, Vec::new())
            .unwrap();

        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.headers()[CONTENT_TYPE], "text/xml; charset=utf-8");
        assert_eq!(request.headers()["SOAPAction"], "\"urn:GetUser\"");
        assert_eq!(request.headers()[USER_AGENT], "zentinel-test");
        assert_eq!(request.headers()["X-Correlation-Id"], "abc-123");
    }

    #[test]
    fn test_soap_11_request_without_action() {
        let client = SoapClient::new(SoapClientConfig::default());
        let request = client
            .build_request("http://localhost/svc", None, SoapVersion::Soap11, Vec::new())
            .unwrap();
        assert_eq!(request.headers()["SOAPAction"], "\"\"");
        assert!(request.headers().get(USER_AGENT).is_none());
    }

    #[test]
    fn test_soap_12_request_headers() {
        let client = SoapClient::new(SoapClientConfig::default());
        let request = client
            .build_request("http://localhost/svc", Some("urn:GetUser"), SoapVersion::Soap12, Vec::new())
            .unwrap();
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/soap+xml; charset=utf-8; action=\"urn:GetUser\""
        );
        assert!(request.headers().get("SOAPAction").is_none());

        let request = client
            .build_request("http://localhost/svc", None, SoapVersion::Soap12, Vec::new())
            .unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/soap+xml; charset=utf-8");
    }

    #[test]
    fn test_action_is_escaped() {
        let client = SoapClient::new(SoapClientConfig::default());
        let action = r#"urn:a"; charset=latin1; x="\y"#;

        let request = client
            .build_request("http://localhost/svc", Some(action), SoapVersion::Soap12, Vec::new())
            .unwrap();
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            r#"application/soap+xml; charset=utf-8; action="urn:a\"; charset=latin1; x=\"\\y""#
        );

        let request = client
            .build_request("http://localhost/svc", Some(action), SoapVersion::Soap11, Vec::new())
            .unwrap();
        assert_eq!(request.headers()["SOAPAction"], r#""urn:a\"; charset=latin1; x=\"\\y""#);
    }

    #[test]
    fn test_terminal_stage() {
        let ok: Result<(), SoapError> = Ok(());
        assert!(matches!(Stage::terminal(&ok), Stage::Done));

        let fault = crate::fault::Fault::from(crate::fault::FaultV11::new("soap:Server", "down"));
        let faulted: Result<(), SoapError> = Err(fault.into());
        assert!(matches!(Stage::terminal(&faulted), Stage::Faulted));

        let failed: Result<(), SoapError> = Err(SoapError::handler("rejected"));
        assert!(matches!(Stage::terminal(&failed), Stage::Failed));
        assert!(matches!(Stage::terminal::<()>(&Err(SoapError::Cancelled)), Stage::Failed));
    }

    #[test]
    fn test_invalid_url_is_http_error() {
        let client = SoapClient::new(SoapClientConfig::default());
        let err = client
            .build_request("not a url", None, SoapVersion::Soap11, Vec::new())
            .unwrap_err();
        assert!(matches!(err, SoapError::Http(_)));
    }

    #[test]
    fn test_response_too_large() {
        let mut config = SoapClientConfig::default();
        config.settings.max_response_size = 16;
        let client = SoapClient::new(config);
        let response = http::Response::new(vec![b'x'; 32]);

        let err = client.read_response(SoapVersion::Soap11, &response).unwrap_err();
        assert!(matches!(err, SoapError::ResponseTooLarge { size: 32, max: 16 }));
    }

    #[test]
    fn test_empty_error_response() {
        let client = SoapClient::new(SoapClientConfig::default());
        let mut response = http::Response::new(b"\r\n".to_vec());
        *response.status_mut() = http::StatusCode::BAD_GATEWAY;

        let err = client.read_response(SoapVersion::Soap11, &response).unwrap_err();
        assert!(matches!(
            err,
            SoapError::UnexpectedStatus { status } if status == http::StatusCode::BAD_GATEWAY
        ));

        let response = http::Response::new(Vec::new());
        let err = client.read_response(SoapVersion::Soap11, &response).unwrap_err();
        assert!(matches!(err, SoapError::MalformedResponse { .. }));
    }

    #[test]
    fn test_missing_transport() {
        let client = SoapClient::new(SoapClientConfig::default());
        let envelope = SoapEnvelope::new().with_body_element(XmlElement::new("Ping"));
        let err = client
            .send("http://localhost/svc", None, SoapVersion::Soap11, envelope)
            .unwrap_err();
        assert!(matches!(err, SoapError::Config(_)));
        assert_eq!(client.requests_sent(), 0);
    }
}
