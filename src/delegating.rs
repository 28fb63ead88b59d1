//! A handler assembled from closures.

use crate::client::SoapClient;
use crate::error::SoapError;
use crate::handler::{
    EnvelopeRequestArgs, EnvelopeResponseArgs, HttpRequestArgs, HttpResponseArgs, SoapHandler,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Synchronous callback for one extension point.
pub type SyncCallback<A> = Box<dyn Fn(&SoapClient, &mut A) -> Result<(), SoapError> + Send + Sync>;

/// Asynchronous callback for one extension point.
pub type AsyncCallback<A> = Box<
    dyn for<'a> Fn(
            &'a SoapClient,
            &'a mut A,
            &'a CancellationToken,
        ) -> BoxFuture<'a, Result<(), SoapError>>
        + Send
        + Sync,
>;

/// [`SoapHandler`] whose behavior is supplied as optional callbacks.
///
/// An unset callback is a no-op. The `order` may be changed freely until the
/// handler is registered; the pipeline reads it once at that point.
#[derive(Default)]
pub struct DelegatingHandler {
    pub order: i32,
    pub on_envelope_v11_request: Option<SyncCallback<EnvelopeRequestArgs>>,
    pub on_envelope_v11_request_async: Option<AsyncCallback<EnvelopeRequestArgs>>,
    pub on_envelope_v12_request: Option<SyncCallback<EnvelopeRequestArgs>>,
    pub on_envelope_v12_request_async: Option<AsyncCallback<EnvelopeRequestArgs>>,
    pub on_http_request: Option<SyncCallback<HttpRequestArgs>>,
    pub on_http_request_async: Option<AsyncCallback<HttpRequestArgs>>,
    pub on_http_response: Option<SyncCallback<HttpResponseArgs>>,
    pub on_http_response_async: Option<AsyncCallback<HttpResponseArgs>>,
    pub on_envelope_v11_response: Option<SyncCallback<EnvelopeResponseArgs>>,
    pub on_envelope_v11_response_async: Option<AsyncCallback<EnvelopeResponseArgs>>,
    pub on_envelope_v12_response: Option<SyncCallback<EnvelopeResponseArgs>>,
    pub on_envelope_v12_response_async: Option<AsyncCallback<EnvelopeResponseArgs>>,
}

macro_rules! builder {
    ($sync:ident, $sync_setter:ident, $async:ident, $async_setter:ident, $args:ty) => {
        pub fn $sync_setter<F>(mut self, callback: F) -> Self
        where
            F: Fn(&SoapClient, &mut $args) -> Result<(), SoapError> + Send + Sync + 'static,
        {
            self.$sync = Some(Box::new(callback));
            self
        }

        pub fn $async_setter<F>(mut self, callback: F) -> Self
        where
            F: for<'a> Fn(
                    &'a SoapClient,
                    &'a mut $args,
                    &'a CancellationToken,
                ) -> BoxFuture<'a, Result<(), SoapError>>
                + Send
                + Sync
                + 'static,
        {
            self.$async = Some(Box::new(callback));
            self
        }
    };
}

impl DelegatingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    builder!(
        on_envelope_v11_request,
        envelope_v11_request,
        on_envelope_v11_request_async,
        envelope_v11_request_async,
        EnvelopeRequestArgs
    );
    builder!(
        on_envelope_v12_request,
        envelope_v12_request,
        on_envelope_v12_request_async,
        envelope_v12_request_async,
        EnvelopeRequestArgs
    );
    builder!(
        on_http_request,
        http_request,
        on_http_request_async,
        http_request_async,
        HttpRequestArgs
    );
    builder!(
        on_http_response,
        http_response,
        on_http_response_async,
        http_response_async,
        HttpResponseArgs
    );
    builder!(
        on_envelope_v11_response,
        envelope_v11_response,
        on_envelope_v11_response_async,
        envelope_v11_response_async,
        EnvelopeResponseArgs
    );
    builder!(
        on_envelope_v12_response,
        envelope_v12_response,
        on_envelope_v12_response_async,
        envelope_v12_response_async,
        EnvelopeResponseArgs
    );
}

fn run<A>(callback: &Option<SyncCallback<A>>, client: &SoapClient, args: &mut A) -> Result<(), SoapError> {
    match callback {
        Some(callback) => callback(client, args),
        None => Ok(()),
    }
}

async fn run_async<A>(
    callback: &Option<AsyncCallback<A>>,
    client: &SoapClient,
    args: &mut A,
    cancel: &CancellationToken,
) -> Result<(), SoapError> {
    match callback {
        Some(callback) => callback(client, args, cancel).await,
        None => Ok(()),
    }
}

#[async_trait]
impl SoapHandler for DelegatingHandler {
    fn order(&self) -> i32 {
        self.order
    }

    fn on_envelope_v11_request(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeRequestArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_envelope_v11_request, client, args)
    }

    async fn on_envelope_v11_request_async(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeRequestArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_envelope_v11_request_async, client, args, cancel).await
    }

    fn on_envelope_v12_request(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeRequestArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_envelope_v12_request, client, args)
    }

    async fn on_envelope_v12_request_async(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeRequestArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_envelope_v12_request_async, client, args, cancel).await
    }

    fn on_http_request(
        &self,
        client: &SoapClient,
        args: &mut HttpRequestArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_http_request, client, args)
    }

    async fn on_http_request_async(
        &self,
        client: &SoapClient,
        args: &mut HttpRequestArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_http_request_async, client, args, cancel).await
    }

    fn on_http_response(
        &self,
        client: &SoapClient,
        args: &mut HttpResponseArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_http_response, client, args)
    }

    async fn on_http_response_async(
        &self,
        client: &SoapClient,
        args: &mut HttpResponseArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_http_response_async, client, args, cancel).await
    }

    fn on_envelope_v11_response(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeResponseArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_envelope_v11_response, client, args)
    }

    async fn on_envelope_v11_response_async(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeResponseArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_envelope_v11_response_async, client, args, cancel).await
    }

    fn on_envelope_v12_response(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeResponseArgs,
    ) -> Result<(), SoapError> {
        run(&self.on_envelope_v12_response, client, args)
    }

    async fn on_envelope_v12_response_async(
        &self,
        client: &SoapClient,
        args: &mut EnvelopeResponseArgs,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        run_async(&self.on_envelope_v12_response_async, client, args, cancel).await
    }
}

impl std::fmt::Debug for DelegatingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingHandler")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoapClientConfig;
    use crate::envelope::SoapEnvelope;
    use crate::xml::XmlElement;
    use futures::FutureExt;

    fn request_args() -> EnvelopeRequestArgs {
        EnvelopeRequestArgs {
            url: "http://localhost/svc".to_string(),
            action: Some("urn:Ping".to_string()),
            envelope: SoapEnvelope::new(),
        }
    }

    #[test]
    fn test_unset_callbacks_are_no_ops() {
        let handler = DelegatingHandler::new();
        let client = SoapClient::new(SoapClientConfig::default());
        let mut args = request_args();

        handler.on_envelope_v11_request(&client, &mut args).unwrap();
        handler.on_envelope_v12_request(&client, &mut args).unwrap();

        assert_eq!(handler.order(), 0);
        assert_eq!(args.action.as_deref(), Some("urn:Ping"));
        assert!(args.envelope.header.is_none());
    }

    #[test]
    fn test_sync_callback_mutates_args() {
        let handler = DelegatingHandler::new()
            .with_order(-3)
            .envelope_v11_request(|_, args| {
                args.envelope
                    .header_mut()
                    .insert(XmlElement::qualified("urn:test", "Token").with_text("secret"));
                Ok(())
            });
        let client = SoapClient::new(SoapClientConfig::default());
        let mut args = request_args();

        handler.on_envelope_v11_request(&client, &mut args).unwrap();
        // Only the configured point is wired.
        handler.on_envelope_v12_request(&client, &mut args).unwrap();

        assert_eq!(handler.order(), -3);
        let header = args.envelope.header.as_ref().unwrap();
        assert_eq!(header.find("Token").unwrap().text(), "secret");
    }

    #[test]
    fn test_sync_callback_error_propagates() {
        let handler = DelegatingHandler::new()
            .envelope_v12_request(|_, _| Err(SoapError::handler("rejected")));
        let client = SoapClient::new(SoapClientConfig::default());

        let err = handler
            .on_envelope_v12_request(&client, &mut request_args())
            .unwrap_err();
        assert_eq!(err.to_string(), "Handler error: rejected");
    }

    #[tokio::test]
    async fn test_async_callback() {
        let handler = DelegatingHandler::new().envelope_v11_request_async(|_, args, cancel| {
            async move {
                if cancel.is_cancelled() {
                    return Err(SoapError::Cancelled);
                }
                args.action = Some("urn:Rewritten".to_string());
                Ok(())
            }
            .boxed()
        });
        let client = SoapClient::new(SoapClientConfig::default());
        let mut args = request_args();

        handler
            .on_envelope_v11_request_async(&client, &mut args, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(args.action.as_deref(), Some("urn:Rewritten"));

        // The synchronous form stays unset.
        let mut args = request_args();
        handler.on_envelope_v11_request(&client, &mut args).unwrap();
        assert_eq!(args.action.as_deref(), Some("urn:Ping"));
    }
}
