//! Ordered dispatch of handler callbacks.
//!
//! The pipeline knows nothing about SOAP. It broadcasts one mutable
//! arguments value through every registered handler in order, for whichever
//! [`ExtensionPoint`] it is asked to run, and stops at the first error.

use crate::client::SoapClient;
use crate::error::SoapError;
use crate::handler::{
    EnvelopeRequestArgs, EnvelopeResponseArgs, HttpRequestArgs, HttpResponseArgs, SoapHandler,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One extension point: its argument type and how to call it on a handler.
pub trait ExtensionPoint {
    type Args: Send;

    /// Name used in log events.
    const NAME: &'static str;

    fn call(handler: &dyn SoapHandler, client: &SoapClient, args: &mut Self::Args) -> Result<(), SoapError>;

    fn call_async<'a>(
        handler: &'a dyn SoapHandler,
        client: &'a SoapClient,
        args: &'a mut Self::Args,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), SoapError>>;
}

macro_rules! extension_point {
    ($(#[$meta:meta])* $point:ident, $args:ty, $name:literal, $sync:ident, $async:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $point;

        impl ExtensionPoint for $point {
            type Args = $args;
            const NAME: &'static str = $name;

            fn call(handler: &dyn SoapHandler, client: &SoapClient, args: &mut $args) -> Result<(), SoapError> {
                handler.$sync(client, args)
            }

            fn call_async<'a>(
                handler: &'a dyn SoapHandler,
                client: &'a SoapClient,
                args: &'a mut $args,
                cancel: &'a CancellationToken,
            ) -> BoxFuture<'a, Result<(), SoapError>> {
                handler.$async(client, args, cancel)
            }
        }
    };
}

extension_point!(
    /// Before a SOAP 1.1 envelope is serialized.
    EnvelopeV11Request,
    EnvelopeRequestArgs,
    "envelope_v11_request",
    on_envelope_v11_request,
    on_envelope_v11_request_async
);
extension_point!(
    /// Before a SOAP 1.2 envelope is serialized.
    EnvelopeV12Request,
    EnvelopeRequestArgs,
    "envelope_v12_request",
    on_envelope_v12_request,
    on_envelope_v12_request_async
);
extension_point!(
    /// Before the HTTP request is sent.
    HttpRequestPoint,
    HttpRequestArgs,
    "http_request",
    on_http_request,
    on_http_request_async
);
extension_point!(
    /// After the HTTP response is received.
    HttpResponsePoint,
    HttpResponseArgs,
    "http_response",
    on_http_response,
    on_http_response_async
);
extension_point!(
    /// After a SOAP 1.1 envelope is deserialized.
    EnvelopeV11Response,
    EnvelopeResponseArgs,
    "envelope_v11_response",
    on_envelope_v11_response,
    on_envelope_v11_response_async
);
extension_point!(
    /// After a SOAP 1.2 envelope is deserialized.
    EnvelopeV12Response,
    EnvelopeResponseArgs,
    "envelope_v12_response",
    on_envelope_v12_response,
    on_envelope_v12_response_async
);

struct Registration {
    order: i32,
    sequence: u64,
    handler: Arc<dyn SoapHandler>,
}

/// Handlers sorted by (order, registration sequence).
#[derive(Default)]
pub struct HandlerPipeline {
    handlers: Vec<Registration>,
    next_sequence: u64,
}

impl HandlerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and re-sort.
    pub fn add(&mut self, handler: Arc<dyn SoapHandler>) {
        let registration = Registration {
            order: handler.order(),
            sequence: self.next_sequence,
            handler,
        };
        self.next_sequence += 1;
        self.handlers.push(registration);
        self.handlers.sort_by_key(|r| (r.order, r.sequence));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Orders of the registered handlers, in invocation order.
    pub fn orders(&self) -> Vec<i32> {
        self.handlers.iter().map(|r| r.order).collect()
    }

    /// Run the synchronous form of `P` on every handler.
    pub fn dispatch<P: ExtensionPoint>(
        &self,
        client: &SoapClient,
        args: &mut P::Args,
    ) -> Result<(), SoapError> {
        for registration in &self.handlers {
            trace!(
                point = P::NAME,
                order = registration.order,
                sequence = registration.sequence,
                "Invoking handler"
            );
            P::call(registration.handler.as_ref(), client, args)?;
        }
        Ok(())
    }

    /// Run the asynchronous form of `P` on every handler, one at a time.
    ///
    /// Cancellation is checked before each handler; a running handler is
    /// never interrupted.
    pub async fn dispatch_async<P: ExtensionPoint>(
        &self,
        client: &SoapClient,
        args: &mut P::Args,
        cancel: &CancellationToken,
    ) -> Result<(), SoapError> {
        for registration in &self.handlers {
            if cancel.is_cancelled() {
                return Err(SoapError::Cancelled);
            }
            trace!(
                point = P::NAME,
                order = registration.order,
                sequence = registration.sequence,
                "Invoking async handler"
            );
            P::call_async(registration.handler.as_ref(), client, args, cancel).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerPipeline")
            .field("orders", &self.orders())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoapClientConfig;
    use crate::envelope::SoapEnvelope;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        id: usize,
        order: i32,
        trace: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    }

    #[async_trait]
    impl SoapHandler for Recorder {
        fn order(&self) -> i32 {
            self.order
        }

        fn on_envelope_v11_request(
            &self,
            _client: &SoapClient,
            args: &mut EnvelopeRequestArgs,
        ) -> Result<(), SoapError> {
            self.trace.lock().unwrap().push(self.id);
            args.action = Some(format!("{}{}", args.action.take().unwrap_or_default(), self.id));
            if self.fail {
                return Err(SoapError::handler(format!("handler {} failed", self.id)));
            }
            Ok(())
        }

        async fn on_envelope_v11_request_async(
            &self,
            client: &SoapClient,
            args: &mut EnvelopeRequestArgs,
            cancel: &CancellationToken,
        ) -> Result<(), SoapError> {
            tokio::task::yield_now().await;
            if self.id == 99 {
                cancel.cancel();
            }
            self.on_envelope_v11_request(client, args)
        }
    }

    fn recorder(id: usize, order: i32, trace: &Arc<Mutex<Vec<usize>>>) -> Arc<dyn SoapHandler> {
        Arc::new(Recorder {
            id,
            order,
            trace: trace.clone(),
            fail: false,
        })
    }

    fn args() -> EnvelopeRequestArgs {
        EnvelopeRequestArgs {
            url: "http://localhost/svc".to_string(),
            action: None,
            envelope: SoapEnvelope::new(),
        }
    }

    #[test]
    fn test_sorted_by_order_then_registration() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(1, 10, &trace));
        pipeline.add(recorder(2, -5, &trace));
        pipeline.add(recorder(3, 10, &trace));
        pipeline.add(recorder(4, 0, &trace));

        assert_eq!(pipeline.orders(), vec![-5, 0, 10, 10]);

        let client = SoapClient::new(SoapClientConfig::default());
        let mut args = args();
        pipeline.dispatch::<EnvelopeV11Request>(&client, &mut args).unwrap();

        assert_eq!(*trace.lock().unwrap(), vec![2, 4, 1, 3]);
        // Each handler saw the previous handler's mutation.
        assert_eq!(args.action.as_deref(), Some("2413"));
    }

    #[test]
    fn test_other_points_do_not_fire() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(1, 0, &trace));

        let client = SoapClient::new(SoapClientConfig::default());
        pipeline.dispatch::<EnvelopeV12Request>(&client, &mut args()).unwrap();
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_error_stops_dispatch() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(1, 1, &trace));
        pipeline.add(Arc::new(Recorder {
            id: 2,
            order: 2,
            trace: trace.clone(),
            fail: true,
        }));
        pipeline.add(recorder(3, 3, &trace));

        let client = SoapClient::new(SoapClientConfig::default());
        let err = pipeline
            .dispatch::<EnvelopeV11Request>(&client, &mut args())
            .unwrap_err();

        assert_eq!(err.to_string(), "Handler error: handler 2 failed");
        assert_eq!(*trace.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_async_dispatch_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(1, 3, &trace));
        pipeline.add(recorder(2, 1, &trace));
        pipeline.add(recorder(3, 2, &trace));

        let client = SoapClient::new(SoapClientConfig::default());
        let mut args = args();
        pipeline
            .dispatch_async::<EnvelopeV11Request>(&client, &mut args, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*trace.lock().unwrap(), vec![2, 3, 1]);
        assert_eq!(args.action.as_deref(), Some("231"));
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_handlers() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(99, 0, &trace));
        pipeline.add(recorder(2, 1, &trace));

        let client = SoapClient::new(SoapClientConfig::default());
        let err = pipeline
            .dispatch_async::<EnvelopeV11Request>(&client, &mut args(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SoapError::Cancelled));
        // The cancelling handler finished; the next one never started.
        assert_eq!(*trace.lock().unwrap(), vec![99]);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_nothing() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(recorder(1, 0, &trace));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = SoapClient::new(SoapClientConfig::default());
        let result = pipeline
            .dispatch_async::<EnvelopeV11Request>(&client, &mut args(), &cancel)
            .await;

        assert!(matches!(result, Err(SoapError::Cancelled)));
        assert!(trace.lock().unwrap().is_empty());
    }
}
