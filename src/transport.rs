//! HTTP transport capability.
//!
//! The client hands a fully built request to a transport and takes back
//! whatever response it produces. Connection handling, TLS and timeouts are
//! the transport's business. A transport may be shared by many concurrent
//! requests; its implementations must be safe for that.

use crate::error::BoxError;
use async_trait::async_trait;

/// Outgoing HTTP request.
pub type HttpRequest = http::Request<Vec<u8>>;
/// Incoming HTTP response.
pub type HttpResponse = http::Response<Vec<u8>>;

/// Blocking transport.
///
/// Implementations must return error statuses (4xx/5xx) as responses, not
/// errors: SOAP faults travel in 500 responses.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

/// Asynchronous transport. Same contract as [`HttpTransport`].
#[async_trait]
pub trait AsyncHttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::{AsyncHttpTransport, HttpRequest, HttpResponse};
    use crate::config::HttpConfig;
    use crate::error::{BoxError, SoapError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// [`AsyncHttpTransport`] backed by a `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn from_config(config: &HttpConfig) -> Result<Self, SoapError> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| SoapError::Config(format!("Failed to build HTTP client: {}", e)))?;
            Ok(Self::new(client))
        }
    }

    #[async_trait]
    impl AsyncHttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
            let (parts, body) = request.into_parts();
            let response = self
                .client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers)
                .body(body)
                .send()
                .await?;

            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            let mut out = http::Response::new(body.to_vec());
            *out.status_mut() = status;
            *out.version_mut() = version;
            *out.headers_mut() = headers;
            Ok(out)
        }
    }
}

#[cfg(feature = "blocking")]
pub use self::ureq_transport::UreqTransport;

#[cfg(feature = "blocking")]
mod ureq_transport {
    use super::{HttpRequest, HttpResponse, HttpTransport};
    use crate::config::HttpConfig;
    use crate::error::BoxError;
    use std::time::Duration;

    /// [`HttpTransport`] backed by a `ureq::Agent`.
    pub struct UreqTransport {
        agent: ureq::Agent,
    }

    impl UreqTransport {
        pub fn from_config(config: &HttpConfig) -> Self {
            // Faults come back as HTTP 500; keep them as responses.
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
                .build()
                .into();
            Self { agent }
        }
    }

    impl HttpTransport for UreqTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
            let response = self.agent.run(request)?;
            let (parts, mut body) = response.into_parts();
            let bytes = body.read_to_vec()?;
            Ok(http::Response::from_parts(parts, bytes))
        }
    }
}
