//! Forwarding of admitted requests to the portal application.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{GatekeeperError, Result};

/// Response body type used throughout the gateway.
pub type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// Destination for requests the rate limiter admits.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward a request and return the upstream's response.
    async fn forward(&self, request: Request<Incoming>) -> Result<Response<ResponseBody>>;
}

/// Plain HTTP/1.1 reverse proxy to a single upstream address.
pub struct ProxyUpstream {
    /// `host:port` of the portal application
    authority: String,
    client: Client<HttpConnector, Incoming>,
}

impl ProxyUpstream {
    pub fn new(authority: impl Into<String>) -> Result<Self> {
        let authority = authority.into();
        // Reject values that cannot form a URI before the first request.
        format!("http://{}/", authority)
            .parse::<Uri>()
            .map_err(|e| GatekeeperError::Config(format!("invalid upstream '{}': {}", authority, e)))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { authority, client })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn upstream_uri(&self, original: &Uri) -> Result<Uri> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        format!("http://{}{}", self.authority, path_and_query)
            .parse::<Uri>()
            .map_err(|e| GatekeeperError::Upstream(format!("invalid upstream URI: {}", e)))
    }
}

#[async_trait]
impl Upstream for ProxyUpstream {
    async fn forward(&self, request: Request<Incoming>) -> Result<Response<ResponseBody>> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.upstream_uri(&parts.uri)?;

        debug!(uri = %parts.uri, method = %parts.method, "Forwarding request upstream");

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| GatekeeperError::Upstream(e.to_string()))?;

        Ok(response.map(|body| body.boxed()))
    }
}
