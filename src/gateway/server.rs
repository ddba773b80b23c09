//! HTTP front server.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::adapter::{Admission, RateLimitGuard};
use super::upstream::{ResponseBody, Upstream};
use crate::error::Result;

/// Liveness endpoint answered by the gateway itself.
pub const HEALTH_PATH: &str = "/healthz";

/// HTTP server that rate limits requests before forwarding them upstream.
pub struct GatewayServer {
    /// Address to bind to
    addr: SocketAddr,
    guard: Arc<RateLimitGuard>,
    upstream: Arc<dyn Upstream>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, guard: Arc<RateLimitGuard>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            addr,
            guard,
            upstream,
        }
    }

    /// Bind and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve connections from an already bound listener until `signal`
    /// resolves. In-flight connections are left to finish on their own.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Gateway listening");

        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Gateway shutting down");
                    break;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept error");
                            continue;
                        }
                    };

                    let guard = self.guard.clone();
                    let upstream = self.upstream.clone();
                    tokio::spawn(async move {
                        let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                            let guard = guard.clone();
                            let upstream = upstream.clone();
                            async move {
                                Ok::<_, hyper::Error>(handle(req, peer, &guard, upstream.as_ref()).await)
                            }
                        });

                        let builder = ConnBuilder::new(TokioExecutor::new());
                        if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                            warn!(?peer, error = %e, "serve_connection error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

/// Route one request through the guard and, if admitted, the upstream.
pub async fn handle(
    req: Request<Incoming>,
    peer: SocketAddr,
    guard: &RateLimitGuard,
    upstream: &dyn Upstream,
) -> Response<ResponseBody> {
    if req.uri().path() == HEALTH_PATH {
        return json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }));
    }

    let admission = guard.check_request(&req, Some(peer));
    if let Admission::Denied(denial) = &admission {
        return denial
            .to_response()
            .map(|body| body.map_err(|never| match never {}).boxed());
    }

    match upstream.forward(req).await {
        Ok(mut response) => {
            guard.apply_success_headers(&admission, response.headers_mut());
            response
        }
        Err(e) => {
            warn!(error = %e, "Upstream request failed");
            json_response(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "upstream unavailable" }),
            )
        }
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<ResponseBody> {
    let body = Full::new(Bytes::from(body.to_string()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
