//! HTTP integration of the rate limiter.
//!
//! [`RateLimitGuard`] resolves a policy from the request path, derives the
//! client key, runs the decision engine and builds the 429 response for
//! denials. Admitted requests are left untouched.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::Result;
use crate::ratelimit::{
    now_millis, ClientKey, ClientResolver, Decision, PolicyTable, RateLimiter, RouteTable,
};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Result of running a request through the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The path is not covered by any policy
    NotLimited,
    /// The request may proceed
    Admitted(Decision),
    /// The request must be rejected with 429
    Denied(Denial),
}

impl Admission {
    pub fn is_denied(&self) -> bool {
        matches!(self, Admission::Denied(_))
    }
}

/// A rejected request, ready to be turned into a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub client_key: ClientKey,
    pub message: String,
    pub decision: Decision,
}

impl Denial {
    pub fn retry_after_secs(&self) -> u64 {
        self.decision.retry_after_secs.unwrap_or(0)
    }

    /// JSON body `{"error": <message>, "retryAfter": <secs>}`.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message,
            "retryAfter": self.retry_after_secs(),
        })
    }

    /// Build the 429 response with the standard rate limit headers.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body().to_string())));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs()));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.decision.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.decision.reset_at_secs()));

        response
    }
}

/// Rate limiting front for inbound HTTP requests.
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    policies: Arc<PolicyTable>,
    routes: Arc<RouteTable>,
    resolver: ClientResolver,
    /// Attach quota headers to admitted responses
    emit_headers_on_success: bool,
}

impl RateLimitGuard {
    /// Create a guard, failing if any route names an unknown policy.
    pub fn new(
        limiter: Arc<RateLimiter>,
        policies: Arc<PolicyTable>,
        routes: Arc<RouteTable>,
        resolver: ClientResolver,
    ) -> Result<Self> {
        policies.validate()?;
        routes.validate(&policies)?;

        Ok(Self {
            limiter,
            policies,
            routes,
            resolver,
            emit_headers_on_success: false,
        })
    }

    /// Attach `X-RateLimit-*` headers to admitted responses as well.
    pub fn with_success_headers(mut self, enabled: bool) -> Self {
        self.emit_headers_on_success = enabled;
        self
    }

    /// Check a request's path and headers at `now_ms`.
    pub fn check(
        &self,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        now_ms: u64,
    ) -> Admission {
        let Some(policy_name) = self.routes.resolve(path) else {
            return Admission::NotLimited;
        };

        let Some(policy) = self.policies.get(policy_name) else {
            // Unreachable after construction-time validation.
            error!(policy = %policy_name, path = %path, "Route references unknown policy");
            return Admission::NotLimited;
        };

        let identifier = self.resolver.resolve_or_peer(headers, peer);
        let key = ClientKey::new(&policy.name, &identifier);
        let decision = self.limiter.check(&key, policy, now_ms);

        if decision.admitted {
            return Admission::Admitted(decision);
        }

        warn!(
            client_key = %key,
            policy = %policy.name,
            count = decision.current_count,
            limit = decision.limit,
            path = %path,
            "Rate limit exceeded, rejecting request"
        );

        Admission::Denied(Denial {
            client_key: key,
            message: policy.message.clone(),
            decision,
        })
    }

    /// Check an HTTP request against the system clock.
    pub fn check_request<B>(&self, request: &Request<B>, peer: Option<SocketAddr>) -> Admission {
        self.check(request.uri().path(), request.headers(), peer, now_millis())
    }

    /// Add quota headers for an admitted request, if enabled.
    pub fn apply_success_headers(&self, admission: &Admission, headers: &mut HeaderMap) {
        if !self.emit_headers_on_success {
            return;
        }
        if let Admission::Admitted(decision) = admission {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_secs()));
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{API, AUTH};
    use http_body_util::BodyExt;

    fn guard() -> RateLimitGuard {
        RateLimitGuard::new(
            Arc::new(RateLimiter::new()),
            Arc::new(PolicyTable::builtin()),
            Arc::new(RouteTable::default()),
            ClientResolver::default(),
        )
        .unwrap()
    }

    fn from_ip(ip: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_str(ip).unwrap());
        headers
    }

    #[test]
    fn test_non_api_path_not_limited() {
        let guard = guard();
        for _ in 0..500 {
            let admission = guard.check("/index.html", &from_ip("1.1.1.1"), None, 0);
            assert_eq!(admission, Admission::NotLimited);
        }
        assert_eq!(guard.limiter().window_count(), 0);
    }

    #[test]
    fn test_policy_selected_by_route() {
        let guard = guard();
        let headers = from_ip("1.1.1.1");

        guard.check("/api/auth/login", &headers, None, 0);
        guard.check("/api/tasks", &headers, None, 0);

        let limiter = guard.limiter();
        assert!(limiter.window(&ClientKey::new(AUTH, "1.1.1.1"), 0).is_some());
        assert!(limiter.window(&ClientKey::new(API, "1.1.1.1"), 0).is_some());
    }

    #[test]
    fn test_denial_details() {
        let guard = guard();
        let headers = from_ip("1.2.3.4");
        for _ in 0..10 {
            assert!(!guard.check("/api/auth/login", &headers, None, 0).is_denied());
        }

        let Admission::Denied(denial) = guard.check("/api/auth/login", &headers, None, 2_000) else {
            panic!("expected denial");
        };
        assert_eq!(denial.client_key.as_str(), "auth:1.2.3.4");
        assert_eq!(denial.retry_after_secs(), 898);
        assert_eq!(denial.decision.current_count, 11);
        assert_eq!(
            denial.body(),
            serde_json::json!({
                "error": "Too many authentication attempts, please try again later.",
                "retryAfter": 898,
            })
        );
    }

    #[tokio::test]
    async fn test_denial_response() {
        let guard = guard();
        let headers = from_ip("5.5.5.5");
        for _ in 0..10 {
            guard.check("/api/billing/checkout", &headers, None, 1_000);
        }

        let Admission::Denied(denial) = guard.check("/api/billing/checkout", &headers, None, 1_500)
        else {
            panic!("expected denial");
        };
        let response = denial.to_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[RETRY_AFTER], "60");
        assert_eq!(headers[X_RATELIMIT_LIMIT], "10");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "61");
        assert_eq!(headers[CONTENT_TYPE], "application/json");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["retryAfter"], 60);
        assert_eq!(json["error"], "Too many payment requests, please try again later.");
    }

    #[test]
    fn test_success_headers_disabled_by_default() {
        let guard = guard();
        let admission = guard.check("/api/tasks", &from_ip("1.1.1.1"), None, 0);

        let mut headers = HeaderMap::new();
        guard.apply_success_headers(&admission, &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_success_headers_when_enabled() {
        let guard = guard().with_success_headers(true);
        guard.check("/api/tasks", &from_ip("1.1.1.1"), None, 0);
        let admission = guard.check("/api/tasks", &from_ip("1.1.1.1"), None, 0);

        let mut headers = HeaderMap::new();
        guard.apply_success_headers(&admission, &mut headers);
        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "98");
        assert_eq!(headers[X_RATELIMIT_RESET], "60");

        let mut headers = HeaderMap::new();
        guard.apply_success_headers(&Admission::NotLimited, &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_check_request_uses_uri_path() {
        let guard = guard();
        let request = Request::builder()
            .uri("http://portal.example/api/auth/register?ref=home")
            .header("x-forwarded-for", "9.9.9.9, 10.0.0.1")
            .body(())
            .unwrap();

        let admission = guard.check_request(&request, None);
        assert!(matches!(admission, Admission::Admitted(d) if d.limit == 5));
    }

    #[test]
    fn test_guard_rejects_unknown_route_policy() {
        let routes = RouteTable::new(
            "/api",
            vec![crate::ratelimit::RouteRule::new("/api/uploads", "uploads")],
        );
        let result = RateLimitGuard::new(
            Arc::new(RateLimiter::new()),
            Arc::new(PolicyTable::builtin()),
            Arc::new(routes),
            ClientResolver::default(),
        );
        assert!(result.is_err());
    }
}
