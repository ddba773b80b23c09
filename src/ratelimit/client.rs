//! Client identifier resolution from request metadata.
//!
//! Identifiers come from forwarding headers in trust order: the header set by
//! the deployment's own reverse proxy, then `x-real-ip`, then the left-most
//! entry of `x-forwarded-for`. None of these are verified; without a proxy that
//! overwrites them the resolver is only a best-effort client distinguisher.

use http::header::{HeaderMap, HeaderName};
use std::net::SocketAddr;

use crate::error::{GatekeeperError, Result};

/// Header set by the default trusted reverse proxy.
pub const DEFAULT_TRUSTED_HEADER: &str = "cf-connecting-ip";
/// Generic "real IP" header.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Comma-separated forwarding chain, left-most entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Identifier used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves a stable per-caller identifier from request headers.
#[derive(Debug, Clone)]
pub struct ClientResolver {
    /// Most trusted header, set by the deployment's proxy layer
    trusted_header: HeaderName,
    /// Fall back to the TCP peer address before `"unknown"`
    use_peer_addr: bool,
}

impl ClientResolver {
    /// Create a resolver that trusts `trusted_header` above the generic ones.
    pub fn new(trusted_header: &str) -> Result<Self> {
        let trusted_header = HeaderName::from_bytes(trusted_header.as_bytes()).map_err(|e| {
            GatekeeperError::Config(format!(
                "invalid trusted proxy header '{}': {}",
                trusted_header, e
            ))
        })?;

        Ok(Self {
            trusted_header,
            use_peer_addr: false,
        })
    }

    /// Use the connection's peer address when no header identifies the caller.
    pub fn with_peer_fallback(mut self, enabled: bool) -> Self {
        self.use_peer_addr = enabled;
        self
    }

    pub fn trusted_header(&self) -> &HeaderName {
        &self.trusted_header
    }

    /// Resolve the caller from headers alone. Never fails.
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        self.from_headers(headers)
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// Resolve the caller from headers, then the peer address if enabled.
    pub fn resolve_or_peer(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if let Some(id) = self.from_headers(headers) {
            return id;
        }

        match peer {
            Some(peer) if self.use_peer_addr => peer.ip().to_string(),
            _ => UNKNOWN_CLIENT.to_string(),
        }
    }

    fn from_headers(&self, headers: &HeaderMap) -> Option<String> {
        header_value(headers, &self.trusted_header)
            .or_else(|| header_value(headers, REAL_IP_HEADER))
            .or_else(|| {
                header_value(headers, FORWARDED_FOR_HEADER).and_then(|chain| {
                    chain
                        .split(',')
                        .next()
                        .map(str::trim)
                        .filter(|first| !first.is_empty())
                        .map(str::to_string)
                })
            })
    }
}

impl Default for ClientResolver {
    fn default() -> Self {
        Self {
            trusted_header: HeaderName::from_static(DEFAULT_TRUSTED_HEADER),
            use_peer_addr: false,
        }
    }
}

/// Trimmed header value; empty or non-ASCII values count as absent.
fn header_value<K: http::header::AsHeaderName>(headers: &HeaderMap, name: K) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_trusted_header_wins() {
        let resolver = ClientResolver::default();
        let map = headers(&[
            ("x-forwarded-for", "9.9.9.9"),
            ("x-real-ip", "8.8.8.8"),
            ("cf-connecting-ip", "7.7.7.7"),
        ]);
        assert_eq!(resolver.resolve(&map), "7.7.7.7");
    }

    #[test]
    fn test_real_ip_before_forwarded_for() {
        let resolver = ClientResolver::default();
        let map = headers(&[("x-forwarded-for", "9.9.9.9"), ("x-real-ip", "8.8.8.8")]);
        assert_eq!(resolver.resolve(&map), "8.8.8.8");
    }

    #[test]
    fn test_forwarded_for_left_most_trimmed() {
        let resolver = ClientResolver::default();
        let map = headers(&[("x-forwarded-for", "9.9.9.9, 10.0.0.1")]);
        assert_eq!(resolver.resolve(&map), "9.9.9.9");

        let map = headers(&[("x-forwarded-for", "  9.9.9.9  ,10.0.0.1")]);
        assert_eq!(resolver.resolve(&map), "9.9.9.9");
    }

    #[test]
    fn test_unknown_fallback() {
        let resolver = ClientResolver::default();
        assert_eq!(resolver.resolve(&HeaderMap::new()), UNKNOWN_CLIENT);

        let map = headers(&[("x-forwarded-for", " , 10.0.0.1"), ("x-real-ip", "  ")]);
        assert_eq!(resolver.resolve(&map), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_custom_trusted_header() {
        let resolver = ClientResolver::new("X-Client-IP").unwrap();
        let map = headers(&[("x-real-ip", "8.8.8.8"), ("x-client-ip", "6.6.6.6")]);
        assert_eq!(resolver.resolve(&map), "6.6.6.6");
    }

    #[test]
    fn test_invalid_trusted_header_rejected() {
        assert!(ClientResolver::new("not a header").is_err());
    }

    #[test]
    fn test_peer_fallback() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();

        let resolver = ClientResolver::default();
        assert_eq!(resolver.resolve_or_peer(&HeaderMap::new(), Some(peer)), UNKNOWN_CLIENT);

        let resolver = resolver.with_peer_fallback(true);
        assert_eq!(resolver.resolve_or_peer(&HeaderMap::new(), Some(peer)), "192.0.2.10");
        assert_eq!(resolver.resolve_or_peer(&HeaderMap::new(), None), UNKNOWN_CLIENT);

        let map = headers(&[("x-real-ip", "8.8.8.8")]);
        assert_eq!(resolver.resolve_or_peer(&map, Some(peer)), "8.8.8.8");
    }
}
