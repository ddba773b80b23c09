//! Configuration management for Gatekeeper.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables prefixed with `GATEKEEPER_` using `__` between
//! nested keys (for example `GATEKEEPER_SERVER__UPSTREAM=portal:3000`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::client::DEFAULT_TRUSTED_HEADER;
use crate::ratelimit::reaper::DEFAULT_REAPER_INTERVAL;
use crate::ratelimit::routes::DEFAULT_API_PREFIX;
use crate::ratelimit::{ClientResolver, PolicyConfig, PolicyTable, RouteRule, RouteTable};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// `host:port` of the portal application
    #[serde(default = "default_upstream")]
    pub upstream: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream: default_upstream(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_upstream() -> String {
    "127.0.0.1:3000".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Header set by the trusted reverse proxy
    #[serde(default = "default_trusted_proxy_header")]
    pub trusted_proxy_header: String,

    /// Identify callers by TCP peer address when no header does
    #[serde(default)]
    pub use_peer_addr: bool,

    /// Seconds between sweeps of expired windows
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Attach quota headers to admitted responses
    #[serde(default)]
    pub emit_headers_on_success: bool,

    /// Prefix under which unmatched paths use the `api` policy
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Route rules; the built-in table is used when unset
    #[serde(default)]
    pub routes: Option<Vec<RouteRule>>,

    /// Policy overrides and additions
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_header: default_trusted_proxy_header(),
            use_peer_addr: false,
            reaper_interval_secs: default_reaper_interval(),
            emit_headers_on_success: false,
            api_prefix: default_api_prefix(),
            routes: None,
            policies: HashMap::new(),
        }
    }
}

fn default_trusted_proxy_header() -> String {
    DEFAULT_TRUSTED_HEADER.to_string()
}

fn default_reaper_interval() -> u64 {
    DEFAULT_REAPER_INTERVAL.as_secs()
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file layered with the
    /// environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not depend on building the tables.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.reaper_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "reaper_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.server.upstream.trim().is_empty() {
            return Err(GatekeeperError::Config("upstream must be set".to_string()));
        }
        Ok(())
    }
}

impl RateLimitingConfig {
    /// Build the validated policy table.
    pub fn build_policies(&self) -> Result<PolicyTable> {
        PolicyTable::with_overrides(&self.policies)
    }

    /// Build the route table and check it against `policies`.
    pub fn build_routes(&self, policies: &PolicyTable) -> Result<RouteTable> {
        let rules = self
            .routes
            .clone()
            .unwrap_or_else(RouteTable::default_rules);
        let routes = RouteTable::new(self.api_prefix.clone(), rules);
        routes.validate(policies)?;
        Ok(routes)
    }

    pub fn build_resolver(&self) -> Result<ClientResolver> {
        Ok(ClientResolver::new(&self.trusted_proxy_header)?.with_peer_fallback(self.use_peer_addr))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{API, AUTH, PAYMENT};

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.server.listen_addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.server.upstream, "127.0.0.1:3000");
        assert_eq!(config.rate_limiting.trusted_proxy_header, "cf-connecting-ip");
        assert_eq!(config.rate_limiting.reaper_interval(), Duration::from_secs(60));
        assert!(!config.rate_limiting.emit_headers_on_success);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = GatekeeperConfig::from_yaml("{}").unwrap();
        assert_eq!(config.rate_limiting.api_prefix, "/api");

        let policies = config.rate_limiting.build_policies().unwrap();
        let routes = config.rate_limiting.build_routes(&policies).unwrap();
        assert_eq!(routes.resolve("/api/auth/login"), Some(AUTH));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
  upstream: "portal:3000"
rate_limiting:
  trusted_proxy_header: x-client-ip
  use_peer_addr: true
  reaper_interval_secs: 15
  emit_headers_on_success: true
  routes:
    - prefix: /api/checkout
      policy: payment
  policies:
    api:
      max_requests: 250
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.upstream, "portal:3000");

        let rl = &config.rate_limiting;
        assert!(rl.use_peer_addr);
        assert!(rl.emit_headers_on_success);
        assert_eq!(rl.reaper_interval(), Duration::from_secs(15));

        let policies = rl.build_policies().unwrap();
        assert_eq!(policies.get(API).unwrap().max_requests, 250);

        let routes = rl.build_routes(&policies).unwrap();
        assert_eq!(routes.resolve("/api/checkout/cart"), Some(PAYMENT));
        // Custom routes replace the built-in table.
        assert_eq!(routes.resolve("/api/auth/login"), Some(API));

        let resolver = rl.build_resolver().unwrap();
        assert_eq!(resolver.trusted_header().as_str(), "x-client-ip");
    }

    #[test]
    fn test_unknown_route_policy_fails_fast() {
        let yaml = r#"
rate_limiting:
  routes:
    - prefix: /api/uploads
      policy: uploads
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        let policies = config.rate_limiting.build_policies().unwrap();
        assert!(config.rate_limiting.build_routes(&policies).is_err());
    }

    #[test]
    fn test_zero_reaper_interval_rejected() {
        let yaml = r#"
rate_limiting:
  reaper_interval_secs: 0
"#;
        assert!(GatekeeperConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_without_file() {
        let config = GatekeeperConfig::load(None).unwrap();
        assert!(config.validate().is_ok());
    }
}
