//! Route-to-policy mapping.
//!
//! Paths are matched by longest prefix on path-segment boundaries. API paths
//! that match no rule fall back to the `api` policy; anything else is not
//! rate limited.

use serde::{Deserialize, Serialize};

use super::policy::{PolicyTable, API, AUTH, PAYMENT, REGISTER};
use crate::error::{GatekeeperError, Result};

/// Default prefix under which every path is rate limited.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// A single prefix-to-policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path prefix, matched on segment boundaries
    pub prefix: String,
    /// Name of the policy applied to matching paths
    pub policy: String,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            policy: policy.into(),
        }
    }
}

/// Ordered route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    api_prefix: String,
    /// Sorted longest prefix first
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build a table from rules; evaluation order is longest prefix first.
    pub fn new(api_prefix: impl Into<String>, mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            api_prefix: api_prefix.into(),
            rules,
        }
    }

    /// The portal's default route table.
    pub fn default_rules() -> Vec<RouteRule> {
        vec![
            RouteRule::new("/api/auth/register", REGISTER),
            RouteRule::new("/api/auth", AUTH),
            RouteRule::new("/api/billing", PAYMENT),
            RouteRule::new("/api/payments", PAYMENT),
        ]
    }

    /// Fail fast if a rule or the API fallback names an unknown policy.
    pub fn validate(&self, policies: &PolicyTable) -> Result<()> {
        if !self.api_prefix.starts_with('/') {
            return Err(GatekeeperError::Config(format!(
                "API prefix must start with '/': {}",
                self.api_prefix
            )));
        }

        policies.require(API)?;
        for rule in &self.rules {
            if !rule.prefix.starts_with('/') {
                return Err(GatekeeperError::Config(format!(
                    "route prefix must start with '/': {}",
                    rule.prefix
                )));
            }
            policies.require(&rule.policy)?;
        }
        Ok(())
    }

    /// Resolve the policy name for a request path.
    ///
    /// Returns `None` for paths outside the API prefix that match no rule.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| matches_prefix(path, &rule.prefix))
        {
            return Some(rule.policy.as_str());
        }

        if matches_prefix(path, &self.api_prefix) {
            return Some(API);
        }

        None
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(DEFAULT_API_PREFIX, Self::default_rules())
    }
}

/// Prefix match that only splits at `/`, so `/api/auth` does not match
/// `/api/authors`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}
