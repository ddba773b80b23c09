//! Rate limit policies and the policy table.
//!
//! The table always starts from the built-in portal policies and can be
//! overridden or extended from YAML configuration. It is validated once at
//! startup and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Authentication endpoints.
pub const AUTH: &str = "auth";
/// General API traffic, also the fallback for unmatched API paths.
pub const API: &str = "api";
/// Account registration.
pub const REGISTER: &str = "register";
/// Payment and billing endpoints.
pub const PAYMENT: &str = "payment";

/// Policies every table must define.
pub const REQUIRED_POLICIES: [&str; 4] = [AUTH, API, REGISTER, PAYMENT];

/// A named rate limit applied to a category of routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Policy name, also the namespace of its client keys
    pub name: String,
    /// Length of one counting window
    pub window: Duration,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Rejection text returned to the caller
    pub message: String,
}

impl Policy {
    /// Create a policy, checking its invariants.
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        max_requests: u64,
        message: impl Into<String>,
    ) -> Result<Self> {
        let policy = Self {
            name: name.into(),
            window,
            max_requests,
            message: message.into(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check `window > 0`, `max_requests >= 1` and a usable name.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| GatekeeperError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() || self.name.contains(':') {
            return Err(invalid("name must be non-empty and must not contain ':'"));
        }
        if self.window.as_millis() == 0 {
            return Err(invalid("window must be at least 1ms"));
        }
        if self.max_requests == 0 {
            return Err(invalid("max_requests must be at least 1"));
        }
        Ok(())
    }

    fn builtin(name: &str, window: Duration, max_requests: u64, message: &str) -> Self {
        Self {
            name: name.to_string(),
            window,
            max_requests,
            message: message.to_string(),
        }
    }
}

/// Policy definition as written in configuration.
///
/// Exactly one of `window_ms` or `window_secs` should be set; for an override
/// of an existing policy, omitted fields keep their current values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Window length in seconds
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Requests admitted per window
    #[serde(default)]
    pub max_requests: Option<u64>,
    /// Rejection text
    #[serde(default)]
    pub message: Option<String>,
}

impl PolicyConfig {
    fn window(&self) -> Option<Duration> {
        self.window_ms
            .map(Duration::from_millis)
            .or_else(|| self.window_secs.map(Duration::from_secs))
    }

    /// Build a policy from this definition, filling gaps from `base`.
    fn apply(&self, name: &str, base: Option<&Policy>) -> Result<Policy> {
        if self.window_ms.is_some() && self.window_secs.is_some() {
            return Err(GatekeeperError::InvalidPolicy {
                name: name.to_string(),
                reason: "set only one of window_ms and window_secs".to_string(),
            });
        }

        let missing = |field: &str| GatekeeperError::InvalidPolicy {
            name: name.to_string(),
            reason: format!("missing {}", field),
        };

        let window = self
            .window()
            .or(base.map(|p| p.window))
            .ok_or_else(|| missing("window_ms or window_secs"))?;
        let max_requests = self
            .max_requests
            .or(base.map(|p| p.max_requests))
            .ok_or_else(|| missing("max_requests"))?;
        let message = self
            .message
            .clone()
            .or_else(|| base.map(|p| p.message.clone()))
            .unwrap_or_else(|| "Too many requests, please try again later.".to_string());

        Policy::new(name, window, max_requests, message)
    }
}

/// Static mapping from policy name to [`Policy`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<String, Policy>,
}

impl PolicyTable {
    /// Built-in policies with the portal's defaults.
    pub fn builtin() -> Self {
        let policies = [
            Policy::builtin(
                AUTH,
                Duration::from_secs(15 * 60),
                10,
                "Too many authentication attempts, please try again later.",
            ),
            Policy::builtin(
                API,
                Duration::from_secs(60),
                100,
                "Too many requests, please slow down.",
            ),
            Policy::builtin(
                REGISTER,
                Duration::from_secs(60 * 60),
                5,
                "Too many accounts created from this address, please try again later.",
            ),
            Policy::builtin(
                PAYMENT,
                Duration::from_secs(60),
                10,
                "Too many payment requests, please try again later.",
            ),
        ];

        Self {
            policies: policies
                .into_iter()
                .map(|policy| (policy.name.clone(), policy))
                .collect(),
        }
    }

    /// Built-in policies with configured overrides and additions applied.
    pub fn with_overrides(overrides: &HashMap<String, PolicyConfig>) -> Result<Self> {
        let mut table = Self::builtin();
        for (name, config) in overrides {
            let policy = config.apply(name, table.policies.get(name))?;
            info!(
                policy = %policy.name,
                window_ms = policy.window.as_millis() as u64,
                max_requests = policy.max_requests,
                "Configured rate limit policy"
            );
            table.policies.insert(name.clone(), policy);
        }
        table.validate()?;
        Ok(table)
    }

    /// Load overrides from a YAML map of policy name to definition.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: HashMap<String, PolicyConfig> = serde_yaml::from_str(yaml)?;
        Self::with_overrides(&overrides)
    }

    /// Check every policy's invariants and that the required ones exist.
    pub fn validate(&self) -> Result<()> {
        for name in REQUIRED_POLICIES {
            self.require(name)?;
        }
        self.policies.values().try_for_each(Policy::validate)
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Look up a policy that must exist. Intended for startup wiring.
    pub fn require(&self, name: &str) -> Result<&Policy> {
        self.get(name)
            .ok_or_else(|| GatekeeperError::UnknownPolicy(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}
