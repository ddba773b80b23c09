//! Client key generation and handling.

/// A key that uniquely identifies one counting window.
///
/// The key is the policy name and the resolved client identifier joined as
/// `"<policy>:<identifier>"`, so one caller gets an independent counter per
/// policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a new client key from a policy name and client identifier.
    pub fn new(policy: &str, identifier: &str) -> Self {
        Self(format!("{}:{}", policy, identifier))
    }

    /// The policy part of the key.
    pub fn policy(&self) -> &str {
        self.0.split_once(':').map(|(policy, _)| policy).unwrap_or(&self.0)
    }

    /// The client identifier part of the key.
    pub fn identifier(&self) -> &str {
        self.0.split_once(':').map(|(_, id)| id).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
