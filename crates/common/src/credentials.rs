//! Credentials for establishing a signaling-channel connection.

use crate::secret::SecretString;
use crate::types::{Role, UserId};

/// Credentials handed to the orchestrator when connecting.
///
/// The bearer token is wrapped in [`SecretString`] so it is redacted in
/// `Debug` output and zeroized on drop. Role assignment comes from the
/// external profile service and is read-only here.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The local user this connection authenticates as.
    pub user_id: UserId,
    /// The local user's role (patient or doctor).
    pub role: Role,
    /// Bearer token for the signaling server.
    pub auth_token: SecretString,
}

impl Credentials {
    /// Create credentials for a user.
    #[must_use]
    pub fn new(user_id: UserId, role: Role, auth_token: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            auth_token: SecretString::from(auth_token.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_the_token() {
        let creds = Credentials::new(UserId(7), Role::Patient, "tok-xyz");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("tok-xyz"));
    }
}
