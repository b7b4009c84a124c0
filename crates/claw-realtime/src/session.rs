//! Session token contract.

use async_trait::async_trait;
use parking_lot::RwLock;

/// Supplies the credential used to open connections.
///
/// Implementations may be backed by an auth service and are free to take as
/// long as they need in [`SessionGate::check_and_renew_if_needed`]; the
/// client holds no locks while awaiting it.
#[async_trait]
pub trait SessionGate: Send + Sync {
    /// Current token, appended to the connection URL when present.
    fn token(&self) -> Option<String>;

    /// Validate the current token and renew it if needed.
    ///
    /// Returns whether a usable token exists afterwards. `false` means the
    /// application has to re-authenticate.
    async fn check_and_renew_if_needed(&self, force_check: bool) -> bool;
}

/// A gate holding a token set by the application.
///
/// Renewal cannot obtain a new token, so it only reports whether one is set.
#[derive(Debug, Default)]
pub struct StaticTokenGate {
    token: RwLock<Option<String>>,
}

impl StaticTokenGate {
    /// Create a gate with the given token.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the token, e.g. after the application logged in again.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

#[async_trait]
impl SessionGate for StaticTokenGate {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn check_and_renew_if_needed(&self, _force_check: bool) -> bool {
        self.token.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_static_gate_with_token() {
        let gate = StaticTokenGate::new(Some("secret".to_string()));
        assert_eq!(gate.token().as_deref(), Some("secret"));
        assert!(gate.check_and_renew_if_needed(true).await);
    }

    #[tokio::test]
    async fn test_static_gate_without_token() {
        let gate = StaticTokenGate::default();
        assert!(gate.token().is_none());
        assert!(!gate.check_and_renew_if_needed(false).await);
    }

    #[tokio::test]
    async fn test_set_token_through_trait_object() {
        let gate = Arc::new(StaticTokenGate::default());
        let dyn_gate: Arc<dyn SessionGate> = Arc::clone(&gate) as Arc<dyn SessionGate>;

        gate.set_token(Some("fresh".to_string()));

        assert_eq!(dyn_gate.token().as_deref(), Some("fresh"));
        assert!(dyn_gate.check_and_renew_if_needed(true).await);
    }
}
