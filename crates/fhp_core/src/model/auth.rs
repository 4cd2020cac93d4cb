//! Authorization context consumed from the token-acquisition collaborator.
//!
//! # Invariants
//! - The token is opaque to core and never written to logs or `Debug` output.
//! - `owner` is the person id the token was issued for.

use crate::model::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

/// Opaque access token plus the id of the person who owns it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    session_id: Uuid,
    owner: EntityId,
    token: String,
}

impl AuthContext {
    /// Wraps a token acquired for `owner` in a fresh session.
    pub fn new(owner: EntityId, token: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            owner,
            token: token.into(),
        }
    }

    /// Correlation id used in log events instead of the token.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    /// Raw token, handed back to the API client only.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this context was issued for `id` itself.
    pub fn grants(&self, id: EntityId) -> bool {
        self.owner == id
    }
}

impl Debug for AuthContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("session_id", &self.session_id)
            .field("owner", &self.owner)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::AuthContext;

    #[test]
    fn debug_output_redacts_token() {
        let auth = AuthContext::new(403022, "secret-oauth-token");
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("secret-oauth-token"));
        assert!(rendered.contains("403022"));
    }

    #[test]
    fn grants_only_its_owner() {
        let auth = AuthContext::new(403022, "token");
        assert!(auth.grants(403022));
        assert!(!auth.grants(1));
    }

    #[test]
    fn each_context_gets_its_own_session() {
        let first = AuthContext::new(1, "token");
        let second = AuthContext::new(1, "token");
        assert_ne!(first.session_id(), second.session_id());
        assert!(!first.session_id().is_nil());
    }
}
