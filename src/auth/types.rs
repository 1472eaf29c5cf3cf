//! Authentication user types.

use crate::db::UserRole;
use crate::jwt::AccessClaims;

/// Principal extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    /// Public principal UUID.
    pub fn uuid(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> UserRole {
        self.claims.role
    }
}
