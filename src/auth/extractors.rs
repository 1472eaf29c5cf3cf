//! Axum extractors for authentication.

use std::convert::Infallible;
use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::ip::extract_fingerprint;
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::db::{Fingerprint, UserRole};
use crate::jwt::CodecError;

/// Role requirement checked after the access token is verified.
pub trait RoleConstraint {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated principal.
pub struct AnyRole;

/// Administrators only.
pub struct AdminOnly;

impl RoleConstraint for AnyRole {
    fn allows(_: UserRole) -> bool {
        true
    }
}

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Extractor for endpoints that require a bearer access token.
///
/// Verification is stateless (signature and expiry only), so a rejected token
/// is always answered with 401 and the client is expected to refresh.
pub struct Auth<R = AnyRole> {
    pub user: AuthenticatedUser,
    role: PhantomData<fn() -> R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiAuthError::new(AuthErrorKind::NotAuthenticated))?;

        let claims = state
            .codec()
            .verify_access(token)
            .map_err(|e| match e {
                CodecError::Expired => ApiAuthError::new(AuthErrorKind::Expired),
                _ => ApiAuthError::new(AuthErrorKind::InvalidToken),
            })?;

        if !R::allows(claims.role) {
            tracing::debug!(user = %claims.sub, role = claims.role.as_str(), "Role check failed");
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Auth {
            user: AuthenticatedUser { claims },
            role: PhantomData,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Audit fingerprint of the calling client. Never rejects.
pub struct ClientFingerprint(pub Fingerprint);

impl<S> FromRequestParts<S> for ClientFingerprint
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientFingerprint(extract_fingerprint(
            parts,
            state.settings().ip_header.as_ref(),
        )))
    }
}
