//! Authentication error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::cookie::clear_refresh_cookie;
use crate::session::SessionError;

/// What went wrong, as far as the client is allowed to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    Expired,
    SessionInvalidated,
    InvalidCredentials,
    AccountDisabled,
    InsufficientRole,
    Internal,
}

impl AuthErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorKind::NotAuthenticated
            | AuthErrorKind::InvalidToken
            | AuthErrorKind::Expired
            | AuthErrorKind::SessionInvalidated
            | AuthErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthErrorKind::AccountDisabled | AuthErrorKind::InsufficientRole => {
                StatusCode::FORBIDDEN
            }
            AuthErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthErrorKind::NotAuthenticated => "unauthenticated",
            AuthErrorKind::InvalidToken => "invalid_token",
            AuthErrorKind::Expired => "expired",
            AuthErrorKind::SessionInvalidated => "session_invalidated",
            AuthErrorKind::InvalidCredentials => "invalid_credentials",
            AuthErrorKind::AccountDisabled => "account_disabled",
            AuthErrorKind::InsufficientRole => "insufficient_role",
            AuthErrorKind::Internal => "internal",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuthErrorKind::NotAuthenticated => "Not authenticated",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::Expired => "Token expired",
            AuthErrorKind::SessionInvalidated => "Session is no longer valid",
            AuthErrorKind::InvalidCredentials => "Invalid login or password",
            AuthErrorKind::AccountDisabled => "Account is disabled",
            AuthErrorKind::InsufficientRole => "Insufficient permissions",
            AuthErrorKind::Internal => "Internal server error",
        }
    }
}

impl From<&SessionError> for AuthErrorKind {
    fn from(e: &SessionError) -> Self {
        match e {
            SessionError::Unauthenticated => AuthErrorKind::NotAuthenticated,
            SessionError::InvalidToken => AuthErrorKind::InvalidToken,
            SessionError::Expired => AuthErrorKind::Expired,
            SessionError::SessionInvalidated => AuthErrorKind::SessionInvalidated,
            SessionError::InvalidCredentials => AuthErrorKind::InvalidCredentials,
            SessionError::AccountDisabled => AuthErrorKind::AccountDisabled,
            SessionError::Store(_) | SessionError::Signing(_) | SessionError::Internal(_) => {
                AuthErrorKind::Internal
            }
        }
    }
}

/// API authentication error, rendered as JSON.
///
/// Errors from the refresh endpoint also clear the refresh cookie so the
/// browser stops presenting a dead token.
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
    clear_cookie: Option<bool>,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind) -> Self {
        Self {
            kind,
            clear_cookie: None,
        }
    }

    /// Attach a `Set-Cookie` header that removes the refresh cookie.
    pub fn clearing_cookie(mut self, secure: bool) -> Self {
        self.clear_cookie = Some(secure);
        self
    }
}

impl From<SessionError> for ApiAuthError {
    fn from(e: SessionError) -> Self {
        let kind = AuthErrorKind::from(&e);
        if kind == AuthErrorKind::Internal {
            tracing::error!(error = %e, "Authentication failed with internal error");
        }
        Self::new(kind)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    code: &'static str,
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let mut response = (
            self.kind.status_code(),
            Json(ErrorResponse {
                error: self.kind.message(),
                code: self.kind.code(),
            }),
        )
            .into_response();

        if let Some(secure) = self.clear_cookie {
            if let Ok(value) = HeaderValue::from_str(&clear_refresh_cookie(secure)) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }

        response
    }
}
