//! Login, refresh and logout.
//!
//! Every refresh consumes the presented refresh token: the session it names is
//! revoked and replaced by a new one in a single store transaction. A token
//! whose session is missing or already revoked is rejected with the same error
//! either way, so callers cannot probe which token ids ever existed.

use std::sync::{Arc, LazyLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::unix_now;
use crate::db::{Database, Fingerprint, NewSession, RevokeReason, RotateOutcome, User};
use crate::jwt::{CodecError, IssuedAccessToken, IssuedRefreshToken, TokenCodec};
use crate::password::{hash_password, verify_password};

/// Verified against when the login is unknown, so both failure paths cost one Argon2 run.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("portal-auth-timing-equalizer").ok());

#[derive(Debug, Error)]
pub enum SessionError {
    /// No credential was presented
    #[error("not authenticated")]
    Unauthenticated,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    /// Token is genuine but its server-side session is absent or revoked
    #[error("session is no longer valid")]
    SessionInvalidated,
    #[error("invalid login or password")]
    InvalidCredentials,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("session store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("failed to sign token: {0}")]
    Signing(CodecError),
    #[error("{0}")]
    Internal(String),
}

impl From<CodecError> for SessionError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Expired => SessionError::Expired,
            CodecError::InvalidSignature => SessionError::InvalidToken,
            CodecError::Encoding(_) => SessionError::Signing(e),
        }
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access: IssuedAccessToken,
    pub refresh: IssuedRefreshToken,
    pub user: User,
}

/// Session protocol handler shared by the HTTP endpoints.
#[derive(Clone)]
pub struct SessionService {
    db: Database,
    codec: Arc<TokenCodec>,
}

impl SessionService {
    pub fn new(db: Database, codec: Arc<TokenCodec>) -> Self {
        Self { db, codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Check a login/password pair against the principal store.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, SessionError> {
        let Some(user) = self.db.users().get_by_login(login).await? else {
            if let Some(hash) = DUMMY_HASH.clone() {
                let _ = check_password(password, hash).await;
            }
            warn!(login = %login, "Login attempt for unknown account");
            return Err(SessionError::InvalidCredentials);
        };

        if !check_password(password, user.password_hash.clone()).await? {
            warn!(user = %user.uuid, "Login attempt with wrong password");
            return Err(SessionError::InvalidCredentials);
        }

        if !user.active {
            return Err(SessionError::AccountDisabled);
        }

        Ok(user)
    }

    /// Start a new session for an authenticated principal.
    pub async fn login(
        &self,
        user: &User,
        fingerprint: Fingerprint,
    ) -> Result<IssuedSession, SessionError> {
        if !user.active {
            return Err(SessionError::AccountDisabled);
        }

        let (access, refresh) = self.issue_pair(user)?;

        self.db
            .sessions()
            .save(&NewSession {
                token_id: refresh.jti.clone(),
                user_id: user.id,
                issued_at: refresh.issued_at,
                expires_at: refresh.expires_at,
                fingerprint,
            })
            .await?;

        info!(user = %user.uuid, token_id = %refresh.jti, "Session started");

        Ok(IssuedSession {
            access,
            refresh,
            user: user.clone(),
        })
    }

    /// Exchange a refresh token for a new access/refresh pair, rotating the session.
    pub async fn refresh(
        &self,
        refresh_token: Option<&str>,
        fingerprint: Fingerprint,
    ) -> Result<IssuedSession, SessionError> {
        let token = refresh_token.ok_or(SessionError::Unauthenticated)?;
        let claims = self.codec.verify_refresh(token)?;

        let sessions = self.db.sessions();
        let session = sessions
            .find(&claims.jti)
            .await?
            .ok_or(SessionError::SessionInvalidated)?;

        if session.is_revoked() {
            warn!(
                security_event = "refresh_token_replay",
                token_id = %session.token_id,
                user_id = session.user_id,
                revoked_reason = session.revoked_reason.as_deref().unwrap_or(""),
                "Revoked refresh token presented"
            );
            return Err(SessionError::SessionInvalidated);
        }

        if session.is_expired_at(unix_now()) {
            return Err(SessionError::Expired);
        }

        let user = self
            .db
            .users()
            .get_by_id(session.user_id)
            .await?
            .filter(|u| u.uuid == claims.sub)
            .ok_or(SessionError::SessionInvalidated)?;

        if !user.active {
            sessions
                .revoke(&session.token_id, RevokeReason::AccountDisabled)
                .await?;
            return Err(SessionError::AccountDisabled);
        }

        let (access, refresh) = self.issue_pair(&user)?;
        let replacement = NewSession {
            token_id: refresh.jti.clone(),
            user_id: user.id,
            issued_at: refresh.issued_at,
            expires_at: refresh.expires_at,
            fingerprint,
        };

        match sessions.rotate(&session.token_id, &replacement).await? {
            RotateOutcome::Rotated => {
                debug!(
                    user = %user.uuid,
                    old_token_id = %session.token_id,
                    new_token_id = %refresh.jti,
                    "Session rotated"
                );
                Ok(IssuedSession {
                    access,
                    refresh,
                    user,
                })
            }
            RotateOutcome::Superseded => {
                warn!(
                    security_event = "refresh_token_replay",
                    token_id = %session.token_id,
                    user_id = session.user_id,
                    "Refresh token was rotated concurrently"
                );
                Err(SessionError::SessionInvalidated)
            }
        }
    }

    /// Revoke the session behind a refresh token, if there is one. Never fails.
    pub async fn logout(&self, refresh_token: Option<&str>) {
        let Some(token) = refresh_token else {
            return;
        };

        let claims = match self.codec.verify_refresh(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Ignoring unverifiable refresh token on logout");
                return;
            }
        };

        match self
            .db
            .sessions()
            .revoke(&claims.jti, RevokeReason::Logout)
            .await
        {
            Ok(true) => info!(user = %claims.sub, token_id = %claims.jti, "Session ended"),
            Ok(false) => debug!(token_id = %claims.jti, "Logout for inactive session"),
            Err(e) => warn!(token_id = %claims.jti, error = %e, "Failed to revoke session on logout"),
        }
    }

    fn issue_pair(
        &self,
        user: &User,
    ) -> Result<(IssuedAccessToken, IssuedRefreshToken), SessionError> {
        let access = self
            .codec
            .issue_access_token(&user.uuid, &user.login, user.role)?;
        let refresh = self.codec.issue_refresh_token(&user.uuid)?;
        Ok((access, refresh))
    }
}

/// Run Argon2 verification off the async worker threads.
async fn check_password(password: &str, hash: String) -> Result<bool, SessionError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| SessionError::Internal(format!("password check aborted: {e}")))?
        .map_err(|e| SessionError::Internal(format!("stored password hash unusable: {e}")))
}
