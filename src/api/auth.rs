//! Session endpoints.
//!
//! - POST `/login` - Check credentials, set the refresh cookie, return an access token
//! - POST `/refresh` - Rotate the refresh cookie and return a new access token
//! - POST `/logout` - Revoke the refresh session and clear the cookie
//! - GET `/sessions` - List the caller's active sessions
//! - DELETE `/sessions/{token_id}` - Revoke one session (own, or any for admins)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use super::users::UserInfo;
use crate::auth::{
    ApiAuthError, Auth, AuthErrorKind, ClientFingerprint, REFRESH_COOKIE_NAME, ServerSettings,
    clear_refresh_cookie, get_cookie, refresh_cookie,
};
use crate::db::{Database, RefreshSession, RevokeReason, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::TokenCodec;
use crate::rate_limit::{LoginRateLimit, rate_limit_login};
use crate::session::SessionService;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub settings: ServerSettings,
    pub service: SessionService,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, login_limit: Option<LoginRateLimit>) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone());

    let login_router = match login_limit {
        Some(limit) => login_router.layer(middleware::from_fn_with_state(limit, rate_limit_login)),
        None => login_router,
    };

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{token_id}", delete(revoke_session))
        .with_state(state)
        .merge(login_router)
}

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    user: UserInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

async fn login(
    State(state): State<AuthState>,
    ClientFingerprint(fingerprint): ClientFingerprint,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiAuthError> {
    let user = state
        .service
        .authenticate(payload.login.trim(), &payload.password)
        .await?;

    let issued = state.service.login(&user, fingerprint).await?;

    Ok((
        StatusCode::OK,
        [(
            SET_COOKIE,
            refresh_cookie(&issued.refresh.token, state.settings.secure_cookies),
        )],
        Json(LoginResponse {
            access_token: issued.access.token,
            user: UserInfo::from(&issued.user),
        }),
    ))
}

async fn refresh(
    State(state): State<AuthState>,
    ClientFingerprint(fingerprint): ClientFingerprint,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiAuthError> {
    let secure = state.settings.secure_cookies;
    let token = get_cookie(&headers, REFRESH_COOKIE_NAME);

    let issued = state
        .service
        .refresh(token, fingerprint)
        .await
        .map_err(|e| {
            let error = ApiAuthError::from(e);
            // Keep the cookie on infrastructure failures; the token may still be good
            if error.kind == AuthErrorKind::Internal {
                error
            } else {
                error.clearing_cookie(secure)
            }
        })?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, refresh_cookie(&issued.refresh.token, secure))],
        Json(RefreshResponse {
            access_token: issued.access.token,
        }),
    ))
}

async fn logout(State(state): State<AuthState>, headers: HeaderMap) -> impl IntoResponse {
    state
        .service
        .logout(get_cookie(&headers, REFRESH_COOKIE_NAME))
        .await;

    (
        StatusCode::NO_CONTENT,
        [(
            SET_COOKIE,
            clear_refresh_cookie(state.settings.secure_cookies),
        )],
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: String,
    issued_at: i64,
    expires_at: i64,
    user_agent: Option<String>,
    ip_address: Option<String>,
    current: bool,
}

impl SessionInfo {
    fn new(session: RefreshSession, current_id: Option<&str>) -> Self {
        Self {
            current: current_id == Some(session.token_id.as_str()),
            id: session.token_id,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
        }
    }
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

/// List the caller's active sessions, flagging the one this browser holds.
async fn list_sessions(
    State(state): State<AuthState>,
    auth: Auth,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(auth.user.uuid())
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let sessions = state
        .db
        .sessions()
        .list_active_by_user(user.id)
        .await
        .db_err("Failed to list sessions")?;

    let current_id = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .and_then(|token| state.codec.verify_refresh(token).ok())
        .map(|claims| claims.jti);

    Ok(Json(ListSessionsResponse {
        sessions: sessions
            .into_iter()
            .map(|s| SessionInfo::new(s, current_id.as_deref()))
            .collect(),
    }))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke a session by id. Sessions of other users look like unknown ids unless
/// the caller is an admin.
async fn revoke_session(
    State(state): State<AuthState>,
    auth: Auth,
    Path(token_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.db.sessions();

    let Some(session) = sessions
        .find(&token_id)
        .await
        .db_err("Failed to get session")?
    else {
        return Ok(Json(RevokeResponse { revoked: false }));
    };

    let is_admin = auth.user.role() == UserRole::Admin;
    let owner = state
        .db
        .users()
        .get_by_id(session.user_id)
        .await
        .db_err("Failed to get session owner")?;
    let is_own = owner.is_some_and(|u| u.uuid == auth.user.uuid());

    if !is_own && !is_admin {
        return Ok(Json(RevokeResponse { revoked: false }));
    }

    let reason = if is_own {
        RevokeReason::RevokedByUser
    } else {
        RevokeReason::RevokedByAdmin
    };
    let revoked = sessions
        .revoke(&token_id, reason)
        .await
        .db_err("Failed to revoke session")?;

    if revoked {
        tracing::info!(
            token_id = %token_id,
            by = %auth.user.uuid(),
            reason = reason.as_str(),
            "Session revoked"
        );
    }

    Ok(Json(RevokeResponse { revoked }))
}
