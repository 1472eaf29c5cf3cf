//! Principal endpoints.
//!
//! `GET /me` is open to any authenticated principal; everything else requires
//! the admin role.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::{AdminOnly, Auth, ServerSettings};
use crate::db::{Database, NewUser, RevokeReason, User, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::TokenCodec;
use crate::password::{hash_password, validate_password_strength};

const MAX_LOGIN_LENGTH: usize = 64;
const MAX_DISPLAY_NAME_LENGTH: usize = 128;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub settings: ServerSettings,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/me", get(me))
        .route("/{uuid}/active", put(set_active))
        .route("/{uuid}/role", put(set_role))
        .route("/{uuid}/sessions", delete(revoke_user_sessions))
        .with_state(state)
}

/// Principal as shown to its owner and in login responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uuid: String,
    pub login: String,
    pub display_name: String,
    pub role: UserRole,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid.clone(),
            login: user.login.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
        }
    }
}

async fn me(State(state): State<UsersState>, auth: Auth) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(auth.user.uuid())
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserInfo::from(&user)))
}

async fn list_users(
    State(state): State<UsersState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list()
        .await
        .db_err("Failed to list users")?;

    Ok(Json(users))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    login: String,
    display_name: Option<String>,
    password: String,
    #[serde(default = "default_role")]
    role: UserRole,
}

fn default_role() -> UserRole {
    UserRole::User
}

/// Check a login name: 1 to 64 characters of letters, digits, `.`, `_`, `-`, `@`.
pub fn validate_login(login: &str) -> Result<(), ApiError> {
    if login.is_empty() {
        return Err(ApiError::bad_request("Login cannot be empty"));
    }
    if login.chars().count() > MAX_LOGIN_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Login cannot be longer than {MAX_LOGIN_LENGTH} characters"
        )));
    }
    if !login
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
    {
        return Err(ApiError::bad_request(
            "Login can only contain letters, numbers, '.', '_', '-' and '@'",
        ));
    }
    Ok(())
}

async fn create_user(
    State(state): State<UsersState>,
    auth: Auth<AdminOnly>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let login = payload.login.trim();
    validate_login(login)?;

    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(login);
    if display_name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ApiError::bad_request("Display name is too long"));
    }

    validate_password_strength(&payload.password).map_err(ApiError::bad_request)?;

    let users = state.db.users();
    if users
        .get_by_login(login)
        .await
        .db_err("Failed to check login")?
        .is_some()
    {
        return Err(ApiError::conflict("Login is already taken"));
    }

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?;

    let uuid = uuid::Uuid::new_v4().to_string();
    users
        .create(&NewUser {
            uuid: &uuid,
            login,
            display_name,
            role: payload.role,
            password_hash: &password_hash,
        })
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ApiError::conflict("Login is already taken")
            }
            e => ApiError::db_error("Failed to create user", e),
        })?;

    tracing::info!(
        user = %uuid,
        login = %login,
        role = payload.role.as_str(),
        by = %auth.user.uuid(),
        "User created"
    );

    Ok((
        StatusCode::CREATED,
        Json(UserInfo {
            uuid,
            login: login.to_string(),
            display_name: display_name.to_string(),
            role: payload.role,
        }),
    ))
}

/// Look up the target of an admin operation by UUID.
async fn target_user(state: &UsersState, uuid: &str) -> Result<User, ApiError> {
    validate_uuid(uuid)?;
    state
        .db
        .users()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[derive(Deserialize)]
struct SetActiveRequest {
    active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetActiveResponse {
    active: bool,
    revoked_sessions: u64,
}

/// Activate or deactivate a principal. Deactivation also revokes all of its
/// refresh sessions; outstanding access tokens remain valid until they expire.
async fn set_active(
    State(state): State<UsersState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = target_user(&state, &uuid).await?;

    if !payload.active && user.uuid == auth.user.uuid() {
        return Err(ApiError::bad_request("You cannot deactivate your own account"));
    }

    state
        .db
        .users()
        .set_active(user.id, payload.active)
        .await
        .db_err("Failed to update user")?;

    let revoked_sessions = if payload.active {
        0
    } else {
        state
            .db
            .sessions()
            .revoke_all_by_user(user.id, RevokeReason::AccountDisabled)
            .await
            .db_err("Failed to revoke sessions")?
    };

    tracing::info!(
        user = %user.uuid,
        active = payload.active,
        revoked_sessions,
        by = %auth.user.uuid(),
        "User activation changed"
    );

    Ok(Json(SetActiveResponse {
        active: payload.active,
        revoked_sessions,
    }))
}

#[derive(Deserialize)]
struct SetRoleRequest {
    role: UserRole,
}

/// Change a principal's role. Takes effect on its next login or refresh.
async fn set_role(
    State(state): State<UsersState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = target_user(&state, &uuid).await?;

    if user.uuid == auth.user.uuid() && payload.role != UserRole::Admin {
        return Err(ApiError::bad_request("You cannot remove your own admin role"));
    }

    state
        .db
        .users()
        .set_role(user.id, payload.role)
        .await
        .db_err("Failed to update role")?;

    tracing::info!(
        user = %user.uuid,
        role = payload.role.as_str(),
        by = %auth.user.uuid(),
        "User role changed"
    );

    Ok(Json(UserInfo {
        role: payload.role,
        ..UserInfo::from(&user)
    }))
}

#[derive(Serialize)]
struct RevokeAllResponse {
    revoked: u64,
}

/// Sign a principal out everywhere.
async fn revoke_user_sessions(
    State(state): State<UsersState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = target_user(&state, &uuid).await?;

    let revoked = state
        .db
        .sessions()
        .revoke_all_by_user(user.id, RevokeReason::RevokedByAdmin)
        .await
        .db_err("Failed to revoke sessions")?;

    tracing::info!(user = %user.uuid, revoked, by = %auth.user.uuid(), "All sessions revoked");

    Ok(Json(RevokeAllResponse { revoked }))
}
