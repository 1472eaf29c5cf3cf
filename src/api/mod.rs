mod auth;
mod error;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::ServerSettings;
use crate::db::Database;
use crate::jwt::TokenCodec;
use crate::rate_limit::LoginRateLimit;
use crate::session::SessionService;

pub use auth::AuthState;
pub use error::{ApiError, ResultExt, validate_uuid};
pub use users::{UserInfo, UsersState, validate_login};

/// Create the API router (`/auth/*` and `/users/*`).
pub fn create_api_router(
    db: Database,
    codec: Arc<TokenCodec>,
    settings: ServerSettings,
    login_limit: Option<LoginRateLimit>,
) -> Router {
    let auth_state = AuthState {
        service: SessionService::new(db.clone(), codec.clone()),
        db: db.clone(),
        codec: codec.clone(),
        settings: settings.clone(),
    };

    let users_state = UsersState {
        db,
        codec,
        settings,
    };

    Router::new()
        .nest("/auth", auth::router(auth_state, login_limit))
        .nest("/users", users::router(users_state))
}
