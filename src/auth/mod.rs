//! HTTP side of authentication.
//!
//! Access tokens travel in the `Authorization: Bearer` header and are checked
//! statelessly. The refresh token only ever travels in the HTTP-only `rt`
//! cookie and is only read by the `/auth/*` endpoints.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use cookie::{
    REFRESH_COOKIE_MAX_AGE_SECS, REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie,
    refresh_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, ClientFingerprint, RoleConstraint};
pub use ip::{HasHeadersAndExtensions, extract_client_ip, extract_fingerprint};
pub use state::{HasAuthBackend, ServerSettings};
pub use types::AuthenticatedUser;
