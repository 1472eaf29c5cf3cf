//! Client side of the session protocol.
//!
//! [`SessionClient`] keeps the access token in memory, attaches it to every
//! call and transparently refreshes it when the server answers 401. The
//! refresh token lives in the transport's cookie store.

mod interceptor;
mod transport;

use axum::http::StatusCode;
use thiserror::Error;

pub use interceptor::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, SessionClient, SessionUser};
pub use transport::{ApiRequest, ApiResponse, DEFAULT_TIMEOUT, HttpTransport, Transport, TransportError};

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The refresh endpoint refused to issue a new access token
    #[error("session refresh rejected with status {status}")]
    RefreshRejected { status: StatusCode },
    /// The refresh in flight was cancelled before it settled
    #[error("session refresh was abandoned")]
    RefreshAbandoned,
    /// The session was logged out or cleared while the refresh was in flight
    #[error("session ended during refresh")]
    LoggedOut,
    /// The call was still unauthorized after a successful refresh
    #[error("request unauthorized after session refresh")]
    Unauthorized,
    /// A session endpoint (login) answered with an error
    #[error("request rejected with status {status}")]
    Rejected {
        status: StatusCode,
        code: Option<String>,
    },
    #[error("failed to decode response: {0}")]
    Decode(String),
}
