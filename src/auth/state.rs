//! Authentication state traits and macro.

use axum::http::HeaderName;

use crate::jwt::TokenCodec;

/// Request-independent settings shared by all authenticated routes.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    /// Set the `Secure` flag on cookies (public origin is HTTPS)
    pub secure_cookies: bool,
    /// Header carrying the client IP when running behind a reverse proxy
    pub ip_header: Option<HeaderName>,
}

/// Trait for state types that can verify access tokens.
pub trait HasAuthBackend {
    fn codec(&self) -> &TokenCodec;
    fn settings(&self) -> &ServerSettings;
}

/// Implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `codec: Arc<TokenCodec>`
/// - `settings: ServerSettings`
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub codec: Arc<TokenCodec>,
///     pub settings: ServerSettings,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn codec(&self) -> &$crate::jwt::TokenCodec {
                &self.codec
            }
            fn settings(&self) -> &$crate::auth::ServerSettings {
                &self.settings
            }
        }
    };
}
