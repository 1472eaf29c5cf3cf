//! Client IP and fingerprint extraction.

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderName, header, request::Parts},
};

use crate::db::Fingerprint;

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` so middleware and extractors share one code path.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract the client IP address.
///
/// With a trusted proxy header configured, the first entry of that header is
/// used and the socket address is ignored. Otherwise the peer address from
/// `ConnectInfo` is used when the server was started with it.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<&HeaderName>,
) -> Option<String> {
    match ip_header {
        Some(name) => {
            let value = source.headers().get(name)?.to_str().ok()?;
            let first = value.split(',').next()?.trim();
            (!first.is_empty()).then(|| first.to_string())
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string()),
    }
}

/// Collect the audit fingerprint (user agent and IP) of a request.
pub fn extract_fingerprint<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<&HeaderName>,
) -> Fingerprint {
    let user_agent = source
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect());

    Fingerprint {
        user_agent,
        ip_address: extract_client_ip(source, ip_header),
    }
}
