#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::Response,
};
use portal_auth::{
    ServerConfig, create_app,
    db::{Database, NewUser, UserRole},
    jwt::{AccessClaims, RefreshClaims, TokenType},
    password::hash_password,
};
use std::num::NonZeroU32;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";
pub const PASSWORD: &str = "correct-horse-battery";

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        access_token_ttl: None,
        secure_cookies: false,
        ip_header: None,
        login_attempts_per_minute: None,
    }
}

pub async fn create_test_app() -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    (create_app(&test_config(db.clone())), db)
}

/// App that rate-limits logins per `X-Forwarded-For` address.
pub async fn create_rate_limited_app(per_minute: u32) -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let config = ServerConfig {
        ip_header: Some(HeaderName::from_static("x-forwarded-for")),
        login_attempts_per_minute: NonZeroU32::new(per_minute),
        ..test_config(db.clone())
    };
    (create_app(&config), db)
}

/// Create an active principal with [`PASSWORD`]. Returns its UUID.
pub async fn create_user(db: &Database, login: &str, role: UserRole) -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let hash = hash_password(PASSWORD).expect("Failed to hash password");
    db.users()
        .create(&NewUser {
            uuid: &uuid,
            login,
            display_name: login,
            role,
            password_hash: &hash,
        })
        .await
        .expect("Failed to create user");
    uuid
}

/// An access token signed with the test secret that expired a minute ago.
pub fn expired_access_token(uuid: &str, login: &str, role: UserRole) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let claims = AccessClaims {
        sub: uuid.to_string(),
        login: login.to_string(),
        role,
        token_type: TokenType::Access,
        iat: now - 3600,
        exp: now - 60,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(ACCESS_SECRET),
    )
    .unwrap()
}

/// A refresh token signed with the test secret that expired ten seconds ago.
pub fn expired_refresh_token(uuid: &str) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let claims = RefreshClaims {
        jti: uuid::Uuid::new_v4().to_string(),
        sub: uuid.to_string(),
        token_type: TokenType::Refresh,
        iat: now - 100,
        exp: now - 10,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(REFRESH_SECRET),
    )
    .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// The single `Set-Cookie` header of a response.
pub fn set_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The refresh token carried by a `Set-Cookie` header, if it sets one.
pub fn refresh_token_from(headers: &HeaderMap) -> Option<String> {
    let cookie = set_cookie(headers)?;
    let value = cookie.strip_prefix("rt=")?.split(';').next()?;
    (!value.is_empty()).then(|| value.to_string())
}

pub struct LoggedIn {
    pub access_token: String,
    pub refresh_token: String,
    pub uuid: String,
}

/// Log in over the router and return both tokens.
pub async fn login(app: &Router, login: &str) -> LoggedIn {
    let response = send(
        app,
        json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "login": login, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let refresh_token = refresh_token_from(response.headers()).expect("login sets refresh cookie");
    let body = body_json(response).await;

    LoggedIn {
        access_token: body["accessToken"].as_str().unwrap().to_string(),
        refresh_token,
        uuid: body["user"]["uuid"].as_str().unwrap().to_string(),
    }
}

pub fn refresh_request(refresh_token: Option<&str>) -> Request<Body> {
    let mut builder = empty_request("POST", "/auth/refresh");
    if let Some(token) = refresh_token {
        builder = builder.header(header::COOKIE, format!("rt={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn bearer_request(method: &str, uri: &str, access_token: &str) -> Request<Body> {
    empty_request(method, uri)
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn bearer_json_request(
    method: &str,
    uri: &str,
    access_token: &str,
    body: serde_json::Value,
) -> Request<Body> {
    let mut request = json_request(method, uri, body);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {access_token}").parse().unwrap(),
    );
    request
}
