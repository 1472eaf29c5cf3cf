mod common;

use axum::{
    body::Body,
    http::{StatusCode, header},
};
use common::*;
use portal_auth::db::{RevokeReason, UserRole};

// --- Login ---

#[tokio::test]
async fn test_login_sets_refresh_cookie() {
    let (app, db) = create_test_app().await;
    let uuid = create_user(&db, "alice", UserRole::Editor).await;

    let response = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "login": "alice", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(response.headers()).unwrap();
    assert!(cookie.starts_with("rt="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(!cookie.contains("Secure"));

    let body = body_json(response).await;
    assert!(body["accessToken"].as_str().is_some());
    assert_eq!(body["user"]["uuid"], uuid);
    assert_eq!(body["user"]["login"], "alice");
    assert_eq!(body["user"]["displayName"], "alice");
    assert_eq!(body["user"]["role"], "editor");
}

#[tokio::test]
async fn test_login_cookie_secure_over_https() {
    let db = portal_auth::db::Database::open(":memory:").await.unwrap();
    let config = portal_auth::ServerConfig {
        secure_cookies: true,
        ..test_config(db.clone())
    };
    let app = portal_auth::create_app(&config);
    create_user(&db, "alice", UserRole::User).await;

    let response = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "login": "alice", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(response.headers()).unwrap().ends_with("; Secure"));
}

#[tokio::test]
async fn test_login_is_case_insensitive() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;

    let logged_in = login(&app, "ALICE").await;
    assert!(!logged_in.access_token.is_empty());
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;

    for (login, password) in [("alice", "wrong-password"), ("nobody", PASSWORD)] {
        let response = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                serde_json::json!({ "login": login, "password": password }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie(response.headers()).is_none());

        // Unknown login and wrong password look the same
        let body = body_json(response).await;
        assert_eq!(body["code"], "invalid_credentials");
    }
}

#[tokio::test]
async fn test_login_deactivated_account() {
    let (app, db) = create_test_app().await;
    let uuid = create_user(&db, "alice", UserRole::User).await;
    let user = db.users().get_by_uuid(&uuid).await.unwrap().unwrap();
    db.users().set_active(user.id, false).await.unwrap();

    let response = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "login": "alice", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "account_disabled");
}

#[tokio::test]
async fn test_login_rate_limited_per_ip() {
    let (app, db) = create_rate_limited_app(2).await;
    create_user(&db, "alice", UserRole::User).await;

    let attempt = |ip: &'static str| {
        let mut request = json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "login": "alice", "password": "wrong-password" }),
        );
        request
            .headers_mut()
            .insert("x-forwarded-for", ip.parse().unwrap());
        request
    };

    assert_eq!(
        send(&app, attempt("10.0.0.1")).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        send(&app, attempt("10.0.0.1")).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let response = send(&app, attempt("10.0.0.1")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["code"], "too_many_requests");

    // Other clients are unaffected, and so is refresh
    assert_eq!(
        send(&app, attempt("10.0.0.2")).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        send(&app, refresh_request(None)).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

// --- Refresh ---

#[tokio::test]
async fn test_refresh_rotates_token() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let response = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let new_refresh = refresh_token_from(response.headers()).unwrap();
    assert_ne!(new_refresh, session.refresh_token);

    let body = body_json(response).await;
    let access = body["accessToken"].as_str().unwrap();
    assert_eq!(
        send(&app, bearer_request("GET", "/users/me", access))
            .await
            .status(),
        StatusCode::OK
    );

    // The old token is gone for good
    let response = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The new one still works
    let response = send(&app, refresh_request(Some(&new_refresh))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_replay_is_rejected_and_clears_cookie() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let first = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);

    let cookie = set_cookie(second.headers()).unwrap();
    assert!(cookie.starts_with("rt=;"));
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(body_json(second).await["code"], "session_invalidated");
}

#[tokio::test]
async fn test_refresh_without_cookie() {
    let (app, _db) = create_test_app().await;

    let response = send(&app, refresh_request(None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(response.headers()).unwrap().contains("Max-Age=0"));
    assert_eq!(body_json(response).await["code"], "unauthenticated");
}

#[tokio::test]
async fn test_refresh_with_garbage_or_access_token() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    for token in ["garbage", session.access_token.as_str()] {
        let response = send(&app, refresh_request(Some(token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "invalid_token");
    }
}

#[tokio::test]
async fn test_refresh_after_deactivation() {
    let (app, db) = create_test_app().await;
    let uuid = create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let user = db.users().get_by_uuid(&uuid).await.unwrap().unwrap();
    db.users().set_active(user.id, false).await.unwrap();

    let response = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie(response.headers()).unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn test_refresh_picks_up_role_change() {
    let (app, db) = create_test_app().await;
    let uuid = create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let user = db.users().get_by_uuid(&uuid).await.unwrap().unwrap();
    db.users().set_role(user.id, UserRole::Admin).await.unwrap();

    let response = send(&app, refresh_request(Some(&session.refresh_token))).await;
    let access = body_json(response).await["accessToken"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(&app, bearer_request("GET", "/users", &access)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// --- Logout ---

#[tokio::test]
async fn test_logout_revokes_session() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let response = send(
        &app,
        empty_request("POST", "/auth/logout")
            .header(header::COOKIE, format!("rt={}", session.refresh_token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(set_cookie(response.headers()).unwrap().contains("Max-Age=0"));

    let response = send(&app, refresh_request(Some(&session.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let cookies = [
        None,
        Some("garbage".to_string()),
        Some(expired_refresh_token(&session.uuid)),
        Some(session.refresh_token.clone()),
        // Already revoked by the previous iteration
        Some(session.refresh_token.clone()),
    ];

    for cookie in cookies {
        let mut builder = empty_request("POST", "/auth/logout");
        if let Some(token) = cookie {
            builder = builder.header(header::COOKIE, format!("rt={token}"));
        }
        let response = send(&app, builder.body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(set_cookie(response.headers()).unwrap().contains("Max-Age=0"));
    }
}

// --- Protected routes ---

#[tokio::test]
async fn test_protected_route_requires_bearer() {
    let (app, db) = create_test_app().await;
    let uuid = create_user(&db, "alice", UserRole::User).await;

    let response = send(
        &app,
        empty_request("GET", "/users/me").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let expired = expired_access_token(&uuid, "alice", UserRole::User);
    let response = send(&app, bearer_request("GET", "/users/me", &expired)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "expired");

    let session = login(&app, "alice").await;
    let response = send(&app, bearer_request("GET", "/users/me", &session.access_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["uuid"], uuid);
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_refresh_token_cannot_be_used_as_bearer() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let session = login(&app, "alice").await;

    let response = send(&app, bearer_request("GET", "/users/me", &session.refresh_token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let (app, _db) = create_test_app().await;

    let response = send(
        &app,
        empty_request("GET", "/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// --- Session management ---

#[tokio::test]
async fn test_list_sessions_marks_current() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let phone = login(&app, "alice").await;
    let laptop = login(&app, "alice").await;

    let mut request = bearer_request("GET", "/auth/sessions", &laptop.access_token);
    request.headers_mut().insert(
        header::COOKIE,
        format!("rt={}", laptop.refresh_token).parse().unwrap(),
    );
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(
        sessions
            .iter()
            .filter(|s| s["current"].as_bool() == Some(true))
            .count(),
        1
    );

    // Rotation replaces the entry instead of adding one
    send(&app, refresh_request(Some(&phone.refresh_token))).await;
    let response = send(
        &app,
        bearer_request("GET", "/auth/sessions", &laptop.access_token),
    )
    .await;
    assert_eq!(
        body_json(response).await["sessions"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_revoke_own_session() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    let phone = login(&app, "alice").await;
    let laptop = login(&app, "alice").await;

    let phone_id = portal_auth::jwt::TokenCodec::new(ACCESS_SECRET, REFRESH_SECRET)
        .verify_refresh(&phone.refresh_token)
        .unwrap()
        .jti;

    let response = send(
        &app,
        bearer_request(
            "DELETE",
            &format!("/auth/sessions/{phone_id}"),
            &laptop.access_token,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    let stored = db.sessions().find(&phone_id).await.unwrap().unwrap();
    assert_eq!(
        stored.revoked_reason.as_deref(),
        Some(RevokeReason::RevokedByUser.as_str())
    );

    let response = send(&app, refresh_request(Some(&phone.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = send(&app, refresh_request(Some(&laptop.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cannot_revoke_other_users_session() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::User).await;
    create_user(&db, "mallory", UserRole::User).await;
    let alice = login(&app, "alice").await;
    let mallory = login(&app, "mallory").await;

    let alice_id = portal_auth::jwt::TokenCodec::new(ACCESS_SECRET, REFRESH_SECRET)
        .verify_refresh(&alice.refresh_token)
        .unwrap()
        .jti;

    let response = send(
        &app,
        bearer_request(
            "DELETE",
            &format!("/auth/sessions/{alice_id}"),
            &mallory.access_token,
        ),
    )
    .await;
    assert_eq!(body_json(response).await["revoked"], false);

    let response = send(&app, refresh_request(Some(&alice.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// --- Admin ---

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let (app, db) = create_test_app().await;
    create_user(&db, "alice", UserRole::Editor).await;
    let session = login(&app, "alice").await;

    let response = send(&app, bearer_request("GET", "/users", &session.access_token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "insufficient_role");

    let response = send(
        &app,
        empty_request("GET", "/users").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_creates_and_lists_users() {
    let (app, db) = create_test_app().await;
    create_user(&db, "root", UserRole::Admin).await;
    let admin = login(&app, "root").await;

    let response = send(
        &app,
        bearer_json_request(
            "POST",
            "/users",
            &admin.access_token,
            serde_json::json!({
                "login": "bob",
                "displayName": "Bob Editor",
                "password": PASSWORD,
                "role": "editor"
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["login"], "bob");
    assert_eq!(created["role"], "editor");

    // New principal can log in
    login(&app, "bob").await;

    // Duplicate logins conflict regardless of case
    let response = send(
        &app,
        bearer_json_request(
            "POST",
            "/users",
            &admin.access_token,
            serde_json::json!({ "login": "BOB", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Weak passwords are refused
    let response = send(
        &app,
        bearer_json_request(
            "POST",
            "/users",
            &admin.access_token,
            serde_json::json!({ "login": "carol", "password": "short" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, bearer_request("GET", "/users", &admin.access_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let users = body_json(response).await;
    let logins: Vec<_> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["login"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(logins, vec!["root", "bob"]);
}

#[tokio::test]
async fn test_deactivation_revokes_sessions() {
    let (app, db) = create_test_app().await;
    create_user(&db, "root", UserRole::Admin).await;
    let alice_uuid = create_user(&db, "alice", UserRole::User).await;
    let admin = login(&app, "root").await;
    let first = login(&app, "alice").await;
    let second = login(&app, "alice").await;

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            &format!("/users/{alice_uuid}/active"),
            &admin.access_token,
            serde_json::json!({ "active": false }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revokedSessions"], 2);

    for token in [&first.refresh_token, &second.refresh_token] {
        let response = send(&app, refresh_request(Some(token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Reactivation does not resurrect old sessions, but allows a new login
    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            &format!("/users/{alice_uuid}/active"),
            &admin.access_token,
            serde_json::json!({ "active": true }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&app, refresh_request(Some(&first.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    login(&app, "alice").await;
}

#[tokio::test]
async fn test_admin_cannot_lock_themselves_out() {
    let (app, db) = create_test_app().await;
    let root_uuid = create_user(&db, "root", UserRole::Admin).await;
    let admin = login(&app, "root").await;

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            &format!("/users/{root_uuid}/active"),
            &admin.access_token,
            serde_json::json!({ "active": false }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            &format!("/users/{root_uuid}/role"),
            &admin.access_token,
            serde_json::json!({ "role": "user" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_changes_role() {
    let (app, db) = create_test_app().await;
    create_user(&db, "root", UserRole::Admin).await;
    let alice_uuid = create_user(&db, "alice", UserRole::User).await;
    let admin = login(&app, "root").await;

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            &format!("/users/{alice_uuid}/role"),
            &admin.access_token,
            serde_json::json!({ "role": "editor" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["role"], "editor");

    let user = db.users().get_by_uuid(&alice_uuid).await.unwrap().unwrap();
    assert_eq!(user.role, UserRole::Editor);

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            "/users/not-a-uuid/role",
            &admin.access_token,
            serde_json::json!({ "role": "editor" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        bearer_json_request(
            "PUT",
            "/users/6f1c1a52-5b7e-4a4b-9d7a-3f1e2d3c4b5a/role",
            &admin.access_token,
            serde_json::json!({ "role": "editor" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_signs_user_out_everywhere() {
    let (app, db) = create_test_app().await;
    create_user(&db, "root", UserRole::Admin).await;
    let alice_uuid = create_user(&db, "alice", UserRole::User).await;
    let admin = login(&app, "root").await;
    let alice = login(&app, "alice").await;

    let response = send(
        &app,
        bearer_request(
            "DELETE",
            &format!("/users/{alice_uuid}/sessions"),
            &admin.access_token,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], 1);

    let response = send(&app, refresh_request(Some(&alice.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The admin's own session is untouched
    let response = send(&app, refresh_request(Some(&admin.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}
