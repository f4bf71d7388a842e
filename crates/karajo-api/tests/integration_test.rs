//! Integration tests for the control plane.
//!
//! These drive the real `axum::Router` built by `create_router` with
//! `tower::ServiceExt::oneshot`, in-process and with no network listener —
//! the same router the binary serves, just without `TcpListener::bind`.
//!
//! Run with: cargo test --test integration_test

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use karajo_api::state::AppState;
use karajo_api::routes::create_router;
use karajo_core::jobs::webhook_auth::hmac_sha256_hex;
use karajo_core::{build_manager, Env};

/// Writes a minimal config to a tempdir and wires up a live `AppState`, the
/// same two calls `karajo-cli`'s `run()` makes before handing the router to
/// `axum::serve`.
fn test_state(extra: &str) -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("karajo.conf");
    std::fs::write(
        &path,
        format!(
            r#"
[karajo]
listen_address = 127.0.0.1:0
secret = integration-test-secret

[job "noop"]
command = /bin/true
"#
        ) + extra,
    )
    .unwrap();

    let env = Env::load(&path.to_string_lossy()).unwrap();
    let manager = build_manager(&env).unwrap();
    let state = AppState::new(Arc::new(env), Arc::new(manager));
    (dir, state)
}

async fn send(router: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn health_check_is_unauthenticated() {
    let (_dir, state) = test_state("");
    let router = create_router(state);

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn environment_is_readable_without_login_when_no_users_configured() {
    let (_dir, state) = test_state("");
    let router = create_router(state);

    let req = Request::builder().uri("/karajo/api/environment").body(Body::empty()).unwrap();
    let (status, body) = send(router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["jobs"]["exec"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn job_exec_listing_and_single_lookup() {
    let (_dir, state) = test_state("");
    let router = create_router(state);

    let req = Request::builder().uri("/karajo/api/job_exec/noop").body(Body::empty()).unwrap();
    let (status, body) = send(router.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "noop");

    let req = Request::builder().uri("/karajo/api/job_exec/no-such-job").body(Body::empty()).unwrap();
    let (status, _) = send(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_surface_requires_session_cookie_once_users_are_configured() {
    let hash = bcrypt::hash("s3cret", bcrypt::DEFAULT_COST).unwrap();
    let (_dir, mut state) = test_state("");
    // `[user "..."]` is easier to add to the live Env than to re-serialize
    // into the INI file, and Env's fields are all public for exactly this.
    let env = Arc::new(Env {
        users: vec![karajo_core::env::User { name: "admin".to_string(), password_hash: hash }],
        ..(*state.env).clone()
    });
    state.env = env;
    let router = create_router(state);

    let req = Request::builder().uri("/karajo/api/job_exec").body(Body::empty()).unwrap();
    let (status, _) = send(router.clone(), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let login_body = json!({ "name": "admin", "password": "s3cret" }).to_string();
    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(login_body))
        .unwrap();
    let response = router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("login sets a session cookie")
        .to_string();

    let req = Request::builder()
        .uri("/karajo/api/job_exec")
        .header("cookie", cookie)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let hash = bcrypt::hash("s3cret", bcrypt::DEFAULT_COST).unwrap();
    let (_dir, mut state) = test_state("");
    let env = Arc::new(Env {
        users: vec![karajo_core::env::User { name: "admin".to_string(), password_hash: hash }],
        ..(*state.env).clone()
    });
    state.env = env;
    let router = create_router(state);

    let login_body = json!({ "name": "admin", "password": "wrong" }).to_string();
    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(login_body))
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pause_requires_a_valid_signature() {
    let (_dir, state) = test_state("");
    let secret = state.env.secret.clone();
    let router = create_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/job_exec/pause?id=noop")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router.clone(), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signature = hmac_sha256_hex(&secret, b"id=noop");
    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/job_exec/pause?id=noop")
        .header("X-Karajo-Sign", signature)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn manual_trigger_works_regardless_of_the_jobs_own_webhook_scheme() {
    let (_dir, state) = test_state(
        r#"
[job "gh"]
path = /gh
auth_kind = github
command = /bin/true
"#,
    );
    let router = create_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/job_exec/gh/trigger")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_endpoint_rejects_an_unsigned_request() {
    let (_dir, state) = test_state(
        r#"
[job "gh"]
path = /gh
auth_kind = github
command = /bin/true
"#,
    );
    let router = create_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/karajo/api/job_exec/run/gh")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(router, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (_dir, state) = test_state("");
    let router = create_router(state);

    let req = Request::builder().uri("/not-a-route").body(Body::empty()).unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
