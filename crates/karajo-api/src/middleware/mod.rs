//! Two authorization gates for the control plane:
//!
//! - `session_auth_middleware`: the `karajo` session cookie, applied to
//!   read endpoints (`environment`, job listings, logs). A no-op when no
//!   `[user "..."]` sections are configured — an operator who hasn't set up
//!   accounts gets an open read surface rather than a permanently locked one.
//! - `mutation_signature_middleware`: `X-Karajo-Sign` = HMAC-SHA-256 of the
//!   raw request body under `env.secret`, applied to pause/resume. Inbound
//!   job webhooks are never routed through either — they carry their own
//!   per-job signature scheme instead (see `webhook_auth`).

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::session::COOKIE_NAME;
use crate::state::AppState;
use karajo_core::jobs::webhook_auth::{constant_time_eq, hmac_sha256_hex};

const SIGNATURE_HEADER: &str = "X-Karajo-Sign";

pub async fn session_auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.env.users.is_empty() {
        return Ok(next.run(request).await);
    }

    let token = jar.get(COOKIE_NAME).map(|c| c.value().to_string());

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    if state.sessions.user_for(&token).is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Verifies `X-Karajo-Sign` against `HMAC-SHA256(env.secret, rawBody)`, or
/// against the raw query string when the body is empty (pause/resume carry
/// their job id as `?id=` with no body), before letting a mutating call
/// through. The body is buffered to compute the signature and then
/// reattached to the request.
pub async fn mutation_signature_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let given = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(given) = given else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };

    let signed = if bytes.is_empty() {
        parts.uri.query().unwrap_or_default().as_bytes()
    } else {
        bytes.as_ref()
    };
    let expected = hmac_sha256_hex(&state.env.secret, signed);
    if !constant_time_eq(&given, &expected) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, Body::from(Bytes::from(bytes)));
    Ok(next.run(request).await)
}
