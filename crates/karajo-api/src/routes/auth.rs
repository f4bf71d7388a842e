use axum::extract::State;
use axum::response::Response;
use axum::{routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::json;

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::session::COOKIE_NAME;
use crate::state::AppState;
use karajo_core::Error;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

/// Verifies `name`/`password` against the configured users and, on success,
/// sets the `karajo` session cookie.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Response), ApiError> {
    let user = state
        .env
        .users
        .iter()
        .find(|u| u.name == payload.name)
        .ok_or_else(|| Error::bad_request("invalid credentials"))?;

    let verified = bcrypt::verify(&payload.password, &user.password_hash)
        .map_err(|e| Error::internal(format!("bcrypt verification failed: {e}")))?;
    if !verified {
        return Err(Error::bad_request("invalid credentials").into());
    }

    let token = state.sessions.create(&user.name);
    let cookie = Cookie::build((COOKIE_NAME, token)).path("/").http_only(true).build();
    let jar = jar.add(cookie);

    Ok((jar, Envelope::ok(json!({ "name": user.name }))))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Response) {
    if let Some(cookie) = jar.get(COOKIE_NAME) {
        state.sessions.revoke(cookie.value());
    }
    let jar = jar.remove(Cookie::from(COOKIE_NAME));
    (jar, Envelope::ok_empty())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}
