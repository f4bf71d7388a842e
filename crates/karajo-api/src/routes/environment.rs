//! Reports the running environment: listen address, concurrency limit, and
//! a summary of every configured job.

use axum::extract::State;
use axum::response::Response;
use axum::{routing::get, Router};
use serde_json::json;

use crate::envelope::Envelope;
use crate::state::AppState;

/// `GET /karajo/api/environment` — a point-in-time snapshot of every
/// configured job. Compression (and therefore `Content-Encoding: gzip` on
/// this often-large payload) is applied uniformly by the router's
/// `CompressionLayer`, not here.
pub async fn get_environment(State(state): State<AppState>) -> Response {
    let exec_jobs: Vec<_> = state.manager.exec_jobs().iter().map(|j| j.snapshot()).collect();
    let http_jobs: Vec<_> = state.manager.http_jobs().iter().map(|j| j.snapshot()).collect();

    Envelope::ok(json!({
        "listen_address": state.env.listen_address,
        "max_job_running": state.env.max_job_running,
        "available_permits": state.manager.gate.available_permits(),
        "jobs": { "exec": exec_jobs, "http": http_jobs },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/environment", get(get_environment))
}
