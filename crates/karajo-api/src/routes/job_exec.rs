use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;
use karajo_core::Error;

pub async fn list(State(state): State<AppState>) -> Response {
    let jobs: Vec<_> = state.manager.exec_jobs().iter().map(|j| j.snapshot()).collect();
    Envelope::ok(jobs)
}

pub async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job = state.manager.exec_job(&id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
    Ok(Envelope::ok(job.snapshot()))
}

#[derive(Deserialize)]
pub struct IdQuery {
    id: String,
}

pub async fn pause(State(state): State<AppState>, Query(q): Query<IdQuery>) -> Result<Response, ApiError> {
    state.manager.pause("exec", &q.id)?;
    Ok(Envelope::ok_empty())
}

pub async fn resume(State(state): State<AppState>, Query(q): Query<IdQuery>) -> Result<Response, ApiError> {
    state.manager.resume("exec", &q.id)?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
pub struct LogQuery {
    id: String,
    counter: i64,
}

/// `GET /karajo/api/job_exec/log?id=&counter=` — loads the log's content
/// from disk if it isn't already in memory (`JobLog::load`'s lazy-fetch
/// contract applied at the control-plane boundary).
pub async fn log(State(state): State<AppState>, Query(q): Query<LogQuery>) -> Result<Response, ApiError> {
    let job = state.manager.exec_job(&q.id).ok_or_else(|| Error::not_found(format!("job {}", q.id)))?;
    let content = job
        .base
        .read_log(q.counter)?
        .ok_or_else(|| Error::not_found(format!("log {}.{}", q.id, q.counter)))?;
    Ok(Envelope::ok(String::from_utf8_lossy(&content).into_owned()))
}

/// Manually fires a job from the control plane. The session cookie already
/// gates this endpoint, so it bypasses the job's own webhook auth scheme
/// rather than trying to satisfy it.
pub async fn trigger(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job = state.manager.exec_job(&id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
    let snapshot = job.trigger_manual()?;
    Ok(Envelope::ok(snapshot))
}

/// `POST /karajo/api/job_exec/run/<path>` — the inbound webhook endpoint a
/// job is mounted at via its own configured `path`. Unlike the rest of this
/// router, never gated by the session cookie: authorization is the job's
/// own signature scheme (github/sourcehut/hmac-sha256).
pub async fn run_by_path(
    State(state): State<AppState>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let path = uri.path().trim_start_matches("/karajo/api/job_exec/run");
    let job = state
        .manager
        .exec_job_by_path(path)
        .ok_or_else(|| Error::not_found(format!("no job registered at path {path}")))?;
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let snapshot = job.trigger_webhook(&header_map, body.to_vec())?;
    Ok(Envelope::ok(snapshot))
}

/// Cookie-gated read surface: listings, single-job snapshot, and log fetch.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job_exec", get(list))
        .route("/job_exec/:id", get(get_one))
        .route("/job_exec/log", get(log))
        .route("/job_exec/:id/trigger", post(trigger))
}

/// Signature-gated mutations: pause/resume, verified by `X-Karajo-Sign`
/// against `env.secret` rather than the session cookie. Job id is a query
/// parameter (`?id=`), matching the control plane's `log` endpoint rather
/// than a path segment.
pub fn mutation_router() -> Router<AppState> {
    Router::new()
        .route("/job_exec/pause", post(pause))
        .route("/job_exec/resume", post(resume))
}

/// The job's own webhook surface, mounted outside both gates above.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/job_exec/run/*path", post(run_by_path))
}
