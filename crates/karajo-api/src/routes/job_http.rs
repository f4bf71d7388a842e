use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;
use karajo_core::Error;

pub async fn list(State(state): State<AppState>) -> Response {
    let jobs: Vec<_> = state.manager.http_jobs().iter().map(|j| j.snapshot()).collect();
    Envelope::ok(jobs)
}

pub async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job = state.manager.http_job(&id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
    Ok(Envelope::ok(job.snapshot()))
}

#[derive(Deserialize)]
pub struct IdQuery {
    id: String,
}

pub async fn pause(State(state): State<AppState>, Query(q): Query<IdQuery>) -> Result<Response, ApiError> {
    state.manager.pause("http", &q.id)?;
    Ok(Envelope::ok_empty())
}

pub async fn resume(State(state): State<AppState>, Query(q): Query<IdQuery>) -> Result<Response, ApiError> {
    state.manager.resume("http", &q.id)?;
    Ok(Envelope::ok_empty())
}

pub async fn trigger(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job = state.manager.http_job(&id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
    let snapshot = job.trigger()?;
    Ok(Envelope::ok(snapshot))
}

#[derive(Deserialize)]
pub struct LogQuery {
    id: String,
    counter: i64,
}

pub async fn log(State(state): State<AppState>, Query(q): Query<LogQuery>) -> Result<Response, ApiError> {
    let job = state.manager.http_job(&q.id).ok_or_else(|| Error::not_found(format!("job {}", q.id)))?;
    let content = job
        .base
        .read_log(q.counter)?
        .ok_or_else(|| Error::not_found(format!("log {}.{}", q.id, q.counter)))?;
    Ok(Envelope::ok(String::from_utf8_lossy(&content).into_owned()))
}

/// Cookie-gated read surface: listings, single-job snapshot, and log fetch.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job_http", get(list))
        .route("/job_http/:id", get(get_one))
        .route("/job_http/log", get(log))
        .route("/job_http/:id/trigger", post(trigger))
}

/// Signature-gated mutations: pause/resume. Job id is a query parameter
/// (`?id=`), matching the control plane's `log` endpoint and `job_exec`'s
/// equivalents.
pub fn mutation_router() -> Router<AppState> {
    Router::new()
        .route("/job_http/pause", post(pause))
        .route("/job_http/resume", post(resume))
}
