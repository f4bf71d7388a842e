//! Maps `karajo_core::Error` onto axum responses using the status/category
//! taxonomy the core crate already computes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use karajo_core::Error;
use serde::Serialize;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    error: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message: self.0.to_string(),
            error: self.0.category(),
        });
        (status, body).into_response()
    }
}
