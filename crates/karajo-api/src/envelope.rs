//! The control plane's uniform JSON response shape: `{code, message?, data?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Envelope {
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Envelope {
    pub fn ok(data: impl Serialize) -> Response {
        let body = Envelope {
            code: 200,
            message: None,
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
        };
        (StatusCode::OK, Json(body)).into_response()
    }

    pub fn ok_empty() -> Response {
        let body = Envelope { code: 200, message: None, data: None };
        (StatusCode::OK, Json(body)).into_response()
    }
}
