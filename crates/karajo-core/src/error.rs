use thiserror::Error;

/// Crate-wide error type.
///
/// Variants map onto the error taxonomy by semantic category rather than by
/// concrete cause: `status_code()`/`category()` are what the control plane
/// uses to build a JSON envelope, so a new failure mode should be folded into
/// an existing variant unless it genuinely needs its own HTTP status.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or mismatching signature on a mutating control-plane call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Webhook auth check failed (github/sourcehut/hmac-sha256).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Empty/unknown user or password, invalid job id, malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown job id or counter.
    #[error("not found: {0}")]
    NotFound(String),

    /// Webhook admission rejected because the job's trigger queue is full.
    #[error("already running: {0}")]
    AlreadyRunning(String),

    /// Attempt to trigger a paused job, when surfaced as an error rather
    /// than a no-op skipped log.
    #[error("paused: {0}")]
    Paused(String),

    /// Configuration is malformed or fails validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected I/O failure (log files, directory creation, ...).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound HTTP request failure (JobHTTP).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anything else that doesn't crash the process but isn't one of the above.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        Error::Forbidden(msg.into())
    }

    pub fn bad_request<T: Into<String>>(msg: T) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn already_running<T: Into<String>>(msg: T) -> Self {
        Error::AlreadyRunning(msg.into())
    }

    pub fn paused<T: Into<String>>(msg: T) -> Self {
        Error::Paused(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Error::Internal(msg.into())
    }

    /// HTTP status code per the error taxonomy.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::AlreadyRunning(_) => 429,
            Error::Paused(_) => 412,
            Error::Config(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Http(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Category string for monitoring/logging, matching the taxonomy name.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::BadRequest(_) => "bad-request",
            Error::NotFound(_) => "not-found",
            Error::AlreadyRunning(_) => "already-running",
            Error::Paused(_) => "paused",
            Error::Config(_) => "config",
            Error::Io(_) => "internal",
            Error::Serialization(_) => "internal",
            Error::Http(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(Error::unauthorized("x").status_code(), 401);
        assert_eq!(Error::forbidden("x").status_code(), 403);
        assert_eq!(Error::bad_request("x").status_code(), 400);
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::already_running("x").status_code(), 429);
        assert_eq!(Error::paused("x").status_code(), 412);
        assert_eq!(Error::internal("x").status_code(), 500);
    }

    #[test]
    fn category_strings_are_stable() {
        assert_eq!(Error::forbidden("x").category(), "forbidden");
        assert_eq!(Error::already_running("x").category(), "already-running");
    }
}
