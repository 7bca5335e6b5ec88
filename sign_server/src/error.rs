//! Error handling for the sign server.
//!
//! Only configuration problems and unusable sources fail a request. Everything that goes
//! wrong for a single frame is a [`crate::source::FrameError`] and stays inside the engine.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::decision::ErrorResponse;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed thresholds or limits, detected before any frame is processed.
    #[error("Config error: {0}")]
    Config(String),

    /// The frame source or classifier cannot be initialised.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The request itself is unusable (e.g. no upload).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::SourceUnavailable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "SOURCE_UNAVAILABLE"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        log::error!("Request failed with {} ({}): {}", status, error_code, message);

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_owned(),
        });

        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("engine task failed: {err}"))
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                Error::SourceUnavailable("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (Error::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
