use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Request-path error with its HTTP mapping.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or incomplete request -> 400
    Validation(String),
    /// Unknown session, relationship, or agent -> 404
    NotFound(String),
    /// Graph or uniqueness invariant would break -> 409
    Constraint(String),
    /// Durable store failure -> 500
    Persistence(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Constraint(_) => StatusCode::CONFLICT,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Validation(m)
            | ApiError::NotFound(m)
            | ApiError::Constraint(m)
            | ApiError::Persistence(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.message(), "request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl From<hivetrace_store::Error> for ApiError {
    fn from(err: hivetrace_store::Error) -> Self {
        match err {
            hivetrace_store::Error::NotFound(m) => ApiError::NotFound(m),
            hivetrace_store::Error::Constraint(m) => ApiError::Constraint(m),
            other => ApiError::Persistence(other.to_string()),
        }
    }
}

impl From<hivetrace_relations::Error> for ApiError {
    fn from(err: hivetrace_relations::Error) -> Self {
        match err {
            hivetrace_relations::Error::Cycle(m) => ApiError::Constraint(m),
            hivetrace_relations::Error::NotFound(m) => ApiError::NotFound(m),
            hivetrace_relations::Error::Store(e) => ApiError::from(e),
        }
    }
}

impl From<hivetrace_metrics::Error> for ApiError {
    fn from(err: hivetrace_metrics::Error) -> Self {
        match err {
            hivetrace_metrics::Error::UnknownAgent(id) => {
                ApiError::NotFound(format!("agent {}", id))
            }
            hivetrace_metrics::Error::Store(e) => ApiError::from(e),
        }
    }
}
