use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// The error taxonomy from spec.md §7. Variants carry only what's
/// needed to render the uniform envelope — never enough detail to let
/// a caller distinguish "token unknown" from "token expired" (§4.3).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::Forbidden => "forbidden",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rewrite a REST-shaped error into the one a git Smart-HTTP
    /// response must carry: any auth failure on a git path is a 401
    /// with `WWW-Authenticate`, never a 403 (spec.md §4.6, §7). Note
    /// this does NOT touch `NotFound` — the git gate itself decides,
    /// case by case, which not-found conditions must be folded into a
    /// 401 to avoid leaking repo existence (spec.md §4.4) and which (an
    /// unrecognized, non-`.git` path) are genuinely a 404.
    pub fn for_git_transport(self) -> Self {
        match self {
            CoreError::Forbidden => CoreError::Unauthenticated,
            other => other,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if err.code == rusqlite::ErrorCode::ConstraintViolation {
                return CoreError::Conflict("already exists".to_string());
            }
        }
        CoreError::Internal(e.to_string())
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        CoreError::Internal(format!("db pool error: {e}"))
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

/// Git Smart-HTTP responses to an auth failure must carry
/// `WWW-Authenticate: Basic` so command-line git prompts for, and a
/// credential helper can supply, stored credentials (spec.md §4.6).
pub fn git_www_authenticate_response(err: CoreError) -> Response {
    let err = err.for_git_transport();
    let mut resp = err.into_response();
    if resp.status() == StatusCode::UNAUTHORIZED {
        resp.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="Ephemeral""#),
        );
    }
    resp
}
