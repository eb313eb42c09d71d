use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::webauth::{self, PollOutcome};

use super::AppState;
use super::envelope::ok;

#[derive(Serialize)]
pub struct AuthConfigResponse {
    web_auth_enabled: bool,
    web_auth_url: Option<String>,
}

/// Tells a CLI whether browser-assisted login is available and, if so,
/// where to send the user (spec.md §4.5 step 1, §6).
pub async fn get_config(State(state): State<AppState>) -> Response {
    ok(AuthConfigResponse {
        web_auth_enabled: state.config.auth.web_auth_url.is_some(),
        web_auth_url: state.config.auth.web_auth_url.clone(),
    })
}

#[derive(Serialize)]
pub struct SessionCreated {
    id: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    expires_in_seconds: Option<i64>,
}

/// The body is optional — a plain `POST` with no content at all keeps
/// the default TTL (spec.md §4.5 step 1); a caller that wants to
/// override it sends `{"expires_in_seconds": N}` (spec.md §6 scenario 6).
pub async fn create_session(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Response, CoreError> {
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid request body: {e}")))?
    };

    let store = state.store.clone();
    let ttl = request.expires_in_seconds;
    let session = tokio::task::spawn_blocking(move || webauth::create_session(store.as_ref(), ttl))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    Ok(ok(SessionCreated {
        id: session.id,
        expires_at: session.expires_at,
    }))
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PollResponse {
    Pending,
    Completed { token: String },
    Expired,
}

pub async fn poll_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoreError> {
    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || webauth::poll(store.as_ref(), &id))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    match outcome {
        PollOutcome::Pending => Ok(ok(PollResponse::Pending)),
        PollOutcome::Completed(token) => Ok(ok(PollResponse::Completed { token })),
        PollOutcome::Expired => Err(CoreError::NotFound("session expired".to_string())),
        PollOutcome::NotFound => Err(CoreError::NotFound("session not found".to_string())),
    }
}

#[derive(Deserialize)]
pub struct CompleteSessionRequest {
    token: String,
}

/// Internal endpoint: called by the web-auth frontend after it has
/// minted a token on the user's behalf, never directly by the CLI.
/// Gated by a shared secret rather than a token, since the caller here
/// isn't a forge principal at all (spec.md §4.5 step 3, §6).
pub async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteSessionRequest>,
) -> Result<Response, CoreError> {
    let expected = state
        .config
        .auth
        .exchange_secret
        .as_deref()
        .ok_or_else(|| CoreError::Internal("exchange secret not configured".to_string()))?;

    let presented = headers
        .get("X-Exchange-Secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(CoreError::Unauthenticated)?;

    use subtle::ConstantTimeEq;
    if presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return Err(CoreError::Unauthenticated);
    }

    let store = state.store.clone();
    let completed = tokio::task::spawn_blocking(move || {
        webauth::complete_session(store.as_ref(), &id, &body.token)
    })
    .await
    .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    if completed {
        Ok((StatusCode::NO_CONTENT).into_response())
    } else {
        Err(CoreError::Conflict(
            "session already completed or expired".to_string(),
        ))
    }
}
