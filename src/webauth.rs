use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::store::Store;
use crate::types::{WebAuthSession, WebAuthStatus};

/// How long a browser-assisted login handoff stays open before a poll
/// sees it as expired (spec.md §4.5).
pub const SESSION_TTL_SECONDS: i64 = 300;

/// Sweeper cadence; spec.md §5 only requires "at least once a minute".
const SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Start a pending session for the CLI to poll (spec.md §4.5 step 1).
/// `requested_ttl_seconds` lets a caller shorten (or lengthen) the
/// default window — e.g. an end-to-end test that wants a session to
/// expire almost immediately (spec.md §6 scenario 6). A non-positive
/// value is treated as "not specified" and falls back to the default.
pub fn create_session(
    store: &dyn Store,
    requested_ttl_seconds: Option<i64>,
) -> Result<WebAuthSession, CoreError> {
    let now = Utc::now();
    let ttl = requested_ttl_seconds
        .filter(|&secs| secs > 0)
        .unwrap_or(SESSION_TTL_SECONDS);
    let session = WebAuthSession {
        id: Uuid::new_v4().to_string(),
        status: WebAuthStatus::Pending,
        token: None,
        expires_at: now + chrono::Duration::seconds(ttl),
        created_at: now,
    };
    store.create_web_auth_session(&session)?;
    Ok(session)
}

/// The browser-side completion step: mint nothing here, just attach the
/// already-minted token to the session if (and only if) it is still
/// pending. Returns `false` on a stale session so the caller can
/// distinguish "already used" from a genuine error (spec.md §4.5 step
/// 3, §5 atomicity requirement).
pub fn complete_session(store: &dyn Store, id: &str, token_secret: &str) -> Result<bool, CoreError> {
    store.complete_web_auth_session(id, token_secret)
}

#[derive(Debug)]
pub enum PollOutcome {
    Pending,
    /// Carries the token secret exactly once — the row backing this
    /// session is deleted as part of producing this value
    /// (SPEC_FULL.md §9 resolution: delete-on-read, not null-on-read).
    Completed(String),
    Expired,
    NotFound,
}

/// The CLI side of the handoff: poll until completed or expired
/// (spec.md §4.5 step 4).
pub fn poll(store: &dyn Store, id: &str) -> Result<PollOutcome, CoreError> {
    if let Some(session) = store.take_completed_web_auth_session(id)? {
        let token = session
            .token
            .ok_or_else(|| CoreError::Internal("completed session missing token".to_string()))?;
        return Ok(PollOutcome::Completed(token));
    }

    let now = Utc::now();
    match store.get_web_auth_session(id)? {
        None => Ok(PollOutcome::NotFound),
        Some(session) if session.expires_at <= now => Ok(PollOutcome::Expired),
        Some(_) => Ok(PollOutcome::Pending),
    }
}

/// Background task that deletes expired sessions so a leaked id can't
/// be polled indefinitely (spec.md §4.5, §5). Runs until `cancel` fires.
pub fn spawn_sweeper(store: Arc<dyn Store>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECONDS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.sweep_expired_web_auth_sessions(Utc::now())).await {
                        Ok(Ok(n)) if n > 0 => info!(swept = n, "expired web-auth sessions removed"),
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "web-auth sweep failed"),
                        Err(e) => warn!(error = %e, "web-auth sweep task panicked"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("web-auth sweeper shutting down");
                    break;
                }
            }
        }
    })
}
