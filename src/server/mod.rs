pub mod envelope;
pub mod handlers_admin;
pub mod handlers_auth;
pub mod handlers_repo;

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::git::{GitBackend, git_gate};
use crate::store::Store;

/// Shared application state, handed to every handler through axum's
/// `State` extractor (teacher's `AppState` did the same for its
/// ShareLatex-specific locks; this one carries the forge's core
/// dependencies instead).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub git_backend: Arc<dyn GitBackend>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>, git_backend: Arc<dyn GitBackend>) -> Self {
        Self {
            store,
            config,
            git_backend,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/auth/config", get(handlers_auth::get_config))
        .route("/auth/sessions", post(handlers_auth::create_session))
        .route("/auth/sessions/{id}", get(handlers_auth::poll_session))
        .route(
            "/auth/sessions/{id}/complete",
            post(handlers_auth::complete_session),
        )
        .route("/namespaces", get(handlers_repo::list_namespaces))
        .route(
            "/namespaces/{namespace}/repos",
            post(handlers_repo::create_repo),
        )
        .route(
            "/admin/namespaces",
            get(handlers_admin::list_namespaces).post(handlers_admin::create_namespace),
        )
        .route(
            "/admin/namespaces/{id}",
            delete(handlers_admin::delete_namespace),
        )
        .route(
            "/admin/tokens",
            get(handlers_admin::list_tokens).post(handlers_admin::create_token),
        )
        .route("/admin/tokens/{id}", delete(handlers_admin::delete_token))
        .route(
            "/admin/tokens/{id}/namespace-grants/{ns_id}",
            put(handlers_admin::upsert_namespace_grant)
                .delete(handlers_admin::delete_namespace_grant),
        )
        .route(
            "/admin/tokens/{id}/repo-grants/{repo_id}",
            put(handlers_admin::upsert_repo_grant).delete(handlers_admin::delete_repo_grant),
        )
        .route("/git/{namespace}/{*repo_and_tail}", axum::routing::any(git_gate))
        .layer(middleware::from_fn(attach_cancellation_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Thread a `CancellationToken` through request extensions so
/// `git_gate` has a place to race the backend call against a disconnect
/// (spec.md §5 — a disconnected push must not record `last_push_at`).
/// Nothing here fires the token yet; a future connection-level hook
/// (e.g. a hyper `on_closed` callback) would call `.cancel()` on it.
/// Until then, a body-read failure during upload is the gate's own
/// signal that the client went away.
async fn attach_cancellation_token(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(CancellationToken::new());
    next.run(req).await
}

async fn health() -> &'static str {
    "ok\n"
}
