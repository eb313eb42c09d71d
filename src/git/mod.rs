pub mod cgi_backend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use cgi_backend::CgiGitBackend;

use crate::auth::permission::allowed;
use crate::auth::resolver::authenticate_headers;
use crate::error::{CoreError, git_www_authenticate_response};
use crate::server::AppState;
use crate::store::Store;
use crate::types::{Permission, Repo, Scope};
use crate::validation::validate_name;

/// Everything `GitBackend::handle` needs, independent of how it's
/// actually delivered (CGI subprocess today; a future backend could
/// speak the protocol directly).
pub struct GitRequestContext {
    pub method: Method,
    pub path_info: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    pub remote_user: String,
    pub body: Vec<u8>,
}

pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// The seam between the auth gate and actual git plumbing. Storage and
/// pack transfer are out of this crate's scope (spec.md Non-goals) —
/// this trait only describes how the gate hands a pre-authorized
/// request to whatever serves it.
pub trait GitBackend: Send + Sync {
    fn handle(
        &self,
        project_root: &Path,
        ctx: &GitRequestContext,
    ) -> Result<BackendResponse, CoreError>;

    /// Idempotently make sure a bare repo exists on disk at `repo_path`.
    fn ensure_repo(&self, repo_path: &Path) -> Result<(), CoreError>;
}

/// `service=git-receive-pack` (or a path ending in it) is a push;
/// everything else served under `/info/refs` or `/git-upload-pack` is a
/// read (spec.md §4.4, §4.6).
fn requested_permission(path_tail: &str, query: Option<&str>) -> Permission {
    let is_receive_pack = path_tail.ends_with("git-receive-pack")
        || query
            .map(|q| q.contains("service=git-receive-pack"))
            .unwrap_or(false);
    if is_receive_pack {
        Permission::RepoWrite
    } else {
        Permission::RepoRead
    }
}

async fn run_store<T, F>(store: Arc<dyn Store>, f: F) -> Result<T, CoreError>
where
    F: FnOnce(&dyn Store) -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))?
}

/// The git Smart-HTTP route: `/git/{namespace}/{repo}.git/{..service path}`.
/// Only paths with the literal `.git` suffix are routed here — anything
/// else 404s before auth even runs (SPEC_FULL.md §9, resolved open
/// question on `.git` canonicalization).
pub async fn git_gate(
    State(state): State<AppState>,
    axum::extract::Path((namespace, repo_and_tail)): axum::extract::Path<(String, String)>,
    req: axum::extract::Request,
) -> Response {
    match git_gate_inner(state, namespace, repo_and_tail, req).await {
        Ok(resp) => resp,
        Err(e) => git_www_authenticate_response(e),
    }
}

async fn git_gate_inner(
    state: AppState,
    namespace: String,
    repo_and_tail: String,
    req: axum::extract::Request,
) -> Result<Response, CoreError> {
    let mut segments = repo_and_tail.splitn(2, '/');
    let first = segments.next().unwrap_or("");
    let tail = segments.next().unwrap_or("");

    let repo_name = first
        .strip_suffix(".git")
        .ok_or_else(|| CoreError::NotFound("not a git path".to_string()))?
        .to_string();

    validate_name(&namespace)?;
    validate_name(&repo_name)?;

    let method = req.method().clone();
    let query = req.uri().query().map(|s| s.to_string());
    let content_type = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let cancel = req
        .extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default();

    // Authenticate before paying for reading the (possibly large) pack
    // body.
    let peer = req
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0);
    let auth = authenticate_headers(&state, req.headers(), peer).await?;

    let body = axum::body::to_bytes(req.into_body(), 512 * 1024 * 1024)
        .await
        .map_err(|e| CoreError::InvalidArgument(format!("reading request body: {e}")))?;

    // --- Resolve namespace/repo ---
    // A missing namespace/repo is reported the same way as "no grant" (401,
    // not 404) so a caller can't use existence to enumerate private repos
    // once it has a valid-but-unauthorized token (spec.md §4.4).
    let ns = {
        let store = state.store.clone();
        let namespace = namespace.clone();
        run_store(store, move |s| s.get_namespace_by_name(&namespace)).await?
    }
    .ok_or(CoreError::Unauthenticated)?;

    let requested = requested_permission(tail, query.as_deref());

    let existing_repo = {
        let store = state.store.clone();
        let ns_id = ns.id.clone();
        let repo_name = repo_name.clone();
        run_store(store, move |s| s.get_repo_by_name(&ns_id, &repo_name)).await?
    };

    let repo_id = match existing_repo {
        Some(r) => r.id,
        None if requested == Permission::RepoWrite => {
            // First push lazily creates the repo row, the same way
            // `git init --bare` lazily creates the directory on disk.
            let new_repo = Repo {
                id: uuid::Uuid::new_v4().to_string(),
                namespace_id: ns.id.clone(),
                name: repo_name.clone(),
                description: None,
                public: false,
                size_bytes: 0,
                last_push_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let store = state.store.clone();
            let to_insert = new_repo.clone();
            run_store(store, move |s| s.create_repo(&to_insert)).await?;
            new_repo.id
        }
        None => return Err(CoreError::Unauthenticated),
    };

    let scope = Scope::Repo {
        namespace_id: ns.id.clone(),
        repo_id: repo_id.clone(),
    };

    let namespace_grant = {
        let store = state.store.clone();
        let token_id = auth.token.id.clone();
        let ns_id = ns.id.clone();
        run_store(store, move |s| s.get_namespace_grant(&token_id, &ns_id)).await?
    };
    let repo_grant = {
        let store = state.store.clone();
        let token_id = auth.token.id.clone();
        let repo_id = repo_id.clone();
        run_store(store, move |s| s.get_repo_grant(&token_id, &repo_id)).await?
    };

    if !allowed(
        auth.is_admin(),
        &scope,
        requested,
        namespace_grant.as_ref(),
        repo_grant.as_ref(),
    ) {
        return Err(CoreError::Forbidden.for_git_transport());
    }

    // --- Delegate to the backend ---
    let repo_path = repo_disk_path(&state.config.data_dir, &namespace, &repo_name);
    state.git_backend.ensure_repo(&repo_path)?;

    let ctx = GitRequestContext {
        method,
        path_info: format!("/{first}/{tail}"),
        query,
        content_type,
        content_length: Some(body.len()),
        remote_user: auth.token.id.clone(),
        body: body.to_vec(),
    };

    let backend = Arc::clone(&state.git_backend);
    let project_root = repo_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.data_dir.clone());
    let cancel_for_task = cancel.clone();

    let result = tokio::select! {
        res = tokio::task::spawn_blocking(move || backend.handle(&project_root, &ctx)) => {
            res.map_err(|e| CoreError::Internal(format!("join error: {e}")))??
        }
        _ = cancel_for_task.cancelled() => {
            info!(repo = %repo_name, "git request cancelled by client disconnect");
            return Ok(StatusCode::OK.into_response());
        }
    };

    if requested == Permission::RepoWrite {
        let store = state.store.clone();
        let now = Utc::now();
        let size_bytes = dir_size(&repo_path).unwrap_or(0);
        let repo_id = repo_id.clone();
        if let Err(e) = run_store(store, move |s| s.record_push(&repo_id, now, size_bytes)).await
        {
            warn!(error = %e, "failed to record push");
        }
    }

    let mut response = Response::builder().status(result.status);
    if let Some(headers_mut) = response.headers_mut() {
        for (name, value) in result.headers.iter() {
            headers_mut.append(name.clone(), value.clone());
        }
    }
    Ok(response
        .body(Body::from(result.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

fn repo_disk_path(data_dir: &Path, namespace: &str, repo_name: &str) -> PathBuf {
    data_dir
        .join("repos")
        .join(namespace)
        .join(format!("{repo_name}.git"))
}

fn dir_size(path: &Path) -> std::io::Result<i64> {
    let mut total: i64 = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                total += dir_size(&entry.path())?;
            } else {
                total += meta.len() as i64;
            }
        }
    }
    Ok(total)
}
