use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::auth::permission::allowed;
use crate::error::CoreError;
use crate::types::{Namespace, Permission, Repo, Scope};
use crate::validation::validate_name;

use super::AppState;
use super::envelope::ok;

/// A namespace as the caller sees it, flagging whether it's the one
/// the token treats as its default (spec.md §6: "each entry flags
/// `is_primary`").
#[derive(Serialize)]
pub struct NamespaceView {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    is_primary: bool,
}

/// Namespaces the caller can see: all of them for an admin token,
/// otherwise only those it holds any grant on (spec.md §4.4, §6).
pub async fn list_namespaces(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Response, CoreError> {
    let store = state.store.clone();
    let token_id = auth.token.id.clone();
    let is_admin = auth.is_admin();

    let views = tokio::task::spawn_blocking(move || -> Result<Vec<NamespaceView>, CoreError> {
        let all = store.list_namespaces()?;
        let primary_by_namespace: HashMap<String, bool> = store
            .list_namespace_grants_for_token(&token_id)?
            .into_iter()
            .map(|g| (g.namespace_id, g.is_primary))
            .collect();

        let to_view = |ns: Namespace| NamespaceView {
            is_primary: primary_by_namespace.get(&ns.id).copied().unwrap_or(false),
            id: ns.id,
            name: ns.name,
            created_at: ns.created_at,
        };

        if is_admin {
            return Ok(all.into_iter().map(to_view).collect());
        }

        let mut visible = Vec::new();
        for ns in all {
            let grant = store.get_namespace_grant(&token_id, &ns.id)?;
            let scope = Scope::Namespace {
                namespace_id: ns.id.clone(),
            };
            if allowed(false, &scope, Permission::NamespaceRead, grant.as_ref(), None) {
                visible.push(to_view(ns));
            }
        }
        Ok(visible)
    })
    .await
    .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    Ok(ok(views))
}

#[derive(Deserialize)]
pub struct CreateRepoRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: bool,
}

/// Minimal repo creation — just the data-model row. Actually
/// provisioning the bare git directory on disk happens lazily on first
/// push (see `git::git_gate`); this crate doesn't manage repo content
/// (spec.md Non-goals).
pub async fn create_repo(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    axum::Json(body): axum::Json<CreateRepoRequest>,
) -> Result<Response, CoreError> {
    validate_name(&body.name)?;

    let store = state.store.clone();
    let ns = {
        let store = store.clone();
        let namespace = namespace.clone();
        tokio::task::spawn_blocking(move || store.get_namespace_by_name(&namespace))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))??
    }
    .ok_or_else(|| CoreError::NotFound("namespace not found".to_string()))?;

    let grant = {
        let store = store.clone();
        let token_id = auth.token.id.clone();
        let ns_id = ns.id.clone();
        tokio::task::spawn_blocking(move || store.get_namespace_grant(&token_id, &ns_id))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))??
    };

    let scope = Scope::Namespace {
        namespace_id: ns.id.clone(),
    };
    if !allowed(
        auth.is_admin(),
        &scope,
        Permission::NamespaceWrite,
        grant.as_ref(),
        None,
    ) {
        return Err(CoreError::Forbidden);
    }

    let existing = {
        let store = store.clone();
        let ns_id = ns.id.clone();
        let name = body.name.clone();
        tokio::task::spawn_blocking(move || store.get_repo_by_name(&ns_id, &name))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))??
    };
    if existing.is_some() {
        return Err(CoreError::Conflict("repo already exists".to_string()));
    }

    let now = Utc::now();
    let repo = Repo {
        id: Uuid::new_v4().to_string(),
        namespace_id: ns.id,
        name: body.name,
        description: body.description,
        public: body.public,
        size_bytes: 0,
        last_push_at: None,
        created_at: now,
        updated_at: now,
    };

    let to_insert = repo.clone();
    tokio::task::spawn_blocking(move || store.create_repo(&to_insert))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    Ok(super::envelope::created(repo))
}
