use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{self, AuthContext};
use crate::error::CoreError;
use crate::types::{Namespace, NamespaceGrant, Permission, RepoGrant, Token};
use crate::validation::validate_name;

use super::AppState;
use super::envelope::{Page, PageQuery, created, ok, paginate};

fn require_admin(auth: &AuthContext) -> Result<(), CoreError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(CoreError::Forbidden)
    }
}

// --- Namespaces ---

#[derive(Deserialize)]
pub struct CreateNamespaceRequest {
    name: String,
}

pub async fn create_namespace(
    auth: AuthContext,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CreateNamespaceRequest>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    validate_name(&body.name)?;

    let ns = Namespace {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        created_at: Utc::now(),
    };
    let to_insert = ns.clone();
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.create_namespace(&to_insert))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    Ok(created(ns))
}

pub async fn list_namespaces(
    auth: AuthContext,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    let all = tokio::task::spawn_blocking(move || store.list_namespaces())
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    let page: Page<Namespace> = paginate(&all, page.cursor.as_deref(), page.limit(), |ns| &ns.id);
    Ok(ok(page))
}

pub async fn delete_namespace(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_namespace(&id))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

// --- Tokens ---

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    token: Token,
    /// The only time the plaintext secret is ever returned (spec.md §4.1).
    secret: String,
}

pub async fn create_token(
    auth: AuthContext,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CreateTokenRequest>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;

    let generated = auth::generate_token();
    let token = Token {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        is_admin: body.is_admin,
        created_at: Utc::now(),
        expires_at: body.expires_at,
        last_used_at: None,
    };

    let to_insert = token.clone();
    let store = state.store.clone();
    let salt = generated.salt;
    let hash = generated.hash.clone();
    let lookup = generated.lookup.clone();
    tokio::task::spawn_blocking(move || store.create_token(&to_insert, &salt, &hash, &lookup))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;

    Ok(created(CreateTokenResponse {
        token,
        secret: generated.secret,
    }))
}

pub async fn list_tokens(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    let tokens = tokio::task::spawn_blocking(move || store.list_tokens())
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(ok(tokens))
}

pub async fn delete_token(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_token(&id))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

// --- Grants ---

#[derive(Deserialize)]
pub struct GrantRequest {
    #[serde(default)]
    allow: HashSet<Permission>,
    #[serde(default)]
    deny: HashSet<Permission>,
    #[serde(default)]
    is_primary: bool,
}

pub async fn upsert_namespace_grant(
    auth: AuthContext,
    State(state): State<AppState>,
    Path((token_id, ns_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<GrantRequest>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let grant = NamespaceGrant {
        token_id,
        namespace_id: ns_id,
        allow: body.allow,
        deny: body.deny,
        is_primary: body.is_primary,
    };
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.upsert_namespace_grant(&grant))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(ok(()))
}

pub async fn delete_namespace_grant(
    auth: AuthContext,
    State(state): State<AppState>,
    Path((token_id, ns_id)): Path<(String, String)>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_namespace_grant(&token_id, &ns_id))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

pub async fn upsert_repo_grant(
    auth: AuthContext,
    State(state): State<AppState>,
    Path((token_id, repo_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<GrantRequest>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let grant = RepoGrant {
        token_id,
        repo_id,
        allow: body.allow,
        deny: body.deny,
    };
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.upsert_repo_grant(&grant))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(ok(()))
}

pub async fn delete_repo_grant(
    auth: AuthContext,
    State(state): State<AppState>,
    Path((token_id, repo_id)): Path<(String, String)>,
) -> Result<Response, CoreError> {
    require_admin(&auth)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_repo_grant(&token_id, &repo_id))
        .await
        .map_err(|e| CoreError::Internal(format!("join error: {e}")))??;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}
