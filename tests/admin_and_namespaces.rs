mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestContext;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn admin_token_can_create_namespace_and_non_admin_cannot() {
    let ctx = TestContext::new();
    let (_admin, admin_secret) = ctx.mint_token(true);
    let (_user, user_secret) = ctx.mint_token(false);

    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri("/admin/namespaces")
        .header("Authorization", format!("Bearer {admin_secret}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "acme"}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["name"], "acme");

    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri("/admin/namespaces")
        .header("Authorization", format!("Bearer {user_secret}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "evil-corp"}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_credentials_are_unauthenticated_not_forbidden() {
    let ctx = TestContext::new();
    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/admin/namespaces")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn namespace_grant_makes_namespace_visible_to_caller() {
    let ctx = TestContext::new();
    let ns = ctx.create_namespace("acme");
    let (user, user_secret) = ctx.mint_token(false);

    // Invisible before any grant exists.
    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/namespaces")
        .header("Authorization", format!("Bearer {user_secret}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    ctx.store
        .upsert_namespace_grant(&ephemeral::types::NamespaceGrant {
            token_id: user.id.clone(),
            namespace_id: ns.id.clone(),
            allow: [ephemeral::types::Permission::NamespaceRead].into_iter().collect(),
            deny: Default::default(),
            is_primary: true,
        })
        .unwrap();

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/namespaces")
        .header("Authorization", format!("Bearer {user_secret}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "acme");
    assert_eq!(entries[0]["is_primary"], true);
}

#[tokio::test]
async fn admin_can_list_minted_tokens() {
    let ctx = TestContext::new();
    let (_admin, admin_secret) = ctx.mint_token(true);
    let (user, _user_secret) = ctx.mint_token(false);

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/admin/tokens")
        .header("Authorization", format!("Bearer {admin_secret}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&user.id.as_str()));
}

#[tokio::test]
async fn repo_grant_deny_overrides_namespace_allow() {
    let ctx = TestContext::new();
    let ns = ctx.create_namespace("acme");
    let (user, _secret) = ctx.mint_token(false);

    let repo = ephemeral::types::Repo {
        id: uuid::Uuid::new_v4().to_string(),
        namespace_id: ns.id.clone(),
        name: "widgets".to_string(),
        description: None,
        public: false,
        size_bytes: 0,
        last_push_at: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    ctx.store.create_repo(&repo).unwrap();

    ctx.store
        .upsert_namespace_grant(&ephemeral::types::NamespaceGrant {
            token_id: user.id.clone(),
            namespace_id: ns.id.clone(),
            allow: [ephemeral::types::Permission::RepoWrite].into_iter().collect(),
            deny: Default::default(),
            is_primary: false,
        })
        .unwrap();
    ctx.store
        .upsert_repo_grant(&ephemeral::types::RepoGrant {
            token_id: user.id.clone(),
            repo_id: repo.id.clone(),
            allow: Default::default(),
            deny: [ephemeral::types::Permission::RepoWrite].into_iter().collect(),
        })
        .unwrap();

    let ns_grant = ctx
        .store
        .get_namespace_grant(&user.id, &ns.id)
        .unwrap();
    let repo_grant = ctx.store.get_repo_grant(&user.id, &repo.id).unwrap();

    let scope = ephemeral::types::Scope::Repo {
        namespace_id: ns.id.clone(),
        repo_id: repo.id.clone(),
    };
    let decision = ephemeral::auth::permission::allowed(
        false,
        &scope,
        ephemeral::types::Permission::RepoWrite,
        ns_grant.as_ref(),
        repo_grant.as_ref(),
    );
    assert!(!decision, "repo-level deny must override namespace-level allow");
}
