mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use common::TestContext;
use ephemeral::types::{NamespaceGrant, Permission};
use tower::ServiceExt;

fn basic_auth_header(secret: &str) -> String {
    let encoded = BASE64_STANDARD.encode(format!("x-token:{secret}"));
    format!("Basic {encoded}")
}

#[tokio::test]
async fn fetch_without_read_grant_is_401_with_www_authenticate() {
    let ctx = TestContext::new();
    let ns = ctx.create_namespace("acme");
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
    let (_user, secret) = ctx.mint_token(false);

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/acme/widgets.git/info/refs?service=git-upload-pack")
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get("WWW-Authenticate").is_some());
}

#[tokio::test]
async fn fetch_with_read_grant_reaches_backend() {
    let ctx = TestContext::new();
    let ns = ctx.create_namespace("acme");
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
    let (user, secret) = ctx.mint_token(false);
    ctx.store
        .upsert_namespace_grant(&NamespaceGrant {
            token_id: user.id,
            namespace_id: ns.id,
            allow: [Permission::RepoRead].into_iter().collect(),
            deny: Default::default(),
            is_primary: true,
        })
        .unwrap();

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/acme/widgets.git/info/refs?service=git-upload-pack")
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn push_without_git_suffix_is_not_routed_as_git() {
    let ctx = TestContext::new();
    ctx.create_namespace("acme");
    let (_user, secret) = ctx.mint_token(false);

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/acme/widgets/info/refs") // no ".git" suffix
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_token_bypasses_grants_entirely() {
    let ctx = TestContext::new();
    let ns = ctx.create_namespace("acme");
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
    let (_admin, secret) = ctx.mint_token(true);

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/acme/widgets.git/info/refs?service=git-upload-pack")
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn nonexistent_repo_is_401_not_404_to_avoid_leaking_existence() {
    let ctx = TestContext::new();
    ctx.create_namespace("acme");
    let (_user, secret) = ctx.mint_token(false);

    // A fetch (not a push) against a repo that was never created must
    // look identical to "exists but you have no grant" — both 401.
    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/acme/does-not-exist.git/info/refs?service=git-upload-pack")
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get("WWW-Authenticate").is_some());
}

#[tokio::test]
async fn nonexistent_namespace_is_401_not_404() {
    let ctx = TestContext::new();
    let (_user, secret) = ctx.mint_token(false);

    let app = ctx.router();
    let req = Request::builder()
        .method("GET")
        .uri("/git/ghost-namespace/widgets.git/info/refs?service=git-upload-pack")
        .header("Authorization", basic_auth_header(&secret))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
