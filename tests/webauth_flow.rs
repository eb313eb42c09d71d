mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestContext;
use ephemeral::types::WebAuthStatus;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_path_create_complete_poll() {
    let ctx = TestContext::new();

    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/sessions")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    // Polling before completion reports pending.
    let app = ctx.router();
    let req = Request::builder()
        .uri(format!("/auth/sessions/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"]["status"], "pending");

    // The web-auth frontend completes it using the exchange secret.
    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri(format!("/auth/sessions/{session_id}/complete"))
        .header("X-Exchange-Secret", "test-exchange-secret")
        .header("content-type", "application/json")
        .body(Body::from(json!({"token": "eph_abc123"}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // First poll after completion discloses the token.
    let app = ctx.router();
    let req = Request::builder()
        .uri(format!("/auth/sessions/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["token"], "eph_abc123");

    // Second poll finds nothing — at-most-once disclosure.
    let app = ctx.router();
    let req = Request::builder()
        .uri(format!("/auth/sessions/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completing_with_wrong_exchange_secret_is_rejected() {
    let ctx = TestContext::new();
    let session = ephemeral::webauth::create_session(ctx.store.as_ref(), None).unwrap();
    assert_eq!(session.status, WebAuthStatus::Pending);

    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri(format!("/auth/sessions/{}/complete", session.id))
        .header("X-Exchange-Secret", "wrong-secret")
        .header("content-type", "application/json")
        .body(Body::from(json!({"token": "eph_abc123"}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expires_in_seconds_request_field_shortens_the_session_ttl() {
    let ctx = TestContext::new();

    let app = ctx.router();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/sessions")
        .header("content-type", "application/json")
        .body(Body::from(json!({"expires_in_seconds": 1}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let app = ctx.router();
    let req = Request::builder()
        .uri(format!("/auth/sessions/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_session_is_not_found_on_poll() {
    let ctx = TestContext::new();
    let expired = ephemeral::types::WebAuthSession {
        id: uuid::Uuid::new_v4().to_string(),
        status: WebAuthStatus::Pending,
        token: None,
        expires_at: chrono::Utc::now() - chrono::Duration::seconds(10),
        created_at: chrono::Utc::now() - chrono::Duration::seconds(320),
    };
    ctx.store.create_web_auth_session(&expired).unwrap();

    let app = ctx.router();
    let req = Request::builder()
        .uri(format!("/auth/sessions/{}", expired.id))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
