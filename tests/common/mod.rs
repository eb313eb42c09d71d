use std::sync::Arc;

use ephemeral::config::{AuthConfig, Config};
use ephemeral::git::{BackendResponse, GitBackend, GitRequestContext};
use ephemeral::server::{AppState, create_router};
use ephemeral::store::{SqliteStore, Store};
use ephemeral::types::Token;
use ephemeral::{auth, types};

/// A `GitBackend` that never shells out to real `git` — tests only
/// need to observe that the gate decided to delegate, not that a pack
/// was actually transferred (storage is out of this crate's scope).
pub struct FakeGitBackend;

impl GitBackend for FakeGitBackend {
    fn handle(
        &self,
        _project_root: &std::path::Path,
        _ctx: &GitRequestContext,
    ) -> Result<BackendResponse, ephemeral::error::CoreError> {
        Ok(BackendResponse {
            status: axum::http::StatusCode::OK,
            headers: axum::http::HeaderMap::new(),
            body: b"fake-backend-ok".to_vec(),
        })
    }

    fn ensure_repo(&self, _repo_path: &std::path::Path) -> Result<(), ephemeral::error::CoreError> {
        Ok(())
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<dyn Store>,
}

impl TestContext {
    pub fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().expect("in-memory store"));
        store.initialize().expect("schema init");

        let config = Arc::new(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: std::env::temp_dir(),
            auth: AuthConfig {
                web_auth_url: Some("https://example.invalid/login".to_string()),
                exchange_validation_url: None,
                exchange_secret: Some("test-exchange-secret".to_string()),
            },
        });

        let backend: Arc<dyn GitBackend> = Arc::new(FakeGitBackend);
        let state = AppState::new(store.clone(), config, backend);
        Self { state, store }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Mint a token directly through the store, bypassing HTTP, and
    /// return its plaintext secret for use in test requests.
    pub fn mint_token(&self, is_admin: bool) -> (Token, String) {
        let generated = auth::generate_token();
        let token = types::Token {
            id: uuid::Uuid::new_v4().to_string(),
            name: Some("test-token".to_string()),
            is_admin,
            created_at: chrono::Utc::now(),
            expires_at: None,
            last_used_at: None,
        };
        self.store
            .create_token(&token, &generated.salt, &generated.hash, &generated.lookup)
            .expect("create token");
        (token, generated.secret)
    }

    pub fn create_namespace(&self, name: &str) -> types::Namespace {
        let ns = types::Namespace {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.store.create_namespace(&ns).expect("create namespace");
        ns
    }
}
