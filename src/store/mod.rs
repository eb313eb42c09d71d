mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::types::{Namespace, NamespaceGrant, Repo, RepoGrant, Token, WebAuthSession};

/// The persistent store backing the token/grant/namespace/repo model
/// (spec.md §3, §4.1 — component C0 in SPEC_FULL.md). Deliberately
/// synchronous: callers that run on the async executor hand DB work
/// off via `spawn_blocking`, the same pattern the teacher repo used
/// for its own blocking filesystem/git work in `repo.rs`.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<(), CoreError>;

    // --- Namespaces ---
    fn create_namespace(&self, ns: &Namespace) -> Result<(), CoreError>;
    fn get_namespace(&self, id: &str) -> Result<Option<Namespace>, CoreError>;
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>, CoreError>;
    fn delete_namespace(&self, id: &str) -> Result<(), CoreError>;
    fn list_namespaces(&self) -> Result<Vec<Namespace>, CoreError>;

    // --- Repos ---
    fn create_repo(&self, repo: &Repo) -> Result<(), CoreError>;
    fn get_repo(&self, id: &str) -> Result<Option<Repo>, CoreError>;
    fn get_repo_by_name(&self, namespace_id: &str, name: &str) -> Result<Option<Repo>, CoreError>;
    fn delete_repo(&self, id: &str) -> Result<(), CoreError>;
    fn list_repos_in_namespace(&self, namespace_id: &str) -> Result<Vec<Repo>, CoreError>;
    fn record_push(
        &self,
        repo_id: &str,
        pushed_at: DateTime<Utc>,
        size_bytes: i64,
    ) -> Result<(), CoreError>;

    // --- Tokens ---
    fn create_token(&self, token: &Token, salt: &[u8], hash: &[u8], lookup: &str)
    -> Result<(), CoreError>;
    fn get_token(&self, id: &str) -> Result<Option<Token>, CoreError>;
    fn delete_token(&self, id: &str) -> Result<(), CoreError>;
    fn list_tokens(&self) -> Result<Vec<Token>, CoreError>;
    fn has_admin_token(&self) -> Result<bool, CoreError>;
    /// Candidates sharing the lookup prefix; `VerifyToken` still does a
    /// full constant-time hash comparison over each (SPEC_FULL.md §4.1).
    fn find_tokens_by_lookup(
        &self,
        lookup: &str,
    ) -> Result<Vec<(Token, Vec<u8>, Vec<u8>)>, CoreError>;
    fn touch_last_used(&self, id: &str, now: DateTime<Utc>) -> Result<(), CoreError>;

    // --- Grants ---
    fn upsert_namespace_grant(&self, grant: &NamespaceGrant) -> Result<(), CoreError>;
    fn delete_namespace_grant(&self, token_id: &str, namespace_id: &str) -> Result<(), CoreError>;
    fn get_namespace_grant(
        &self,
        token_id: &str,
        namespace_id: &str,
    ) -> Result<Option<NamespaceGrant>, CoreError>;
    fn list_namespace_grants_for_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<NamespaceGrant>, CoreError>;

    fn upsert_repo_grant(&self, grant: &RepoGrant) -> Result<(), CoreError>;
    fn delete_repo_grant(&self, token_id: &str, repo_id: &str) -> Result<(), CoreError>;
    fn get_repo_grant(
        &self,
        token_id: &str,
        repo_id: &str,
    ) -> Result<Option<RepoGrant>, CoreError>;
    fn list_repo_grants_for_token(&self, token_id: &str) -> Result<Vec<RepoGrant>, CoreError>;

    // --- Web-auth sessions ---
    fn create_web_auth_session(&self, session: &WebAuthSession) -> Result<(), CoreError>;
    fn get_web_auth_session(&self, id: &str) -> Result<Option<WebAuthSession>, CoreError>;
    /// Atomic conditional transition `pending -> completed`; returns
    /// `false` if the session wasn't `pending` (already completed,
    /// already expired, or absent) — spec.md §4.5/§5.
    fn complete_web_auth_session(&self, id: &str, token: &str) -> Result<bool, CoreError>;
    /// Consume (delete) a completed session, returning its token if it
    /// was still present. Implements the "at most once" disclosure
    /// policy chosen in SPEC_FULL.md §9.
    fn take_completed_web_auth_session(
        &self,
        id: &str,
    ) -> Result<Option<WebAuthSession>, CoreError>;
    fn sweep_expired_web_auth_sessions(&self, now: DateTime<Utc>) -> Result<u64, CoreError>;
}
