use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

use crate::error::CoreError;
use crate::types::{
    Namespace, NamespaceGrant, Repo, RepoGrant, Token, WebAuthSession, WebAuthStatus,
    permissions_from_column, permissions_to_column,
};

use super::Store;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_ci TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repos (
    id TEXT PRIMARY KEY,
    namespace_id TEXT NOT NULL REFERENCES namespaces(id),
    name TEXT NOT NULL,
    description TEXT,
    public INTEGER NOT NULL DEFAULT 0,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    last_push_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (namespace_id, name)
);

CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    name TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    salt BLOB NOT NULL,
    hash BLOB NOT NULL,
    lookup TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    last_used_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(lookup);

CREATE TABLE IF NOT EXISTS namespace_grants (
    token_id TEXT NOT NULL REFERENCES tokens(id) ON DELETE CASCADE,
    namespace_id TEXT NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    allow TEXT NOT NULL DEFAULT '',
    deny TEXT NOT NULL DEFAULT '',
    is_primary INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (token_id, namespace_id)
);

CREATE TABLE IF NOT EXISTS repo_grants (
    token_id TEXT NOT NULL REFERENCES tokens(id) ON DELETE CASCADE,
    repo_id TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
    allow TEXT NOT NULL DEFAULT '',
    deny TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (token_id, repo_id)
);

CREATE TABLE IF NOT EXISTS web_auth_sessions (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    token TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// `Store` backed by SQLite through a pooled set of connections. One
/// process, many concurrent request workers (spec.md §5) — the pool
/// bounds concurrency, SQLite's own transactions serialize conflicting
/// writes on top of that.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn new(path: &Path) -> Result<Self, CoreError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;"));
        let pool = Pool::new(manager).map_err(CoreError::from)?;
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1) // a single in-memory DB only exists on one connection
            .build(manager)
            .map_err(CoreError::from)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, CoreError> {
        self.pool.get().map_err(CoreError::from)
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Internal(format!("corrupt timestamp '{s}': {e}")))
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn row_to_namespace(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn create_namespace(&self, ns: &Namespace) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO namespaces (id, name, name_ci, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![ns.id, ns.name, ns.name.to_lowercase(), fmt_dt(ns.created_at)],
        )?;
        Ok(())
    }

    fn get_namespace(&self, id: &str) -> Result<Option<Namespace>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, created_at FROM namespaces WHERE id = ?1",
                params![id],
                row_to_namespace,
            )
            .optional()?;
        row.map(|(id, name, created_at)| {
            Ok(Namespace {
                id,
                name,
                created_at: parse_dt(&created_at)?,
            })
        })
        .transpose()
    }

    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, created_at FROM namespaces WHERE name_ci = ?1",
                params![name.to_lowercase()],
                row_to_namespace,
            )
            .optional()?;
        row.map(|(id, name, created_at)| {
            Ok(Namespace {
                id,
                name,
                created_at: parse_dt(&created_at)?,
            })
        })
        .transpose()
    }

    fn delete_namespace(&self, id: &str) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let repo_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM repos WHERE namespace_id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        if repo_count > 0 {
            return Err(CoreError::Conflict(
                "namespace still owns repositories".to_string(),
            ));
        }
        conn.execute("DELETE FROM namespaces WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<Namespace>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM namespaces ORDER BY created_at")?;
        let rows = stmt.query_map([], row_to_namespace)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, name, created_at) = row?;
            out.push(Namespace {
                id,
                name,
                created_at: parse_dt(&created_at)?,
            });
        }
        Ok(out)
    }

    fn create_repo(&self, repo: &Repo) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO repos (id, namespace_id, name, description, public, size_bytes, last_push_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                repo.id,
                repo.namespace_id,
                repo.name,
                repo.description,
                repo.public as i64,
                repo.size_bytes,
                repo.last_push_at.map(fmt_dt),
                fmt_dt(repo.created_at),
                fmt_dt(repo.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_repo(&self, id: &str) -> Result<Option<Repo>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, namespace_id, name, description, public, size_bytes, last_push_at, created_at, updated_at
                 FROM repos WHERE id = ?1",
                params![id],
                row_to_repo,
            )
            .optional()?;
        row.map(repo_from_raw).transpose()
    }

    fn get_repo_by_name(&self, namespace_id: &str, name: &str) -> Result<Option<Repo>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, namespace_id, name, description, public, size_bytes, last_push_at, created_at, updated_at
                 FROM repos WHERE namespace_id = ?1 AND name = ?2",
                params![namespace_id, name],
                row_to_repo,
            )
            .optional()?;
        row.map(repo_from_raw).transpose()
    }

    fn delete_repo(&self, id: &str) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM repos WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_repos_in_namespace(&self, namespace_id: &str) -> Result<Vec<Repo>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, namespace_id, name, description, public, size_bytes, last_push_at, created_at, updated_at
             FROM repos WHERE namespace_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![namespace_id], row_to_repo)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(repo_from_raw(row?)?);
        }
        Ok(out)
    }

    fn record_push(
        &self,
        repo_id: &str,
        pushed_at: DateTime<Utc>,
        size_bytes: i64,
    ) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE repos SET last_push_at = ?1, size_bytes = ?2, updated_at = ?1 WHERE id = ?3",
            params![fmt_dt(pushed_at), size_bytes, repo_id],
        )?;
        Ok(())
    }

    fn create_token(
        &self,
        token: &Token,
        salt: &[u8],
        hash: &[u8],
        lookup: &str,
    ) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tokens (id, name, is_admin, salt, hash, lookup, created_at, expires_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                token.id,
                token.name,
                token.is_admin as i64,
                salt,
                hash,
                lookup,
                fmt_dt(token.created_at),
                token.expires_at.map(fmt_dt),
                token.last_used_at.map(fmt_dt),
            ],
        )?;
        Ok(())
    }

    fn get_token(&self, id: &str) -> Result<Option<Token>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, is_admin, created_at, expires_at, last_used_at FROM tokens WHERE id = ?1",
                params![id],
                row_to_token,
            )
            .optional()?;
        row.map(token_from_raw).transpose()
    }

    fn delete_token(&self, id: &str) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_tokens(&self) -> Result<Vec<Token>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, is_admin, created_at, expires_at, last_used_at FROM tokens ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_token)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(token_from_raw(row?)?);
        }
        Ok(out)
    }

    fn has_admin_token(&self) -> Result<bool, CoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn find_tokens_by_lookup(
        &self,
        lookup: &str,
    ) -> Result<Vec<(Token, Vec<u8>, Vec<u8>)>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, is_admin, created_at, expires_at, last_used_at, salt, hash
             FROM tokens WHERE lookup = ?1",
        )?;
        let rows = stmt.query_map(params![lookup], |row| {
            let id: String = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            let is_admin: i64 = row.get(2)?;
            let created_at: String = row.get(3)?;
            let expires_at: Option<String> = row.get(4)?;
            let last_used_at: Option<String> = row.get(5)?;
            let salt: Vec<u8> = row.get(6)?;
            let hash: Vec<u8> = row.get(7)?;
            Ok((id, name, is_admin, created_at, expires_at, last_used_at, salt, hash))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, is_admin, created_at, expires_at, last_used_at, salt, hash) = row?;
            let token = Token {
                id,
                name,
                is_admin: is_admin != 0,
                created_at: parse_dt(&created_at)?,
                expires_at: expires_at.as_deref().map(parse_dt).transpose()?,
                last_used_at: last_used_at.as_deref().map(parse_dt).transpose()?,
            };
            out.push((token, salt, hash));
        }
        Ok(out)
    }

    fn touch_last_used(&self, id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let conn = self.conn()?;
        // Coalesce to once per minute per token (spec.md §5): skip the
        // write entirely if the previous stamp is under 60s old.
        let prior: Option<String> = conn
            .query_row(
                "SELECT last_used_at FROM tokens WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();

        if let Some(prior) = prior {
            let prior_dt = parse_dt(&prior)?;
            if now.signed_duration_since(prior_dt).num_seconds() < 60 {
                return Ok(());
            }
        }

        conn.execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![fmt_dt(now), id],
        )?;
        Ok(())
    }

    fn upsert_namespace_grant(&self, grant: &NamespaceGrant) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO namespace_grants (token_id, namespace_id, allow, deny, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(token_id, namespace_id) DO UPDATE SET
                allow = excluded.allow, deny = excluded.deny, is_primary = excluded.is_primary",
            params![
                grant.token_id,
                grant.namespace_id,
                permissions_to_column(&grant.allow),
                permissions_to_column(&grant.deny),
                grant.is_primary as i64,
            ],
        )?;

        if grant.is_primary {
            // At most one primary namespace per token (spec.md §3).
            conn.execute(
                "UPDATE namespace_grants SET is_primary = 0
                 WHERE token_id = ?1 AND namespace_id != ?2",
                params![grant.token_id, grant.namespace_id],
            )?;
        }
        Ok(())
    }

    fn delete_namespace_grant(&self, token_id: &str, namespace_id: &str) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM namespace_grants WHERE token_id = ?1 AND namespace_id = ?2",
            params![token_id, namespace_id],
        )?;
        Ok(())
    }

    fn get_namespace_grant(
        &self,
        token_id: &str,
        namespace_id: &str,
    ) -> Result<Option<NamespaceGrant>, CoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT token_id, namespace_id, allow, deny, is_primary FROM namespace_grants
             WHERE token_id = ?1 AND namespace_id = ?2",
            params![token_id, namespace_id],
            row_to_namespace_grant,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn list_namespace_grants_for_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<NamespaceGrant>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT token_id, namespace_id, allow, deny, is_primary FROM namespace_grants WHERE token_id = ?1",
        )?;
        let rows = stmt.query_map(params![token_id], row_to_namespace_grant)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn upsert_repo_grant(&self, grant: &RepoGrant) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO repo_grants (token_id, repo_id, allow, deny)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(token_id, repo_id) DO UPDATE SET
                allow = excluded.allow, deny = excluded.deny",
            params![
                grant.token_id,
                grant.repo_id,
                permissions_to_column(&grant.allow),
                permissions_to_column(&grant.deny),
            ],
        )?;
        Ok(())
    }

    fn delete_repo_grant(&self, token_id: &str, repo_id: &str) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM repo_grants WHERE token_id = ?1 AND repo_id = ?2",
            params![token_id, repo_id],
        )?;
        Ok(())
    }

    fn get_repo_grant(
        &self,
        token_id: &str,
        repo_id: &str,
    ) -> Result<Option<RepoGrant>, CoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT token_id, repo_id, allow, deny FROM repo_grants WHERE token_id = ?1 AND repo_id = ?2",
            params![token_id, repo_id],
            row_to_repo_grant,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn list_repo_grants_for_token(&self, token_id: &str) -> Result<Vec<RepoGrant>, CoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT token_id, repo_id, allow, deny FROM repo_grants WHERE token_id = ?1")?;
        let rows = stmt.query_map(params![token_id], row_to_repo_grant)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn create_web_auth_session(&self, session: &WebAuthSession) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO web_auth_sessions (id, status, token, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.status.as_str(),
                session.token,
                fmt_dt(session.expires_at),
                fmt_dt(session.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_web_auth_session(&self, id: &str) -> Result<Option<WebAuthSession>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, status, token, expires_at, created_at FROM web_auth_sessions WHERE id = ?1",
                params![id],
                row_to_web_auth_session,
            )
            .optional()?;
        row.map(web_auth_session_from_raw).transpose()
    }

    fn complete_web_auth_session(&self, id: &str, token: &str) -> Result<bool, CoreError> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE web_auth_sessions SET status = 'completed', token = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![token, id],
        )?;
        Ok(affected > 0)
    }

    fn take_completed_web_auth_session(
        &self,
        id: &str,
    ) -> Result<Option<WebAuthSession>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, status, token, expires_at, created_at FROM web_auth_sessions
                 WHERE id = ?1 AND status = 'completed'",
                params![id],
                row_to_web_auth_session,
            )
            .optional()?;
        let Some(raw) = row else { return Ok(None) };
        conn.execute(
            "DELETE FROM web_auth_sessions WHERE id = ?1",
            params![id],
        )?;
        web_auth_session_from_raw(raw).map(Some)
    }

    fn sweep_expired_web_auth_sessions(&self, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "DELETE FROM web_auth_sessions WHERE expires_at < ?1",
            params![fmt_dt(now)],
        )?;
        Ok(affected as u64)
    }
}

type RawRepo = (
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    Option<String>,
    String,
    String,
);

fn row_to_repo(row: &rusqlite::Row) -> rusqlite::Result<RawRepo> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn repo_from_raw(raw: RawRepo) -> Result<Repo, CoreError> {
    let (id, namespace_id, name, description, public, size_bytes, last_push_at, created_at, updated_at) =
        raw;
    Ok(Repo {
        id,
        namespace_id,
        name,
        description,
        public: public != 0,
        size_bytes,
        last_push_at: last_push_at.as_deref().map(parse_dt).transpose()?,
        created_at: parse_dt(&created_at)?,
        updated_at: parse_dt(&updated_at)?,
    })
}

type RawToken = (String, Option<String>, i64, String, Option<String>, Option<String>);

fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<RawToken> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn token_from_raw(raw: RawToken) -> Result<Token, CoreError> {
    let (id, name, is_admin, created_at, expires_at, last_used_at) = raw;
    Ok(Token {
        id,
        name,
        is_admin: is_admin != 0,
        created_at: parse_dt(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_dt).transpose()?,
        last_used_at: last_used_at.as_deref().map(parse_dt).transpose()?,
    })
}

fn row_to_namespace_grant(row: &rusqlite::Row) -> rusqlite::Result<NamespaceGrant> {
    let allow_col: String = row.get(2)?;
    let deny_col: String = row.get(3)?;
    let is_primary: i64 = row.get(4)?;
    Ok(NamespaceGrant {
        token_id: row.get(0)?,
        namespace_id: row.get(1)?,
        allow: permissions_from_column(&allow_col),
        deny: permissions_from_column(&deny_col),
        is_primary: is_primary != 0,
    })
}

fn row_to_repo_grant(row: &rusqlite::Row) -> rusqlite::Result<RepoGrant> {
    let allow_col: String = row.get(2)?;
    let deny_col: String = row.get(3)?;
    Ok(RepoGrant {
        token_id: row.get(0)?,
        repo_id: row.get(1)?,
        allow: permissions_from_column(&allow_col),
        deny: permissions_from_column(&deny_col),
    })
}

type RawWebAuthSession = (String, String, Option<String>, String, String);

fn row_to_web_auth_session(row: &rusqlite::Row) -> rusqlite::Result<RawWebAuthSession> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn web_auth_session_from_raw(raw: RawWebAuthSession) -> Result<WebAuthSession, CoreError> {
    let (id, status, token, expires_at, created_at) = raw;
    let status = WebAuthStatus::parse(&status)
        .ok_or_else(|| CoreError::Internal(format!("corrupt web-auth status '{status}'")))?;
    Ok(WebAuthSession {
        id,
        status,
        token,
        expires_at: parse_dt(&expires_at)?,
        created_at: parse_dt(&created_at)?,
    })
}
