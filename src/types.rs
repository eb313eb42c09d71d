use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed permission alphabet (spec.md §4.2). Nothing outside this
/// set can ever be stored in a grant or asked of the permission engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "namespace:read")]
    NamespaceRead,
    #[serde(rename = "namespace:write")]
    NamespaceWrite,
    #[serde(rename = "repo:read")]
    RepoRead,
    #[serde(rename = "repo:write")]
    RepoWrite,
    #[serde(rename = "repo:admin")]
    RepoAdmin,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::NamespaceRead,
        Permission::NamespaceWrite,
        Permission::RepoRead,
        Permission::RepoWrite,
        Permission::RepoAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::NamespaceRead => "namespace:read",
            Permission::NamespaceWrite => "namespace:write",
            Permission::RepoRead => "repo:read",
            Permission::RepoWrite => "repo:write",
            Permission::RepoAdmin => "repo:admin",
        }
    }

    pub fn is_namespace_scoped(&self) -> bool {
        matches!(self, Permission::NamespaceRead | Permission::NamespaceWrite)
    }

    /// Parse the wire form of a permission. Unknown strings are rejected
    /// rather than silently dropped — callers surface this as
    /// `invalid_argument` (spec.md §7).
    pub fn parse(s: &str) -> Option<Permission> {
        Some(match s {
            "namespace:read" => Permission::NamespaceRead,
            "namespace:write" => Permission::NamespaceWrite,
            "repo:read" => Permission::RepoRead,
            "repo:write" => Permission::RepoWrite,
            "repo:admin" => Permission::RepoAdmin,
            _ => return None,
        })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize/deserialize a permission set as the comma-joined text the
/// store persists (§3 "storage representation").
pub fn permissions_to_column(perms: &HashSet<Permission>) -> String {
    let mut items: Vec<&str> = perms.iter().map(Permission::as_str).collect();
    items.sort_unstable();
    items.join(",")
}

pub fn permissions_from_column(col: &str) -> HashSet<Permission> {
    col.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(Permission::parse)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: String,
    pub namespace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub public: bool,
    pub size_bytes: i64,
    pub last_push_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The sole authentication principal (spec.md §3 "Token"). `secret` is
/// never stored — only ever returned once, at creation, by the store
/// layer as a side channel alongside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub name: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceGrant {
    pub token_id: String,
    pub namespace_id: String,
    pub allow: HashSet<Permission>,
    pub deny: HashSet<Permission>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoGrant {
    pub token_id: String,
    pub repo_id: String,
    pub allow: HashSet<Permission>,
    pub deny: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebAuthStatus {
    Pending,
    Completed,
    Expired,
}

impl WebAuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebAuthStatus::Pending => "pending",
            WebAuthStatus::Completed => "completed",
            WebAuthStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<WebAuthStatus> {
        Some(match s {
            "pending" => WebAuthStatus::Pending,
            "completed" => WebAuthStatus::Completed,
            "expired" => WebAuthStatus::Expired,
            _ => return None,
        })
    }
}

/// Ephemeral record backing the browser-assisted login handoff
/// (spec.md §3 "WebAuthSession", §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthSession {
    pub id: String,
    pub status: WebAuthStatus,
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What the caller is trying to do, as resolved by C4 from the request
/// path (spec.md §4.4 action table).
#[derive(Debug, Clone)]
pub enum Scope {
    Namespace { namespace_id: String },
    Repo { namespace_id: String, repo_id: String },
    Admin,
}
