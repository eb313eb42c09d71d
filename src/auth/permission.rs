use crate::types::{NamespaceGrant, Permission, RepoGrant, Scope};

/// Look up `requested` in one grant's allow/deny sets. `None` means the
/// grant has no opinion and the caller should fall back to a wider
/// scope; `Some` is final for that grant (deny always wins over allow
/// within the same grant).
fn decide(requested: Permission, allow: &std::collections::HashSet<Permission>, deny: &std::collections::HashSet<Permission>) -> Option<bool> {
    if deny.contains(&requested) {
        Some(false)
    } else if allow.contains(&requested) {
        Some(true)
    } else {
        None
    }
}

/// The single decision rule referenced throughout spec.md §4.2: admin
/// tokens bypass everything; otherwise a repo-level grant is consulted
/// first and a namespace-level grant supplies the default when the repo
/// grant is silent on `requested`. A deny at *either* applicable scope
/// wins outright — checked before either scope's allow is consulted —
/// per Testable Property #3 (§8): deny in any applicable grant is
/// decisive regardless of allows elsewhere.
pub fn allowed(
    is_admin: bool,
    scope: &Scope,
    requested: Permission,
    namespace_grant: Option<&NamespaceGrant>,
    repo_grant: Option<&RepoGrant>,
) -> bool {
    if is_admin {
        return true;
    }

    match scope {
        Scope::Admin => false,
        Scope::Namespace { .. } => namespace_grant
            .and_then(|g| decide(requested, &g.allow, &g.deny))
            .unwrap_or(false),
        Scope::Repo { .. } => {
            let repo_denies = repo_grant.is_some_and(|g| g.deny.contains(&requested));
            let ns_denies = namespace_grant.is_some_and(|g| g.deny.contains(&requested));
            if repo_denies || ns_denies {
                return false;
            }

            if let Some(rg) = repo_grant {
                if rg.allow.contains(&requested) {
                    return true;
                }
            }
            namespace_grant
                .is_some_and(|g| g.allow.contains(&requested))
        }
    }
}
