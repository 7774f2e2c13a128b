use std::{
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::http::HeaderMap;
use tribewarden_core::can_perform;

use super::{core::AppState, errors::ApiFailure};

pub(crate) const MODULE_AUTH_HEADER: &str = "x-module-auth";
pub(crate) const MODULE_ROLE_HEADER: &str = "x-module-role";

pub(crate) const ACCESS_MANAGE_ROLES: &str = "manage_roles";
pub(crate) const ACCESS_MANAGE_MEMBERS: &str = "manage_members";
pub(crate) const ACCESS_MANAGE_ACCESS_LISTS: &str = "manage_access_lists";

pub(crate) const MANAGEMENT_ACCESS_LISTS: &[&str] = &[
    ACCESS_MANAGE_ROLES,
    ACCESS_MANAGE_MEMBERS,
    ACCESS_MANAGE_ACCESS_LISTS,
];

/// Caller identity as asserted by the fronting console. The module trusts
/// the two headers; there is no identity provider behind this service.
#[derive(Debug, Clone)]
pub(crate) struct ModuleIdentity {
    pub(crate) authenticated: bool,
    pub(crate) role: Option<String>,
}

pub(crate) fn module_identity(headers: &HeaderMap) -> ModuleIdentity {
    let authenticated = headers
        .get(MODULE_AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let role = headers
        .get(MODULE_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);
    ModuleIdentity {
        authenticated,
        role,
    }
}

pub(crate) fn require_authenticated(identity: &ModuleIdentity) -> Result<(), ApiFailure> {
    if identity.authenticated {
        return Ok(());
    }
    Err(ApiFailure::Unauthorized)
}

/// Flat access check: the caller's role name must appear in the named
/// access list. An unauthenticated caller is rejected before the list is
/// consulted so the 401/403 distinction stays stable.
pub(crate) async fn require_access(
    state: &AppState,
    identity: &ModuleIdentity,
    access_list: &str,
) -> Result<(), ApiFailure> {
    require_authenticated(identity)?;

    let roles = access_list_role_names(state, access_list).await?;
    if can_perform(identity.role.as_deref(), roles.as_deref()) {
        return Ok(());
    }
    tracing::warn!(
        event = "auth.access_check",
        outcome = "denied",
        access_list,
        role = identity.role.as_deref().unwrap_or(""),
    );
    Err(ApiFailure::Forbidden)
}

async fn access_list_role_names(
    state: &AppState,
    access_list: &str,
) -> Result<Option<Vec<String>>, ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM access_lists WHERE name = $1",
        )
        .bind(access_list)
        .fetch_one(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        if exists == 0 {
            return Ok(None);
        }
        let names = sqlx::query_scalar::<_, String>(
            "SELECT r.name
             FROM role_access ra
             JOIN access_lists al ON al.access_list_id = ra.access_list_id
             JOIN roles r ON r.role_id = ra.role_id
             WHERE al.name = $1",
        )
        .bind(access_list)
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        return Ok(Some(names));
    }

    let access_lists = state.access_lists.read().await;
    let Some((access_list_id, _)) = access_lists
        .iter()
        .find(|(_, record)| record.name == access_list)
    else {
        return Ok(None);
    };
    let access_list_id = access_list_id.clone();
    drop(access_lists);

    // Lock order: roles before role_access, same as the write paths.
    let roles = state.roles.read().await;
    let role_access = state.role_access.read().await;
    let names = role_access
        .iter()
        .filter(|(_, list_id)| *list_id == access_list_id)
        .filter_map(|(role_id, _)| roles.get(role_id).map(|r| r.name.clone()))
        .collect();
    Ok(Some(names))
}

/// Stored visibility for an area, if an admin has toggled it.
pub(crate) async fn stored_visibility(
    state: &AppState,
    area: tribewarden_core::VisibilityArea,
) -> Result<Option<bool>, ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let stored = sqlx::query_scalar::<_, bool>(
            "SELECT is_public FROM visibility_settings WHERE area = $1",
        )
        .bind(area.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        return Ok(stored);
    }

    let visibility = state.visibility.read().await;
    Ok(visibility.get(&area).copied())
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

/// Best-effort client address for rate limiting: the first hop in
/// x-forwarded-for when the console fronts this service, else the peer
/// address.
pub(crate) fn resolve_client_ip(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
        .or(peer_ip)
}

#[cfg(test)]
mod tests {
    use super::{module_identity, resolve_client_ip};
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn auth_marker_matches_true_in_any_case() {
        let mut headers = HeaderMap::new();
        headers.insert("x-module-auth", HeaderValue::from_static("true"));
        headers.insert("x-module-role", HeaderValue::from_static("Chief"));
        let identity = module_identity(&headers);
        assert!(identity.authenticated);
        assert_eq!(identity.role.as_deref(), Some("Chief"));

        let mut headers = HeaderMap::new();
        headers.insert("x-module-auth", HeaderValue::from_static("TRUE"));
        assert!(module_identity(&headers).authenticated);

        let mut headers = HeaderMap::new();
        headers.insert("x-module-auth", HeaderValue::from_static("1"));
        assert!(!module_identity(&headers).authenticated);

        assert!(!module_identity(&HeaderMap::new()).authenticated);
    }

    #[test]
    fn blank_role_header_is_treated_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-module-auth", HeaderValue::from_static("true"));
        headers.insert("x-module-role", HeaderValue::from_static("   "));
        assert_eq!(module_identity(&headers).role, None);
    }

    #[test]
    fn forwarded_header_wins_over_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let resolved = resolve_client_ip(&headers, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(resolved, Some("203.0.113.9".parse().unwrap()));

        let resolved = resolve_client_ip(&HeaderMap::new(), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(resolved, Some("127.0.0.1".parse().unwrap()));
    }
}
