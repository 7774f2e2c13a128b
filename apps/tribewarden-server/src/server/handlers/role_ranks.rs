use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::{reorder_positions, RankName};

use crate::server::{
    auth::{module_identity, now_unix, require_access, ACCESS_MANAGE_ROLES},
    core::AppState,
    db::ensure_db_schema,
    errors::ApiFailure,
    types::{
        OkResponse, PatchRoleRankOverridesRequest, ReorderRanksRequest, RolePath,
        RoleRankBindingResponse, RoleRankListResponse, RoleRankOverrideListResponse,
        RoleRankOverrideResponse,
    },
};

pub(crate) async fn list_role_ranks(
    State(state): State<AppState>,
) -> Result<Json<RoleRankListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query(
            "SELECT role_id, rank_id, sort_order
             FROM role_ranks
             ORDER BY role_id, sort_order, rank_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let mut role_ranks = Vec::with_capacity(rows.len());
        for row in rows {
            role_ranks.push(RoleRankBindingResponse {
                role_id: row.try_get("role_id").map_err(|_| ApiFailure::Internal)?,
                rank_id: row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                sort_order: row
                    .try_get("sort_order")
                    .map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok(Json(RoleRankListResponse { role_ranks }));
    }

    let bindings = state.role_ranks.read().await;
    let mut response = bindings
        .iter()
        .map(|((role_id, rank_id), sort_order)| RoleRankBindingResponse {
            role_id: role_id.clone(),
            rank_id: rank_id.clone(),
            sort_order: *sort_order,
        })
        .collect::<Vec<_>>();
    response.sort_by(|a, b| {
        a.role_id
            .cmp(&b.role_id)
            .then_with(|| a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.rank_id.cmp(&b.rank_id))
    });
    Ok(Json(RoleRankListResponse {
        role_ranks: response,
    }))
}

/// Full replace of one role's bindings: the supplied rank ids become the
/// bound set, positions following list order.
pub(crate) async fn patch_role_ranks(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
    Json(payload): Json<ReorderRanksRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    validate_bindable_ranks(&state, &path.role_id, &payload.rank_ids).await?;
    let positions = reorder_positions(&payload.rank_ids);
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        sqlx::query("DELETE FROM role_ranks WHERE role_id = $1")
            .bind(&path.role_id)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        for (rank_id, position) in &positions {
            sqlx::query(
                "INSERT INTO role_ranks (role_id, rank_id, sort_order, created_at_unix)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&path.role_id)
            .bind(rank_id)
            .bind(position)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut bindings = state.role_ranks.write().await;
    bindings.retain(|(role_id, _), _| role_id != &path.role_id);
    for (rank_id, position) in positions {
        bindings.insert((path.role_id.clone(), rank_id), position);
    }

    Ok(Json(OkResponse { ok: true }))
}

/// Re-ranks a role's existing bindings without changing the bound set.
pub(crate) async fn reorder_role_ranks(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
    Json(payload): Json<ReorderRanksRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    role_must_exist(&state, &path.role_id).await?;
    let positions = reorder_positions(&payload.rank_ids);

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        for (rank_id, position) in &positions {
            sqlx::query(
                "UPDATE role_ranks SET sort_order = $3 WHERE role_id = $1 AND rank_id = $2",
            )
            .bind(&path.role_id)
            .bind(rank_id)
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut bindings = state.role_ranks.write().await;
    for (rank_id, position) in positions {
        let key = (path.role_id.clone(), rank_id);
        if let Some(sort_order) = bindings.get_mut(&key) {
            *sort_order = position;
        }
    }

    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn list_role_rank_overrides(
    State(state): State<AppState>,
) -> Result<Json<RoleRankOverrideListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query(
            "SELECT role_id, rank_id, name
             FROM role_rank_overrides
             ORDER BY role_id, rank_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let mut overrides = Vec::with_capacity(rows.len());
        for row in rows {
            overrides.push(RoleRankOverrideResponse {
                role_id: row.try_get("role_id").map_err(|_| ApiFailure::Internal)?,
                rank_id: row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                name: row.try_get("name").map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok(Json(RoleRankOverrideListResponse {
            role_rank_overrides: overrides,
        }));
    }

    let overrides = state.rank_overrides.read().await;
    let mut response = overrides
        .iter()
        .map(|((role_id, rank_id), name)| RoleRankOverrideResponse {
            role_id: role_id.clone(),
            rank_id: rank_id.clone(),
            name: name.clone(),
        })
        .collect::<Vec<_>>();
    response.sort_by(|a, b| {
        a.role_id
            .cmp(&b.role_id)
            .then_with(|| a.rank_id.cmp(&b.rank_id))
    });
    Ok(Json(RoleRankOverrideListResponse {
        role_rank_overrides: response,
    }))
}

/// Full replace of one role's override names. Overrides only attach to
/// global ranks; a role-scoped rank already carries its own name.
pub(crate) async fn patch_role_rank_overrides(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
    Json(payload): Json<PatchRoleRankOverridesRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    role_must_exist(&state, &path.role_id).await?;

    let mut entries = Vec::with_capacity(payload.overrides.len());
    for entry in payload.overrides {
        let name =
            RankName::try_from(entry.name).map_err(|_| ApiFailure::InvalidRequest)?;
        entries.push((entry.rank_id, name.as_str().to_owned()));
    }
    let global_ranks = load_global_rank_ids(&state).await?;
    if entries
        .iter()
        .any(|(rank_id, _)| !global_ranks.contains(rank_id))
    {
        return Err(ApiFailure::InvalidRequest);
    }
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        sqlx::query("DELETE FROM role_rank_overrides WHERE role_id = $1")
            .bind(&path.role_id)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        for (rank_id, name) in &entries {
            sqlx::query(
                "INSERT INTO role_rank_overrides
                     (role_id, rank_id, name, created_at_unix, updated_at_unix)
                 VALUES ($1, $2, $3, $4, $4)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&path.role_id)
            .bind(rank_id)
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut overrides = state.rank_overrides.write().await;
    overrides.retain(|(role_id, _), _| role_id != &path.role_id);
    for (rank_id, name) in entries {
        overrides
            .entry((path.role_id.clone(), rank_id))
            .or_insert(name);
    }

    Ok(Json(OkResponse { ok: true }))
}

async fn role_must_exist(state: &AppState, role_id: &str) -> Result<(), ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        if exists == 0 {
            return Err(ApiFailure::NotFound);
        }
        return Ok(());
    }

    let roles = state.roles.read().await;
    if roles.contains_key(role_id) {
        return Ok(());
    }
    Err(ApiFailure::NotFound)
}

async fn load_global_rank_ids(state: &AppState) -> Result<HashSet<String>, ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let ids =
            sqlx::query_scalar::<_, String>("SELECT rank_id FROM ranks WHERE role_id IS NULL")
                .fetch_all(pool)
                .await
                .map_err(|_| ApiFailure::Internal)?;
        return Ok(ids.into_iter().collect());
    }

    let ranks = state.ranks.read().await;
    Ok(ranks
        .iter()
        .filter(|(_, record)| record.role_id.is_none())
        .map(|(rank_id, _)| rank_id.clone())
        .collect())
}

/// Supplied ranks must exist and be bindable by this role: global, or
/// scoped to the role itself.
async fn validate_bindable_ranks(
    state: &AppState,
    role_id: &str,
    rank_ids: &[String],
) -> Result<(), ApiFailure> {
    role_must_exist(state, role_id).await?;

    if let Some(pool) = &state.db_pool {
        for rank_id in rank_ids {
            let scope = sqlx::query_scalar::<_, Option<String>>(
                "SELECT role_id FROM ranks WHERE rank_id = $1",
            )
            .bind(rank_id)
            .fetch_optional(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
            match scope {
                Some(None) => {}
                Some(Some(scope_role_id)) if scope_role_id == role_id => {}
                _ => return Err(ApiFailure::InvalidRequest),
            }
        }
        return Ok(());
    }

    let ranks = state.ranks.read().await;
    for rank_id in rank_ids {
        let Some(record) = ranks.get(rank_id) else {
            return Err(ApiFailure::InvalidRequest);
        };
        if record
            .role_id
            .as_deref()
            .is_some_and(|scope| scope != role_id)
        {
            return Err(ApiFailure::InvalidRequest);
        }
    }
    Ok(())
}
