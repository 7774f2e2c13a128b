use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::{
    area_is_readable, available_ranks_for, reorder_positions, RankBinding, RankRef, RoleName,
    VisibilityArea,
};
use ulid::Ulid;

use crate::server::{
    auth::{module_identity, now_unix, require_access, stored_visibility, ACCESS_MANAGE_ROLES},
    core::{AppState, RoleRecord},
    db::{ensure_db_schema, map_write_error},
    errors::ApiFailure,
    types::{
        CreateRoleRequest, OkResponse, RankListResponse, RankResponse, ReorderRolesRequest,
        RoleListResponse, RolePath, RoleResponse, UpdateRoleRequest,
    },
};

pub(crate) async fn list_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RoleListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    let stored = stored_visibility(&state, VisibilityArea::Roles).await?;
    if !area_is_readable(VisibilityArea::Roles, stored, identity.authenticated) {
        return Err(ApiFailure::Unauthorized);
    }

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query(
            "SELECT role_id, name, description, sort_order
             FROM roles
             ORDER BY sort_order, name, role_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            roles.push(RoleResponse {
                role_id: row.try_get("role_id").map_err(|_| ApiFailure::Internal)?,
                name: row.try_get("name").map_err(|_| ApiFailure::Internal)?,
                description: row
                    .try_get("description")
                    .map_err(|_| ApiFailure::Internal)?,
                sort_order: row
                    .try_get("sort_order")
                    .map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok(Json(RoleListResponse { roles }));
    }

    let roles = state.roles.read().await;
    let mut response = roles
        .iter()
        .map(|(role_id, record)| RoleResponse {
            role_id: role_id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            sort_order: record.sort_order,
        })
        .collect::<Vec<_>>();
    response.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.role_id.cmp(&b.role_id))
    });
    Ok(Json(RoleListResponse { roles: response }))
}

pub(crate) async fn create_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let name = RoleName::try_from(payload.name).map_err(|_| ApiFailure::InvalidRequest)?;
    let role_id = Ulid::new().to_string();
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let sort_order = sqlx::query_scalar::<_, i32>(
            "INSERT INTO roles (role_id, name, description, sort_order, created_at_unix, updated_at_unix)
             VALUES ($1, $2, $3,
                     COALESCE($4, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM roles)),
                     $5, $5)
             RETURNING sort_order",
        )
        .bind(&role_id)
        .bind(name.as_str())
        .bind(&payload.description)
        .bind(payload.sort_order)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_write_error(&e))?;

        return Ok(Json(RoleResponse {
            role_id,
            name: name.as_str().to_owned(),
            description: payload.description,
            sort_order,
        }));
    }

    let mut roles = state.roles.write().await;
    if roles.values().any(|record| record.name == name.as_str()) {
        return Err(ApiFailure::Conflict);
    }
    let sort_order = payload
        .sort_order
        .unwrap_or_else(|| roles.values().map(|r| r.sort_order).max().unwrap_or(0) + 1);
    roles.insert(
        role_id.clone(),
        RoleRecord {
            name: name.as_str().to_owned(),
            description: payload.description.clone(),
            sort_order,
            created_at_unix: now,
            updated_at_unix: now,
        },
    );

    Ok(Json(RoleResponse {
        role_id,
        name: name.as_str().to_owned(),
        description: payload.description,
        sort_order,
    }))
}

pub(crate) async fn update_role(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let name = payload
        .name
        .map(|value| RoleName::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let row = sqlx::query(
            "SELECT name, description, sort_order FROM roles WHERE role_id = $1 FOR UPDATE",
        )
        .bind(&path.role_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?
        .ok_or(ApiFailure::NotFound)?;

        let current_name: String = row.try_get("name").map_err(|_| ApiFailure::Internal)?;
        let current_description: Option<String> = row
            .try_get("description")
            .map_err(|_| ApiFailure::Internal)?;
        let current_sort: i32 = row
            .try_get("sort_order")
            .map_err(|_| ApiFailure::Internal)?;

        let new_name = name
            .as_ref()
            .map_or(current_name, |n| n.as_str().to_owned());
        let new_description = payload.description.or(current_description);
        let new_sort = payload.sort_order.unwrap_or(current_sort);

        sqlx::query(
            "UPDATE roles
             SET name = $2, description = $3, sort_order = $4, updated_at_unix = $5
             WHERE role_id = $1",
        )
        .bind(&path.role_id)
        .bind(&new_name)
        .bind(&new_description)
        .bind(new_sort)
        .bind(now_unix())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(&e))?;
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;

        return Ok(Json(RoleResponse {
            role_id: path.role_id,
            name: new_name,
            description: new_description,
            sort_order: new_sort,
        }));
    }

    let mut roles = state.roles.write().await;
    if !roles.contains_key(&path.role_id) {
        return Err(ApiFailure::NotFound);
    }
    if let Some(n) = &name {
        let taken = roles
            .iter()
            .any(|(id, record)| record.name == n.as_str() && *id != path.role_id);
        if taken {
            return Err(ApiFailure::Conflict);
        }
    }
    let record = roles.get_mut(&path.role_id).ok_or(ApiFailure::NotFound)?;
    if let Some(n) = name {
        record.name = n.as_str().to_owned();
    }
    if let Some(description) = payload.description {
        record.description = Some(description);
    }
    if let Some(sort_order) = payload.sort_order {
        record.sort_order = sort_order;
    }
    record.updated_at_unix = now_unix();

    Ok(Json(RoleResponse {
        role_id: path.role_id.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        sort_order: record.sort_order,
    }))
}

pub(crate) async fn delete_role(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    if let Some(pool) = &state.db_pool {
        // Bindings, overrides, access links, member rows, and scoped ranks
        // all go with the role via ON DELETE CASCADE.
        sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(&path.role_id)
            .execute(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut roles = state.roles.write().await;
    roles.remove(&path.role_id);
    drop(roles);

    let mut ranks = state.ranks.write().await;
    ranks.retain(|_, record| record.role_id.as_deref() != Some(path.role_id.as_str()));
    let remaining: std::collections::HashSet<String> = ranks.keys().cloned().collect();
    drop(ranks);

    let mut role_ranks = state.role_ranks.write().await;
    role_ranks.retain(|(role_id, rank_id), _| {
        role_id != &path.role_id && remaining.contains(rank_id)
    });
    drop(role_ranks);

    let mut rank_overrides = state.rank_overrides.write().await;
    rank_overrides.retain(|(role_id, rank_id), _| {
        role_id != &path.role_id && remaining.contains(rank_id)
    });
    drop(rank_overrides);

    let mut role_access = state.role_access.write().await;
    role_access.retain(|(role_id, _)| role_id != &path.role_id);
    drop(role_access);

    let mut members = state.members.write().await;
    for member in members.values_mut() {
        member.role_ids.remove(&path.role_id);
        member.role_ranks.remove(&path.role_id);
        if let Some(rank_id) = &member.global_rank_id {
            if !remaining.contains(rank_id) {
                member.global_rank_id = None;
            }
        }
    }

    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn reorder_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReorderRolesRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let positions = reorder_positions(&payload.role_ids);

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let now = now_unix();
        for (role_id, position) in &positions {
            sqlx::query(
                "UPDATE roles SET sort_order = $2, updated_at_unix = $3 WHERE role_id = $1",
            )
            .bind(role_id)
            .bind(position)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut roles = state.roles.write().await;
    let now = now_unix();
    for (role_id, position) in &positions {
        if let Some(record) = roles.get_mut(role_id) {
            record.sort_order = *position;
            record.updated_at_unix = now;
        }
    }

    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn list_available_ranks(
    State(state): State<AppState>,
    Path(path): Path<RolePath>,
    headers: HeaderMap,
) -> Result<Json<RankListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    let stored = stored_visibility(&state, VisibilityArea::Roles).await?;
    if !area_is_readable(VisibilityArea::Roles, stored, identity.authenticated) {
        return Err(ApiFailure::Unauthorized);
    }

    let (all_ranks, bindings) = load_rank_pool(&state, &path.role_id).await?;
    let available = available_ranks_for(&path.role_id, &all_ranks, &bindings);
    let descriptions = load_rank_descriptions(&state).await?;

    let response = available
        .into_iter()
        .map(|rank| {
            let description = descriptions.get(&rank.rank_id).cloned().flatten();
            RankResponse {
                rank_id: rank.rank_id,
                name: rank.name,
                description,
                sort_order: rank.sort_order,
                role_id: rank.scope_role_id,
            }
        })
        .collect();

    Ok(Json(RankListResponse { ranks: response }))
}

async fn load_rank_descriptions(
    state: &AppState,
) -> Result<std::collections::HashMap<String, Option<String>>, ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query("SELECT rank_id, description FROM ranks")
            .fetch_all(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        let mut out = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            out.insert(
                row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                row.try_get("description")
                    .map_err(|_| ApiFailure::Internal)?,
            );
        }
        return Ok(out);
    }

    let ranks = state.ranks.read().await;
    Ok(ranks
        .iter()
        .map(|(rank_id, record)| (rank_id.clone(), record.description.clone()))
        .collect())
}

/// Loads the resolver inputs for one role: the full rank catalog and the
/// role's explicit bindings. Fails with not-found when the role is absent.
pub(crate) async fn load_rank_pool(
    state: &AppState,
    role_id: &str,
) -> Result<(Vec<RankRef>, Vec<RankBinding>), ApiFailure> {
    if let Some(pool) = &state.db_pool {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        if exists == 0 {
            return Err(ApiFailure::NotFound);
        }

        let rank_rows = sqlx::query("SELECT rank_id, name, sort_order, role_id FROM ranks")
            .fetch_all(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        let mut all_ranks = Vec::with_capacity(rank_rows.len());
        for row in rank_rows {
            all_ranks.push(RankRef {
                rank_id: row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                name: row.try_get("name").map_err(|_| ApiFailure::Internal)?,
                sort_order: row
                    .try_get("sort_order")
                    .map_err(|_| ApiFailure::Internal)?,
                scope_role_id: row.try_get("role_id").map_err(|_| ApiFailure::Internal)?,
            });
        }

        let binding_rows =
            sqlx::query("SELECT rank_id, sort_order FROM role_ranks WHERE role_id = $1")
                .bind(role_id)
                .fetch_all(pool)
                .await
                .map_err(|_| ApiFailure::Internal)?;
        let mut bindings = Vec::with_capacity(binding_rows.len());
        for row in binding_rows {
            bindings.push(RankBinding {
                rank_id: row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                sort_order: row
                    .try_get("sort_order")
                    .map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok((all_ranks, bindings));
    }

    let roles = state.roles.read().await;
    if !roles.contains_key(role_id) {
        return Err(ApiFailure::NotFound);
    }
    drop(roles);

    let ranks = state.ranks.read().await;
    let all_ranks = ranks
        .iter()
        .map(|(rank_id, record)| RankRef {
            rank_id: rank_id.clone(),
            name: record.name.clone(),
            sort_order: record.sort_order,
            scope_role_id: record.role_id.clone(),
        })
        .collect();
    drop(ranks);

    let role_ranks = state.role_ranks.read().await;
    let bindings = role_ranks
        .iter()
        .filter(|((bound_role, _), _)| bound_role == role_id)
        .map(|((_, rank_id), sort_order)| RankBinding {
            rank_id: rank_id.clone(),
            sort_order: *sort_order,
        })
        .collect();

    Ok((all_ranks, bindings))
}
