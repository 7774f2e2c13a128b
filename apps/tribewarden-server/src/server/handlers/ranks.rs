use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::{area_is_readable, reorder_positions, RankName, VisibilityArea};
use ulid::Ulid;

use crate::server::{
    auth::{module_identity, now_unix, require_access, stored_visibility, ACCESS_MANAGE_ROLES},
    core::{AppState, RankRecord},
    db::{ensure_db_schema, map_write_error},
    errors::ApiFailure,
    types::{
        CreateRankRequest, OkResponse, RankListResponse, RankPath, RankResponse,
        ReorderRanksRequest, UpdateRankRequest,
    },
};

// The rank catalog is part of the role structure, so it sits behind the
// same visibility area as the role list.
pub(crate) async fn list_ranks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RankListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    let stored = stored_visibility(&state, VisibilityArea::Roles).await?;
    if !area_is_readable(VisibilityArea::Roles, stored, identity.authenticated) {
        return Err(ApiFailure::Unauthorized);
    }

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query(
            "SELECT rank_id, name, description, sort_order, role_id
             FROM ranks
             ORDER BY sort_order, name, rank_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let mut ranks = Vec::with_capacity(rows.len());
        for row in rows {
            ranks.push(RankResponse {
                rank_id: row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?,
                name: row.try_get("name").map_err(|_| ApiFailure::Internal)?,
                description: row
                    .try_get("description")
                    .map_err(|_| ApiFailure::Internal)?,
                sort_order: row
                    .try_get("sort_order")
                    .map_err(|_| ApiFailure::Internal)?,
                role_id: row.try_get("role_id").map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok(Json(RankListResponse { ranks }));
    }

    let ranks = state.ranks.read().await;
    let mut response = ranks
        .iter()
        .map(|(rank_id, record)| RankResponse {
            rank_id: rank_id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            sort_order: record.sort_order,
            role_id: record.role_id.clone(),
        })
        .collect::<Vec<_>>();
    response.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.rank_id.cmp(&b.rank_id))
    });
    Ok(Json(RankListResponse { ranks: response }))
}

pub(crate) async fn create_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRankRequest>,
) -> Result<Json<RankResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let name = RankName::try_from(payload.name).map_err(|_| ApiFailure::InvalidRequest)?;
    let rank_id = Ulid::new().to_string();
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        if let Some(scope_role_id) = &payload.role_id {
            let exists =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE role_id = $1")
                    .bind(scope_role_id)
                    .fetch_one(pool)
                    .await
                    .map_err(|_| ApiFailure::Internal)?;
            if exists == 0 {
                return Err(ApiFailure::InvalidRequest);
            }
        }
        let sort_order = sqlx::query_scalar::<_, i32>(
            "INSERT INTO ranks (rank_id, name, description, sort_order, role_id, created_at_unix, updated_at_unix)
             VALUES ($1, $2, $3,
                     COALESCE($4, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM ranks)),
                     $5, $6, $6)
             RETURNING sort_order",
        )
        .bind(&rank_id)
        .bind(name.as_str())
        .bind(&payload.description)
        .bind(payload.sort_order)
        .bind(&payload.role_id)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_write_error(&e))?;

        return Ok(Json(RankResponse {
            rank_id,
            name: name.as_str().to_owned(),
            description: payload.description,
            sort_order,
            role_id: payload.role_id,
        }));
    }

    if let Some(scope_role_id) = &payload.role_id {
        let roles = state.roles.read().await;
        if !roles.contains_key(scope_role_id) {
            return Err(ApiFailure::InvalidRequest);
        }
    }

    let mut ranks = state.ranks.write().await;
    // Global rank names are unique; role-scoped names may repeat.
    if payload.role_id.is_none()
        && ranks
            .values()
            .any(|record| record.role_id.is_none() && record.name == name.as_str())
    {
        return Err(ApiFailure::Conflict);
    }
    let sort_order = payload
        .sort_order
        .unwrap_or_else(|| ranks.values().map(|r| r.sort_order).max().unwrap_or(0) + 1);
    ranks.insert(
        rank_id.clone(),
        RankRecord {
            name: name.as_str().to_owned(),
            description: payload.description.clone(),
            sort_order,
            role_id: payload.role_id.clone(),
            created_at_unix: now,
            updated_at_unix: now,
        },
    );

    Ok(Json(RankResponse {
        rank_id,
        name: name.as_str().to_owned(),
        description: payload.description,
        sort_order,
        role_id: payload.role_id,
    }))
}

pub(crate) async fn update_rank(
    State(state): State<AppState>,
    Path(path): Path<RankPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRankRequest>,
) -> Result<Json<RankResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let name = payload
        .name
        .map(|value| RankName::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let row = sqlx::query(
            "SELECT name, description, sort_order, role_id FROM ranks WHERE rank_id = $1 FOR UPDATE",
        )
        .bind(&path.rank_id)
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
        let scope_role_id: Option<String> =
            row.try_get("role_id").map_err(|_| ApiFailure::Internal)?;

        let new_name = name
            .as_ref()
            .map_or(current_name, |n| n.as_str().to_owned());
        let new_description = payload.description.or(current_description);
        let new_sort = payload.sort_order.unwrap_or(current_sort);

        sqlx::query(
            "UPDATE ranks
             SET name = $2, description = $3, sort_order = $4, updated_at_unix = $5
             WHERE rank_id = $1",
        )
        .bind(&path.rank_id)
        .bind(&new_name)
        .bind(&new_description)
        .bind(new_sort)
        .bind(now_unix())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(&e))?;
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;

        return Ok(Json(RankResponse {
            rank_id: path.rank_id,
            name: new_name,
            description: new_description,
            sort_order: new_sort,
            role_id: scope_role_id,
        }));
    }

    let mut ranks = state.ranks.write().await;
    if let Some(n) = &name {
        let is_global = ranks
            .get(&path.rank_id)
            .is_some_and(|record| record.role_id.is_none());
        if is_global {
            let taken = ranks.iter().any(|(id, record)| {
                record.role_id.is_none() && record.name == n.as_str() && *id != path.rank_id
            });
            if taken {
                return Err(ApiFailure::Conflict);
            }
        }
    }
    let record = ranks.get_mut(&path.rank_id).ok_or(ApiFailure::NotFound)?;
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

    Ok(Json(RankResponse {
        rank_id: path.rank_id.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        sort_order: record.sort_order,
        role_id: record.role_id.clone(),
    }))
}

pub(crate) async fn delete_rank(
    State(state): State<AppState>,
    Path(path): Path<RankPath>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    if let Some(pool) = &state.db_pool {
        sqlx::query("DELETE FROM ranks WHERE rank_id = $1")
            .bind(&path.rank_id)
            .execute(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut ranks = state.ranks.write().await;
    ranks.remove(&path.rank_id);
    drop(ranks);

    let mut role_ranks = state.role_ranks.write().await;
    role_ranks.retain(|(_, rank_id), _| rank_id != &path.rank_id);
    drop(role_ranks);

    let mut rank_overrides = state.rank_overrides.write().await;
    rank_overrides.retain(|(_, rank_id), _| rank_id != &path.rank_id);
    drop(rank_overrides);

    let mut members = state.members.write().await;
    for member in members.values_mut() {
        if member.global_rank_id.as_deref() == Some(path.rank_id.as_str()) {
            member.global_rank_id = None;
        }
        member
            .role_ranks
            .retain(|_, rank_id| rank_id != &path.rank_id);
    }

    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn reorder_ranks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReorderRanksRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let positions = reorder_positions(&payload.rank_ids);

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let now = now_unix();
        for (rank_id, position) in &positions {
            sqlx::query(
                "UPDATE ranks SET sort_order = $2, updated_at_unix = $3 WHERE rank_id = $1",
            )
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

    let mut ranks = state.ranks.write().await;
    let now = now_unix();
    for (rank_id, position) in &positions {
        if let Some(record) = ranks.get_mut(rank_id) {
            record.sort_order = *position;
            record.updated_at_unix = now;
        }
    }

    Ok(Json(OkResponse { ok: true }))
}
