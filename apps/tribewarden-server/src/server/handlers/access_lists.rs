use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::{AccessListName, RoleName};
use ulid::Ulid;

use crate::server::{
    auth::{
        module_identity, now_unix, require_access, require_authenticated,
        ACCESS_MANAGE_ACCESS_LISTS,
    },
    core::{AccessListRecord, AppState},
    db::{ensure_db_schema, ensure_role_in_memory, ensure_role_tx, map_write_error},
    errors::ApiFailure,
    types::{
        AccessListListResponse, AccessListPath, AccessListResponse, CreateAccessListRequest,
        OkResponse, UpdateAccessListRequest,
    },
};

pub(crate) async fn list_access_lists(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccessListListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_authenticated(&identity)?;

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query(
            "SELECT access_list_id, name, description
             FROM access_lists
             ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let link_rows = sqlx::query(
            "SELECT ra.access_list_id, r.name
             FROM role_access ra
             JOIN roles r ON r.role_id = ra.role_id
             ORDER BY r.name",
        )
        .fetch_all(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        let mut roles_by_list: HashMap<String, Vec<String>> = HashMap::new();
        for row in link_rows {
            let list_id: String = row
                .try_get("access_list_id")
                .map_err(|_| ApiFailure::Internal)?;
            let role_name: String = row.try_get("name").map_err(|_| ApiFailure::Internal)?;
            roles_by_list.entry(list_id).or_default().push(role_name);
        }

        let mut access_lists = Vec::with_capacity(rows.len());
        for row in rows {
            let access_list_id: String = row
                .try_get("access_list_id")
                .map_err(|_| ApiFailure::Internal)?;
            let roles = roles_by_list.remove(&access_list_id).unwrap_or_default();
            access_lists.push(AccessListResponse {
                access_list_id,
                name: row.try_get("name").map_err(|_| ApiFailure::Internal)?,
                description: row
                    .try_get("description")
                    .map_err(|_| ApiFailure::Internal)?,
                roles,
            });
        }
        return Ok(Json(AccessListListResponse { access_lists }));
    }

    let lists = state.access_lists.read().await;
    // Lock order: roles before role_access, same as the write paths.
    let roles = state.roles.read().await;
    let role_access = state.role_access.read().await;
    let mut response = lists
        .iter()
        .map(|(access_list_id, record)| {
            let mut list_roles = role_access
                .iter()
                .filter(|(_, list_id)| list_id == access_list_id)
                .filter_map(|(role_id, _)| roles.get(role_id).map(|r| r.name.clone()))
                .collect::<Vec<_>>();
            list_roles.sort();
            AccessListResponse {
                access_list_id: access_list_id.clone(),
                name: record.name.clone(),
                description: record.description.clone(),
                roles: list_roles,
            }
        })
        .collect::<Vec<_>>();
    response.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(AccessListListResponse {
        access_lists: response,
    }))
}

pub(crate) async fn create_access_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAccessListRequest>,
) -> Result<Json<AccessListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ACCESS_LISTS).await?;

    let name = AccessListName::try_from(payload.name).map_err(|_| ApiFailure::InvalidRequest)?;
    let role_names = validate_role_names(payload.roles.unwrap_or_default())?;
    let access_list_id = Ulid::new().to_string();
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        sqlx::query(
            "INSERT INTO access_lists
                 (access_list_id, name, description, created_at_unix, updated_at_unix)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(&access_list_id)
        .bind(name.as_str())
        .bind(&payload.description)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(&e))?;
        replace_role_links_tx(&mut tx, &access_list_id, &role_names, now).await?;
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;

        return Ok(Json(AccessListResponse {
            access_list_id,
            name: name.as_str().to_owned(),
            description: payload.description,
            roles: role_names,
        }));
    }

    let mut lists = state.access_lists.write().await;
    if lists.values().any(|record| record.name == name.as_str()) {
        return Err(ApiFailure::Conflict);
    }
    lists.insert(
        access_list_id.clone(),
        AccessListRecord {
            name: name.as_str().to_owned(),
            description: payload.description.clone(),
            created_at_unix: now,
            updated_at_unix: now,
        },
    );
    drop(lists);
    replace_role_links_in_memory(&state, &access_list_id, &role_names).await;

    Ok(Json(AccessListResponse {
        access_list_id,
        name: name.as_str().to_owned(),
        description: payload.description,
        roles: role_names,
    }))
}

pub(crate) async fn update_access_list(
    State(state): State<AppState>,
    Path(path): Path<AccessListPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateAccessListRequest>,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ACCESS_LISTS).await?;

    let name = payload
        .name
        .map(|value| AccessListName::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;
    let role_names = payload.roles.map(validate_role_names).transpose()?;
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let row = sqlx::query(
            "SELECT name, description FROM access_lists WHERE access_list_id = $1 FOR UPDATE",
        )
        .bind(&path.access_list_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?
        .ok_or(ApiFailure::NotFound)?;

        let current_name: String = row.try_get("name").map_err(|_| ApiFailure::Internal)?;
        let current_description: Option<String> = row
            .try_get("description")
            .map_err(|_| ApiFailure::Internal)?;
        let new_name = name
            .as_ref()
            .map_or(current_name, |n| n.as_str().to_owned());
        let new_description = payload.description.or(current_description);

        sqlx::query(
            "UPDATE access_lists
             SET name = $2, description = $3, updated_at_unix = $4
             WHERE access_list_id = $1",
        )
        .bind(&path.access_list_id)
        .bind(&new_name)
        .bind(&new_description)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(&e))?;

        if let Some(role_names) = &role_names {
            sqlx::query("DELETE FROM role_access WHERE access_list_id = $1")
                .bind(&path.access_list_id)
                .execute(&mut *tx)
                .await
                .map_err(|_| ApiFailure::Internal)?;
            replace_role_links_tx(&mut tx, &path.access_list_id, role_names, now).await?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut lists = state.access_lists.write().await;
    if !lists.contains_key(&path.access_list_id) {
        return Err(ApiFailure::NotFound);
    }
    if let Some(n) = &name {
        let taken = lists
            .iter()
            .any(|(id, record)| record.name == n.as_str() && *id != path.access_list_id);
        if taken {
            return Err(ApiFailure::Conflict);
        }
    }
    let record = lists
        .get_mut(&path.access_list_id)
        .ok_or(ApiFailure::NotFound)?;
    if let Some(n) = name {
        record.name = n.as_str().to_owned();
    }
    if let Some(description) = payload.description {
        record.description = Some(description);
    }
    record.updated_at_unix = now;
    drop(lists);

    if let Some(role_names) = &role_names {
        let mut role_access = state.role_access.write().await;
        role_access.retain(|(_, list_id)| list_id != &path.access_list_id);
        drop(role_access);
        replace_role_links_in_memory(&state, &path.access_list_id, role_names).await;
    }

    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn delete_access_list(
    State(state): State<AppState>,
    Path(path): Path<AccessListPath>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ACCESS_LISTS).await?;

    if let Some(pool) = &state.db_pool {
        sqlx::query("DELETE FROM access_lists WHERE access_list_id = $1")
            .bind(&path.access_list_id)
            .execute(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut lists = state.access_lists.write().await;
    lists.remove(&path.access_list_id);
    drop(lists);
    let mut role_access = state.role_access.write().await;
    role_access.retain(|(_, list_id)| list_id != &path.access_list_id);

    Ok(Json(OkResponse { ok: true }))
}

fn validate_role_names(values: Vec<String>) -> Result<Vec<String>, ApiFailure> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let name = RoleName::try_from(value).map_err(|_| ApiFailure::InvalidRequest)?;
        if !out.iter().any(|existing: &String| existing == name.as_str()) {
            out.push(name.as_str().to_owned());
        }
    }
    Ok(out)
}

// Roles named in an access list are created on the fly when absent; an
// access list may be configured before the roles it grants exist.
async fn replace_role_links_tx(
    tx: &mut sqlx::PgConnection,
    access_list_id: &str,
    role_names: &[String],
    now: i64,
) -> Result<(), ApiFailure> {
    for role_name in role_names {
        let role_id = ensure_role_tx(tx, role_name)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        sqlx::query(
            "INSERT INTO role_access (role_id, access_list_id, created_at_unix)
             VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(&role_id)
        .bind(access_list_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
    }
    Ok(())
}

async fn replace_role_links_in_memory(
    state: &AppState,
    access_list_id: &str,
    role_names: &[String],
) {
    let mut roles = state.roles.write().await;
    let mut role_access = state.role_access.write().await;
    for role_name in role_names {
        let role_id = ensure_role_in_memory(&mut roles, role_name);
        role_access.insert((role_id, access_list_id.to_owned()));
    }
}
