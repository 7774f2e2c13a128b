use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::{
    area_is_readable, rank_label, DisplayName, MemberStatus, RoleName, VisibilityArea,
    WalletAddress,
};
use ulid::Ulid;

use crate::server::{
    auth::{module_identity, now_unix, require_access, stored_visibility, ACCESS_MANAGE_MEMBERS},
    core::{AppState, MemberRecord},
    db::{
        ensure_db_schema, ensure_role_in_memory, ensure_role_tx, member_status_from_i16,
        member_status_to_i16,
    },
    errors::ApiFailure,
    types::{
        CreateMemberRequest, MemberListResponse, MemberPath, MemberResponse,
        MemberRoleRankEntry, MemberRoleRankResponse, OkResponse, UpdateMemberRequest,
    },
};

pub(crate) async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MemberListResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    let stored = stored_visibility(&state, VisibilityArea::Members).await?;
    if !area_is_readable(VisibilityArea::Members, stored, identity.authenticated) {
        return Err(ApiFailure::Unauthorized);
    }

    let members = load_member_responses(&state, None).await?;
    Ok(Json(MemberListResponse { members }))
}

/// The member's role set, global rank, and per-role ranks arrive as one
/// assignment block and are applied as a whole.
struct Assignment {
    role_ids: HashSet<String>,
    global_rank_id: Option<String>,
    role_ranks: HashMap<String, String>,
}

pub(crate) async fn create_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMemberRequest>,
) -> Result<Json<MemberResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_MEMBERS).await?;

    let display_name =
        DisplayName::try_from(payload.display_name).map_err(|_| ApiFailure::InvalidRequest)?;
    let status = parse_status(payload.status)?;
    let wallet_address = payload
        .wallet_address
        .map(|value| WalletAddress::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;

    let member_id = Ulid::new().to_string();
    let now = now_unix();
    let role_names = validate_role_names(payload.roles.unwrap_or_default())?;

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        sqlx::query(
            "INSERT INTO members
                 (member_id, display_name, status, wallet_address, created_at_unix, updated_at_unix)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(&member_id)
        .bind(display_name.as_str())
        .bind(member_status_to_i16(status))
        .bind(wallet_address.as_ref().map(WalletAddress::as_str))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        let assignment = resolve_assignment_tx(
            &mut tx,
            &role_names,
            payload.global_rank_id,
            payload.role_ranks.unwrap_or_default(),
        )
        .await?;
        write_assignment_tx(&mut tx, &member_id, &assignment, now).await?;
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
    } else {
        let assignment = resolve_assignment_in_memory(
            &state,
            &role_names,
            payload.global_rank_id,
            payload.role_ranks.unwrap_or_default(),
        )
        .await?;
        let mut members = state.members.write().await;
        members.insert(
            member_id.clone(),
            MemberRecord {
                display_name: display_name.as_str().to_owned(),
                status,
                wallet_address: wallet_address.as_ref().map(|w| w.as_str().to_owned()),
                role_ids: assignment.role_ids,
                global_rank_id: assignment.global_rank_id,
                role_ranks: assignment.role_ranks,
                created_at_unix: now,
                updated_at_unix: now,
            },
        );
    }

    let mut members = load_member_responses(&state, Some(&member_id)).await?;
    members.pop().map(Json).ok_or(ApiFailure::Internal)
}

pub(crate) async fn update_member(
    State(state): State<AppState>,
    Path(path): Path<MemberPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMemberRequest>,
) -> Result<Json<MemberResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_MEMBERS).await?;

    let display_name = payload
        .display_name
        .map(|value| DisplayName::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;
    let status = payload
        .status
        .map(|value| MemberStatus::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;
    let wallet_address = payload
        .wallet_address
        .map(|value| WalletAddress::try_from(value).map_err(|_| ApiFailure::InvalidRequest))
        .transpose()?;
    let role_names = payload
        .roles
        .map(validate_role_names)
        .transpose()?;
    let now = now_unix();

    if let Some(pool) = &state.db_pool {
        let mut tx = pool.begin().await.map_err(|_| ApiFailure::Internal)?;
        let row = sqlx::query(
            "SELECT display_name, status, wallet_address
             FROM members WHERE member_id = $1 FOR UPDATE",
        )
        .bind(&path.member_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?
        .ok_or(ApiFailure::NotFound)?;

        let current_display: String = row
            .try_get("display_name")
            .map_err(|_| ApiFailure::Internal)?;
        let current_status_raw: i16 = row.try_get("status").map_err(|_| ApiFailure::Internal)?;
        let current_status =
            member_status_from_i16(current_status_raw).ok_or(ApiFailure::Internal)?;
        let current_wallet: Option<String> = row
            .try_get("wallet_address")
            .map_err(|_| ApiFailure::Internal)?;

        let new_display = display_name
            .as_ref()
            .map_or(current_display, |d| d.as_str().to_owned());
        let new_status = status.unwrap_or(current_status);
        let new_wallet = wallet_address
            .as_ref()
            .map(|w| w.as_str().to_owned())
            .or(current_wallet);

        sqlx::query(
            "UPDATE members
             SET display_name = $2, status = $3, wallet_address = $4, updated_at_unix = $5
             WHERE member_id = $1",
        )
        .bind(&path.member_id)
        .bind(&new_display)
        .bind(member_status_to_i16(new_status))
        .bind(&new_wallet)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;

        // A supplied role set replaces the whole assignment block.
        if let Some(role_names) = &role_names {
            sqlx::query("DELETE FROM member_roles WHERE member_id = $1")
                .bind(&path.member_id)
                .execute(&mut *tx)
                .await
                .map_err(|_| ApiFailure::Internal)?;
            sqlx::query("DELETE FROM member_ranks WHERE member_id = $1")
                .bind(&path.member_id)
                .execute(&mut *tx)
                .await
                .map_err(|_| ApiFailure::Internal)?;
            let assignment = resolve_assignment_tx(
                &mut tx,
                role_names,
                payload.global_rank_id,
                payload.role_ranks.unwrap_or_default(),
            )
            .await?;
            write_assignment_tx(&mut tx, &path.member_id, &assignment, now).await?;
        }
        tx.commit().await.map_err(|_| ApiFailure::Internal)?;
    } else {
        let assignment = if let Some(role_names) = &role_names {
            Some(
                resolve_assignment_in_memory(
                    &state,
                    role_names,
                    payload.global_rank_id,
                    payload.role_ranks.unwrap_or_default(),
                )
                .await?,
            )
        } else {
            None
        };

        let mut members = state.members.write().await;
        let record = members
            .get_mut(&path.member_id)
            .ok_or(ApiFailure::NotFound)?;
        if let Some(d) = display_name {
            record.display_name = d.as_str().to_owned();
        }
        if let Some(s) = status {
            record.status = s;
        }
        if let Some(w) = wallet_address {
            record.wallet_address = Some(w.as_str().to_owned());
        }
        if let Some(assignment) = assignment {
            record.role_ids = assignment.role_ids;
            record.global_rank_id = assignment.global_rank_id;
            record.role_ranks = assignment.role_ranks;
        }
        record.updated_at_unix = now;
    }

    let mut members = load_member_responses(&state, Some(&path.member_id)).await?;
    members.pop().map(Json).ok_or(ApiFailure::Internal)
}

pub(crate) async fn delete_member(
    State(state): State<AppState>,
    Path(path): Path<MemberPath>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_MEMBERS).await?;

    if let Some(pool) = &state.db_pool {
        sqlx::query("DELETE FROM members WHERE member_id = $1")
            .bind(&path.member_id)
            .execute(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        return Ok(Json(OkResponse { ok: true }));
    }

    let mut members = state.members.write().await;
    members.remove(&path.member_id);
    Ok(Json(OkResponse { ok: true }))
}

fn parse_status(value: Option<String>) -> Result<MemberStatus, ApiFailure> {
    value.map_or(Ok(MemberStatus::Active), |raw| {
        MemberStatus::try_from(raw).map_err(|_| ApiFailure::InvalidRequest)
    })
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

/// Validates and resolves an assignment block against the catalog inside
/// the caller's transaction. Role names are created when absent. A
/// per-role rank entry naming a role the member does not hold is dropped;
/// a rank that is neither global nor scoped to the named role is an error,
/// as is a role-scoped rank supplied as the global rank.
async fn resolve_assignment_tx(
    tx: &mut sqlx::PgConnection,
    role_names: &[String],
    global_rank_id: Option<String>,
    role_ranks: Vec<MemberRoleRankEntry>,
) -> Result<Assignment, ApiFailure> {
    let mut role_ids = HashSet::new();
    for role_name in role_names {
        let role_id = ensure_role_tx(tx, role_name)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        role_ids.insert(role_id);
    }

    if let Some(rank_id) = &global_rank_id {
        let scope = sqlx::query_scalar::<_, Option<String>>(
            "SELECT role_id FROM ranks WHERE rank_id = $1",
        )
        .bind(rank_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        if !matches!(scope, Some(None)) {
            return Err(ApiFailure::InvalidRequest);
        }
    }

    let mut resolved_ranks = HashMap::new();
    for entry in role_ranks {
        if !role_ids.contains(&entry.role_id) {
            continue;
        }
        let scope = sqlx::query_scalar::<_, Option<String>>(
            "SELECT role_id FROM ranks WHERE rank_id = $1",
        )
        .bind(&entry.rank_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
        match scope {
            Some(None) => {}
            Some(Some(scope_role_id)) if scope_role_id == entry.role_id => {}
            _ => return Err(ApiFailure::InvalidRequest),
        }
        resolved_ranks.insert(entry.role_id, entry.rank_id);
    }

    Ok(Assignment {
        role_ids,
        global_rank_id,
        role_ranks: resolved_ranks,
    })
}

async fn write_assignment_tx(
    tx: &mut sqlx::PgConnection,
    member_id: &str,
    assignment: &Assignment,
    now: i64,
) -> Result<(), ApiFailure> {
    for role_id in &assignment.role_ids {
        sqlx::query(
            "INSERT INTO member_roles (member_id, role_id, created_at_unix)
             VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(member_id)
        .bind(role_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
    }
    if let Some(rank_id) = &assignment.global_rank_id {
        sqlx::query(
            "INSERT INTO member_ranks (member_id, rank_id, role_id, created_at_unix)
             VALUES ($1, $2, NULL, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(member_id)
        .bind(rank_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
    }
    for (role_id, rank_id) in &assignment.role_ranks {
        sqlx::query(
            "INSERT INTO member_ranks (member_id, rank_id, role_id, created_at_unix)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(member_id)
        .bind(rank_id)
        .bind(role_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|_| ApiFailure::Internal)?;
    }
    Ok(())
}

async fn resolve_assignment_in_memory(
    state: &AppState,
    role_names: &[String],
    global_rank_id: Option<String>,
    role_ranks: Vec<MemberRoleRankEntry>,
) -> Result<Assignment, ApiFailure> {
    let mut roles = state.roles.write().await;
    let mut role_ids = HashSet::new();
    for role_name in role_names {
        role_ids.insert(ensure_role_in_memory(&mut roles, role_name));
    }
    drop(roles);

    let ranks = state.ranks.read().await;
    if let Some(rank_id) = &global_rank_id {
        let is_global = ranks
            .get(rank_id)
            .is_some_and(|record| record.role_id.is_none());
        if !is_global {
            return Err(ApiFailure::InvalidRequest);
        }
    }

    let mut resolved_ranks = HashMap::new();
    for entry in role_ranks {
        if !role_ids.contains(&entry.role_id) {
            continue;
        }
        let Some(record) = ranks.get(&entry.rank_id) else {
            return Err(ApiFailure::InvalidRequest);
        };
        if record
            .role_id
            .as_deref()
            .is_some_and(|scope| scope != entry.role_id)
        {
            return Err(ApiFailure::InvalidRequest);
        }
        resolved_ranks.insert(entry.role_id, entry.rank_id);
    }

    Ok(Assignment {
        role_ids,
        global_rank_id,
        role_ranks: resolved_ranks,
    })
}

/// Assembles member responses with role names and resolved rank labels.
async fn load_member_responses(
    state: &AppState,
    only_member_id: Option<&str>,
) -> Result<Vec<MemberResponse>, ApiFailure> {
    if let Some(pool) = &state.db_pool {
        return load_member_responses_db(state, pool, only_member_id).await;
    }

    let members = state.members.read().await;
    let roles = state.roles.read().await;
    let ranks = state.ranks.read().await;
    let overrides = state.rank_overrides.read().await;

    let mut response = Vec::new();
    for (member_id, record) in members.iter() {
        if only_member_id.is_some_and(|wanted| wanted != member_id) {
            continue;
        }
        let mut role_names = record
            .role_ids
            .iter()
            .filter_map(|role_id| roles.get(role_id).map(|r| r.name.clone()))
            .collect::<Vec<_>>();
        role_names.sort();

        let mut role_rank_entries = Vec::new();
        for (role_id, rank_id) in &record.role_ranks {
            let Some(rank) = ranks.get(rank_id) else {
                continue;
            };
            let override_name = overrides
                .get(&(role_id.clone(), rank_id.clone()))
                .map(String::as_str);
            let label = rank_label(&rank.name, rank.role_id.is_some(), override_name);
            role_rank_entries.push(MemberRoleRankResponse {
                role_id: role_id.clone(),
                rank_id: rank_id.clone(),
                label: label.to_owned(),
            });
        }
        role_rank_entries.sort_by(|a, b| a.role_id.cmp(&b.role_id));

        response.push(MemberResponse {
            member_id: member_id.clone(),
            display_name: record.display_name.clone(),
            status: record.status,
            wallet_address: record.wallet_address.clone(),
            roles: role_names,
            global_rank_id: record.global_rank_id.clone(),
            role_ranks: role_rank_entries,
        });
    }
    response.sort_by(|a, b| a.display_name.cmp(&b.display_name).then_with(|| a.member_id.cmp(&b.member_id)));
    Ok(response)
}

async fn load_member_responses_db(
    _state: &AppState,
    pool: &sqlx::PgPool,
    only_member_id: Option<&str>,
) -> Result<Vec<MemberResponse>, ApiFailure> {
    let member_rows = sqlx::query(
        "SELECT member_id, display_name, status, wallet_address
         FROM members
         WHERE $1::TEXT IS NULL OR member_id = $1
         ORDER BY display_name, member_id",
    )
    .bind(only_member_id)
    .fetch_all(pool)
    .await
    .map_err(|_| ApiFailure::Internal)?;

    let role_rows = sqlx::query(
        "SELECT mr.member_id, r.name
         FROM member_roles mr
         JOIN roles r ON r.role_id = mr.role_id
         ORDER BY r.name",
    )
    .fetch_all(pool)
    .await
    .map_err(|_| ApiFailure::Internal)?;
    let mut roles_by_member: HashMap<String, Vec<String>> = HashMap::new();
    for row in role_rows {
        let member_id: String = row.try_get("member_id").map_err(|_| ApiFailure::Internal)?;
        let name: String = row.try_get("name").map_err(|_| ApiFailure::Internal)?;
        roles_by_member.entry(member_id).or_default().push(name);
    }

    let rank_rows = sqlx::query(
        "SELECT mr.member_id, mr.rank_id, mr.role_id, rk.name AS rank_name,
                rk.role_id AS rank_scope, o.name AS override_name
         FROM member_ranks mr
         JOIN ranks rk ON rk.rank_id = mr.rank_id
         LEFT JOIN role_rank_overrides o
             ON o.rank_id = mr.rank_id AND o.role_id = mr.role_id
         ORDER BY mr.role_id",
    )
    .fetch_all(pool)
    .await
    .map_err(|_| ApiFailure::Internal)?;

    let mut global_by_member: HashMap<String, String> = HashMap::new();
    let mut role_ranks_by_member: HashMap<String, Vec<MemberRoleRankResponse>> = HashMap::new();
    for row in rank_rows {
        let member_id: String = row.try_get("member_id").map_err(|_| ApiFailure::Internal)?;
        let rank_id: String = row.try_get("rank_id").map_err(|_| ApiFailure::Internal)?;
        let role_id: Option<String> = row.try_get("role_id").map_err(|_| ApiFailure::Internal)?;
        let Some(role_id) = role_id else {
            global_by_member.insert(member_id, rank_id);
            continue;
        };
        let rank_name: String = row.try_get("rank_name").map_err(|_| ApiFailure::Internal)?;
        let rank_scope: Option<String> =
            row.try_get("rank_scope").map_err(|_| ApiFailure::Internal)?;
        let override_name: Option<String> = row
            .try_get("override_name")
            .map_err(|_| ApiFailure::Internal)?;
        let label = rank_label(&rank_name, rank_scope.is_some(), override_name.as_deref());
        role_ranks_by_member
            .entry(member_id)
            .or_default()
            .push(MemberRoleRankResponse {
                role_id,
                rank_id,
                label: label.to_owned(),
            });
    }

    let mut response = Vec::with_capacity(member_rows.len());
    for row in member_rows {
        let member_id: String = row.try_get("member_id").map_err(|_| ApiFailure::Internal)?;
        let status_raw: i16 = row.try_get("status").map_err(|_| ApiFailure::Internal)?;
        let status = member_status_from_i16(status_raw).ok_or(ApiFailure::Internal)?;
        response.push(MemberResponse {
            member_id: member_id.clone(),
            display_name: row
                .try_get("display_name")
                .map_err(|_| ApiFailure::Internal)?,
            status,
            wallet_address: row
                .try_get("wallet_address")
                .map_err(|_| ApiFailure::Internal)?,
            roles: roles_by_member.remove(&member_id).unwrap_or_default(),
            global_rank_id: global_by_member.remove(&member_id),
            role_ranks: role_ranks_by_member.remove(&member_id).unwrap_or_default(),
        });
    }
    Ok(response)
}
