use std::collections::HashMap;

use tribewarden_core::MemberStatus;
use ulid::Ulid;

use super::{
    auth::{now_unix, MANAGEMENT_ACCESS_LISTS},
    core::{AppState, RoleRecord},
    errors::ApiFailure,
};

const PG_UNIQUE_VIOLATION: &str = "23505";

#[allow(clippy::too_many_lines)]
pub(crate) async fn ensure_db_schema(state: &AppState) -> Result<(), ApiFailure> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x5452_4942_4557_4452;
    let Some(pool) = &state.db_pool else {
        return Ok(());
    };
    let runtime = state.runtime.clone();

    state
        .db_init
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS roles (
                    role_id TEXT PRIMARY KEY,
                    name TEXT UNIQUE NOT NULL,
                    description TEXT NULL,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at_unix BIGINT NOT NULL,
                    updated_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS ranks (
                    rank_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NULL,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    role_id TEXT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL,
                    updated_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_ranks_global_name_unique
                 ON ranks(name) WHERE role_id IS NULL",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS role_ranks (
                    role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    rank_id TEXT NOT NULL REFERENCES ranks(rank_id) ON DELETE CASCADE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at_unix BIGINT NOT NULL,
                    PRIMARY KEY (role_id, rank_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS role_rank_overrides (
                    role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    rank_id TEXT NOT NULL REFERENCES ranks(rank_id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL,
                    updated_at_unix BIGINT NOT NULL,
                    PRIMARY KEY (role_id, rank_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS access_lists (
                    access_list_id TEXT PRIMARY KEY,
                    name TEXT UNIQUE NOT NULL,
                    description TEXT NULL,
                    created_at_unix BIGINT NOT NULL,
                    updated_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS role_access (
                    role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    access_list_id TEXT NOT NULL
                        REFERENCES access_lists(access_list_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL,
                    PRIMARY KEY (role_id, access_list_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS members (
                    member_id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    status SMALLINT NOT NULL DEFAULT 0,
                    wallet_address TEXT NULL,
                    created_at_unix BIGINT NOT NULL,
                    updated_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS member_roles (
                    member_id TEXT NOT NULL REFERENCES members(member_id) ON DELETE CASCADE,
                    role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL,
                    PRIMARY KEY (member_id, role_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS member_ranks (
                    member_id TEXT NOT NULL REFERENCES members(member_id) ON DELETE CASCADE,
                    rank_id TEXT NOT NULL REFERENCES ranks(rank_id) ON DELETE CASCADE,
                    role_id TEXT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_member_ranks_global_unique
                 ON member_ranks(member_id) WHERE role_id IS NULL",
            )
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_member_ranks_role_unique
                 ON member_ranks(member_id, role_id) WHERE role_id IS NOT NULL",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS visibility_settings (
                    area TEXT PRIMARY KEY,
                    is_public BOOLEAN NOT NULL,
                    updated_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            if let Some(role_name) = &runtime.bootstrap_admin_role {
                let now = now_unix();
                sqlx::query(
                    "INSERT INTO roles (role_id, name, sort_order, created_at_unix, updated_at_unix)
                     VALUES ($1, $2, 1, $3, $3)
                     ON CONFLICT (name) DO NOTHING",
                )
                .bind(Ulid::new().to_string())
                .bind(role_name)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                for list_name in MANAGEMENT_ACCESS_LISTS {
                    sqlx::query(
                        "INSERT INTO access_lists
                             (access_list_id, name, created_at_unix, updated_at_unix)
                         VALUES ($1, $2, $3, $3)
                         ON CONFLICT (name) DO NOTHING",
                    )
                    .bind(Ulid::new().to_string())
                    .bind(list_name)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query(
                        "INSERT INTO role_access (role_id, access_list_id, created_at_unix)
                         SELECT r.role_id, al.access_list_id, $3
                         FROM roles r, access_lists al
                         WHERE r.name = $1 AND al.name = $2
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(role_name)
                    .bind(list_name)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| {
            tracing::error!(event = "db.init", error = %e);
            ApiFailure::Internal
        })?;
    Ok(())
}

pub(crate) fn member_status_to_i16(status: MemberStatus) -> i16 {
    match status {
        MemberStatus::Active => 0,
        MemberStatus::Pending => 1,
        MemberStatus::Suspended => 2,
    }
}

pub(crate) fn member_status_from_i16(value: i16) -> Option<MemberStatus> {
    match value {
        0 => Some(MemberStatus::Active),
        1 => Some(MemberStatus::Pending),
        2 => Some(MemberStatus::Suspended),
        _ => None,
    }
}

/// Maps a write error, surfacing unique-name violations as conflicts.
pub(crate) fn map_write_error(error: &sqlx::Error) -> ApiFailure {
    if error
        .as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == PG_UNIQUE_VIOLATION)
    {
        return ApiFailure::Conflict;
    }
    ApiFailure::Internal
}

/// Upserts a role by name inside the caller's transaction and returns its
/// id. New roles land at the end of the ordering. The no-op name update
/// makes RETURNING yield the existing row on conflict.
pub(crate) async fn ensure_role_tx(
    tx: &mut sqlx::PgConnection,
    role_name: &str,
) -> Result<String, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "INSERT INTO roles (role_id, name, sort_order, created_at_unix, updated_at_unix)
         VALUES ($1, $2, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM roles), $3, $3)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING role_id",
    )
    .bind(Ulid::new().to_string())
    .bind(role_name)
    .bind(now_unix())
    .fetch_one(tx)
    .await
}

/// In-memory counterpart of `ensure_role_tx`.
pub(crate) fn ensure_role_in_memory(
    roles: &mut HashMap<String, RoleRecord>,
    role_name: &str,
) -> String {
    if let Some((role_id, _)) = roles.iter().find(|(_, record)| record.name == role_name) {
        return role_id.clone();
    }
    let now = now_unix();
    let next_sort = roles.values().map(|r| r.sort_order).max().unwrap_or(0) + 1;
    let role_id = Ulid::new().to_string();
    roles.insert(
        role_id.clone(),
        RoleRecord {
            name: role_name.to_owned(),
            description: None,
            sort_order: next_sort,
            created_at_unix: now,
            updated_at_unix: now,
        },
    );
    role_id
}

#[cfg(test)]
mod tests {
    use super::{member_status_from_i16, member_status_to_i16};
    use tribewarden_core::MemberStatus;

    #[test]
    fn member_status_round_trips_through_storage_repr() {
        for status in [
            MemberStatus::Active,
            MemberStatus::Pending,
            MemberStatus::Suspended,
        ] {
            assert_eq!(member_status_from_i16(member_status_to_i16(status)), Some(status));
        }
        assert_eq!(member_status_from_i16(7), None);
    }
}
