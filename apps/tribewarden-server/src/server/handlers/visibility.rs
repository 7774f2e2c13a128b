use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sqlx::Row;
use tribewarden_core::VisibilityArea;

use crate::server::{
    auth::{module_identity, now_unix, require_access, ACCESS_MANAGE_ROLES},
    core::AppState,
    db::ensure_db_schema,
    errors::ApiFailure,
    types::{PatchVisibilityRequest, VisibilityAreaPath, VisibilitySettingResponse},
};

// The console reads this before it knows whether the viewer is signed in,
// so the listing itself is ungated and returns only stored rows.
pub(crate) async fn list_visibility(
    State(state): State<AppState>,
) -> Result<Json<Vec<VisibilitySettingResponse>>, ApiFailure> {
    ensure_db_schema(&state).await?;

    if let Some(pool) = &state.db_pool {
        let rows = sqlx::query("SELECT area, is_public FROM visibility_settings ORDER BY area")
            .fetch_all(pool)
            .await
            .map_err(|_| ApiFailure::Internal)?;
        let mut settings = Vec::with_capacity(rows.len());
        for row in rows {
            settings.push(VisibilitySettingResponse {
                area: row.try_get("area").map_err(|_| ApiFailure::Internal)?,
                is_public: row.try_get("is_public").map_err(|_| ApiFailure::Internal)?,
            });
        }
        return Ok(Json(settings));
    }

    let visibility = state.visibility.read().await;
    let mut settings = visibility
        .iter()
        .map(|(area, is_public)| VisibilitySettingResponse {
            area: area.as_str().to_owned(),
            is_public: *is_public,
        })
        .collect::<Vec<_>>();
    settings.sort_by(|a, b| a.area.cmp(&b.area));
    Ok(Json(settings))
}

pub(crate) async fn patch_visibility(
    State(state): State<AppState>,
    Path(path): Path<VisibilityAreaPath>,
    headers: HeaderMap,
    Json(payload): Json<PatchVisibilityRequest>,
) -> Result<Json<VisibilitySettingResponse>, ApiFailure> {
    ensure_db_schema(&state).await?;
    let identity = module_identity(&headers);
    require_access(&state, &identity, ACCESS_MANAGE_ROLES).await?;

    let area = VisibilityArea::try_from(path.area).map_err(|_| ApiFailure::NotFound)?;

    if let Some(pool) = &state.db_pool {
        sqlx::query(
            "INSERT INTO visibility_settings (area, is_public, updated_at_unix)
             VALUES ($1, $2, $3)
             ON CONFLICT (area) DO UPDATE
                 SET is_public = EXCLUDED.is_public,
                     updated_at_unix = EXCLUDED.updated_at_unix",
        )
        .bind(area.as_str())
        .bind(payload.is_public)
        .bind(now_unix())
        .execute(pool)
        .await
        .map_err(|_| ApiFailure::Internal)?;
    } else {
        let mut visibility = state.visibility.write().await;
        visibility.insert(area, payload.is_public);
    }

    Ok(Json(VisibilitySettingResponse {
        area: area.as_str().to_owned(),
        is_public: payload.is_public,
    }))
}
