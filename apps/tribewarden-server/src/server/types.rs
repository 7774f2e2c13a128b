use axum::Json;
use serde::{Deserialize, Serialize};
use tribewarden_core::MemberStatus;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    pub(crate) error: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct OkResponse {
    pub(crate) ok: bool,
}

// Path params.

#[derive(Debug, Deserialize)]
pub(crate) struct RolePath {
    pub(crate) role_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RankPath {
    pub(crate) rank_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessListPath {
    pub(crate) access_list_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberPath {
    pub(crate) member_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VisibilityAreaPath {
    pub(crate) area: String,
}

// Roles.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleResponse {
    pub(crate) role_id: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoleListResponse {
    pub(crate) roles: Vec<RoleResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CreateRoleRequest {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct UpdateRoleRequest {
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ReorderRolesRequest {
    pub(crate) role_ids: Vec<String>,
}

// Ranks.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RankResponse {
    pub(crate) rank_id: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: i32,
    pub(crate) role_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RankListResponse {
    pub(crate) ranks: Vec<RankResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CreateRankRequest {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: Option<i32>,
    pub(crate) role_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct UpdateRankRequest {
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ReorderRanksRequest {
    pub(crate) rank_ids: Vec<String>,
}

// Role-rank bindings and overrides.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleRankBindingResponse {
    pub(crate) role_id: String,
    pub(crate) rank_id: String,
    pub(crate) sort_order: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleRankListResponse {
    pub(crate) role_ranks: Vec<RoleRankBindingResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleRankOverrideResponse {
    pub(crate) role_id: String,
    pub(crate) rank_id: String,
    pub(crate) name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleRankOverrideListResponse {
    pub(crate) role_rank_overrides: Vec<RoleRankOverrideResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct OverrideEntry {
    pub(crate) rank_id: String,
    pub(crate) name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PatchRoleRankOverridesRequest {
    pub(crate) overrides: Vec<OverrideEntry>,
}

// Access lists.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessListResponse {
    pub(crate) access_list_id: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) roles: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessListListResponse {
    pub(crate) access_lists: Vec<AccessListResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CreateAccessListRequest {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) roles: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct UpdateAccessListRequest {
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) roles: Option<Vec<String>>,
}

// Members.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberRoleRankResponse {
    pub(crate) role_id: String,
    pub(crate) rank_id: String,
    pub(crate) label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberResponse {
    pub(crate) member_id: String,
    pub(crate) display_name: String,
    pub(crate) status: MemberStatus,
    pub(crate) wallet_address: Option<String>,
    pub(crate) roles: Vec<String>,
    pub(crate) global_rank_id: Option<String>,
    pub(crate) role_ranks: Vec<MemberRoleRankResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MemberListResponse {
    pub(crate) members: Vec<MemberResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct MemberRoleRankEntry {
    pub(crate) role_id: String,
    pub(crate) rank_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CreateMemberRequest {
    pub(crate) display_name: String,
    pub(crate) status: Option<String>,
    pub(crate) wallet_address: Option<String>,
    pub(crate) roles: Option<Vec<String>>,
    pub(crate) global_rank_id: Option<String>,
    pub(crate) role_ranks: Option<Vec<MemberRoleRankEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct UpdateMemberRequest {
    pub(crate) display_name: Option<String>,
    pub(crate) status: Option<String>,
    pub(crate) wallet_address: Option<String>,
    pub(crate) roles: Option<Vec<String>>,
    pub(crate) global_rank_id: Option<String>,
    pub(crate) role_ranks: Option<Vec<MemberRoleRankEntry>>,
}

// Visibility.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VisibilitySettingResponse {
    pub(crate) area: String,
    pub(crate) is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PatchVisibilityRequest {
    pub(crate) is_public: bool,
}
