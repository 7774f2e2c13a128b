use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::{OnceCell, RwLock};
use tribewarden_core::{MemberStatus, VisibilityArea};
use ulid::Ulid;

use super::auth::{now_unix, MANAGEMENT_ACCESS_LISTS};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub bootstrap_admin_role: Option<String>,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            bootstrap_admin_role: None,
            database_url: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) bootstrap_admin_role: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    pub(crate) roles: Arc<RwLock<HashMap<String, RoleRecord>>>,
    pub(crate) ranks: Arc<RwLock<HashMap<String, RankRecord>>>,
    pub(crate) role_ranks: Arc<RwLock<HashMap<(String, String), i32>>>,
    pub(crate) rank_overrides: Arc<RwLock<HashMap<(String, String), String>>>,
    pub(crate) access_lists: Arc<RwLock<HashMap<String, AccessListRecord>>>,
    pub(crate) role_access: Arc<RwLock<HashSet<(String, String)>>>,
    pub(crate) members: Arc<RwLock<HashMap<String, MemberRecord>>>,
    pub(crate) visibility: Arc<RwLock<HashMap<VisibilityArea, bool>>>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };

        let mut roles = HashMap::new();
        let mut access_lists = HashMap::new();
        let mut role_access = HashSet::new();
        if db_pool.is_none() {
            if let Some(role_name) = &config.bootstrap_admin_role {
                seed_bootstrap_admin(role_name, &mut roles, &mut access_lists, &mut role_access);
            }
        }

        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            roles: Arc::new(RwLock::new(roles)),
            ranks: Arc::new(RwLock::new(HashMap::new())),
            role_ranks: Arc::new(RwLock::new(HashMap::new())),
            rank_overrides: Arc::new(RwLock::new(HashMap::new())),
            access_lists: Arc::new(RwLock::new(access_lists)),
            role_access: Arc::new(RwLock::new(role_access)),
            members: Arc::new(RwLock::new(HashMap::new())),
            visibility: Arc::new(RwLock::new(HashMap::new())),
            runtime: Arc::new(RuntimeConfig {
                bootstrap_admin_role: config.bootstrap_admin_role.clone(),
            }),
        })
    }
}

// In-memory counterpart of the idempotent seed performed during Postgres
// schema init: one admin role enrolled in every management access list.
fn seed_bootstrap_admin(
    role_name: &str,
    roles: &mut HashMap<String, RoleRecord>,
    access_lists: &mut HashMap<String, AccessListRecord>,
    role_access: &mut HashSet<(String, String)>,
) {
    let now = now_unix();
    let role_id = Ulid::new().to_string();
    roles.insert(
        role_id.clone(),
        RoleRecord {
            name: role_name.to_owned(),
            description: None,
            sort_order: 1,
            created_at_unix: now,
            updated_at_unix: now,
        },
    );

    for list_name in MANAGEMENT_ACCESS_LISTS {
        let access_list_id = Ulid::new().to_string();
        access_lists.insert(
            access_list_id.clone(),
            AccessListRecord {
                name: (*list_name).to_owned(),
                description: None,
                created_at_unix: now,
                updated_at_unix: now,
            },
        );
        role_access.insert((role_id.clone(), access_list_id));
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RoleRecord {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: i32,
    pub(crate) created_at_unix: i64,
    pub(crate) updated_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct RankRecord {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) sort_order: i32,
    pub(crate) role_id: Option<String>,
    pub(crate) created_at_unix: i64,
    pub(crate) updated_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct AccessListRecord {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) created_at_unix: i64,
    pub(crate) updated_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct MemberRecord {
    pub(crate) display_name: String,
    pub(crate) status: MemberStatus,
    pub(crate) wallet_address: Option<String>,
    pub(crate) role_ids: HashSet<String>,
    pub(crate) global_rank_id: Option<String>,
    pub(crate) role_ranks: HashMap<String, String>,
    pub(crate) created_at_unix: i64,
    pub(crate) updated_at_unix: i64,
}
