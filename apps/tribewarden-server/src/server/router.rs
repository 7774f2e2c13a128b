use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::ConnectInfo,
    extract::DefaultBodyLimit,
    http::{request::Request, HeaderName, StatusCode},
    response::IntoResponse,
    routing::{get, patch},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::resolve_client_ip,
    core::{AppConfig, AppState},
    errors::ApiFailure,
    handlers::{
        access_lists::{
            create_access_list, delete_access_list, list_access_lists, update_access_list,
        },
        members::{create_member, delete_member, list_members, update_member},
        ranks::{create_rank, delete_rank, list_ranks, reorder_ranks, update_rank},
        role_ranks::{
            list_role_rank_overrides, list_role_ranks, patch_role_rank_overrides,
            patch_role_ranks, reorder_role_ranks,
        },
        roles::{
            create_role, delete_role, list_available_ranks, list_roles, reorder_roles,
            update_role,
        },
        visibility::{list_visibility, patch_visibility},
    },
    types::health,
};

#[derive(Clone)]
struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        let resolved = resolve_client_ip(req.headers(), peer_ip);
        Ok(resolved.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if configured security limits are invalid.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    if config.max_body_bytes == 0 {
        return Err(anyhow!("body limit must be at least 1 byte"));
    }
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!("rate limit must be at least 1 request per minute"));
    }
    if config.request_timeout.is_zero() {
        return Err(anyhow!("request timeout must be non-zero"));
    }

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(ClientIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config).error_handler(|error| match error {
        GovernorError::TooManyRequests { .. } => ApiFailure::RateLimited.into_response(),
        _ => ApiFailure::Internal.into_response(),
    });

    let routes = Router::new()
        .route("/health", get(health))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/order", patch(reorder_roles))
        .route("/roles/{role_id}", patch(update_role).delete(delete_role))
        .route("/roles/{role_id}/available-ranks", get(list_available_ranks))
        .route("/ranks", get(list_ranks).post(create_rank))
        .route("/ranks/order", patch(reorder_ranks))
        .route("/ranks/{rank_id}", patch(update_rank).delete(delete_rank))
        .route("/role-ranks", get(list_role_ranks))
        .route("/role-ranks/order/{role_id}", patch(reorder_role_ranks))
        .route("/role-ranks/{role_id}", patch(patch_role_ranks))
        .route("/role-rank-overrides", get(list_role_rank_overrides))
        .route(
            "/role-rank-overrides/{role_id}",
            patch(patch_role_rank_overrides),
        )
        .route(
            "/access-lists",
            get(list_access_lists).post(create_access_list),
        )
        .route(
            "/access-lists/{access_list_id}",
            patch(update_access_list).delete(delete_access_list),
        )
        .route("/members", get(list_members).post(create_member))
        .route(
            "/members/{member_id}",
            patch(update_member).delete(delete_member),
        )
        .route("/visibility", get(list_visibility))
        .route("/visibility/{area}", patch(patch_visibility));

    Ok(routes
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}
