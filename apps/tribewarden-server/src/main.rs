#![forbid(unsafe_code)]

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tribewarden_server::{build_router, init_tracing, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let database_url = std::env::var("TRIBEWARDEN_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("TRIBEWARDEN_DATABASE_URL is required for runtime"))?;
    let rate_limit_requests_per_minute = std::env::var("TRIBEWARDEN_RATE_LIMIT_PER_MINUTE")
        .map_or_else(
            |_| Ok(AppConfig::default().rate_limit_requests_per_minute),
            |value| {
                value.parse::<u32>().map_err(|e| {
                    anyhow::anyhow!("invalid TRIBEWARDEN_RATE_LIMIT_PER_MINUTE value {value:?}: {e}")
                })
            },
        )?;
    let app_config = AppConfig {
        bootstrap_admin_role: std::env::var("TRIBEWARDEN_BOOTSTRAP_ADMIN_ROLE").ok(),
        rate_limit_requests_per_minute,
        database_url: Some(database_url),
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("TRIBEWARDEN_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid TRIBEWARDEN_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tribewarden-server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
