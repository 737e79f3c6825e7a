use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use myclaw_core::MyclawConfig;

mod app;
mod error;
mod http;
mod job_handler;
mod prompt;
mod skills;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "myclaw_gateway=info".into()),
        )
        .init();

    // load config: explicit path > MYCLAW_CONFIG env > ~/.myclaw/config.json
    let config_path = std::env::var("MYCLAW_CONFIG").ok();
    let config = MyclawConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        MyclawConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = app::GatewayState::build(config).await?;
    let health_router = http::health::router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "myclaw gateway health endpoint listening");

    let ctx = CancellationToken::new();

    let serve_ctx = ctx.clone();
    let health_task = tokio::spawn(async move {
        axum::serve(listener, health_router)
            .with_graceful_shutdown(async move { serve_ctx.cancelled().await })
            .await
    });

    state.run(ctx).await?;
    health_task.await??;

    Ok(())
}
