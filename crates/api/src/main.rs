use std::net::SocketAddr;

use anyhow::Context;

use scribe_api::app::{build_app, build_services};
use scribe_infra::IdentityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scribe_observability::init();

    let config = IdentityConfig::from_env().context("invalid configuration")?;
    let runtime = build_services(&config).await?;
    let app = build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.replica_worker.shutdown().await;
    let stats = runtime.synchronizer.stats();
    tracing::info!(
        applied = stats.applied,
        already_applied = stats.already_applied,
        missed = stats.missed,
        removed = stats.removed,
        failed = stats.failed,
        "replica synchronizer stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
