use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use warden_api::app::{self, AppServices};
use warden_api::config::WardenConfig;
use warden_infra::{LoggingNotifier, TokenPurgeWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init();

    let config = WardenConfig::from_env()?;
    let services = Arc::new(AppServices::build(&config, Arc::new(LoggingNotifier)).await?);

    let purge = TokenPurgeWorker::spawn(services.purge_store.clone(), config.token_purge_interval);
    let app = app::build_app(services)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge.shutdown().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
