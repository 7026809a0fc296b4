use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use billflow_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    billflow_observability::init(config.log_format);

    let shutdown = CancellationToken::new();
    let services = billflow_api::app::services::build_services(&config, shutdown.clone())
        .context("failed to start services")?;
    let app = billflow_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down; interrupting waiting requests");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
