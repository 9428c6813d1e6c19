use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use gitbot_server::config::BotConfig;
use gitbot_server::sink::WebhookSink;
use gitbot_server::{build_app, spawn_poller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("GITBOT_CONFIG").unwrap_or_else(|_| "gitbot.toml".to_string());
    let config = BotConfig::load(&config_path);
    config.validate();

    let listen_addr = config.listen_addr.clone();
    let sink = Arc::new(WebhookSink::new(&config.sink).context("building webhook client")?);
    let (app, state) = build_app(config).await?;
    let poller = spawn_poller(&state, sink);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(
        addr = %listen_addr,
        repos = state.registry.len().await,
        "gitbot listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;
    poller.abort();
    Ok(())
}
