use std::sync::Arc;

use backend::config::Config;
use backend::hub::RoomHub;
use backend::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Environment may be provided without a .env file.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let addr = config.bind_addr()?;
    let state = AppState::from_config(config).await;
    let hub = state.hub().clone();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "secret santa server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    Ok(())
}

/// Resolves on ctrl-c after releasing every chat connection so open sockets
/// do not hold the server up.
async fn shutdown_signal(hub: Arc<RoomHub>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
    hub.shutdown();
}
