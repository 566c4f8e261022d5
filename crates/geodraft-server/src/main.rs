//! GeoDraft reference server binary.

use std::sync::Arc;

use geodraft_server::config::{DEFAULT_LOG_FILTER, ServerConfig};
use geodraft_server::{AppState, router};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let state = Arc::new(AppState::new());
    if let Some(dir) = &config.seed_dir {
        state.load_seed_dir(dir)?;
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("GeoDraft server listening on {}", config.addr);

    axum::serve(listener, app).await?;
    Ok(())
}
