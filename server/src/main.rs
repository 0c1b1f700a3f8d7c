//! Import Server binary.

use importer_server::{build_router, AppState, Config, RestStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "importer_server=debug,importer_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Import Server on {}:{}", config.host, config.port);
    tracing::info!(
        store = %config.store_url,
        bulk = ?config.store_bulk,
        "Using remote record store"
    );

    let store = RestStore::new(
        config.store_url.clone(),
        config.store_token.clone(),
        config.store_bulk,
    );
    let addr = format!("{}:{}", config.host, config.port);
    let session_ttl = config.session_ttl;
    let state = AppState::new(Arc::new(store), config);
    state.sessions.clone().spawn_reaper(session_ttl);
    tracing::info!(ttl_secs = session_ttl.as_secs(), "Evicting imports left unanswered");
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
