//! dbsession demo server

use anyhow::Result;
use data_encoding::BASE64URL_NOPAD;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbsession::{
    api,
    codec::generate_random_key,
    config::{Config, KeyPairConfig},
    db, spawn_cleanup, SqlStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbsession=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dbsession demo server...");

    // Load configuration
    let mut config = Config::load_with_env(Path::new("config.yml"))?;
    if config.session.keys.is_empty() {
        tracing::warn!(
            "No session keys configured; using a random key, sessions will not survive a restart"
        );
        let key = generate_random_key(32)?;
        config.session.keys.push(KeyPairConfig {
            hash_key: BASE64URL_NOPAD.encode(&key),
            block_key: None,
        });
    }
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    pool.ping().await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let store = Arc::new(SqlStore::from_config(pool.clone(), &config.session).await?);
    tracing::info!("Session store ready: table '{}'", config.session.table_name);

    // Expired row cleanup
    let cancel = CancellationToken::new();
    let cleanup = match config.session.cleanup_interval_secs {
        0 => None,
        secs => Some(spawn_cleanup(
            store.clone(),
            Duration::from_secs(secs),
            cancel.clone(),
        )),
    };

    // Build router
    let app = api::build_router(store);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Some(handle) = cleanup {
        if let Err(e) = handle.await {
            tracing::warn!("Session cleanup task failed: {}", e);
        }
    }
    pool.close().await;
    tracing::info!("Shut down");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
        _ = cancel.cancelled() => {}
    }
    tracing::info!("Shutdown requested");
}
