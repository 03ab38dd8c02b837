use std::sync::Arc;

use limo_tracking::config::{AppConfig, StoreBackend};
use limo_tracking::db::{self, LocationStore, MemoryLocationStore, PgLocationStore};
use limo_tracking::server;
use limo_tracking::state::AppState;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Limo Tracking Service...");

    // Init store
    let store: Arc<dyn LocationStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
            info!("Connected to database");
            Arc::new(PgLocationStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory location store; samples are lost on restart");
            Arc::new(MemoryLocationStore::new())
        }
    };

    let state = AppState::new(store);

    // Serve until Ctrl-C
    tokio::select! {
        result = server::start_tracking_server(&config, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping tracking server");
        }
    }

    Ok(())
}
