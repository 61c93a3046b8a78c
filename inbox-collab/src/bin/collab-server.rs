//! Standalone collaboration server.
//!
//! Configuration comes from the environment on top of the defaults:
//! `COLLAB_BIND_ADDR`, `COLLAB_STORAGE_PATH` (enables RocksDB) and
//! `COLLAB_LOCK_TIMEOUT_MS`. `RUST_LOG` controls logging.

use std::time::Duration;

use inbox_collab::{ServerConfig, SyncServer};
use log::{info, warn};

fn config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("COLLAB_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(path) = std::env::var("COLLAB_STORAGE_PATH") {
        config.storage_path = Some(path.into());
    }
    if let Ok(ms) = std::env::var("COLLAB_LOCK_TIMEOUT_MS") {
        match ms.parse::<u64>() {
            Ok(ms) => config.engine.lock_timeout = Duration::from_millis(ms),
            Err(e) => warn!("Ignoring COLLAB_LOCK_TIMEOUT_MS={ms}: {e}"),
        }
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = config_from_env();
    info!("Starting collab server on {}...", config.bind_addr);

    let server = SyncServer::new(config)?;
    server.run().await
}
