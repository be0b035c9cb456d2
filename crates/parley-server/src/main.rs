//! # Parley Server
//!
//! Realtime direct-messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with a config file
//! # (parley.toml is picked up from the working directory)
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//! ```

use anyhow::Result;
use parley_server::{config, handlers, metrics};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Wire the reference store; durable backends plug in through the
    // parley_core::Store trait.
    let store = Arc::new(parley_core::MemoryStore::new());
    if let Some(path) = &config.storage.seed_path {
        let seed = config::SeedFile::from_file(path)?;
        let count = seed.users.len();
        for user in seed.users {
            store.insert_user(user.into());
        }
        tracing::info!("Seeded {} users from {}", count, path);
    }

    // Start the server
    handlers::run_server(config, store).await?;

    Ok(())
}
