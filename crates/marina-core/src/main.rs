// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Marina Core service.
//!
//! Connects the install store, applies migrations and stays up until
//! interrupted.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marina_core::config::Config;
use marina_core::persistence;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marina_core=info")),
        )
        .init();

    info!("Starting Marina Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        git_working_dir = %config.git_working_dir.display(),
        acd_timeout_secs = config.acd_timeout.as_secs(),
        bulk_stream = %config.bulk.stream,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = persistence::connect(&config.database_url, config.max_connections).await?;
    info!("Database health check passed");

    info!("Marina Core initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    drop(store);
    info!("Shutdown complete");

    Ok(())
}
