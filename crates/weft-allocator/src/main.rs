// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Allocator daemon entry point.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use weft_allocator::{Allocator, AllocatorConfig, Culler, CullerConfig, DockerCli};
use weft_overlay::{QuicOverlay, QuicOverlayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("weft_allocator=info".parse().unwrap()),
        )
        .init();

    info!("Starting weft allocator");

    let config = AllocatorConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let mut overlay_config = QuicOverlayConfig::from_env();
    overlay_config.bootstraps = config
        .bootstraps
        .iter()
        .filter_map(|addr| addr.parse().ok())
        .collect();
    let overlay = QuicOverlay::start(overlay_config).await?;

    let driver = Arc::new(DockerCli::new());
    let allocator = Allocator::new(overlay.clone(), driver.clone(), config);
    allocator.register().await?;

    let culler = Culler::new(allocator.services(), driver, CullerConfig::default());
    let culler_shutdown = culler.shutdown_handle();
    let culler_handle = tokio::spawn(async move { culler.run().await });

    info!("Allocator running, waiting for requests");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    culler_shutdown.notify_one();
    let _ = culler_handle.await;
    overlay.close();
    info!("Shutdown complete");

    Ok(())
}
