// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proxy agent entry point.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use weft_cache::StaticRegistry;
use weft_overlay::{QuicOverlay, QuicOverlayConfig};
use weft_proxy::{ProxyConfig, ProxyContext, http};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("weft_proxy=info".parse().unwrap()),
        )
        .init();

    info!("Starting weft proxy");

    let config = ProxyConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    match &config.service {
        Some(service) => info!(
            service = %service.name,
            endpoint = %service.endpoint,
            "running in service mode"
        ),
        None => info!("running in anonymous mode"),
    }

    let mut overlay_config = QuicOverlayConfig::from_env();
    overlay_config.bootstraps = config.bootstraps.clone();
    let overlay = QuicOverlay::start(overlay_config).await?;

    let mut registry = StaticRegistry::new();
    for (name, info) in config.services.clone() {
        registry = registry.with_service(name, info);
    }

    let ctx = ProxyContext::new(
        overlay.clone(),
        Arc::new(registry),
        config.registry_ttl,
        config.service.clone(),
    );
    ctx.start().await?;

    let (ctrl_addr, server) = http::serve(ctx.clone(), config.ctrl_port).await?;
    info!(%ctrl_addr, "proxy ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    ctx.shutdown();
    let _ = server.await;
    overlay.close();
    info!("Shutdown complete");

    Ok(())
}
