// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single-process mesh demo over the QUIC transport on localhost.
//!
//! Three nodes join the same mesh: an allocator (with a mock container
//! engine), a proxy sponsoring a little TCP echo service, and an
//! anonymous client proxy. The demo then does what a real client would:
//! asks the client proxy's control endpoint for `/tcp/echo`, connects
//! to the returned listener, and sends a line through the chain.
//!
//! ```text
//! $ cargo run -p weft-demo --bin local_mesh_demo
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use weft_allocator::{Allocator, AllocatorConfig, MockDriver};
use weft_cache::{ServiceInfo, StaticRegistry};
use weft_overlay::{PerfInd, QuicOverlay, QuicOverlayConfig};
use weft_proxy::{LocalService, ProxyContext, http};

const ECHO_HASH: &str = "QmDemoEcho";

fn localhost_overlay(bootstraps: Vec<SocketAddr>) -> QuicOverlayConfig {
    QuicOverlayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        bootstraps,
        ..Default::default()
    }
}

fn demo_registry() -> Arc<StaticRegistry> {
    Arc::new(StaticRegistry::new().with_service(
        "echo",
        ServiceInfo {
            content_hash: ECHO_HASH.to_string(),
            docker_hash: "echo:latest".to_string(),
            soft_req: PerfInd::new(Duration::from_millis(100)),
            hard_req: PerfInd::new(Duration::from_millis(500)),
        },
    ))
}

/// A local TCP service that echoes every byte back.
async fn echo_service() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    Ok(addr)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("local_mesh_demo=info".parse().unwrap())
                .add_directive("weft_proxy=info".parse().unwrap()),
        )
        .init();

    // Allocator node: first into the mesh, everyone bootstraps off it
    let allocator_overlay = QuicOverlay::start(localhost_overlay(Vec::new())).await?;
    let bootstrap = allocator_overlay.local_addr()?;
    let allocator = Allocator::new(
        allocator_overlay.clone(),
        Arc::new(MockDriver::new()),
        AllocatorConfig {
            bootstraps: vec![bootstrap.to_string()],
            psk: "demo".to_string(),
        },
    );
    allocator.register().await?;
    info!(%bootstrap, "allocator up");

    // Sponsor node fronting the echo service
    let echo_endpoint = echo_service().await?;
    let sponsor_overlay = QuicOverlay::start(localhost_overlay(vec![bootstrap])).await?;
    let sponsor = ProxyContext::new(
        sponsor_overlay.clone(),
        demo_registry(),
        Duration::from_secs(3600),
        Some(LocalService {
            name: "echo".to_string(),
            endpoint: echo_endpoint.to_string(),
        }),
    );
    sponsor.start().await?;
    info!(service_endpoint = %echo_endpoint, "echo sponsor up");

    // Anonymous client proxy with its control endpoint
    let client_overlay = QuicOverlay::start(localhost_overlay(vec![bootstrap])).await?;
    let client = ProxyContext::new(
        client_overlay.clone(),
        demo_registry(),
        Duration::from_secs(3600),
        None,
    );
    client.start().await?;
    let (ctrl, _server) = http::serve(client.clone(), 0).await?;
    info!(%ctrl, "client proxy up");

    // Ask for a chain to "echo" the way any local program would
    let body = reqwest::get(format!("http://{ctrl}/tcp/echo"))
        .await?
        .text()
        .await?;
    let tunnel: SocketAddr = body.trim().parse()?;
    info!(%tunnel, "chain ready");

    let mut socket = TcpStream::connect(tunnel).await?;
    socket.write_all(b"hello through the mesh\n").await?;
    let mut reply = vec![0u8; 23];
    socket.read_exact(&mut reply).await?;
    println!("reply: {}", String::from_utf8_lossy(&reply));

    client.shutdown();
    sponsor.shutdown();
    client_overlay.close();
    sponsor_overlay.close();
    allocator_overlay.close();
    Ok(())
}
