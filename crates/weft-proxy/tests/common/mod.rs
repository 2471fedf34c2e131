// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for proxy integration tests: an in-process mesh,
//! seeded registries, and local echo services.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};

use weft_cache::{ServiceInfo, StaticRegistry};
use weft_overlay::{MemoryMesh, MemoryOverlay, PerfInd};
use weft_proxy::{LocalService, ProxyContext};

pub const REGISTRY_TTL: Duration = Duration::from_secs(3600);

/// Registry info for a test service; the content hash doubles as the
/// rendezvous string sponsors advertise.
pub fn service_info(name: &str) -> ServiceInfo {
    ServiceInfo {
        content_hash: format!("Qm{name}"),
        docker_hash: format!("{name}:latest"),
        soft_req: PerfInd::new(Duration::from_millis(100)),
        hard_req: PerfInd::new(Duration::from_millis(500)),
    }
}

/// An in-process mesh plus the registry every node shares.
pub struct TestNet {
    pub mesh: MemoryMesh,
    pub registry: Arc<StaticRegistry>,
}

impl TestNet {
    pub fn new(services: &[&str]) -> Self {
        let mut registry = StaticRegistry::new();
        for name in services {
            registry = registry.with_service(*name, service_info(name));
        }
        Self {
            mesh: MemoryMesh::new(),
            registry: Arc::new(registry),
        }
    }

    /// Join a sponsor proxy for `name`, fronting the service at
    /// `endpoint`, and wire it into the overlay.
    pub async fn sponsor(
        &self,
        name: &str,
        endpoint: SocketAddr,
    ) -> (Arc<ProxyContext>, Arc<MemoryOverlay>) {
        let overlay = self.mesh.join();
        let ctx = ProxyContext::new(
            overlay.clone(),
            self.registry.clone(),
            REGISTRY_TTL,
            Some(LocalService {
                name: name.to_string(),
                endpoint: endpoint.to_string(),
            }),
        );
        ctx.start().await.expect("sponsor start");
        (ctx, overlay)
    }

    /// Join an anonymous client proxy. Background loops are left off so
    /// tests can assert on cache contents deterministically.
    pub fn client(&self) -> (Arc<ProxyContext>, Arc<MemoryOverlay>) {
        let overlay = self.mesh.join();
        let ctx = ProxyContext::new(overlay.clone(), self.registry.clone(), REGISTRY_TTL, None);
        (ctx, overlay)
    }
}

/// TCP service that echoes every byte back.
pub async fn tcp_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
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
    addr
}

/// UDP service that echoes every datagram back to its sender.
pub async fn udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64 * 1024];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}
