// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The allocator's overlay-facing command handler.
//!
//! One command per stream: `start-program <image>` launches a container
//! and answers `<ip>:<service-port>`; anything else answers an error
//! line. The launched container receives the overlay bootstrap list and
//! network key through its environment so the proxy inside it can join
//! the mesh on its own.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use weft_overlay::{Overlay, OverlayStream, ProtocolId, stream_handler};
use weft_protocol::line::{read_line, write_line};
use weft_protocol::{ALLOCATOR_PROTO, ALLOCATOR_RENDEZVOUS, CMD_START_PROGRAM, ERR_ALLOC_FAIL, ERR_UNRECOGNIZED};

use crate::config::AllocatorConfig;
use crate::driver::{ContainerConfig, ContainerDriver};
use crate::error::AllocatorError;
use crate::net::{free_ports, public_ip};

/// A container instance this allocator launched and still tracks.
#[derive(Debug, Clone)]
pub struct ManagedService {
    pub container_id: String,
    pub metrics_port: u16,
    pub image: String,
    pub spawned_at: DateTime<Utc>,
}

/// Service table shared between the command handler and the culler,
/// keyed by metrics port.
pub type ServiceTable = Arc<Mutex<HashMap<u16, ManagedService>>>;

/// Allocator node: accepts remote allocation requests.
pub struct Allocator {
    overlay: Arc<dyn Overlay>,
    driver: Arc<dyn ContainerDriver>,
    services: ServiceTable,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(
        overlay: Arc<dyn Overlay>,
        driver: Arc<dyn ContainerDriver>,
        config: AllocatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            overlay,
            driver,
            services: Arc::new(Mutex::new(HashMap::new())),
            config,
        })
    }

    /// The shared service table, for wiring up the culler.
    pub fn services(&self) -> ServiceTable {
        self.services.clone()
    }

    /// Install the command handler and advertise the allocator
    /// rendezvous so proxies can find this node.
    pub async fn register(self: &Arc<Self>) -> Result<(), AllocatorError> {
        let allocator = self.clone();
        self.overlay.set_handler(
            ProtocolId::from(ALLOCATOR_PROTO),
            stream_handler(move |stream| {
                let allocator = allocator.clone();
                async move { allocator.handle_stream(stream).await }
            }),
        );
        self.overlay.advertise(ALLOCATOR_RENDEZVOUS).await?;
        info!("allocator registered on overlay");
        Ok(())
    }

    async fn handle_stream(self: Arc<Self>, stream: OverlayStream) {
        let peer = stream.peer();
        info!(%peer, "new allocation request stream");
        let (mut reader, mut writer) = stream.split();

        let line = match read_line(&mut reader).await {
            Ok(line) => line,
            Err(e) => {
                warn!(%peer, error = %e, "failed to read command");
                reader.reset();
                return;
            }
        };

        let reply = match line.split_once(' ') {
            Some((CMD_START_PROGRAM, image)) if !image.is_empty() => {
                info!(%peer, image, "received start-program");
                match self.start_program(image).await {
                    Ok(addr) => addr,
                    Err(e) => {
                        error!(%peer, image, error = %e, "allocation failed");
                        ERR_ALLOC_FAIL.to_string()
                    }
                }
            }
            _ => {
                warn!(%peer, command = %line, "unrecognized command");
                ERR_UNRECOGNIZED.to_string()
            }
        };

        if let Err(e) = write_line(&mut writer, &reply).await {
            warn!(%peer, error = %e, "failed to write reply");
        }
    }

    /// Launch one instance of `image` and record it in the service
    /// table. Returns the `ip:service-port` line for the requester.
    async fn start_program(&self, image: &str) -> Result<String, AllocatorError> {
        self.driver.pull_image(image).await?;

        let ip = public_ip()?;
        let [proxy_port, service_port, metrics_port] = free_ports::<3>()?;

        let container_config = ContainerConfig {
            image: image.to_string(),
            network: "host".to_string(),
            env: vec![
                ("PROXY_IP".to_string(), ip.to_string()),
                ("PROXY_PORT".to_string(), proxy_port.to_string()),
                ("SERVICE_PORT".to_string(), service_port.to_string()),
                ("METRICS_PORT".to_string(), metrics_port.to_string()),
                (
                    "P2P_BOOTSTRAPS".to_string(),
                    self.config.bootstraps.join(" "),
                ),
                ("P2P_PSK".to_string(), self.config.psk.clone()),
            ],
        };
        let container_id = self.driver.run_container(&container_config).await?;

        self.services.lock().await.insert(
            metrics_port,
            ManagedService {
                container_id: container_id.clone(),
                metrics_port,
                image: image.to_string(),
                spawned_at: Utc::now(),
            },
        );
        info!(image, id = %container_id, metrics_port, "started new service instance");

        Ok(format!("{ip}:{service_port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use std::net::SocketAddr;
    use weft_overlay::MemoryMesh;

    fn test_config() -> AllocatorConfig {
        AllocatorConfig {
            bootstraps: vec!["10.0.0.1:4001".to_string(), "10.0.0.2:4001".to_string()],
            psk: "test-passphrase".to_string(),
        }
    }

    async fn request(
        mesh: &MemoryMesh,
        allocator_peer: weft_overlay::PeerId,
        command: &str,
    ) -> String {
        let client = mesh.join();
        let stream = client
            .open_stream(allocator_peer, &ProtocolId::from(ALLOCATOR_PROTO))
            .await
            .unwrap();
        let (mut reader, mut writer) = stream.split();
        write_line(&mut writer, command).await.unwrap();
        read_line(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_program_replies_with_endpoint() {
        let mesh = MemoryMesh::new();
        let overlay = mesh.join();
        let driver = Arc::new(MockDriver::new());
        let allocator = Allocator::new(overlay.clone(), driver.clone(), test_config());
        allocator.register().await.unwrap();

        let reply = request(&mesh, overlay.local_peer(), "start-program echo:latest").await;
        assert!(
            reply.parse::<SocketAddr>().is_ok(),
            "reply not an IP:PORT endpoint: {reply}"
        );
        assert_eq!(driver.running_count(), 1);
    }

    #[tokio::test]
    async fn test_start_program_records_service_and_env() {
        let mesh = MemoryMesh::new();
        let overlay = mesh.join();
        let driver = Arc::new(MockDriver::new());
        let allocator = Allocator::new(overlay.clone(), driver.clone(), test_config());
        allocator.register().await.unwrap();

        request(&mesh, overlay.local_peer(), "start-program echo:latest").await;

        let table = allocator.services();
        let table = table.lock().await;
        assert_eq!(table.len(), 1);
        let service = table.values().next().unwrap();
        assert_eq!(service.image, "echo:latest");

        let config = driver.running(&service.container_id).unwrap();
        assert_eq!(config.network, "host");
        let keys: Vec<&str> = config.env.iter().map(|(k, _)| k.as_str()).collect();
        for expected in [
            "PROXY_IP",
            "PROXY_PORT",
            "SERVICE_PORT",
            "METRICS_PORT",
            "P2P_BOOTSTRAPS",
            "P2P_PSK",
        ] {
            assert!(keys.contains(&expected), "missing env {expected}");
        }
        let bootstraps = config
            .env
            .iter()
            .find(|(k, _)| k == "P2P_BOOTSTRAPS")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(bootstraps, "10.0.0.1:4001 10.0.0.2:4001");
    }

    #[tokio::test]
    async fn test_unrecognized_command() {
        let mesh = MemoryMesh::new();
        let overlay = mesh.join();
        let allocator =
            Allocator::new(overlay.clone(), Arc::new(MockDriver::new()), test_config());
        allocator.register().await.unwrap();

        let reply = request(&mesh, overlay.local_peer(), "frobnicate all-the-things").await;
        assert_eq!(reply, ERR_UNRECOGNIZED);
    }

    #[tokio::test]
    async fn test_failed_pull_reports_alloc_failure() {
        let mesh = MemoryMesh::new();
        let overlay = mesh.join();
        let driver = Arc::new(MockDriver::failing_pull());
        let allocator = Allocator::new(overlay.clone(), driver.clone(), test_config());
        allocator.register().await.unwrap();

        let reply = request(&mesh, overlay.local_peer(), "start-program echo:latest").await;
        assert_eq!(reply, ERR_ALLOC_FAIL);
        assert_eq!(driver.running_count(), 0);
        assert!(allocator.services().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_allocator_discoverable_by_rendezvous() {
        let mesh = MemoryMesh::new();
        let overlay = mesh.join();
        let allocator =
            Allocator::new(overlay.clone(), Arc::new(MockDriver::new()), test_config());
        allocator.register().await.unwrap();

        let client = mesh.join();
        let found = client.find_providers(ALLOCATOR_RENDEZVOUS).await.unwrap();
        assert_eq!(found, vec![overlay.local_peer()]);
    }
}
