// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that culls idle service instances.
//!
//! Every launched container exposes a metrics endpoint on localhost
//! whose body is the number of seconds since the instance last served a
//! request. The culler polls each endpoint once a minute and tears the
//! container down when the instance has gone idle — or when the
//! endpoint stops answering, which usually means the container died.
//!
//! The pass holds the service-table lock from decision through action
//! so a concurrent `start-program` cannot race with removal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::driver::ContainerDriver;
use crate::server::{ManagedService, ServiceTable};

/// Configuration for the culler.
#[derive(Debug, Clone)]
pub struct CullerConfig {
    /// How often to poll the metrics endpoints.
    pub poll_interval: Duration,
    /// Maximum seconds since an instance's last service request.
    pub idle_limit_secs: i64,
    /// Per-endpoint request bound.
    pub request_timeout: Duration,
}

impl Default for CullerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            idle_limit_secs: 60,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Background worker that stops and deletes idle containers.
pub struct Culler {
    services: ServiceTable,
    driver: Arc<dyn ContainerDriver>,
    http: reqwest::Client,
    config: CullerConfig,
    shutdown: Arc<Notify>,
}

impl Culler {
    pub fn new(
        services: ServiceTable,
        driver: Arc<dyn ContainerDriver>,
        config: CullerConfig,
    ) -> Self {
        Self {
            services,
            driver,
            http: reqwest::Client::new(),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run culling passes until shut down.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            idle_limit_secs = self.config.idle_limit_secs,
            "culler started"
        );
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("culler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.cull_pass().await;
                }
            }
        }
        info!("culler stopped");
    }

    /// One decision-and-action pass over the service table.
    pub async fn cull_pass(&self) {
        let mut table = self.services.lock().await;

        let mut to_cull: Vec<ManagedService> = Vec::new();
        for service in table.values() {
            match self.idle_seconds(service.metrics_port).await {
                Ok(secs) if secs <= self.config.idle_limit_secs => {
                    debug!(id = %service.container_id, idle_secs = secs, "instance active");
                }
                Ok(secs) => {
                    info!(
                        id = %service.container_id,
                        idle_secs = secs,
                        limit = self.config.idle_limit_secs,
                        "culling idle instance"
                    );
                    to_cull.push(service.clone());
                }
                Err(reason) => {
                    info!(id = %service.container_id, reason, "culling unresponsive instance");
                    to_cull.push(service.clone());
                }
            }
        }

        for service in to_cull {
            if let Err(e) = self.driver.stop_container(&service.container_id).await {
                warn!(id = %service.container_id, error = %e, "stop failed");
            }
            if let Err(e) = self.driver.delete_container(&service.container_id).await {
                warn!(id = %service.container_id, error = %e, "delete failed");
            }
            table.remove(&service.metrics_port);
        }
    }

    /// Seconds since the instance behind `metrics_port` last served a
    /// request, or a short reason string when the endpoint cannot be
    /// trusted.
    async fn idle_seconds(&self, metrics_port: u16) -> Result<i64, &'static str> {
        let url = format!("http://127.0.0.1:{metrics_port}");
        let request = async {
            let response = self.http.get(&url).send().await.map_err(|_| "request failed")?;
            let body = response.text().await.map_err(|_| "read failed")?;
            body.trim().parse::<i64>().map_err(|_| "parse failed")
        };
        tokio::time::timeout(self.config.request_timeout, request)
            .await
            .map_err(|_| "request timed out")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ContainerConfig, MockDriver};
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    /// Serve a fixed HTTP body on an ephemeral localhost port.
    async fn metrics_endpoint(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    async fn table_with(driver: &MockDriver, metrics_port: u16) -> ServiceTable {
        let container_id = driver
            .run_container(&ContainerConfig {
                image: "echo:latest".to_string(),
                network: "host".to_string(),
                env: Vec::new(),
            })
            .await
            .unwrap();
        let mut map = HashMap::new();
        map.insert(
            metrics_port,
            ManagedService {
                container_id,
                metrics_port,
                image: "echo:latest".to_string(),
                spawned_at: Utc::now(),
            },
        );
        Arc::new(Mutex::new(map))
    }

    #[tokio::test]
    async fn test_active_instance_survives() {
        let driver = Arc::new(MockDriver::new());
        let port = metrics_endpoint("5").await;
        let table = table_with(&driver, port).await;

        let culler = Culler::new(table.clone(), driver.clone(), CullerConfig::default());
        culler.cull_pass().await;

        assert_eq!(table.lock().await.len(), 1);
        assert_eq!(driver.running_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_instance_culled() {
        let driver = Arc::new(MockDriver::new());
        let port = metrics_endpoint("90").await;
        let table = table_with(&driver, port).await;

        let culler = Culler::new(table.clone(), driver.clone(), CullerConfig::default());
        culler.cull_pass().await;

        assert!(table.lock().await.is_empty());
        assert_eq!(driver.running_count(), 0);
        assert_eq!(driver.stopped_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_culled() {
        let driver = Arc::new(MockDriver::new());
        // Reserve a port and close it again so nothing is listening
        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let table = table_with(&driver, dead_port).await;

        let config = CullerConfig {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let culler = Culler::new(table.clone(), driver.clone(), config);
        culler.cull_pass().await;

        assert!(table.lock().await.is_empty());
        assert_eq!(driver.running_count(), 0);
    }

    #[tokio::test]
    async fn test_garbage_body_culled() {
        let driver = Arc::new(MockDriver::new());
        let port = metrics_endpoint("not-a-number").await;
        let table = table_with(&driver, port).await;

        let culler = Culler::new(table.clone(), driver.clone(), CullerConfig::default());
        culler.cull_pass().await;

        assert!(table.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_boundary_value_survives() {
        let driver = Arc::new(MockDriver::new());
        // Exactly the limit is not over it
        let port = metrics_endpoint("60").await;
        let table = table_with(&driver, port).await;

        let culler = Culler::new(table.clone(), driver.clone(), CullerConfig::default());
        culler.cull_pass().await;

        assert_eq!(table.lock().await.len(), 1);
    }
}
