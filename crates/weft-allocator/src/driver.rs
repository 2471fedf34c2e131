// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container driver abstraction.
//!
//! The allocator only needs pull / run / stop / delete; the engine
//! behind those verbs is swappable. [`DockerCli`] shells out to the
//! docker binary; [`MockDriver`] records launches in memory for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from container driver operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Pulling the image failed.
    #[error("image pull failed for {image}: {detail}")]
    PullFailed { image: String, detail: String },

    /// The container failed to start.
    #[error("container start failed: {0}")]
    StartFailed(String),

    /// Stop/delete of a container failed.
    #[error("container teardown failed for {id}: {detail}")]
    TeardownFailed { id: String, detail: String },

    /// Spawning the engine binary failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Launch parameters for one service instance.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Image reference to run.
    pub image: String,
    /// Container network mode; instances run with host networking so
    /// the ports handed out by the allocator are reachable directly.
    pub network: String,
    /// Environment passed to the instance.
    pub env: Vec<(String, String)>,
}

/// Abstract container engine.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Fetch an image so a subsequent run doesn't block on download.
    async fn pull_image(&self, image: &str) -> Result<(), DriverError>;

    /// Start a container, returning its engine-assigned id.
    async fn run_container(&self, config: &ContainerConfig) -> Result<String, DriverError>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> Result<(), DriverError>;

    /// Delete a stopped container.
    async fn delete_container(&self, id: &str) -> Result<(), DriverError>;
}

/// Driver that shells out to the `docker` CLI.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use an alternative engine binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, DriverError> {
        debug!(binary = %self.binary, ?args, "invoking container engine");
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(DriverError::StartFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for DockerCli {
    async fn pull_image(&self, image: &str) -> Result<(), DriverError> {
        self.run(&["pull", image])
            .await
            .map_err(|e| DriverError::PullFailed {
                image: image.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn run_container(&self, config: &ContainerConfig) -> Result<String, DriverError> {
        let network = format!("--network={}", config.network);
        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            network,
        ];
        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(config.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let container_id = self.run(&arg_refs).await?;
        if container_id.is_empty() {
            return Err(DriverError::StartFailed(
                "engine returned no container id".to_string(),
            ));
        }
        info!(image = %config.image, id = %container_id, "container started");
        Ok(container_id)
    }

    async fn stop_container(&self, id: &str) -> Result<(), DriverError> {
        self.run(&["stop", id])
            .await
            .map_err(|e| DriverError::TeardownFailed {
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> Result<(), DriverError> {
        self.run(&["rm", id])
            .await
            .map_err(|e| DriverError::TeardownFailed {
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory driver for tests.
pub struct MockDriver {
    /// Containers by id, with their launch config.
    containers: Mutex<HashMap<String, ContainerConfig>>,
    /// Ids of containers that have been stopped.
    stopped: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    /// If true, pulls fail.
    pub fail_pull: bool,
    /// If true, runs fail.
    pub fail_run: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            fail_pull: false,
            fail_run: false,
        }
    }

    /// A driver whose pulls always fail.
    pub fn failing_pull() -> Self {
        Self {
            fail_pull: true,
            ..Self::new()
        }
    }

    /// A driver whose container starts always fail.
    pub fn failing_run() -> Self {
        Self {
            fail_run: true,
            ..Self::new()
        }
    }

    /// Launch config of a running container, if it exists.
    pub fn running(&self, id: &str) -> Option<ContainerConfig> {
        self.containers.lock().expect("mock lock poisoned").get(id).cloned()
    }

    /// Ids that have been stopped, in order.
    pub fn stopped_ids(&self) -> Vec<String> {
        self.stopped.lock().expect("mock lock poisoned").clone()
    }

    /// Number of currently running containers.
    pub fn running_count(&self) -> usize {
        self.containers.lock().expect("mock lock poisoned").len()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn pull_image(&self, image: &str) -> Result<(), DriverError> {
        if self.fail_pull {
            return Err(DriverError::PullFailed {
                image: image.to_string(),
                detail: "mock pull failure".to_string(),
            });
        }
        Ok(())
    }

    async fn run_container(&self, config: &ContainerConfig) -> Result<String, DriverError> {
        if self.fail_run {
            return Err(DriverError::StartFailed("mock run failure".to_string()));
        }
        let mut next = self.next_id.lock().expect("mock lock poisoned");
        *next += 1;
        let id = format!("mock-{:04}", *next);
        self.containers
            .lock()
            .expect("mock lock poisoned")
            .insert(id.clone(), config.clone());
        Ok(id)
    }

    async fn stop_container(&self, id: &str) -> Result<(), DriverError> {
        self.containers.lock().expect("mock lock poisoned").remove(id);
        self.stopped
            .lock()
            .expect("mock lock poisoned")
            .push(id.to_string());
        Ok(())
    }

    async fn delete_container(&self, _id: &str) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ContainerConfig {
        ContainerConfig {
            image: "echo:latest".to_string(),
            network: "host".to_string(),
            env: vec![("SERVICE_PORT".to_string(), "9000".to_string())],
        }
    }

    #[tokio::test]
    async fn test_mock_run_and_stop() {
        let driver = MockDriver::new();
        let id = driver.run_container(&config()).await.unwrap();
        assert!(driver.running(&id).is_some());

        driver.stop_container(&id).await.unwrap();
        driver.delete_container(&id).await.unwrap();
        assert!(driver.running(&id).is_none());
        assert_eq!(driver.stopped_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_mock_failing_pull() {
        let driver = MockDriver::failing_pull();
        assert!(matches!(
            driver.pull_image("echo:latest").await,
            Err(DriverError::PullFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_ids_unique() {
        let driver = MockDriver::new();
        let a = driver.run_container(&config()).await.unwrap();
        let b = driver.run_container(&config()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(driver.running_count(), 2);
    }
}
