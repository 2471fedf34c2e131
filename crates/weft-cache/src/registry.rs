// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TTL-expiring memoisation of service registry lookups.
//!
//! The registry itself is an external service mapping a human-readable
//! service name to its content hash, container image hash, and
//! performance requirements; this module caches its answers so the
//! once-a-second peer cache probes don't hammer it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use weft_overlay::PerfInd;

/// Registry answer for one service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Rendezvous hash advertised by proxies sponsoring the service.
    pub content_hash: String,
    /// Container image reference used to allocate new instances.
    pub docker_hash: String,
    /// RTT bound above which a peer starts losing reliability.
    pub soft_req: PerfInd,
    /// RTT bound above which a peer is evicted outright.
    pub hard_req: PerfInd,
}

/// Registry lookup failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service not registered: {0}")]
    UnknownService(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// External name → [`ServiceInfo`] lookup.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn lookup(&self, service_name: &str) -> Result<ServiceInfo, RegistryError>;
}

/// Fixed in-memory registry, used by tests and env-seeded deployments.
#[derive(Default)]
pub struct StaticRegistry {
    services: HashMap<String, ServiceInfo>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, name: impl Into<String>, info: ServiceInfo) -> Self {
        self.services.insert(name.into(), info);
        self
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn lookup(&self, service_name: &str) -> Result<ServiceInfo, RegistryError> {
        self.services
            .get(service_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(service_name.to_string()))
    }
}

struct CacheEntry {
    info: ServiceInfo,
    expiry: Instant,
}

/// TTL cache in front of a [`ServiceRegistry`].
pub struct RegistryCache {
    inner: Arc<dyn ServiceRegistry>,
    ttl: Duration,
    data: RwLock<HashMap<String, CacheEntry>>,
}

impl RegistryCache {
    pub fn new(inner: Arc<dyn ServiceRegistry>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Cached info for `service_name`, if present and not expired.
    pub async fn get(&self, service_name: &str) -> Option<ServiceInfo> {
        let data = self.data.read().await;
        let entry = data.get(service_name)?;
        if Instant::now() > entry.expiry {
            return None;
        }
        Some(entry.info.clone())
    }

    /// Insert an answer, stamping its expiry from the cache TTL.
    pub async fn insert(&self, service_name: impl Into<String>, info: ServiceInfo) {
        let entry = CacheEntry {
            info,
            expiry: Instant::now() + self.ttl,
        };
        self.data.write().await.insert(service_name.into(), entry);
    }

    /// Drop a cached answer.
    pub async fn remove(&self, service_name: &str) {
        self.data.write().await.remove(service_name);
    }

    /// Cached lookup, falling through to the registry on miss or expiry.
    pub async fn get_or_fetch(&self, service_name: &str) -> Result<ServiceInfo, RegistryError> {
        if let Some(info) = self.get(service_name).await {
            return Ok(info);
        }
        debug!(service = service_name, "registry cache miss, querying registry");
        let info = self.inner.lookup(service_name).await?;
        self.insert(service_name, info.clone()).await;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(soft_ms: u64, hard_ms: u64) -> ServiceInfo {
        ServiceInfo {
            content_hash: "Qmhash".to_string(),
            docker_hash: "image:latest".to_string(),
            soft_req: PerfInd::new(Duration::from_millis(soft_ms)),
            hard_req: PerfInd::new(Duration::from_millis(hard_ms)),
        }
    }

    /// Registry that counts lookups, for verifying memoisation.
    struct CountingRegistry {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceRegistry for CountingRegistry {
        async fn lookup(&self, service_name: &str) -> Result<ServiceInfo, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if service_name == "echo" {
                Ok(info(100, 500))
            } else {
                Err(RegistryError::UnknownService(service_name.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_get_or_fetch_memoises() {
        let registry = Arc::new(CountingRegistry {
            calls: AtomicUsize::new(0),
        });
        let cache = RegistryCache::new(registry.clone(), Duration::from_secs(3600));

        let first = cache.get_or_fetch("echo").await.unwrap();
        let second = cache.get_or_fetch("echo").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let registry = Arc::new(CountingRegistry {
            calls: AtomicUsize::new(0),
        });
        let cache = RegistryCache::new(registry.clone(), Duration::ZERO);

        cache.get_or_fetch("echo").await.unwrap();
        cache.get_or_fetch("echo").await.unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_service_propagates() {
        let cache = RegistryCache::new(
            Arc::new(StaticRegistry::new()),
            Duration::from_secs(60),
        );
        assert!(matches!(
            cache.get_or_fetch("ghost").await,
            Err(RegistryError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_forces_miss() {
        let cache = RegistryCache::new(
            Arc::new(StaticRegistry::new().with_service("echo", info(100, 500))),
            Duration::from_secs(60),
        );
        cache.get_or_fetch("echo").await.unwrap();
        cache.remove("echo").await;
        assert!(cache.get("echo").await.is_none());
    }
}
