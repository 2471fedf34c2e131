// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Long-lived coordinator owning the proxy's shared state.
//!
//! Everything that outlives a single request — the overlay handle, the
//! caches, the listener map, the sponsored-service identity — hangs off
//! one [`ProxyContext`] passed explicitly to the components that need
//! it.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use weft_cache::{PeerCache, RegistryCache, ServiceRegistry};
use weft_overlay::Overlay;

use crate::chain::register_chain_handler;
use crate::error::ProxyError;
use crate::manager::OverlayManager;

/// The microservice this proxy sponsors, when in service mode.
#[derive(Debug, Clone)]
pub struct LocalService {
    /// Human-readable service name; must match the name used in chain
    /// specs that route through this proxy.
    pub name: String,
    /// `IP:PORT` of the local service instance.
    pub endpoint: String,
}

/// Shared state of one proxy agent.
pub struct ProxyContext {
    pub overlay: Arc<dyn Overlay>,
    pub manager: OverlayManager,
    pub peer_cache: Arc<PeerCache>,
    pub registry: Arc<RegistryCache>,
    /// Chain-spec key → local L4 listener address.
    pub listeners: Mutex<HashMap<String, SocketAddr>>,
    /// Sponsored service, or `None` in anonymous mode.
    pub service: Option<LocalService>,
    /// Host the control endpoint and L4 listeners bind to.
    pub ctrl_host: IpAddr,
    pub cancel: CancellationToken,
}

impl ProxyContext {
    pub fn new(
        overlay: Arc<dyn Overlay>,
        service_registry: Arc<dyn ServiceRegistry>,
        registry_ttl: Duration,
        service: Option<LocalService>,
    ) -> Arc<Self> {
        let registry = Arc::new(RegistryCache::new(service_registry, registry_ttl));
        let peer_cache = Arc::new(PeerCache::new(overlay.clone(), registry.clone()));
        let manager = OverlayManager::new(overlay.clone());
        Arc::new(Self {
            overlay,
            manager,
            peer_cache,
            registry,
            listeners: Mutex::new(HashMap::new()),
            service,
            ctrl_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            cancel: CancellationToken::new(),
        })
    }

    /// Wire the proxy into the overlay and start its background loops.
    ///
    /// In service mode this advertises the sponsored service's content
    /// hash and installs the HTTP relay handler for it.
    pub async fn start(self: &Arc<Self>) -> Result<(), ProxyError> {
        register_chain_handler(self.clone());

        if let Some(service) = &self.service {
            let info = self.registry.get_or_fetch(&service.name).await?;
            self.overlay.advertise(&info.content_hash).await?;
            self.manager.serve_local_requests(service.endpoint.clone());
            info!(
                service = %service.name,
                endpoint = %service.endpoint,
                hash = %info.content_hash,
                "sponsoring service"
            );
        } else {
            info!("running in anonymous mode");
        }

        let cache = self.peer_cache.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move { cache.run(cancel).await });

        Ok(())
    }

    /// Stop background loops and listeners.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
