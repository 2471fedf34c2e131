// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The find-or-allocate path.
//!
//! Resolving a service name goes: registry lookup → peer cache → overlay
//! discovery → on-demand allocation → re-discovery with backoff → cache
//! the winner. An instance that exists but misses the service's soft RTT
//! requirement triggers an attempt to allocate a closer one, falling
//! back to the peer already found.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use weft_cache::ServiceInfo;
use weft_overlay::{PeerId, PeerInfo};

use crate::context::ProxyContext;
use crate::error::ProxyError;
use crate::manager::ManagerError;

/// Allocation attempts per resolve.
const ALLOC_ATTEMPTS: usize = 3;

/// Initial wait before re-finding a freshly allocated instance.
const CONFIRM_BASE_WAIT: Duration = Duration::from_millis(200);

/// Backoff ceiling for the re-find loop.
const CONFIRM_MAX_WAIT: Duration = Duration::from_secs(1);

/// Re-find attempts after an allocation.
const CONFIRM_ATTEMPTS: usize = 5;

/// Resolve a service name to a peer providing it, allocating a new
/// instance if none exists. Returns the peer and the registry info used
/// to resolve it.
pub async fn resolve_service(
    ctx: &Arc<ProxyContext>,
    service_name: &str,
) -> Result<(PeerId, ServiceInfo), ProxyError> {
    let info = ctx.registry.get_or_fetch(service_name).await?;
    let peer = find_or_allocate(ctx, service_name, &info).await?;
    Ok((peer, info))
}

/// Find a cached or discoverable instance of the service, allocating
/// one when discovery comes up empty.
pub async fn find_or_allocate(
    ctx: &Arc<ProxyContext>,
    service_name: &str,
    info: &ServiceInfo,
) -> Result<PeerId, ProxyError> {
    if let Ok(peer) = ctx.peer_cache.get(&info.content_hash).await {
        return Ok(peer);
    }

    let started = Instant::now();
    let mut found: Option<PeerInfo> = None;

    for attempt in 0..ALLOC_ATTEMPTS {
        if attempt > 0 {
            debug!(service = service_name, attempt, "retrying find-or-allocate");
        }

        match ctx.manager.find_service(&info.content_hash).await {
            Ok(existing) => {
                if info.soft_req.less_than(&existing.perf) {
                    info!(
                        service = service_name,
                        found = %existing.perf,
                        required = %info.soft_req,
                        "found instance misses soft requirement, allocating a closer one"
                    );
                    match ctx
                        .manager
                        .allocate_better(&info.docker_hash, existing.perf)
                        .await
                    {
                        Ok(better) => found = Some(better),
                        Err(e) => {
                            debug!(error = %e, "keeping previously found peer");
                            found = Some(existing);
                        }
                    }
                } else {
                    found = Some(existing);
                }
            }
            Err(ManagerError::NotFound) => {
                info!(service = service_name, "no instance found, allocating");
                if let Err(e) = ctx.manager.allocate_service(&info.docker_hash).await {
                    warn!(service = service_name, error = %e, "service allocation failed");
                }
                found = confirm_allocation(ctx, &info.content_hash).await;
            }
            Err(e) => {
                warn!(service = service_name, error = %e, "discovery failed");
            }
        }

        if found.is_some() {
            break;
        }
    }

    let peer = found.ok_or_else(|| ProxyError::ServiceUnavailable(service_name.to_string()))?;
    ctx.peer_cache
        .add(peer.id, &info.content_hash, service_name)
        .await;
    debug!(
        service = service_name,
        peer = %peer.id,
        elapsed = ?started.elapsed(),
        "find/alloc complete"
    );
    Ok(peer.id)
}

/// Wait for a freshly allocated instance to join the overlay, with
/// exponential backoff between re-finds.
async fn confirm_allocation(ctx: &Arc<ProxyContext>, content_hash: &str) -> Option<PeerInfo> {
    let mut wait = CONFIRM_BASE_WAIT;
    tokio::time::sleep(wait).await;
    for _ in 0..CONFIRM_ATTEMPTS {
        if let Ok(peer) = ctx.manager.find_service(content_hash).await {
            return Some(peer);
        }
        tokio::time::sleep(wait).await;
        wait = (wait * 2).min(CONFIRM_MAX_WAIT);
    }
    None
}
