// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reliability-tiered peer cache.
//!
//! Peers live in one of three tiers:
//! - **L0**: reliable and performant — preferred by lookups.
//! - **L1**: performant but unproven — where new peers land.
//! - **L2**: scheduled for eviction — emptied at the end of every
//!   update cycle.
//!
//! A background cycle probes every cached peer once a second, scores it
//! against its service's soft and hard RTT requirements, and moves it
//! between tiers. The reward/penalty asymmetry (+1 on a good probe, −10
//! on a soft violation, reset to 50 on any demotion) penalises
//! unreliability while damping oscillation between tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_overlay::{Overlay, PeerId, PerfInd};

use crate::error::CacheError;
use crate::registry::RegistryCache;

/// Reliability assigned on add and on every demotion.
const RELIABILITY_INITIAL: u8 = 50;

/// Reliability ceiling.
const RELIABILITY_MAX: u8 = 100;

/// L1 records above this promote to L0; L0 records below it demote.
const PROMOTE_THRESHOLD: u8 = 90;

/// L1 records below this demote to L2.
const EVICT_THRESHOLD: u8 = 10;

/// Penalty for a probe violating the soft requirement.
const SOFT_PENALTY: u8 = 10;

/// Entries scanned per tier when removing a peer by id.
const REMOVE_SCAN_MAX: usize = 3;

/// Interval between update cycles.
const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// The three cache tiers, most reliable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    L0,
    L1,
    L2,
}

/// A cached peer known to provide one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub service_hash: String,
    pub service_name: String,
    /// None until the first probe completes.
    pub measured_rtt: Option<Duration>,
    /// Saturating counter in [0, 100].
    pub reliability: u8,
}

/// Reliability-tiered cache of service-providing peers.
///
/// All operations are mutually exclusive under a single mutex; the
/// update cycle holds it across its probes so that per-record updates
/// stay atomic with respect to `add`/`get`/`remove`.
pub struct PeerCache {
    overlay: Arc<dyn Overlay>,
    registry: Arc<RegistryCache>,
    levels: Mutex<[Vec<PeerRecord>; 3]>,
}

impl PeerCache {
    pub fn new(overlay: Arc<dyn Overlay>, registry: Arc<RegistryCache>) -> Self {
        Self {
            overlay,
            registry,
            levels: Mutex::new([Vec::new(), Vec::new(), Vec::new()]),
        }
    }

    /// Cache a peer providing `service_name`.
    ///
    /// The record lands in L1 with reliability 50 so it survives a few
    /// bad probes before eviction. Callers are responsible for not
    /// adding duplicates; the next update cycle re-sorts regardless.
    pub async fn add(&self, peer_id: PeerId, service_hash: &str, service_name: &str) {
        info!(peer = %peer_id, hash = service_hash, "adding peer to cache");
        let mut levels = self.levels.lock().await;
        levels[1].push(PeerRecord {
            peer_id,
            service_hash: service_hash.to_string(),
            service_name: service_name.to_string(),
            measured_rtt: None,
            reliability: RELIABILITY_INITIAL,
        });
    }

    /// Best cached peer for a service hash.
    ///
    /// Scans L0 then L1 in stored (RTT-ascending) order; L2 is never
    /// consulted since its members are already condemned.
    pub async fn get(&self, service_hash: &str) -> Result<PeerId, CacheError> {
        let levels = self.levels.lock().await;
        for level in &levels[..2] {
            for record in level {
                if record.service_hash == service_hash {
                    debug!(peer = %record.peer_id, hash = service_hash, "cache hit");
                    return Ok(record.peer_id);
                }
            }
        }
        Err(CacheError::NotFound)
    }

    /// Drop a peer a caller has just observed failing.
    ///
    /// Only the first few entries of L0 and L1 are scanned; the scan cap
    /// bounds the worst case under churn, and a peer further down the
    /// tier will be dealt with by the update cycle anyway.
    pub async fn remove(&self, peer_id: PeerId) {
        let mut levels = self.levels.lock().await;
        for level in &mut levels[..2] {
            for i in 0..level.len().min(REMOVE_SCAN_MAX) {
                if level[i].peer_id == peer_id {
                    level.swap_remove(i);
                    return;
                }
            }
        }
    }

    /// One full probe/score/move/evict/sort pass over every tier.
    pub async fn update_cycle(&self) {
        let mut levels = self.levels.lock().await;

        // Probe and score every record in place
        for level in levels.iter_mut() {
            let mut kept = Vec::with_capacity(level.len());
            for mut record in level.drain(..) {
                let info = match self.registry.get_or_fetch(&record.service_name).await {
                    Ok(info) => info,
                    Err(e) => {
                        // Requirements unknown this cycle; leave the
                        // record untouched rather than guess a timeout
                        warn!(service = %record.service_name, error = %e,
                            "registry lookup failed during probe");
                        kept.push(record);
                        continue;
                    }
                };

                let rtt = tokio::time::timeout(
                    info.hard_req.rtt,
                    self.overlay.ping(record.peer_id),
                )
                .await
                .unwrap_or(Duration::ZERO);
                let perf = PerfInd::new(rtt);

                if perf.is_unreachable() || info.hard_req.less_than(&perf) {
                    info!(peer = %record.peer_id, ?rtt, "evicting peer on hard violation");
                    continue;
                }

                record.measured_rtt = Some(rtt);
                if info.soft_req.less_than(&perf) {
                    record.reliability = record.reliability.saturating_sub(SOFT_PENALTY);
                } else if record.reliability < RELIABILITY_MAX {
                    record.reliability += 1;
                }
                kept.push(record);
            }
            *level = kept;
        }

        let [l0, l1, l2] = &mut *levels;

        // L0 records that stopped being consistently reliable drop to
        // L1 with a reset counter
        let mut i = 0;
        while i < l0.len() {
            if l0[i].reliability < PROMOTE_THRESHOLD {
                let mut record = l0.swap_remove(i);
                record.reliability = RELIABILITY_INITIAL;
                l1.push(record);
            } else {
                i += 1;
            }
        }

        // L1 records promote (counter untouched so consistent peers
        // climb quickly) or drop to L2 with a reset counter
        let mut i = 0;
        while i < l1.len() {
            if l1[i].reliability > PROMOTE_THRESHOLD {
                l0.push(l1.swap_remove(i));
            } else if l1[i].reliability < EVICT_THRESHOLD {
                let mut record = l1.swap_remove(i);
                record.reliability = RELIABILITY_INITIAL;
                l2.push(record);
            } else {
                i += 1;
            }
        }

        // Evict
        l2.clear();

        // Re-sort by measured performance
        for level in levels.iter_mut() {
            level.sort_by_key(|r| r.measured_rtt.unwrap_or(Duration::MAX));
        }
    }

    /// Drive update cycles until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("peer cache update loop started");
        let start = tokio::time::Instant::now() + UPDATE_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, UPDATE_INTERVAL);
        // A slow cycle must not cause a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.update_cycle().await,
            }
        }
        info!("peer cache update loop stopped");
    }

    /// Snapshot of all three tiers, for diagnostics and tests.
    pub async fn snapshot(&self) -> [Vec<PeerRecord>; 3] {
        self.levels.lock().await.clone()
    }
}
