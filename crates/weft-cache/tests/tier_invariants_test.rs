// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invariant checks over longer peer-cache histories.
//!
//! After any sequence of cache operations: every peer appears in at
//! most one tier, counters stay within [0, 100], tiers are sorted by
//! ascending measured RTT, and L2 is empty after each update cycle.

use std::sync::Arc;
use std::time::Duration;

use weft_cache::{PeerCache, PeerRecord, RegistryCache, ServiceInfo, StaticRegistry};
use weft_overlay::{MemoryMesh, MemoryOverlay, Overlay, PeerId, PerfInd};

fn info(soft_ms: u64, hard_ms: u64) -> ServiceInfo {
    ServiceInfo {
        content_hash: "Qmsvc".to_string(),
        docker_hash: "svc:latest".to_string(),
        soft_req: PerfInd::new(Duration::from_millis(soft_ms)),
        hard_req: PerfInd::new(Duration::from_millis(hard_ms)),
    }
}

struct Fixture {
    mesh: MemoryMesh,
    local: Arc<MemoryOverlay>,
    cache: PeerCache,
}

impl Fixture {
    fn new() -> Self {
        let mesh = MemoryMesh::new();
        let local = mesh.join();
        let registry = Arc::new(RegistryCache::new(
            Arc::new(
                StaticRegistry::new()
                    .with_service("svc", info(100, 500))
                    .with_service("other", info(50, 200)),
            ),
            Duration::from_secs(3600),
        ));
        let cache = PeerCache::new(local.clone(), registry);
        Self { mesh, local, cache }
    }

    async fn join_peer(&self, rtt_ms: u64) -> PeerId {
        let peer = self.mesh.join().local_peer();
        self.local.set_rtt(peer, Duration::from_millis(rtt_ms));
        peer
    }

    async fn assert_invariants(&self) {
        let levels = self.cache.snapshot().await;

        // Exclusive tier membership
        let mut seen: Vec<PeerId> = Vec::new();
        for level in &levels {
            for record in level {
                assert!(
                    !seen.contains(&record.peer_id),
                    "peer {} appears in more than one tier",
                    record.peer_id
                );
                seen.push(record.peer_id);
            }
        }

        // Counter bounds (u8 can't go negative; check the ceiling)
        for record in levels.iter().flatten() {
            assert!(record.reliability <= 100, "counter above 100");
        }

        // Sort order within each tier
        for level in &levels {
            let rtts: Vec<Duration> = level
                .iter()
                .map(|r: &PeerRecord| r.measured_rtt.unwrap_or(Duration::MAX))
                .collect();
            let mut sorted = rtts.clone();
            sorted.sort();
            assert_eq!(rtts, sorted, "tier not sorted by measured RTT");
        }
    }
}

#[tokio::test]
async fn test_invariants_across_churn() {
    let fixture = Fixture::new();

    let steady = fixture.join_peer(20).await;
    let flappy = fixture.join_peer(150).await;
    let doomed = fixture.join_peer(30).await;

    fixture.cache.add(steady, "Qmsvc", "svc").await;
    fixture.cache.add(flappy, "Qmsvc", "svc").await;
    fixture.cache.add(doomed, "Qmother", "other").await;

    for cycle in 0..120 {
        // Kill one peer partway through; flap another between good and
        // soft-violating RTTs
        if cycle == 10 {
            fixture.local.set_rtt(doomed, Duration::ZERO);
        }
        let flappy_rtt = if cycle % 3 == 0 { 150 } else { 40 };
        fixture
            .local
            .set_rtt(flappy, Duration::from_millis(flappy_rtt));

        fixture.cache.update_cycle().await;
        fixture.assert_invariants().await;
        assert!(
            fixture.cache.snapshot().await[2].is_empty(),
            "L2 not empty after cycle {cycle}"
        );
    }

    // The dead peer is long gone; the steady one reached L0 and stayed
    let levels = fixture.cache.snapshot().await;
    assert!(levels.iter().flatten().all(|r| r.peer_id != doomed));
    assert!(levels[0].iter().any(|r| r.peer_id == steady));
}

#[tokio::test]
async fn test_invariants_with_interleaved_ops() {
    let fixture = Fixture::new();
    let mut peers = Vec::new();

    for i in 0..6 {
        let peer = fixture.join_peer(10 + 30 * i).await;
        fixture.cache.add(peer, "Qmsvc", "svc").await;
        peers.push(peer);

        fixture.cache.update_cycle().await;
        fixture.assert_invariants().await;

        // Interleave removals of the most recent addition
        if i % 2 == 1 {
            fixture.cache.remove(peer).await;
            fixture.assert_invariants().await;
        }
    }

    // A lookup returns some surviving peer
    let survivor = fixture.cache.get("Qmsvc").await.unwrap();
    assert!(peers.contains(&survivor));
}

#[tokio::test]
async fn test_records_keep_service_identity() {
    let fixture = Fixture::new();
    let peer = fixture.join_peer(20).await;
    fixture.cache.add(peer, "Qmsvc", "svc").await;
    fixture.cache.update_cycle().await;

    let levels = fixture.cache.snapshot().await;
    let record = levels.iter().flatten().find(|r| r.peer_id == peer).unwrap();
    assert_eq!(record.service_hash, "Qmsvc");
    assert_eq!(record.service_name, "svc");
    assert!(record.measured_rtt.is_some());
}
