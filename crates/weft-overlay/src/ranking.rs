// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RTT-based peer ranking.

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::overlay::Overlay;
use crate::peer::{PeerId, PeerInfo, PerfInd};

/// Concurrent probes in flight while ranking a candidate set.
const PING_CONCURRENCY: usize = 16;

/// Probe a set of discovered peers and rank them by ascending RTT.
///
/// Unreachable peers (zero RTT) are dropped. The returned list is sorted
/// best-first; an empty result means no candidate answered.
pub async fn rank_peers(overlay: &dyn Overlay, peers: Vec<PeerId>) -> Vec<PeerInfo> {
    let mut ranked: Vec<PeerInfo> = stream::iter(peers)
        .map(|id| async move {
            let rtt = overlay.ping(id).await;
            PeerInfo {
                id,
                perf: PerfInd::new(rtt),
            }
        })
        .buffer_unordered(PING_CONCURRENCY)
        .filter(|info| {
            let alive = !info.perf.is_unreachable();
            if !alive {
                debug!(peer = %info.id, "dropping unreachable peer from ranking");
            }
            futures::future::ready(alive)
        })
        .collect()
        .await;

    ranked.sort_by_key(|info| info.perf.rtt);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMesh;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rank_drops_dead_and_sorts_ascending() {
        let mesh = MemoryMesh::new();
        let local = mesh.join();
        let slow = mesh.join();
        let fast = mesh.join();
        let dead = mesh.join();

        local.set_rtt(slow.local_peer(), Duration::from_millis(80));
        local.set_rtt(fast.local_peer(), Duration::from_millis(5));
        local.set_rtt(dead.local_peer(), Duration::ZERO);

        let ranked = rank_peers(
            &*local,
            vec![slow.local_peer(), fast.local_peer(), dead.local_peer()],
        )
        .await;

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, fast.local_peer());
        assert_eq!(ranked[1].id, slow.local_peer());
    }

    #[tokio::test]
    async fn test_rank_empty_input() {
        let mesh = MemoryMesh::new();
        let local = mesh.join();
        assert!(rank_peers(&*local, Vec::new()).await.is_empty());
    }
}
