// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Peer identity and performance descriptors.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of an overlay peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random peer id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..12])
    }
}

/// Totally-ordered performance descriptor for a peer.
///
/// Currently measures round-trip time only. A zero RTT means the peer
/// was unreachable when probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfInd {
    pub rtt: Duration,
}

impl PerfInd {
    pub fn new(rtt: Duration) -> Self {
        Self { rtt }
    }

    /// Strict ordering: `a.less_than(b)` iff `a.rtt < b.rtt`.
    pub fn less_than(&self, other: &PerfInd) -> bool {
        self.rtt < other.rtt
    }

    /// Whether the probed peer was unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.rtt.is_zero()
    }
}

impl fmt::Display for PerfInd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtt={:?}", self.rtt)
    }
}

/// A discovered peer together with its measured performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub perf: PerfInd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_ind_ordering() {
        let fast = PerfInd::new(Duration::from_millis(10));
        let slow = PerfInd::new(Duration::from_millis(90));
        assert!(fast.less_than(&slow));
        assert!(!slow.less_than(&fast));
        assert!(!fast.less_than(&fast));
    }

    #[test]
    fn test_perf_ind_unreachable() {
        assert!(PerfInd::default().is_unreachable());
        assert!(!PerfInd::new(Duration::from_millis(1)).is_unreachable());
    }

    #[test]
    fn test_peer_id_display_is_short() {
        let id = PeerId::random();
        assert_eq!(format!("{}", id).len(), 12);
    }

    #[test]
    fn test_peer_id_unique() {
        assert_ne!(PeerId::random(), PeerId::random());
    }
}
