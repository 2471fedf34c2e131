// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caching layers for the weft proxy agent.
//!
//! Two caches live here:
//! - [`PeerCache`]: reliability-tiered cache of peers known to provide a
//!   service, probed once a second and promoted/demoted between tiers
//!   based on measured RTT against per-service requirements.
//! - [`RegistryCache`]: TTL memoisation of service-name lookups against
//!   the external registry.

pub mod error;
pub mod peer_cache;
pub mod registry;

pub use error::CacheError;
pub use peer_cache::{PeerCache, PeerRecord, Tier};
pub use registry::{RegistryCache, RegistryError, ServiceInfo, ServiceRegistry, StaticRegistry};
