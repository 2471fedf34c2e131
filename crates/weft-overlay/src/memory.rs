// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process overlay mesh for tests.
//!
//! A [`MemoryMesh`] is a registry of nodes living in the same process.
//! Streams are duplex pipes, discovery is a shared rendezvous table, and
//! ping results are scripted per node so tests can simulate slow or dead
//! peers deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::OverlayError;
use crate::overlay::{Overlay, StreamHandler};
use crate::peer::PeerId;
use crate::stream::{OverlayStream, ProtocolId, StreamEvent};

/// Capacity of the per-node stream-closed event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Byte capacity of each in-memory pipe; must exceed the largest frame.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Registry of in-process overlay nodes.
#[derive(Clone)]
pub struct MemoryMesh {
    inner: Arc<MeshInner>,
}

struct MeshInner {
    nodes: Mutex<HashMap<PeerId, Arc<NodeShared>>>,
    rendezvous: Mutex<HashMap<String, Vec<PeerId>>>,
}

struct NodeShared {
    handlers: Mutex<HashMap<ProtocolId, StreamHandler>>,
    events: broadcast::Sender<StreamEvent>,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MeshInner {
                nodes: Mutex::new(HashMap::new()),
                rendezvous: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Add a node to the mesh and return its overlay handle.
    pub fn join(&self) -> Arc<MemoryOverlay> {
        let id = PeerId::random();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(NodeShared {
            handlers: Mutex::new(HashMap::new()),
            events,
        });
        self.inner
            .nodes
            .lock()
            .expect("mesh lock poisoned")
            .insert(id, shared.clone());
        Arc::new(MemoryOverlay {
            mesh: self.inner.clone(),
            id,
            shared,
            rtts: Mutex::new(HashMap::new()),
            default_rtt: Duration::from_millis(1),
        })
    }

    /// Remove a node, making it unreachable for dials and discovery.
    pub fn part(&self, peer: PeerId) {
        self.inner
            .nodes
            .lock()
            .expect("mesh lock poisoned")
            .remove(&peer);
        for providers in self
            .inner
            .rendezvous
            .lock()
            .expect("mesh lock poisoned")
            .values_mut()
        {
            providers.retain(|p| *p != peer);
        }
    }
}

impl Default for MemoryMesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted ping results: a queue of values, then the last one repeats.
struct RttScript {
    queue: VecDeque<Duration>,
    last: Duration,
}

impl RttScript {
    fn next(&mut self) -> Duration {
        match self.queue.pop_front() {
            Some(rtt) => {
                self.last = rtt;
                rtt
            }
            None => self.last,
        }
    }
}

/// One node's view of a [`MemoryMesh`].
pub struct MemoryOverlay {
    mesh: Arc<MeshInner>,
    id: PeerId,
    shared: Arc<NodeShared>,
    rtts: Mutex<HashMap<PeerId, RttScript>>,
    default_rtt: Duration,
}

impl MemoryOverlay {
    /// Fix the RTT this node measures to `peer`. Zero simulates a dead
    /// peer.
    pub fn set_rtt(&self, peer: PeerId, rtt: Duration) {
        self.rtts.lock().expect("rtt lock poisoned").insert(
            peer,
            RttScript {
                queue: VecDeque::new(),
                last: rtt,
            },
        );
    }

    /// Script a sequence of RTT measurements to `peer`; after the
    /// sequence is exhausted the final value repeats.
    pub fn script_rtt(&self, peer: PeerId, rtts: impl IntoIterator<Item = Duration>) {
        let mut queue: VecDeque<Duration> = rtts.into_iter().collect();
        let last = queue.back().copied().unwrap_or(self.default_rtt);
        if queue.len() == 1 {
            queue.clear();
        }
        self.rtts
            .lock()
            .expect("rtt lock poisoned")
            .insert(peer, RttScript { queue, last });
    }
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_peer(&self) -> PeerId {
        self.id
    }

    async fn advertise(&self, rendezvous: &str) -> Result<(), OverlayError> {
        let mut table = self.mesh.rendezvous.lock().expect("mesh lock poisoned");
        let providers = table.entry(rendezvous.to_string()).or_default();
        if !providers.contains(&self.id) {
            providers.push(self.id);
        }
        Ok(())
    }

    async fn find_providers(&self, rendezvous: &str) -> Result<Vec<PeerId>, OverlayError> {
        let table = self.mesh.rendezvous.lock().expect("mesh lock poisoned");
        Ok(table
            .get(rendezvous)
            .map(|providers| {
                providers
                    .iter()
                    .copied()
                    .filter(|p| *p != self.id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self, peer: PeerId) -> Duration {
        let joined = self
            .mesh
            .nodes
            .lock()
            .expect("mesh lock poisoned")
            .contains_key(&peer);
        if !joined {
            return Duration::ZERO;
        }
        let mut rtts = self.rtts.lock().expect("rtt lock poisoned");
        match rtts.get_mut(&peer) {
            Some(script) => script.next(),
            None => self.default_rtt,
        }
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &ProtocolId,
    ) -> Result<OverlayStream, OverlayError> {
        let target = self
            .mesh
            .nodes
            .lock()
            .expect("mesh lock poisoned")
            .get(&peer)
            .cloned()
            .ok_or(OverlayError::UnknownPeer(peer))?;

        let handler = target
            .handlers
            .lock()
            .expect("handler lock poisoned")
            .get(protocol)
            .cloned()
            .ok_or_else(|| OverlayError::UnsupportedProtocol {
                peer,
                protocol: protocol.clone(),
            })?;

        let (local_io, remote_io) = tokio::io::duplex(PIPE_CAPACITY);
        let (local_read, local_write) = tokio::io::split(local_io);
        let (remote_read, remote_write) = tokio::io::split(remote_io);

        let local = OverlayStream::new(
            peer,
            protocol.clone(),
            Box::new(local_read),
            Box::new(local_write),
            self.shared.events.clone(),
        );
        let remote = OverlayStream::new(
            self.id,
            protocol.clone(),
            Box::new(remote_read),
            Box::new(remote_write),
            target.events.clone(),
        );

        tokio::spawn(handler(remote));
        Ok(local)
    }

    fn set_handler(&self, protocol: ProtocolId, handler: StreamHandler) {
        self.shared
            .handlers
            .lock()
            .expect("handler lock poisoned")
            .insert(protocol, handler);
    }

    fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }
}
