// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire protocols for the weft service mesh.
//!
//! Three protocols ride the overlay:
//!
//! - **Chain setup** (`chain-setup/1.0`): typed, length-prefixed
//!   [`ChainMessage`] frames threading a service chain together. After a
//!   chain completes, each hop switches its streams to `tcp-tunnel/1.0`
//!   or `udp-tunnel/1.0`, on which only `Data` frames are valid.
//! - **Allocator** (`allocator/1.0`): a single newline-terminated
//!   command and a single newline-terminated reply.
//! - **HTTP relay** (`http-relay/1.0`): a raw HTTP/1.1 exchange proxied
//!   to a sponsored microservice.

pub mod chain;
pub mod frame;
pub mod line;

pub use chain::{ChainPosition, ChainSpec, ChainSpecError, Transport};
pub use frame::{ChainMessage, FrameError, read_message, write_message};

/// Overlay protocol id for chain setup.
pub const CHAIN_SETUP_PROTO: &str = "chain-setup/1.0";

/// Overlay protocol id for TCP tunnel streams.
pub const TCP_TUNNEL_PROTO: &str = "tcp-tunnel/1.0";

/// Overlay protocol id for UDP tunnel streams.
pub const UDP_TUNNEL_PROTO: &str = "udp-tunnel/1.0";

/// Overlay protocol id for the allocator line protocol.
pub const ALLOCATOR_PROTO: &str = "allocator/1.0";

/// Overlay protocol id for proxied HTTP requests to a sponsored service.
pub const HTTP_RELAY_PROTO: &str = "http-relay/1.0";

/// Rendezvous string advertised by every allocator.
pub const ALLOCATOR_RENDEZVOUS: &str = "QmQJRHSU69L6W2SwNiKekpUHbxHPXi57tWGRWJaD5NsRxS";

/// Allocator command to launch a container-backed service instance.
pub const CMD_START_PROGRAM: &str = "start-program";

/// Allocator reply when it does not recognise the command.
pub const ERR_UNRECOGNIZED: &str = "Error: unrecognized command";

/// Allocator reply when any allocation step fails.
pub const ERR_ALLOC_FAIL: &str = "Error: allocation failed";

/// Relay reply when the sponsored service cannot be reached.
pub const ERR_DEAD_PROGRAM: &str = "Error: program non-responsive";

/// Prefix of the debug trail carried in chain setup acks.
pub const REV_CHAIN_PREFIX: &str = "Reverse chain: ";

/// Largest `Data` payload on a TCP tunnel: max u16 minus the minimum
/// TCP and IP header sizes.
pub const MAX_TCP_TUNNEL_PAYLOAD: usize = 0xffff - 20 - 20;

/// Largest `Data` payload on a UDP tunnel: max u16 minus the UDP and IP
/// header sizes.
pub const MAX_UDP_TUNNEL_PAYLOAD: usize = 0xffff - 8 - 20;
