// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host networking helpers for allocation.

use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};

use crate::error::AllocatorError;

/// The address a well-known public host would see us dial from.
///
/// No packets are sent; connecting a UDP socket only selects the
/// outbound route. Hosts with no default route fall back to loopback,
/// which keeps single-machine deployments working.
pub fn public_ip() -> Result<IpAddr, AllocatorError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| AllocatorError::NetSetup(format!("bind probe socket: {e}")))?;
    if socket.connect("8.8.8.8:80").is_err() {
        return Ok(IpAddr::from([127, 0, 0, 1]));
    }
    let addr = socket
        .local_addr()
        .map_err(|e| AllocatorError::NetSetup(format!("read probe address: {e}")))?;
    Ok(addr.ip())
}

/// Reserve `N` distinct free TCP ports.
///
/// All listeners are held until every port is chosen so the kernel
/// cannot hand the same port out twice.
pub fn free_ports<const N: usize>() -> Result<[u16; N], AllocatorError> {
    let mut listeners = Vec::with_capacity(N);
    let mut ports = [0u16; N];
    for port in &mut ports {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .map_err(|e| AllocatorError::NetSetup(format!("reserve port: {e}")))?;
        *port = listener
            .local_addr()
            .map_err(|e| AllocatorError::NetSetup(format!("read port: {e}")))?
            .port();
        listeners.push(listener);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_ports_distinct() {
        let ports: [u16; 3] = free_ports().unwrap();
        assert_ne!(ports[0], ports[1]);
        assert_ne!(ports[1], ports[2]);
        assert_ne!(ports[0], ports[2]);
        for port in ports {
            assert!(port > 0);
        }
    }
}
