//! UDP socket construction shared by every endpoint.
//!
//! Built through socket2 so buffer sizes can be set before bind. SO_REUSEADDR is
//! deliberately left off: on Linux it lets a second UDP socket bind the same port,
//! and a busy port has to fail loudly at startup.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{SocketAddr, UdpSocket};

use crate::utils::error::{LinkError, LinkResult, Role};

/// Binds a UDP socket for `role` at `addr`.
pub fn bind_udp(role: Role, addr: SocketAddr, recv_buffer_bytes: Option<usize>) -> LinkResult<UdpSocket> {
    let bind_err = |source| LinkError::Bind { role, addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    if let Some(bytes) = recv_buffer_bytes {
        socket
            .set_recv_buffer_size(bytes)
            .map_err(|e| LinkError::socket("setting receive buffer size", e))?;
    }
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;

    Ok(socket.into())
}

/// Unbound-port sender socket (ephemeral local port) for the same address family as `target`.
pub fn sender_for(target: SocketAddr) -> LinkResult<UdpSocket> {
    let local: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    UdpSocket::bind(local).map_err(|e| LinkError::socket("creating sender socket", e))
}
