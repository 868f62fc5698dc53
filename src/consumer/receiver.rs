//! receiver.rs
//! Non-blocking drain of the consumer endpoint.
//! - empties the socket's pending datagrams every tick, never waits for one
//! - only the last successfully decoded command survives the drain
//! - wrong-length datagrams are counted and skipped

use log::warn;
use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
};

use crate::relay::command::{Command, RECV_BUFFER_SIZE};
use crate::utils::{
    error::{LinkError, LinkResult, Role},
    net::bind_udp,
};

/// What one drain pulled off the socket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrainOutcome {
    /// Last successfully decoded command, if any.
    pub latest: Option<Command>,
    /// Datagrams decoded in this drain (including the one kept).
    pub drained: u32,
    pub malformed: u32,
    /// Transport errors that cut the drain short.
    pub errors: u32,
}

pub struct CommandReceiver {
    socket: UdpSocket,
    buf: [u8; RECV_BUFFER_SIZE],
}

impl CommandReceiver {
    /// Binds the consumer endpoint in non-blocking mode. Bind failure is fatal.
    pub fn bind(addr: SocketAddr) -> LinkResult<Self> {
        let socket = bind_udp(Role::Consumer, addr, None)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| LinkError::socket("setting consumer socket non-blocking", e))?;
        Ok(Self {
            socket,
            buf: [0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| LinkError::socket("reading consumer address", e))
    }

    /// Reads until the socket reports nothing pending.
    pub fn drain(&mut self) -> DrainOutcome {
        let mut out = DrainOutcome::default();

        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, _src)) => match Command::decode(&self.buf[..len]) {
                    Ok(cmd) => {
                        out.latest = Some(cmd);
                        out.drained += 1;
                    }
                    Err(_) => out.malformed += 1,
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Peer-gone style errors; the next tick simply drains again.
                    out.errors += 1;
                    warn!("[Receiver] drain interrupted: {}", e);
                    break;
                }
            }
        }

        out
    }
}
