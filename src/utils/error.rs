//! Error types shared by the relay, the consumer loop and the binaries.

use std::{io, net::SocketAddr};
use thiserror::Error;

pub type LinkResult<T> = Result<T, LinkError>;

/// Which fixed network role a socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Ingress,
    Egress,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Ingress => "ingress",
            Role::Egress => "egress",
            Role::Consumer => "consumer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// Endpoint could not be bound (port in use, bad address). Fatal at startup.
    #[error("failed to bind {role} endpoint {addr}: {source}")]
    Bind {
        role: Role,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("socket error while {context}: {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// Actuation sink could not be acquired. Fatal at startup.
    #[error("actuation sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Non-recoverable failure reported by the sink mid-run.
    #[error("actuation sink failed: {0}")]
    Sink(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The shared monotonic clock could not be read.
    #[error("monotonic clock unavailable: {0}")]
    Clock(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),
}

impl LinkError {
    pub fn socket(context: &'static str, source: io::Error) -> Self {
        LinkError::Socket { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_role_and_address() {
        let err = LinkError::Bind {
            role: Role::Ingress,
            addr: "127.0.0.1:5060".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("ingress"));
        assert!(msg.contains("127.0.0.1:5060"));
    }
}
