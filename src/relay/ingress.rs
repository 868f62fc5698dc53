//! ingress.rs
//! Receives candidate commands from the external producer and overwrites the mailbox.
//! - blocks on the socket (it has nothing else to do), with a read timeout so shutdown is observed
//! - wrong-length datagrams are dropped and counted, never treated as errors
//! - mid-run transport failures are logged and the loop keeps listening

use log::{debug, info, warn};
use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::relay::{
    command::{Command, RECV_BUFFER_SIZE},
    counters::LinkCounters,
    mailbox::MailboxWriter,
};
use crate::utils::{
    config::RelayConfig,
    error::{LinkError, LinkResult, Role},
    net::bind_udp,
};

/// Result of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngressOutcome {
    Accepted(Command),
    /// Datagram of the given length was discarded.
    Malformed(usize),
    /// Read timeout elapsed with nothing received.
    Idle,
}

pub struct IngressReceiver {
    socket: UdpSocket,
    mailbox: MailboxWriter,
    counters: Arc<LinkCounters>,
}

impl IngressReceiver {
    /// Binds the ingress endpoint. A bind failure here is fatal for the relay.
    pub fn bind(config: &RelayConfig, mailbox: MailboxWriter, counters: Arc<LinkCounters>) -> LinkResult<Self> {
        let socket = bind_udp(Role::Ingress, config.ingress_addr, config.recv_buffer_bytes)?;
        socket
            .set_read_timeout(Some(config.recv_timeout))
            .map_err(|e| LinkError::socket("setting ingress read timeout", e))?;
        Ok(Self { socket, mailbox, counters })
    }

    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| LinkError::socket("reading ingress address", e))
    }

    /// One blocking receive (bounded by the read timeout).
    pub fn receive_once(&mut self, buf: &mut [u8; RECV_BUFFER_SIZE]) -> LinkResult<IngressOutcome> {
        match self.socket.recv_from(buf) {
            Ok((len, src)) => match Command::decode(&buf[..len]) {
                Ok(cmd) => {
                    self.mailbox.put(cmd);
                    self.counters.record_received();
                    Ok(IngressOutcome::Accepted(cmd))
                }
                Err(err) => {
                    self.counters.record_malformed();
                    debug!("[Ingress] dropped datagram from {}: {}", src, err);
                    Ok(IngressOutcome::Malformed(len))
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(IngressOutcome::Idle)
            }
            Err(e) => Err(LinkError::socket("receiving on ingress", e)),
        }
    }

    /// Receive loop; returns when `running` is cleared. Dropping `self` closes the mailbox.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        if let Ok(addr) = self.local_addr() {
            info!("[Ingress] listening on UDP {}", addr);
        }
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while running.load(Ordering::Acquire) {
            if let Err(err) = self.receive_once(&mut buf) {
                // Producer-side resets (e.g. ICMP unreachable surfacing as ECONNREFUSED) are transient.
                self.counters.record_receive_error();
                warn!("[Ingress] {}; still listening", err);
            }
        }

        debug!("[Ingress] stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mailbox::mailbox;
    use std::time::Duration;

    fn loopback_config() -> RelayConfig {
        RelayConfig {
            ingress_addr: "127.0.0.1:0".parse().unwrap(),
            recv_timeout: Duration::from_millis(50),
            ..RelayConfig::default()
        }
    }

    fn setup() -> (IngressReceiver, crate::relay::mailbox::MailboxReader, UdpSocket, Arc<LinkCounters>) {
        let (tx, rx) = mailbox();
        let counters = Arc::new(LinkCounters::new());
        let ingress = IngressReceiver::bind(&loopback_config(), tx, counters.clone()).unwrap();
        let producer = UdpSocket::bind("127.0.0.1:0").unwrap();
        producer.connect(ingress.local_addr().unwrap()).unwrap();
        (ingress, rx, producer, counters)
    }

    #[test]
    fn valid_datagram_lands_in_mailbox() {
        let (mut ingress, rx, producer, counters) = setup();
        let cmd = Command::new(11, 0.6, 0.1, 0.0, 99);
        producer.send(&cmd.encode()).unwrap();

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert_eq!(ingress.receive_once(&mut buf).unwrap(), IngressOutcome::Accepted(cmd));
        assert_eq!(rx.get(), Some(cmd));
        assert_eq!(counters.snapshot().received, 1);
    }

    #[test]
    fn off_by_one_lengths_do_not_touch_mailbox() {
        let (mut ingress, rx, producer, counters) = setup();
        let held = Command::new(1, 0.5, 0.0, 0.0, 1);
        producer.send(&held.encode()).unwrap();

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        ingress.receive_once(&mut buf).unwrap();

        let bytes = Command::new(2, 1.0, 1.0, 1.0, 2).encode();
        producer.send(&bytes[..23]).unwrap();
        let mut long = bytes.to_vec();
        long.push(0xFF);
        producer.send(&long).unwrap();

        assert_eq!(ingress.receive_once(&mut buf).unwrap(), IngressOutcome::Malformed(23));
        assert_eq!(ingress.receive_once(&mut buf).unwrap(), IngressOutcome::Malformed(25));
        assert_eq!(rx.get(), Some(held));
        assert_eq!(rx.version(), 1);
        assert_eq!(counters.snapshot().malformed, 2);
    }

    #[test]
    fn idle_when_nothing_arrives() {
        let (mut ingress, rx, _producer, _counters) = setup();
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert_eq!(ingress.receive_once(&mut buf).unwrap(), IngressOutcome::Idle);
        assert_eq!(rx.get(), None);
    }

    #[test]
    fn run_exits_on_stop_and_closes_mailbox() {
        let (ingress, rx, _producer, _counters) = setup();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::spawn(move || ingress.run(flag));

        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Release);
        handle.join().unwrap();
        assert!(rx.is_closed());
    }
}
