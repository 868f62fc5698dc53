//! forwarder.rs
//! Sends the mailbox's latest command downstream, once per distinct value.
//! - change detection compares decoded field values, not object identity
//! - sleeps on the mailbox's change signal instead of spinning
//! - best effort: fire-and-forget datagrams, intermediate values are never sent

use log::{debug, info, warn};
use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::relay::{command::Command, counters::LinkCounters, mailbox::MailboxReader};
use crate::utils::{
    config::RelayConfig,
    error::{LinkError, LinkResult},
    net::sender_for,
};

/// A persistent send failure is logged on the first attempt and then every this many.
const SEND_ERROR_LOG_EVERY: u64 = 100;

pub struct EgressForwarder {
    socket: UdpSocket,
    target: SocketAddr,
    mailbox: MailboxReader,
    counters: Arc<LinkCounters>,
    idle_wait: Duration,
    /// Last command actually sent downstream.
    last_sent: Option<Command>,
    /// Mailbox version of the last value considered.
    seen_version: u64,
}

impl EgressForwarder {
    pub fn new(config: &RelayConfig, mailbox: MailboxReader, counters: Arc<LinkCounters>) -> LinkResult<Self> {
        let socket = sender_for(config.egress_addr)?;
        Ok(Self {
            socket,
            target: config.egress_addr,
            mailbox,
            counters,
            idle_wait: config.idle_wait,
            last_sent: None,
            seen_version: 0,
        })
    }

    pub fn last_sent(&self) -> Option<Command> {
        self.last_sent
    }

    /// Forward the current mailbox value if it differs from the last one sent.
    /// Returns the command sent, if any.
    pub fn forward_once(&mut self) -> LinkResult<Option<Command>> {
        let Some((version, cmd)) = self.mailbox.get_versioned() else {
            return Ok(None);
        };
        if self.last_sent == Some(cmd) {
            // Repeats of the value already downstream are never sent.
            self.counters.record_superseded(version.saturating_sub(self.seen_version));
            self.seen_version = version;
            return Ok(None);
        }

        self.socket
            .send_to(&cmd.encode(), self.target)
            .map_err(|e| LinkError::socket("forwarding to egress", e))?;

        // Everything put between the previous forward and this one was overwritten unseen.
        self.counters
            .record_superseded(version.saturating_sub(self.seen_version).saturating_sub(1));
        self.counters.record_forwarded();
        self.seen_version = version;
        self.last_sent = Some(cmd);
        Ok(Some(cmd))
    }

    /// Forward loop; returns when `running` is cleared or the mailbox closes.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("[Forwarder] forwarding to UDP {}", self.target);

        let mut failing: u64 = 0;

        while running.load(Ordering::Acquire) {
            self.mailbox.wait_for_change(self.seen_version, self.idle_wait);

            match self.forward_once() {
                Ok(_) => {
                    if failing > 0 {
                        info!("[Forwarder] egress recovered after {} failed sends", failing);
                        failing = 0;
                    }
                }
                Err(err) => {
                    // Forward-state is left untouched, so the retry sends the same value.
                    self.counters.record_send_error();
                    failing += 1;
                    if failing == 1 || failing % SEND_ERROR_LOG_EVERY == 0 {
                        warn!("[Forwarder] {} ({} consecutive); will retry", err, failing);
                    }
                    // Back off one idle interval; a newer put still wakes us early.
                    self.mailbox.wait_for_change(self.mailbox.version(), self.idle_wait);
                }
            }

            if self.mailbox.is_closed() {
                break;
            }
        }

        debug!("[Forwarder] stopped.");
    }
}
