//! service.rs
//! Relay lifecycle: ingress thread + forwarder thread sharing one mailbox.
//!
//! `Relay::start` binds (fatal on failure) and spawns both threads;
//! `RelayHandle::stop` (or dropping the handle) shuts them down and joins.

use log::{error, info};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use crate::relay::{
    counters::{CounterSnapshot, LinkCounters},
    forwarder::EgressForwarder,
    ingress::IngressReceiver,
    mailbox::mailbox,
};
use crate::utils::{config::RelayConfig, error::LinkResult};

pub struct Relay;

impl Relay {
    pub fn start(config: &RelayConfig) -> LinkResult<RelayHandle> {
        config.validate()?;

        let (writer, reader) = mailbox();
        let counters = Arc::new(LinkCounters::new());
        let running = Arc::new(AtomicBool::new(true));

        let ingress = IngressReceiver::bind(config, writer, counters.clone())?;
        let ingress_addr = ingress.local_addr()?;
        let forwarder = EgressForwarder::new(config, reader, counters.clone())?;

        let ingress_handle = {
            let flag = running.clone();
            thread::Builder::new()
                .name("ssb-ingress".into())
                .spawn(move || ingress.run(flag))?
        };
        let forwarder_handle = {
            let flag = running.clone();
            match thread::Builder::new()
                .name("ssb-forwarder".into())
                .spawn(move || forwarder.run(flag))
            {
                Ok(h) => h,
                Err(e) => {
                    // Ingress is already up; let it wind down before bailing.
                    running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
        };

        info!(
            "[Relay] running: ingress {} → egress {}",
            ingress_addr, config.egress_addr
        );

        Ok(RelayHandle {
            running,
            counters,
            ingress_addr,
            egress_addr: config.egress_addr,
            threads: vec![ingress_handle, forwarder_handle],
        })
    }
}

pub struct RelayHandle {
    running: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
    ingress_addr: SocketAddr,
    egress_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Actual bound ingress address (useful when configured with port 0).
    pub fn ingress_addr(&self) -> SocketAddr {
        self.ingress_addr
    }

    pub fn egress_addr(&self) -> SocketAddr {
        self.egress_addr
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.threads.iter().all(|h| !h.is_finished())
    }

    /// Signals both threads and waits for them. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        // Ingress exits within one read timeout and drops the mailbox writer, which wakes the forwarder.
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("relay").to_string();
            if handle.join().is_err() {
                error!("[Relay] {} thread panicked", name);
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
