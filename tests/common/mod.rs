#![allow(dead_code)]

use parking_lot::Mutex;
use std::{
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use spin_sleep::{SpinSleeper, SpinStrategy};
use ssb_relay::consumer::sink::{ActuationSink, Control};
use ssb_relay::relay::command::Command;
use ssb_relay::utils::{clock::monotonic_ns, config::RelayConfig, error::LinkResult};

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Relay config on ephemeral ingress, forwarding to `egress`.
pub fn relay_config(egress: SocketAddr) -> RelayConfig {
    RelayConfig {
        ingress_addr: loopback(),
        egress_addr: egress,
        recv_timeout: Duration::from_millis(50),
        idle_wait: Duration::from_millis(10),
        ..RelayConfig::default()
    }
}

/// Sends `count` commands starting at sequence 1, paced at `hz`.
pub fn spawn_producer(target: SocketAddr, count: u32, hz: f64) -> JoinHandle<()> {
    thread::spawn(move || {
        let socket = UdpSocket::bind(loopback()).unwrap();
        let period = Duration::from_secs_f64(1.0 / hz);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next = Instant::now();
        for seq in 1..=count {
            let now = Instant::now();
            if now < next {
                sleeper.sleep(next - now);
            }
            let cmd = Command::new(seq, 0.6, 0.0, 0.0, monotonic_ns());
            socket.send_to(&cmd.encode(), target).unwrap();
            next += period;
        }
    })
}

#[derive(Default)]
pub struct Journal {
    pub applied: Vec<Control>,
    pub advances: u64,
    pub releases: u32,
}

/// Sink that only records what it was asked to do.
pub struct RecordingSink {
    pub journal: Arc<Mutex<Journal>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<Journal>>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        (Self { journal: journal.clone() }, journal)
    }
}

impl ActuationSink for RecordingSink {
    fn apply(&mut self, control: Control) -> LinkResult<()> {
        self.journal.lock().applied.push(control);
        Ok(())
    }

    fn advance(&mut self, _dt: Duration) -> LinkResult<()> {
        self.journal.lock().advances += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.journal.lock().releases += 1;
    }
}
