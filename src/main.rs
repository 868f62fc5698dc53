//! # SSB Command Relay
//!
//! Sits between an external command producer and the fixed-rate consumer.
//!
//! ## Pipeline
//! - **Ingress (5060):** blocking receive, 24-byte commands decoded into a single-slot mailbox.
//! - **Forwarder → egress (5061):** sends the latest command only when its value changed;
//!   commands overwritten before they could be sent are coalesced away.
//!
//! ## Lifecycle
//! - Bind failure on the ingress port is fatal (non-zero exit).
//! - Ctrl+C clears the running flag; both threads are joined before exit.
//! - A link-counter status line is logged every `--status-secs`.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use ssb_relay::relay::service::Relay;
use ssb_relay::utils::{
    config::{
        DEFAULT_EGRESS_ADDR, DEFAULT_IDLE_WAIT_MS, DEFAULT_INGRESS_ADDR, DEFAULT_RECV_TIMEOUT_MS,
        DEFAULT_STATUS_INTERVAL_SECS, RelayConfig,
    },
    shutdown::{install_ctrl_c, wait_while_running},
};

#[derive(Parser, Debug)]
#[command(name = "ssb_relay", version, about = "Single-slot UDP command relay (ingress → latest-value → egress)")]
struct Args {
    /// Endpoint the producer sends commands to
    #[arg(long, default_value = DEFAULT_INGRESS_ADDR)]
    ingress: SocketAddr,

    /// Endpoint the consumer listens on
    #[arg(long, default_value = DEFAULT_EGRESS_ADDR)]
    egress: SocketAddr,

    /// Ingress read timeout; bounds how long shutdown can take
    #[arg(long, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    recv_timeout_ms: u64,

    /// Forwarder re-check interval when no change is signalled
    #[arg(long, default_value_t = DEFAULT_IDLE_WAIT_MS)]
    idle_wait_ms: u64,

    /// Seconds between link-counter status lines (0 disables)
    #[arg(long, default_value_t = DEFAULT_STATUS_INTERVAL_SECS)]
    status_secs: u64,

    /// SO_RCVBUF for the ingress socket
    #[arg(long)]
    recv_buffer: Option<usize>,
}

impl From<&Args> for RelayConfig {
    fn from(a: &Args) -> Self {
        Self {
            ingress_addr: a.ingress,
            egress_addr: a.egress,
            recv_timeout: Duration::from_millis(a.recv_timeout_ms),
            idle_wait: Duration::from_millis(a.idle_wait_ms),
            status_interval: Duration::from_secs(a.status_secs),
            recv_buffer_bytes: a.recv_buffer,
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        error!("relay failed: {:#}", e);
        eprintln!("ssb_relay: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = RelayConfig::from(&args);
    info!("=== SSB RELAY START ===");

    let mut relay = Relay::start(&config).context("starting relay")?;
    println!("relay: {} → {}", relay.ingress_addr(), relay.egress_addr());

    let running = Arc::new(AtomicBool::new(true));
    install_ctrl_c(running.clone()).context("installing interrupt handler")?;

    let status_every = (!config.status_interval.is_zero()).then_some(config.status_interval);
    let mut last_status = Instant::now();
    let mut crashed = false;
    while running.load(Ordering::Acquire) {
        wait_while_running(&running, Some(Duration::from_millis(250)), Duration::from_millis(50));
        if !relay.is_running() {
            crashed = true;
            break;
        }
        if let Some(every) = status_every {
            if last_status.elapsed() >= every {
                info!("[Relay] {}", relay.counters());
                last_status = Instant::now();
            }
        }
    }

    relay.stop();
    info!("[Relay] final counters: {}", relay.counters());
    if crashed {
        anyhow::bail!("relay thread exited unexpectedly");
    }
    info!("=== SSB RELAY FINISHED ===");
    Ok(())
}
