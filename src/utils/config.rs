//! Runtime configuration for the relay and the consumer loop.
//!
//! Defaults match the reference deployment: producer → 127.0.0.1:5060 (ingress),
//! relay → 127.0.0.1:5061 (egress, consumed by the tick loop at 100 Hz).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::ValueEnum;

use crate::utils::error::{LinkError, LinkResult};

pub const DEFAULT_INGRESS_ADDR: &str = "127.0.0.1:5060";
pub const DEFAULT_EGRESS_ADDR: &str = "127.0.0.1:5061";
pub const DEFAULT_TICK_HZ: f64 = 100.0;
pub const DEFAULT_WINDOW_SECS: f64 = 5.0;
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 200;  // ingress wakes this often to observe shutdown
pub const DEFAULT_IDLE_WAIT_MS: u64 = 50;      // forwarder re-check interval without a change signal
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;
/// Above this the spin sleeper can no longer hold the period.
pub const MAX_TICK_HZ: f64 = 10_000.0;

/// How the consumer decides a drained command is worth applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FreshnessPolicy {
    /// Fresh iff the sequence differs from the last applied one.
    #[default]
    Change,
    /// Fresh iff the sequence is newer under wrapping serial-number comparison.
    Advance,
    /// Every drained command is fresh; the relay's forward-on-change filter is trusted.
    TrustRelay,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub ingress_addr: SocketAddr,
    pub egress_addr: SocketAddr,
    pub recv_timeout: Duration,
    pub idle_wait: Duration,
    pub status_interval: Duration,
    pub recv_buffer_bytes: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ingress_addr: parse_const(DEFAULT_INGRESS_ADDR),
            egress_addr: parse_const(DEFAULT_EGRESS_ADDR),
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            recv_buffer_bytes: None,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> LinkResult<()> {
        if self.recv_timeout.is_zero() {
            // A zero read timeout means "block forever" to the OS, which would hang shutdown.
            return Err(LinkError::Config("recv_timeout must be non-zero".into()));
        }
        if self.idle_wait.is_zero() {
            return Err(LinkError::Config("idle_wait must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bind_addr: SocketAddr,
    pub tick_hz: f64,
    pub window: Duration,
    pub freshness: FreshnessPolicy,
    pub pin_core: Option<usize>,
    pub realtime_priority: bool,
    pub report_csv: Option<PathBuf>,
    pub trace_csv: Option<PathBuf>,
    /// Stop after this long; `None` runs until interrupted.
    pub duration: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bind_addr: parse_const(DEFAULT_EGRESS_ADDR),
            tick_hz: DEFAULT_TICK_HZ,
            window: Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
            freshness: FreshnessPolicy::default(),
            pin_core: None,
            realtime_priority: false,
            report_csv: None,
            trace_csv: None,
            duration: None,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> LinkResult<()> {
        self.tick_period()?;
        if self.window.is_zero() {
            return Err(LinkError::Config("report window must be non-zero".into()));
        }
        if self.window < self.tick_period()? {
            return Err(LinkError::Config(format!(
                "report window {:?} is shorter than one tick",
                self.window
            )));
        }
        Ok(())
    }

    /// One tick at `tick_hz`. Rejects rates outside `(0, MAX_TICK_HZ]` and any
    /// rate whose period is not representable.
    pub fn tick_period(&self) -> LinkResult<Duration> {
        let bad_rate = || {
            LinkError::Config(format!(
                "tick rate must be in (0, {}] Hz, got {}",
                MAX_TICK_HZ, self.tick_hz
            ))
        };
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0 && self.tick_hz <= MAX_TICK_HZ) {
            return Err(bad_rate());
        }
        match Duration::try_from_secs_f64(1.0 / self.tick_hz) {
            Ok(period) if !period.is_zero() => Ok(period),
            _ => Err(bad_rate()),
        }
    }
}

fn parse_const(addr: &str) -> SocketAddr {
    match addr.parse() {
        Ok(a) => a,
        Err(_) => unreachable!("default address constant {addr} is malformed"),
    }
}
