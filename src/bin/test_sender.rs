//! Fixed-rate test producer for the relay's ingress endpoint.
//! - sequence starts at 1 and wraps at 2^32
//! - `sent_at_ns` comes from the same monotonic clock the consumer reads
//! - constant throttle, optional steering sine, optional uniform noise

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use rand::random_range;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use ssb_relay::consumer::pacer::TickPacer;
use ssb_relay::relay::command::Command;
use ssb_relay::utils::{
    clock::{monotonic_ns, try_monotonic_ns},
    config::DEFAULT_INGRESS_ADDR,
    net::sender_for,
    shutdown::install_ctrl_c,
};

#[derive(Parser, Debug)]
#[command(name = "ssb_test_sender", version, about = "Send fixed-rate test commands to the relay")]
struct Args {
    /// Relay ingress endpoint
    #[arg(long, default_value = DEFAULT_INGRESS_ADDR)]
    target: SocketAddr,

    /// Send rate in Hz
    #[arg(long, default_value_t = 100.0)]
    hz: f64,

    /// Stop after this many commands (default: until Ctrl+C)
    #[arg(long)]
    count: Option<u64>,

    #[arg(long, default_value_t = 0.6)]
    throttle: f32,

    #[arg(long, default_value_t = 0.0)]
    brake: f32,

    /// Steering sine amplitude (0 keeps the wheel straight)
    #[arg(long, default_value_t = 0.0)]
    steer_amplitude: f32,

    /// Steering sine period in seconds
    #[arg(long, default_value_t = 4.0)]
    steer_period_secs: f32,

    /// Uniform noise added to throttle and steer, ± this value
    #[arg(long, default_value_t = 0.0)]
    noise: f32,

    /// First sequence number (useful to exercise wraparound)
    #[arg(long, default_value_t = 1)]
    start_seq: u32,
}

impl Args {
    /// Send period; every float flag is checked here so the loop cannot panic mid-run.
    fn validate(&self) -> Result<Duration> {
        anyhow::ensure!(self.hz.is_finite() && self.hz > 0.0, "--hz must be positive, got {}", self.hz);
        let period = Duration::try_from_secs_f64(1.0 / self.hz)
            .ok()
            .filter(|p| !p.is_zero())
            .with_context(|| format!("--hz {} gives no usable send period", self.hz))?;
        anyhow::ensure!(
            self.noise.is_finite() && self.noise >= 0.0,
            "--noise must be a finite, non-negative amplitude, got {}",
            self.noise
        );
        for (flag, v) in [
            ("--throttle", self.throttle),
            ("--brake", self.brake),
            ("--steer-amplitude", self.steer_amplitude),
            ("--steer-period-secs", self.steer_period_secs),
        ] {
            anyhow::ensure!(v.is_finite(), "{} must be finite, got {}", flag, v);
        }
        Ok(period)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let period = args.validate()?;
    try_monotonic_ns().context("reading the shared monotonic clock")?;

    let socket = sender_for(args.target).context("creating sender socket")?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrl_c(running.clone()).context("installing interrupt handler")?;

    println!("[SENDER] Sending @ {} Hz → {}", args.hz, args.target);

    let start = Instant::now();
    // Resyncs after a stall instead of bursting the missed sends.
    let mut pacer = TickPacer::new(period, start);
    let mut seq = args.start_seq;
    let mut sent: u64 = 0;
    let mut failures: u64 = 0;

    while running.load(Ordering::Acquire) && args.count.is_none_or(|n| sent < n) {
        pacer.wait();

        let t = start.elapsed().as_secs_f32();
        let steer = if args.steer_amplitude != 0.0 && args.steer_period_secs > 0.0 {
            args.steer_amplitude * (std::f32::consts::TAU * t / args.steer_period_secs).sin()
        } else {
            0.0
        };
        let (throttle, steer) = if args.noise > 0.0 {
            (
                args.throttle + random_range(-args.noise..=args.noise),
                steer + random_range(-args.noise..=args.noise),
            )
        } else {
            (args.throttle, steer)
        };

        let cmd = Command::new(seq, throttle, steer, args.brake, monotonic_ns());
        if let Err(e) = socket.send_to(&cmd.encode(), args.target) {
            // Relay absent or restarting; keep the cadence.
            failures += 1;
            warn!("[SENDER] send #{} failed: {}", seq, e);
        }

        sent += 1;
        seq = seq.wrapping_add(1);
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "[SENDER] Stopped after {} commands in {:.2}s ({} failed, {} late, {} resyncs)",
        sent,
        elapsed,
        failures,
        pacer.overruns(),
        pacer.resyncs()
    );
    println!("[SENDER] Stopped: sent={} failed={} rate={:.1}Hz", sent, failures, sent as f64 / elapsed.max(1e-9));
    Ok(())
}
