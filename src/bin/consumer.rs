//! Fixed-rate consumer: drains the relay's egress endpoint every tick and drives
//! a simulated vehicle, printing a latency/freshness report per window.
//!
//! Fatal at startup: endpoint bind failure, vehicle acquisition failure, bad config.
//! Ctrl+C, `--duration-secs` or a sink failure end the run; the vehicle is
//! released on every one of those paths.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{error, info, warn};
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use ssb_relay::consumer::{
    sink::{SimulatedVehicle, SinkGuard, VehicleParams},
    tick_loop::spawn_consumer,
};
use ssb_relay::utils::{
    clock::try_monotonic_ns,
    config::{ConsumerConfig, DEFAULT_EGRESS_ADDR, DEFAULT_TICK_HZ, DEFAULT_WINDOW_SECS, FreshnessPolicy},
    shutdown::install_ctrl_c,
    trace::TickRecorder,
};

#[derive(Parser, Debug)]
#[command(name = "ssb_consumer", version, about = "Fixed-rate command consumer with windowed latency reports")]
struct Args {
    /// Endpoint the relay forwards to
    #[arg(long, default_value = DEFAULT_EGRESS_ADDR)]
    bind: SocketAddr,

    /// Tick rate in Hz
    #[arg(long, default_value_t = DEFAULT_TICK_HZ)]
    hz: f64,

    /// Report window in seconds
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS)]
    window_secs: f64,

    /// How a drained command is judged fresh
    #[arg(long, value_enum, default_value_t = FreshnessPolicy::Change)]
    freshness: FreshnessPolicy,

    /// Pin the tick thread to this core
    #[arg(long)]
    pin_core: Option<usize>,

    /// Run the tick thread at maximum priority
    #[arg(long)]
    realtime: bool,

    /// Append each window report to this CSV
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Write one row per tick to this CSV
    #[arg(long)]
    trace_csv: Option<PathBuf>,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(long)]
    duration_secs: Option<f64>,
}

impl Args {
    fn into_config(self) -> Result<ConsumerConfig> {
        let window = Duration::try_from_secs_f64(self.window_secs)
            .with_context(|| format!("invalid --window-secs {}", self.window_secs))?;
        let duration = self
            .duration_secs
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("invalid --duration-secs")?;
        Ok(ConsumerConfig {
            bind_addr: self.bind,
            tick_hz: self.hz,
            window,
            freshness: self.freshness,
            pin_core: self.pin_core,
            realtime_priority: self.realtime,
            report_csv: self.report_csv,
            trace_csv: self.trace_csv,
            duration,
        })
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        error!("consumer failed: {:#}", e);
        eprintln!("ssb_consumer: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    config.validate().context("invalid consumer configuration")?;
    try_monotonic_ns().context("reading the shared monotonic clock")?;
    info!("=== SSB CONSUMER START === {:?}", config);

    let vehicle = SimulatedVehicle::spawn(VehicleParams::default()).context("acquiring vehicle")?;
    let sink = SinkGuard::acquire(vehicle);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrl_c(running.clone()).context("installing interrupt handler")?;

    let recorder = config.trace_csv.as_ref().map(|_| TickRecorder::new());
    let mut exporter = match (&recorder, &config.trace_csv) {
        (Some(rec), Some(path)) => Some(rec.start_exporter(path.clone())),
        _ => None,
    };

    let handle = spawn_consumer(&config, sink, recorder.clone(), running)
        .with_context(|| format!("starting consumer on {}", config.bind_addr))?;

    let outcome = handle
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?;

    if let Some(exporter) = exporter.as_mut() {
        exporter.stop();
    }
    if let Some(rec) = &recorder {
        if rec.dropped() > 0 {
            warn!("trace dropped {} tick events", rec.dropped());
        }
        if rec.write_errors() > 0 {
            warn!("trace hit {} write errors; the CSV is incomplete", rec.write_errors());
        }
    }

    let summary = outcome.context("consumer loop aborted")?;
    println!(
        "ticks={} applied={} stale={} malformed={} overruns={} last_seq={:?}",
        summary.ticks,
        summary.applied,
        summary.stale,
        summary.malformed,
        summary.overruns,
        summary.last_applied_sequence
    );
    info!("=== SSB CONSUMER FINISHED ===");
    Ok(())
}
