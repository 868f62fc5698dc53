//! tick_loop.rs
//! Fixed-rate consumer loop.
//!
//! Each tick walks TickStart → Drain → SelectLatest → DetermineFreshness →
//! Apply (only when fresh) → AdvanceSimulation → WindowCheck. The drain never
//! blocks, the sink is advanced by exactly one period every tick whether or not
//! anything was applied, and late ticks are recorded but never skipped.
//!
//! Only a sink failure ends the loop early; the sink guard owned by the loop
//! releases the sink on that path too.

use log::{error, info, warn};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::consumer::{
    pacer::TickPacer,
    receiver::CommandReceiver,
    sink::{ActuationSink, Control, SinkGuard},
};
use crate::relay::command::Command;
use crate::utils::{
    clock::{elapsed_ms, monotonic_ns},
    config::{ConsumerConfig, FreshnessPolicy},
    error::{LinkError, LinkResult},
    metrics::{FreshSample, TickSample, WindowReport, WindowedMetrics, wait_ticks},
    metrics_export::ReportCsv,
    trace::{TickEvent, TickKind, TickRecorder},
};

/// `true` if `seq` is ahead of `last` under 32-bit serial-number arithmetic.
#[inline]
pub fn sequence_advanced(seq: u32, last: u32) -> bool {
    let diff = seq.wrapping_sub(last);
    diff != 0 && diff < (1 << 31)
}

/// Freshness decision for a drained command. The first command ever seen is fresh.
pub fn is_fresh(policy: FreshnessPolicy, last_applied: Option<u32>, seq: u32) -> bool {
    let Some(last) = last_applied else {
        return true;
    };
    match policy {
        FreshnessPolicy::Change => seq != last,
        FreshnessPolicy::Advance => sequence_advanced(seq, last),
        FreshnessPolicy::TrustRelay => true,
    }
}

/// What a single tick did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: u64,
    pub sample: TickSample,
    pub applied: Option<Command>,
    pub report: Option<WindowReport>,
}

/// Totals over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub applied: u64,
    pub stale: u64,
    pub malformed: u64,
    pub overruns: u64,
    pub reports: u64,
    pub last_applied_sequence: Option<u32>,
}

pub struct ConsumerLoop<S: ActuationSink> {
    receiver: CommandReceiver,
    sink: SinkGuard<S>,
    policy: FreshnessPolicy,
    period: Duration,
    period_ms: f64,
    metrics: WindowedMetrics,
    recorder: Option<TickRecorder>,
    report_csv: Option<ReportCsv>,

    last_applied_sequence: Option<u32>,
    last_tick_ns: Option<u64>,
    summary: RunSummary,
}

impl<S: ActuationSink> ConsumerLoop<S> {
    pub fn new(config: &ConsumerConfig, receiver: CommandReceiver, sink: SinkGuard<S>) -> LinkResult<Self> {
        config.validate()?;
        let period = config.tick_period()?;
        Ok(Self {
            receiver,
            sink,
            policy: config.freshness,
            period,
            period_ms: period.as_secs_f64() * 1_000.0,
            metrics: WindowedMetrics::new(config.tick_hz, config.window, Instant::now()),
            recorder: None,
            report_csv: None,
            last_applied_sequence: None,
            last_tick_ns: None,
            summary: RunSummary::default(),
        })
    }

    pub fn with_recorder(mut self, recorder: TickRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_report_csv(mut self, report_csv: ReportCsv) -> Self {
        self.report_csv = Some(report_csv);
        self
    }

    pub fn last_applied_sequence(&self) -> Option<u32> {
        self.last_applied_sequence
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one tick. `overrun` is the pacer's verdict on this tick's release.
    pub fn step(&mut self, overrun: bool) -> LinkResult<TickOutcome> {
        // TickStart
        let tick_ns = monotonic_ns();
        let tick_gap_ms = self.last_tick_ns.map(|prev| elapsed_ms(prev, tick_ns));
        self.last_tick_ns = Some(tick_ns);
        self.summary.ticks += 1;
        let tick = self.summary.ticks;

        // Drain + SelectLatest
        let drain = self.receiver.drain();

        let mut sample = TickSample {
            tick_gap_ms,
            drained: drain.drained,
            malformed: drain.malformed,
            overrun,
            ..TickSample::default()
        };

        // DetermineFreshness + Apply
        let mut applied = None;
        if let Some(cmd) = drain.latest {
            if is_fresh(self.policy, self.last_applied_sequence, cmd.sequence) {
                let age_ms = elapsed_ms(cmd.sent_at_ns, tick_ns);

                let started = Instant::now();
                self.sink.apply(Control::from(&cmd))?;
                let adapter_us = started.elapsed().as_secs_f64() * 1_000_000.0;

                self.last_applied_sequence = Some(cmd.sequence);
                sample.fresh = Some(FreshSample {
                    age_ms,
                    adapter_us,
                    wait_ticks: wait_ticks(age_ms, self.period_ms),
                });
                applied = Some(cmd);
            } else {
                sample.stale = true;
            }
        }

        // AdvanceSimulation
        self.sink.advance(self.period)?;

        self.summary.applied += u64::from(applied.is_some());
        self.summary.stale += u64::from(sample.stale);
        self.summary.malformed += u64::from(sample.malformed);
        self.summary.overruns += u64::from(overrun);
        self.summary.last_applied_sequence = self.last_applied_sequence;

        if let Some(recorder) = &self.recorder {
            recorder.record(trace_event(tick, tick_ns, &sample, drain.latest));
        }

        // WindowCheck
        self.metrics.record_tick(&sample);
        let report = self.metrics.maybe_report(Instant::now());
        if let Some(r) = &report {
            self.emit(r);
        }

        Ok(TickOutcome { tick, sample, applied, report })
    }

    /// Paced loop until `running` clears or `limit` elapses. A partial final
    /// window is reported on the way out.
    pub fn run(mut self, running: &AtomicBool, limit: Option<Duration>) -> LinkResult<RunSummary> {
        let start = Instant::now();
        let mut pacer = TickPacer::new(self.period, start);
        info!(
            "[Consumer] loop started: period={:?} policy={:?}",
            self.period, self.policy
        );

        while running.load(Ordering::Acquire) {
            if limit.is_some_and(|l| start.elapsed() >= l) {
                break;
            }
            let overrun = pacer.wait();
            if let Err(e) = self.step(overrun) {
                error!("[Consumer] sink failure, stopping: {}", e);
                return Err(e);
            }
        }

        if self.metrics.ticks() > 0 {
            let report = self.metrics.report(Instant::now());
            self.emit(&report);
        }
        if pacer.resyncs() > 0 {
            warn!("[Consumer] schedule resynchronised {} times", pacer.resyncs());
        }
        info!(
            "[Consumer] stopped after {} ticks: applied={} stale={} overruns={}",
            self.summary.ticks, self.summary.applied, self.summary.stale, self.summary.overruns
        );
        Ok(self.summary)
    }

    fn emit(&mut self, report: &WindowReport) {
        self.summary.reports += 1;
        println!("{}", report);
        info!("[Consumer] {}", report);
        if let Some(csv) = &self.report_csv {
            if let Err(e) = csv.append(report) {
                warn!("[Consumer] failed to append report to {:?}: {}", csv.path(), e);
            }
        }
    }
}

fn trace_event(tick: u64, tick_ns: u64, sample: &TickSample, latest: Option<Command>) -> TickEvent {
    let kind = match (sample.fresh, sample.stale) {
        (Some(_), _) => TickKind::Applied,
        (None, true) => TickKind::Stale,
        (None, false) => TickKind::Idle,
    };
    TickEvent {
        tick,
        tick_ns,
        kind,
        sequence: latest.map(|c| c.sequence),
        age_ms: sample.fresh.map(|f| f.age_ms),
        adapter_us: sample.fresh.map(|f| f.adapter_us),
        wait_ticks: sample.fresh.map(|f| f.wait_ticks),
        tick_gap_ms: sample.tick_gap_ms,
        drained: sample.drained,
    }
}

/// Binds the consumer endpoint, then runs the loop on its own thread, optionally
/// pinned to a core and raised to maximum priority. Bind failure is returned
/// before any thread starts.
pub fn spawn_consumer<S>(
    config: &ConsumerConfig,
    sink: SinkGuard<S>,
    recorder: Option<TickRecorder>,
    running: Arc<AtomicBool>,
) -> LinkResult<JoinHandle<LinkResult<RunSummary>>>
where
    S: ActuationSink + Send + 'static,
{
    let receiver = CommandReceiver::bind(config.bind_addr)?;
    info!("[Consumer] listening on {}", receiver.local_addr()?);

    let mut consumer = ConsumerLoop::new(config, receiver, sink)?;
    if let Some(path) = &config.report_csv {
        consumer = consumer.with_report_csv(ReportCsv::new(path.clone())?);
    }
    if let Some(recorder) = recorder {
        consumer = consumer.with_recorder(recorder);
    }

    let pin_core = config.pin_core;
    let limit = config.duration;
    let body = move || {
        if let Some(core) = pin_core {
            pin_current_thread(core);
        }
        consumer.run(&running, limit)
    };

    let builder = thread::Builder::new().name("ssb-consumer".into());
    let handle = if config.realtime_priority {
        builder.spawn_with_priority(ThreadPriority::Max, move |res| {
            match res {
                Ok(()) => info!("[Consumer] running at maximum thread priority"),
                Err(e) => warn!("[Consumer] could not raise thread priority: {:?}", e),
            }
            body()
        })
    } else {
        builder.spawn(body)
    };
    Ok(handle?)
}

fn pin_current_thread(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("[Consumer] pinned to core {}", core)
        }
        Some(_) => error!("[Consumer] failed to pin to core {}", core),
        None => error!("[Consumer] core {} not among {} available cores", core, core_ids.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::UdpSocket;

    #[derive(Default)]
    struct Journal {
        applied: Vec<Control>,
        advances: u32,
        releases: u32,
    }

    struct RecordingSink {
        journal: Arc<Mutex<Journal>>,
        fail_apply: bool,
    }

    impl ActuationSink for RecordingSink {
        fn apply(&mut self, control: Control) -> LinkResult<()> {
            if self.fail_apply {
                return Err(LinkError::Sink("actuator offline".into()));
            }
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

    struct Rig {
        consumer: ConsumerLoop<RecordingSink>,
        tx: UdpSocket,
        journal: Arc<Mutex<Journal>>,
    }

    fn rig(policy: FreshnessPolicy, fail_apply: bool) -> Rig {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let config = ConsumerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            freshness: policy,
            ..ConsumerConfig::default()
        };
        let receiver = CommandReceiver::bind(config.bind_addr).unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.connect(receiver.local_addr().unwrap()).unwrap();
        let sink = SinkGuard::acquire(RecordingSink { journal: journal.clone(), fail_apply });
        let consumer = ConsumerLoop::new(&config, receiver, sink).unwrap();
        Rig { consumer, tx, journal }
    }

    impl Rig {
        fn send(&self, seq: u32) {
            let cmd = Command::new(seq, 0.5, 0.1, 0.0, monotonic_ns());
            self.tx.send(&cmd.encode()).unwrap();
            thread::sleep(Duration::from_millis(15));
        }

        fn tick(&mut self) -> TickOutcome {
            self.consumer.step(false).unwrap()
        }
    }

    #[test]
    fn sequence_advance_wraps() {
        assert!(sequence_advanced(2, 1));
        assert!(sequence_advanced(0, u32::MAX));
        assert!(sequence_advanced(5, u32::MAX - 5));
        assert!(!sequence_advanced(1, 1));
        assert!(!sequence_advanced(u32::MAX, 0));
        assert!(!sequence_advanced(1, 2));
    }

    #[test]
    fn policies_disagree_on_reordered_and_duplicate_sequences() {
        assert!(is_fresh(FreshnessPolicy::Change, None, 7));
        assert!(is_fresh(FreshnessPolicy::Advance, None, 7));

        assert!(!is_fresh(FreshnessPolicy::Change, Some(7), 7));
        assert!(is_fresh(FreshnessPolicy::Change, Some(7), 6));
        assert!(!is_fresh(FreshnessPolicy::Advance, Some(7), 6));
        assert!(is_fresh(FreshnessPolicy::TrustRelay, Some(7), 7));
    }

    #[test]
    fn applies_only_fresh_commands_and_always_advances() {
        let mut rig = rig(FreshnessPolicy::Change, false);

        rig.send(1);
        let first = rig.tick();
        assert_eq!(first.applied.map(|c| c.sequence), Some(1));
        assert!(first.sample.tick_gap_ms.is_none());
        let fresh = first.sample.fresh.unwrap();
        assert!(fresh.age_ms >= 10.0);
        assert!(fresh.wait_ticks >= 1);

        let idle = rig.tick();
        assert!(idle.applied.is_none());
        assert!(!idle.sample.stale);
        assert!(idle.sample.tick_gap_ms.is_some());

        rig.send(1);
        let dup = rig.tick();
        assert!(dup.applied.is_none());
        assert!(dup.sample.stale);

        rig.send(2);
        assert_eq!(rig.tick().applied.map(|c| c.sequence), Some(2));

        let j = rig.journal.lock();
        assert_eq!(j.applied.len(), 2);
        assert_eq!(j.applied[0], Control { throttle: 0.5, steer: 0.1, brake: 0.0 });
        assert_eq!(j.advances, 4);
        assert_eq!(rig.consumer.summary().stale, 1);
        assert_eq!(rig.consumer.last_applied_sequence(), Some(2));
    }

    #[test]
    fn malformed_datagrams_are_counted_not_applied() {
        let mut rig = rig(FreshnessPolicy::Change, false);
        rig.tx.send(&[0u8; 25]).unwrap();
        thread::sleep(Duration::from_millis(15));
        let out = rig.tick();
        assert_eq!(out.sample.malformed, 1);
        assert!(out.applied.is_none());
        assert!(rig.journal.lock().applied.is_empty());
    }

    #[test]
    fn advance_policy_keeps_last_applied_monotonic_across_wrap() {
        let mut rig = rig(FreshnessPolicy::Advance, false);
        let arrivals = [u32::MAX - 2, u32::MAX - 3, u32::MAX, u32::MAX - 1, 0, 1, u32::MAX, 3, 2];

        let mut applied = Vec::new();
        for seq in arrivals {
            rig.send(seq);
            if let Some(cmd) = rig.tick().applied {
                applied.push(cmd.sequence);
            }
        }

        assert_eq!(applied, vec![u32::MAX - 2, u32::MAX, 0, 1, 3]);
        for pair in applied.windows(2) {
            assert!(sequence_advanced(pair[1], pair[0]));
        }
    }

    #[test]
    fn trust_relay_applies_duplicates() {
        let mut rig = rig(FreshnessPolicy::TrustRelay, false);
        rig.send(4);
        rig.tick();
        rig.send(4);
        assert!(rig.tick().applied.is_some());
        assert_eq!(rig.journal.lock().applied.len(), 2);
    }

    #[test]
    fn sink_failure_ends_run_and_releases_sink() {
        let rig = rig(FreshnessPolicy::Change, true);
        rig.send(1);
        let journal = rig.journal.clone();
        let running = AtomicBool::new(true);

        let result = rig.consumer.run(&running, Some(Duration::from_secs(2)));
        assert!(matches!(result, Err(LinkError::Sink(_))));
        assert_eq!(journal.lock().releases, 1);
    }

    #[test]
    fn run_honours_duration_and_reports_partial_window() {
        let rig = rig(FreshnessPolicy::Change, false);
        let journal = rig.journal.clone();
        let running = AtomicBool::new(true);

        let summary = rig.consumer.run(&running, Some(Duration::from_millis(200))).unwrap();
        assert!(summary.ticks >= 10, "only {} ticks", summary.ticks);
        assert_eq!(summary.reports, 1);
        assert_eq!(journal.lock().advances as u64, summary.ticks);
        assert_eq!(journal.lock().releases, 1);
    }

    #[test]
    fn trace_records_one_event_per_tick() {
        let mut rig = rig(FreshnessPolicy::Change, false);
        let recorder = TickRecorder::with_capacity(16);
        rig.consumer = rig.consumer.with_recorder(recorder.clone());

        rig.send(9);
        rig.tick();
        rig.tick();
        assert_eq!(recorder.pending(), 2);
    }
}
