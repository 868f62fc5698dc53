//! Windowed latency/jitter aggregation for the consumer tick loop.
//!
//! Every tick feeds one [`TickSample`]. Samples accumulate for a fixed wall-clock
//! window; when the window expires a [`WindowReport`] is produced and every buffer
//! and counter is reset, so nothing leaks across window boundaries.
//!
//! Percentiles use nearest-rank without interpolation: sort ascending, take
//! index `floor(n * p / 100)` clamped to `[0, n-1]`.

use std::time::{Duration, Instant};

/// Upper bound on per-window buffer pre-allocation; longer windows grow on demand.
pub const MAX_PREALLOCATED_SAMPLES: usize = 65_536;

/// Timing recorded for a tick that applied a fresh command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshSample {
    /// Tick time minus the command's `sent_at_ns`.
    pub age_ms: f64,
    /// Time spent inside the sink's apply call.
    pub adapter_us: f64,
    /// `ceil(age_ms / tick_period_ms)`, a backlog proxy.
    pub wait_ticks: u32,
}

/// Everything the tick loop observed during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickSample {
    pub fresh: Option<FreshSample>,
    /// Gap since the previous tick started; `None` on the very first tick.
    pub tick_gap_ms: Option<f64>,
    pub drained: u32,
    pub malformed: u32,
    /// A command was drained but rejected by the freshness policy.
    pub stale: bool,
    /// The tick started after its scheduled deadline.
    pub overrun: bool,
}

/// Nearest-rank percentile over an ascending slice.
pub fn percentile<T: Copy>(sorted: &[T], p: f64) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let idx = ((n as f64) * p / 100.0).floor();
    let idx = if idx < 0.0 { 0 } else { (idx as usize).min(n - 1) };
    Some(sorted[idx])
}

/// Backlog-in-ticks for a command of the given age.
#[inline]
pub fn wait_ticks(age_ms: f64, tick_period_ms: f64) -> u32 {
    if tick_period_ms <= 0.0 || age_ms <= 0.0 {
        return 0;
    }
    (age_ms / tick_period_ms).ceil().min(u32::MAX as f64) as u32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

impl Percentiles {
    /// Sorts `samples` in place and summarises them; `None` when empty.
    pub fn from_samples(samples: &mut [f64]) -> Option<Self> {
        samples.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            p50: percentile(samples, 50.0)?,
            p95: percentile(samples, 95.0)?,
            max: *samples.last()?,
        })
    }
}

/// Summary emitted at each window boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub tick_hz: f64,
    pub window_secs: f64,
    pub ticks: u64,
    pub fresh: u64,
    pub achieved_hz: f64,
    pub fresh_pct: f64,
    pub age_ms: Option<Percentiles>,
    pub adapter_us: Option<Percentiles>,
    pub max_wait_ticks: Option<u32>,
    pub max_tick_gap_ms: f64,
    pub drained: u64,
    pub malformed: u64,
    pub stale: u64,
    pub overruns: u64,
}

pub struct WindowedMetrics {
    tick_hz: f64,
    window: Duration,
    window_start: Instant,

    ticks: u64,
    fresh: u64,
    ages_ms: Vec<f64>,
    adapter_us: Vec<f64>,
    wait_ticks: Vec<u32>,
    max_tick_gap_ms: f64,

    drained: u64,
    malformed: u64,
    stale: u64,
    overruns: u64,
}

impl WindowedMetrics {
    pub fn new(tick_hz: f64, window: Duration, now: Instant) -> Self {
        // One slot per tick is the most a window can ever hold.
        let ticks = (tick_hz * window.as_secs_f64()).ceil();
        let capacity = if ticks.is_finite() {
            (ticks.max(1.0) as usize).min(MAX_PREALLOCATED_SAMPLES)
        } else {
            MAX_PREALLOCATED_SAMPLES
        };
        Self {
            tick_hz,
            window,
            window_start: now,
            ticks: 0,
            fresh: 0,
            ages_ms: Vec::with_capacity(capacity),
            adapter_us: Vec::with_capacity(capacity),
            wait_ticks: Vec::with_capacity(capacity),
            max_tick_gap_ms: 0.0,
            drained: 0,
            malformed: 0,
            stale: 0,
            overruns: 0,
        }
    }

    pub fn record_tick(&mut self, sample: &TickSample) {
        self.ticks += 1;
        self.drained += u64::from(sample.drained);
        self.malformed += u64::from(sample.malformed);
        if sample.stale {
            self.stale += 1;
        }
        if sample.overrun {
            self.overruns += 1;
        }
        if let Some(gap) = sample.tick_gap_ms {
            self.max_tick_gap_ms = self.max_tick_gap_ms.max(gap);
        }
        if let Some(f) = sample.fresh {
            self.fresh += 1;
            self.ages_ms.push(f.age_ms);
            self.adapter_us.push(f.adapter_us);
            self.wait_ticks.push(f.wait_ticks);
        }
    }

    /// Number of fresh samples held in the current window.
    pub fn sample_count(&self) -> usize {
        self.ages_ms.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Emits and resets if the window has expired at `now`.
    pub fn maybe_report(&mut self, now: Instant) -> Option<WindowReport> {
        if now.saturating_duration_since(self.window_start) >= self.window {
            Some(self.report(now))
        } else {
            None
        }
    }

    /// Emits the current (possibly partial) window and starts a new one at `now`.
    pub fn report(&mut self, now: Instant) -> WindowReport {
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        let achieved_hz = if elapsed > 0.0 { self.ticks as f64 / elapsed } else { 0.0 };

        let report = WindowReport {
            tick_hz: self.tick_hz,
            window_secs: elapsed,
            ticks: self.ticks,
            fresh: self.fresh,
            achieved_hz,
            fresh_pct: 100.0 * self.fresh as f64 / self.ticks.max(1) as f64,
            age_ms: Percentiles::from_samples(&mut self.ages_ms),
            adapter_us: Percentiles::from_samples(&mut self.adapter_us),
            max_wait_ticks: self.wait_ticks.iter().copied().max(),
            max_tick_gap_ms: self.max_tick_gap_ms,
            drained: self.drained,
            malformed: self.malformed,
            stale: self.stale,
            overruns: self.overruns,
        };

        self.reset(now);
        report
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.ticks = 0;
        self.fresh = 0;
        self.ages_ms.clear();
        self.adapter_us.clear();
        self.wait_ticks.clear();
        self.max_tick_gap_ms = 0.0;
        self.drained = 0;
        self.malformed = 0;
        self.stale = 0;
        self.overruns = 0;
    }
}

impl std::fmt::Display for WindowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.0}Hz][{:.1}s] tick={:.1}Hz fresh={:.1}% | ",
            self.tick_hz, self.window_secs, self.achieved_hz, self.fresh_pct
        )?;
        match self.age_ms {
            Some(a) => write!(f, "age_ms p50={:.1} p95={:.1} max={:.1} | ", a.p50, a.p95, a.max)?,
            None => write!(f, "age_ms n/a | ")?,
        }
        match self.adapter_us {
            Some(a) => write!(f, "adapter_us p95={:.0} max={:.0} | ", a.p95, a.max)?,
            None => write!(f, "adapter_us n/a | ")?,
        }
        match self.max_wait_ticks {
            Some(w) => write!(f, "max_wait={} | ", w)?,
            None => write!(f, "max_wait=n/a | ")?,
        }
        write!(
            f,
            "max_tick_gap_ms={:.1} | drained={} malformed={} stale={} overruns={}",
            self.max_tick_gap_ms, self.drained, self.malformed, self.stale, self.overruns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(age_ms: f64, adapter_us: f64) -> TickSample {
        TickSample {
            fresh: Some(FreshSample { age_ms, adapter_us, wait_ticks: wait_ticks(age_ms, 10.0) }),
            tick_gap_ms: Some(10.0),
            drained: 1,
            ..TickSample::default()
        }
    }

    #[test]
    fn nearest_rank_percentiles() {
        let samples = [10, 20, 30, 40, 50];
        assert_eq!(percentile(&samples, 50.0), Some(30));
        assert_eq!(percentile(&samples, 95.0), Some(50));
        assert_eq!(percentile(&samples, 0.0), Some(10));
        assert_eq!(percentile(&samples, 100.0), Some(50));
        assert_eq!(percentile::<u32>(&[], 50.0), None);
        assert_eq!(percentile(&[7.5], 95.0), Some(7.5));
    }

    #[test]
    fn percentiles_sort_unordered_input() {
        let mut samples = vec![50.0, 10.0, 40.0, 20.0, 30.0];
        let p = Percentiles::from_samples(&mut samples).unwrap();
        assert_eq!(p, Percentiles { p50: 30.0, p95: 50.0, max: 50.0 });
        assert!(Percentiles::from_samples(&mut []).is_none());
    }

    #[test]
    fn wait_ticks_is_ceiling_of_age_over_period() {
        assert_eq!(wait_ticks(0.0, 10.0), 0);
        assert_eq!(wait_ticks(0.1, 10.0), 1);
        assert_eq!(wait_ticks(10.0, 10.0), 1);
        assert_eq!(wait_ticks(10.01, 10.0), 2);
        assert_eq!(wait_ticks(25.0, 10.0), 3);
    }

    #[test]
    fn no_report_before_window_expires() {
        let t0 = Instant::now();
        let mut m = WindowedMetrics::new(100.0, Duration::from_secs(5), t0);
        m.record_tick(&fresh(5.0, 20.0));
        assert!(m.maybe_report(t0 + Duration::from_secs(4)).is_none());
        assert_eq!(m.sample_count(), 1);
    }

    #[test]
    fn report_summarises_window() {
        let t0 = Instant::now();
        let mut m = WindowedMetrics::new(100.0, Duration::from_secs(5), t0);

        for (age, adapter) in [(10.0, 1.0), (20.0, 2.0), (30.0, 3.0), (40.0, 4.0), (50.0, 5.0)] {
            m.record_tick(&fresh(age, adapter));
        }
        for _ in 0..5 {
            m.record_tick(&TickSample { tick_gap_ms: Some(12.5), stale: true, drained: 1, ..TickSample::default() });
        }

        let r = m.maybe_report(t0 + Duration::from_secs(5)).expect("window expired");
        assert_eq!(r.ticks, 10);
        assert_eq!(r.fresh, 5);
        assert!((r.fresh_pct - 50.0).abs() < 1e-9);
        assert!((r.achieved_hz - 2.0).abs() < 1e-9);
        assert_eq!(r.age_ms, Some(Percentiles { p50: 30.0, p95: 50.0, max: 50.0 }));
        assert_eq!(r.adapter_us.map(|p| p.p95), Some(5.0));
        assert_eq!(r.max_wait_ticks, Some(5));
        assert_eq!(r.max_tick_gap_ms, 12.5);
        assert_eq!(r.drained, 10);
        assert_eq!(r.stale, 5);
    }

    #[test]
    fn window_resets_after_report() {
        let t0 = Instant::now();
        let mut m = WindowedMetrics::new(100.0, Duration::from_secs(1), t0);
        for _ in 0..3 {
            m.record_tick(&fresh(15.0, 2.0));
        }
        let t1 = t0 + Duration::from_secs(1);
        assert!(m.maybe_report(t1).is_some());
        assert_eq!(m.sample_count(), 0);
        assert_eq!(m.ticks(), 0);

        m.record_tick(&fresh(3.0, 1.0));
        assert_eq!(m.sample_count(), 1);

        let r = m.maybe_report(t1 + Duration::from_secs(1)).unwrap();
        assert_eq!(r.ticks, 1);
        assert_eq!(r.age_ms.map(|p| p.max), Some(3.0));
        assert_eq!(r.max_wait_ticks, Some(1));
        assert_eq!(r.max_tick_gap_ms, 10.0);
    }

    #[test]
    fn empty_window_reports_without_percentiles() {
        let t0 = Instant::now();
        let mut m = WindowedMetrics::new(100.0, Duration::from_secs(1), t0);
        m.record_tick(&TickSample::default());
        let r = m.report(t0 + Duration::from_secs(1));
        assert_eq!(r.fresh_pct, 0.0);
        assert!(r.age_ms.is_none());
        assert!(r.max_wait_ticks.is_none());
        assert!(r.to_string().contains("age_ms n/a"));
    }

    #[test]
    fn preallocation_is_bounded_for_huge_windows() {
        let m = WindowedMetrics::new(1e12, Duration::from_secs(3600), Instant::now());
        assert!(m.ages_ms.capacity() <= MAX_PREALLOCATED_SAMPLES);
        assert!(m.wait_ticks.capacity() <= MAX_PREALLOCATED_SAMPLES);

        let small = WindowedMetrics::new(100.0, Duration::from_secs(1), Instant::now());
        assert!(small.ages_ms.capacity() >= 100);
    }
}
