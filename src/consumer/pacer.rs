//! pacer.rs
//! Periodic release schedule for the tick loop.
//! - SpinSleeper (100 µs native accuracy, yielding spin) sleeps to the next deadline
//! - deadlines advance by exactly one period, so sleep jitter does not accumulate
//! - a tick that misses a whole period resynchronises instead of bursting to catch up

use spin_sleep::{SpinSleeper, SpinStrategy};
use std::time::{Duration, Instant};

pub struct TickPacer {
    sleeper: SpinSleeper,
    period: Duration,
    next_deadline: Instant,
    overruns: u64,
    resyncs: u64,
}

impl TickPacer {
    /// First release is one period after `start`.
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
            period,
            next_deadline: start + period,
            overruns: 0,
            resyncs: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Waits for the next release. Returns `true` if the caller was already late.
    pub fn wait(&mut self) -> bool {
        let now = Instant::now();
        let overrun = if now < self.next_deadline {
            self.sleeper.sleep(self.next_deadline - now);
            false
        } else {
            self.overruns += 1;
            true
        };

        self.next_deadline += self.period;
        if overrun && now >= self.next_deadline {
            self.next_deadline = now + self.period;
            self.resyncs += 1;
        }
        overrun
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}
