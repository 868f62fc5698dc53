//! counters.rs
//! Contention-free diagnostic counters for the relay threads.
//!
//! Each counter is an independent `AtomicU64` bumped with `Relaxed` ordering:
//! the hot paths never lock, and readers only need an approximate snapshot
//! for the periodic status line.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkCounters {
    received: AtomicU64,
    malformed: AtomicU64,
    receive_errors: AtomicU64,
    forwarded: AtomicU64,
    send_errors: AtomicU64,
    superseded: AtomicU64,
}

/// Point-in-time copy of [`LinkCounters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub receive_errors: u64,
    pub forwarded: u64,
    pub send_errors: u64,
    pub superseded: u64,
}

impl LinkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepted puts that never went downstream: overwritten before the forwarder
    /// saw them, or equal to the value already sent.
    #[inline]
    pub fn record_superseded(&self, n: u64) {
        if n > 0 {
            self.superseded.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rx={} malformed={} rx_err={} fwd={} superseded={} tx_err={}",
            self.received,
            self.malformed,
            self.receive_errors,
            self.forwarded,
            self.superseded,
            self.send_errors
        )
    }
}
