//! mailbox.rs
//! Single-slot holder of "the most recent command" between the ingress thread
//! (only writer) and the egress forwarder (only reader).
//!
//! - Writes are total overwrites: no queueing, superseded values are simply gone.
//! - The slot is an `AtomicCell` (seqlock-backed for a 24-byte record), so a reader
//!   sees either the previous or the latest complete command, never a torn mix.
//! - `get()` touches only the cell; the parking_lot mutex/condvar pair exists
//!   solely for the edge-triggered "changed" wake-up used by the forwarder.
//! - The writer/reader split is enforced by types: neither half is `Clone`.

use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::relay::command::Command;

struct Slot {
    /// Latest command tagged with the version it was put at.
    latest: AtomicCell<Option<(u64, Command)>>,
    version: AtomicU64,
    closed: AtomicBool,
    signal: Mutex<()>,
    changed: Condvar,
}

/// Creates an empty mailbox and returns its two halves.
pub fn mailbox() -> (MailboxWriter, MailboxReader) {
    let slot = Arc::new(Slot {
        latest: AtomicCell::new(None),
        version: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        signal: Mutex::new(()),
        changed: Condvar::new(),
    });
    (
        MailboxWriter { slot: slot.clone() },
        MailboxReader { slot },
    )
}

/// Writing half. Dropping it closes the mailbox and wakes the reader.
pub struct MailboxWriter {
    slot: Arc<Slot>,
}

impl MailboxWriter {
    /// Replaces the held command unconditionally.
    pub fn put(&mut self, cmd: Command) {
        // Single writer: nobody else moves the version between the load and the store.
        let version = self.slot.version.load(Ordering::Relaxed) + 1;
        self.slot.latest.store(Some((version, cmd)));
        self.slot.version.store(version, Ordering::Release);

        // Notify under the lock so a reader between its version check and wait() can't miss it.
        let _guard = self.slot.signal.lock();
        self.slot.changed.notify_all();
    }

    pub fn close(&self) {
        self.slot.closed.store(true, Ordering::Release);
        let _guard = self.slot.signal.lock();
        self.slot.changed.notify_all();
    }
}

impl Drop for MailboxWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading half.
pub struct MailboxReader {
    slot: Arc<Slot>,
}

impl MailboxReader {
    /// Most recently put command, or `None` before the first put. Never waits for a put.
    #[inline]
    pub fn get(&self) -> Option<Command> {
        self.slot.latest.load().map(|(_, cmd)| cmd)
    }

    /// Like [`get`](Self::get), paired with the version that put it.
    #[inline]
    pub fn get_versioned(&self) -> Option<(u64, Command)> {
        self.slot.latest.load()
    }

    /// Number of puts so far.
    #[inline]
    pub fn version(&self) -> u64 {
        self.slot.version.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.slot.closed.load(Ordering::Acquire)
    }

    /// Blocks until the version moves past `seen`, the mailbox closes, or `timeout` elapses.
    /// Returns the version observed on wake.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let current = self.version();
        if current != seen || self.is_closed() {
            return current;
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.signal.lock();
        while self.version() == seen && !self.is_closed() {
            if self.slot.changed.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.version()
    }
}
