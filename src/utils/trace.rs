//! Per-tick trace recording with background CSV export.
//!
//! The tick loop pushes one [`TickEvent`] per tick into a bounded lock-free queue
//! and never waits; a background thread drains the queue into a CSV file.
//! A full queue drops the event and counts the drop; a failed write is counted
//! too and only the first one is logged.

use crossbeam_queue::ArrayQueue;
use log::{debug, error};
use serde::Serialize;
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const TRACE_QUEUE_CAPACITY: usize = 16_384;
const EXPORTER_POLL_MS: u64 = 10;
const FLUSH_BATCHES: usize = 8;

/// What a tick did with the command (if any) it drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    Applied,
    Stale,
    Idle,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TickEvent {
    pub tick: u64,
    pub tick_ns: u64,
    pub kind: TickKind,
    pub sequence: Option<u32>,
    pub age_ms: Option<f64>,
    pub adapter_us: Option<f64>,
    pub wait_ticks: Option<u32>,
    pub tick_gap_ms: Option<f64>,
    pub drained: u32,
}

struct Shared {
    queue: ArrayQueue<TickEvent>,
    dropped: AtomicU64,
    write_errors: AtomicU64,
    running: AtomicBool,
}

impl Shared {
    fn note_write_error(&self, what: &str, err: impl std::fmt::Display) {
        if self.write_errors.fetch_add(1, Ordering::Relaxed) == 0 {
            error!("[Trace] {} failed: {}; further write errors are only counted", what, err);
        }
    }
}

/// Producer side, cheap to clone.
#[derive(Clone)]
pub struct TickRecorder {
    shared: Arc<Shared>,
}

impl Default for TickRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TickRecorder {
    pub fn new() -> Self {
        Self::with_capacity(TRACE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: ArrayQueue::new(capacity.max(1)),
                dropped: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Non-blocking; drops the event if the exporter has fallen behind.
    #[inline]
    pub fn record(&self, event: TickEvent) {
        if self.shared.queue.push(event).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Rows or flushes the exporter failed to write.
    pub fn write_errors(&self) -> u64 {
        self.shared.write_errors.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Spawns the exporter thread writing to `output_csv`.
    pub fn start_exporter(&self, output_csv: PathBuf) -> TraceExporter {
        let shared = self.shared.clone();
        shared.running.store(true, Ordering::SeqCst);

        let handle = thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    shared.note_write_error(&format!("creating trace csv {:?}", output_csv), e);
                    return;
                }
            };
            let mut wtr = csv::Writer::from_writer(BufWriter::new(file));
            let mut batches = 0usize;

            while shared.running.load(Ordering::SeqCst) {
                let mut any = false;
                for _ in 0..256 {
                    match shared.queue.pop() {
                        Some(event) => {
                            any = true;
                            if let Err(e) = wtr.serialize(event) {
                                shared.note_write_error("writing trace row", e);
                            }
                        }
                        None => break,
                    }
                }
                if any {
                    batches += 1;
                    if batches >= FLUSH_BATCHES {
                        if let Err(e) = wtr.flush() {
                            shared.note_write_error("flushing trace csv", e);
                        }
                        batches = 0;
                    }
                } else {
                    thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
                }
            }

            // Final drain after stop.
            while let Some(event) = shared.queue.pop() {
                if let Err(e) = wtr.serialize(event) {
                    shared.note_write_error("writing trace row", e);
                }
            }
            if let Err(e) = wtr.flush() {
                shared.note_write_error("flushing trace csv", e);
            }
            debug!(
                "[Trace] exporter exiting. dropped_events={} write_errors={}",
                shared.dropped.load(Ordering::Relaxed),
                shared.write_errors.load(Ordering::Relaxed)
            );
        });

        TraceExporter {
            shared: self.shared.clone(),
            handle: Some(handle),
        }
    }
}

/// Owns the exporter thread; stopping (or dropping) flushes everything queued.
pub struct TraceExporter {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl TraceExporter {
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TraceExporter {
    fn drop(&mut self) {
        self.stop();
    }
}
