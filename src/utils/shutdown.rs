//! Process interrupt handling.
//!
//! A helper thread runs a tiny current-thread tokio runtime that waits for
//! Ctrl+C and clears the shared running flag; the worker loops observe the flag
//! and unwind normally, so scoped resources (the actuation sink) are released.

use log::{error, info, warn};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Spawns the interrupt watcher. The returned handle may be ignored; the thread
/// lives until the first interrupt.
pub fn install_ctrl_c(running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ssb-signal".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("failed to build signal runtime: {}", e);
                    return;
                }
            };
            let interrupted = rt.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("failed to listen for ctrl-c: {}", e);
                        false
                    }
                }
            });
            if interrupted {
                info!("interrupt received, shutting down");
                running.store(false, Ordering::Release);
            }
        })
}

/// Sleeps in short slices until `running` clears or `limit` elapses.
/// Returns `true` if stopped by the flag.
pub fn wait_while_running(running: &AtomicBool, limit: Option<Duration>, slice: Duration) -> bool {
    let start = Instant::now();
    while running.load(Ordering::Acquire) {
        if let Some(limit) = limit {
            if start.elapsed() >= limit {
                return false;
            }
        }
        thread::sleep(slice);
    }
    true
}
