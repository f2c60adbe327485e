use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};

use crate::logging::CORE_TARGET;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    /// `f64` seconds stored as bits.
    elapsed: AtomicU64,
}

/// Application lifetime clock.
///
/// A background thread polls a monotonic clock and publishes the elapsed
/// seconds, readable from any thread through `elapsed()`. The thread does
/// nothing else; it never touches GPU state.
#[derive(Debug)]
pub struct LifetimeTimer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl LifetimeTimer {
    pub fn start() -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            elapsed: AtomicU64::new(0f64.to_bits()),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("seacrest-timer".into())
            .spawn(move || {
                let start = Instant::now();
                while worker.running.load(Ordering::Acquire) {
                    let secs = start.elapsed().as_secs_f64();
                    worker.elapsed.store(secs.to_bits(), Ordering::Release);
                    thread::sleep(POLL_INTERVAL);
                }
                log::info!(target: CORE_TARGET, "timer thread shutting down");
            })
            .context("failed to spawn timer thread")?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Seconds since `start`, as of the last poll.
    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.shared.elapsed.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the thread, joins it and returns the final elapsed time.
    ///
    /// Calling it again returns the same value.
    pub fn stop(&mut self) -> anyhow::Result<f64> {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("timer thread panicked"))?;
        }
        Ok(self.elapsed())
    }
}

impl Drop for LifetimeTimer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!(target: CORE_TARGET, "{e:#}");
        }
    }
}

/// Writes `Elapsed Time: <secs>` to `path`, replacing its contents.
pub fn write_elapsed(path: &Path, secs: f64) -> anyhow::Result<()> {
    log::info!(target: CORE_TARGET, "writing elapsed time to {}", path.display());
    std::fs::write(path, format!("Elapsed Time: {secs}"))
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_advances_while_running() {
        let mut timer = LifetimeTimer::start().unwrap();
        thread::sleep(Duration::from_millis(30));
        let secs = timer.stop().unwrap();
        assert!(secs > 0.0);
        assert!(!timer.is_running());
    }

    #[test]
    fn elapsed_is_frozen_after_stop() {
        let mut timer = LifetimeTimer::start().unwrap();
        thread::sleep(Duration::from_millis(5));
        let first = timer.stop().unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.stop().unwrap(), first);
    }

    #[test]
    fn elapsed_file_has_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifetime.txt");
        write_elapsed(&path, 1.5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Elapsed Time: 1.5");
    }
}
