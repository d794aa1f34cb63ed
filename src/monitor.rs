//! Background status monitor: a worker thread that periodically snapshots
//! capture status and hands it to a caller-supplied callback.

use crate::status::{CaptureStatus, StatusHandle};
use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Periodically pushes [`CaptureStatus`] snapshots to a callback from a
/// dedicated thread. UI layers poll nothing; they subscribe once.
///
/// `stop()` (and `Drop`) joins the worker, so no callback runs after
/// either returns.
pub struct StatusMonitor {
    worker: Option<Worker>,
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self { worker: None }
    }

    /// Spawn the monitor thread. Starting an already-running monitor is a
    /// no-op; the original interval and callback stay in place.
    pub fn start<F>(&mut self, interval: Duration, status: StatusHandle, mut callback: F)
    where
        F: FnMut(CaptureStatus) + Send + 'static,
    {
        if self.worker.is_some() {
            debug!("status monitor already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "status monitor started");
            // recv_timeout doubles as the tick: a shutdown message (or a
            // dropped sender) ends the loop, a timeout emits a snapshot.
            while shutdown_rx.recv_timeout(interval).is_err() {
                callback(status.snapshot());
            }
            debug!("status monitor stopped");
        });

        self.worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker and wait for it to exit. Safe to call when the
    /// monitor was never started.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            if worker.handle.join().is_err() {
                warn!("status monitor thread panicked");
            }
        }
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn delivers_snapshots_until_stopped() {
        let status = StatusHandle::new();
        status.update(|s| s.is_listening = true);

        let ticks = Arc::new(AtomicUsize::new(0));
        let seen_listening = Arc::new(AtomicUsize::new(0));
        let ticks_cb = ticks.clone();
        let listening_cb = seen_listening.clone();

        let mut monitor = StatusMonitor::new();
        monitor.start(Duration::from_millis(5), status, move |snapshot| {
            ticks_cb.fetch_add(1, Ordering::SeqCst);
            if snapshot.is_listening {
                listening_cb.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(monitor.is_running());

        std::thread::sleep(Duration::from_millis(60));
        monitor.stop();
        assert!(!monitor.is_running());

        let delivered = ticks.load(Ordering::SeqCst);
        assert!(delivered > 0, "monitor never ticked");
        assert_eq!(delivered, seen_listening.load(Ordering::SeqCst));
    }

    #[test]
    fn no_callback_runs_after_stop_returns() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_cb = ticks.clone();

        let mut monitor = StatusMonitor::new();
        monitor.start(Duration::from_millis(1), StatusHandle::new(), move |_| {
            ticks_cb.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(20));
        monitor.stop();

        let after_stop = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_cb = first.clone();
        let second_cb = second.clone();

        let mut monitor = StatusMonitor::new();
        monitor.start(Duration::from_millis(5), StatusHandle::new(), move |_| {
            first_cb.fetch_add(1, Ordering::SeqCst);
        });
        monitor.start(Duration::from_millis(5), StatusHandle::new(), move |_| {
            second_cb.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(40));
        monitor.stop();

        assert!(first.load(Ordering::SeqCst) > 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_without_start_is_safe() {
        let mut monitor = StatusMonitor::new();
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
