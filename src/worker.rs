//! Pooled-worker engine: one ephemeral background thread per prompt cycle
//! computes the status and sends exactly one message back. Keeping the pool
//! at a single job makes the serialization invariant hold by construction.

use crate::engine::StatusFn;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

/// Handle the foreground polls for the worker's single result.
pub struct StatusJob {
    pub receiver: Receiver<String>,
    pub handle: Option<JoinHandle<()>>,
}

/// Probe whether the pooled-worker mechanism is usable at all: bring up a
/// named no-op worker and tear it straight down.
pub fn probe_spawn() -> bool {
    thread::Builder::new()
        .name("promptline-probe".to_string())
        .spawn(|| {})
        .map(|handle| handle.join().is_ok())
        .unwrap_or(false)
}

/// Spawn a worker thread that computes the status and reports once.
pub fn start_status_job(status_fn: StatusFn) -> StatusJob {
    let (tx, rx) = bounded(1);
    let handle = thread::spawn(move || {
        // Do the expensive work off the foreground and send back one message.
        // The send fails when the job has been superseded; the thread just
        // exits and the stale result never reaches the status slot.
        let status = status_fn();
        let _ = tx.send(status);
    });
    StatusJob {
        receiver: rx,
        handle: Some(handle),
    }
}

/// Engine state: at most one live job, replaced wholesale on dispatch.
#[derive(Default)]
pub struct WorkerEngine {
    job: Option<StatusJob>,
}

impl WorkerEngine {
    /// Start this cycle's job. A still-running predecessor is superseded by
    /// dropping its receiver; its worker winds down on its own.
    pub fn dispatch(&mut self, status_fn: StatusFn) {
        self.job = Some(start_status_job(status_fn));
    }

    /// Check the worker channel without blocking the foreground. Returns the
    /// computed status once, then tears the worker down.
    pub fn poll(&mut self) -> Option<String> {
        let job = self.job.as_mut()?;
        match job.receiver.try_recv() {
            Ok(status) => {
                // Join once the message is in: the thread is past its send.
                if let Some(handle) = job.handle.take() {
                    let _ = handle.join();
                }
                self.job = None;
                Some(status)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.job = None;
                // A dead worker means no answer; the prompt shows no status.
                Some(String::new())
            }
        }
    }

    pub fn has_active_job(&self) -> bool {
        self.job.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn poll_until(engine: &mut WorkerEngine, limit: Duration) -> Option<String> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if let Some(status) = engine.poll() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn probe_spawn_succeeds_on_a_healthy_host() {
        assert!(probe_spawn());
    }

    #[test]
    fn job_result_reaches_the_poller() {
        let mut engine = WorkerEngine::default();
        engine.dispatch(Arc::new(|| " (main)".to_string()));
        let status = poll_until(&mut engine, Duration::from_secs(2));
        assert_eq!(status.as_deref(), Some(" (main)"));
        assert!(!engine.has_active_job(), "job must be torn down after poll");
    }

    #[test]
    fn poll_without_a_job_is_quiet() {
        let mut engine = WorkerEngine::default();
        assert_eq!(engine.poll(), None);
    }

    #[test]
    fn superseded_job_never_delivers() {
        let mut engine = WorkerEngine::default();
        engine.dispatch(Arc::new(|| {
            thread::sleep(Duration::from_millis(200));
            "stale".to_string()
        }));
        engine.dispatch(Arc::new(|| "fresh".to_string()));
        let status = poll_until(&mut engine, Duration::from_secs(2));
        assert_eq!(status.as_deref(), Some("fresh"));
        // The superseded worker's late send lands in a dropped channel.
        thread::sleep(Duration::from_millis(250));
        assert_eq!(engine.poll(), None);
    }

    #[test]
    fn panicking_worker_reports_an_empty_status() {
        let mut engine = WorkerEngine::default();
        engine.dispatch(Arc::new(|| panic!("worker blew up")));
        let status = poll_until(&mut engine, Duration::from_secs(2));
        assert_eq!(status.as_deref(), Some(""));
        assert!(!engine.has_active_job());
    }
}
