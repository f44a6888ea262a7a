//! Per-cycle status engine: the session context that owns the status slot,
//! dispatches whichever strategy the prober selected, and hands results to
//! the prompt. The foreground is single-threaded and cooperative, so the
//! slot has exactly one writer at a time by construction.

use crate::notify::SignalEngine;
use crate::probe::Strategy;
use crate::worker::WorkerEngine;
use anyhow::Result;
use std::sync::Arc;

/// The status computation, shared with worker threads.
pub type StatusFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Session context driving one status field across prompt cycles.
pub struct CycleController {
    strategy: Strategy,
    slot: String,
    redraw: bool,
    worker: WorkerEngine,
    signal: Option<SignalEngine>,
    status_fn: StatusFn,
    verbose: bool,
    downgrade_reported: bool,
}

impl CycleController {
    /// Build the controller for the selected strategy. Signal-based setup
    /// can fail (handler install, locating the binary); the caller decides
    /// whether to fall back.
    pub fn new(strategy: Strategy, status_fn: StatusFn, verbose: bool) -> Result<Self> {
        let signal = if strategy == Strategy::SignalBased {
            Some(SignalEngine::with_default_probe()?)
        } else {
            None
        };
        Ok(Self::assemble(strategy, signal, status_fn, verbose))
    }

    /// Controller wired to an explicit signal engine.
    #[cfg(test)]
    pub(crate) fn with_signal_engine(
        engine: SignalEngine,
        status_fn: StatusFn,
        verbose: bool,
    ) -> Self {
        Self::assemble(Strategy::SignalBased, Some(engine), status_fn, verbose)
    }

    fn assemble(
        strategy: Strategy,
        signal: Option<SignalEngine>,
        status_fn: StatusFn,
        verbose: bool,
    ) -> Self {
        Self {
            strategy,
            slot: String::new(),
            redraw: false,
            worker: WorkerEngine::default(),
            signal,
            status_fn,
            verbose,
            downgrade_reported: false,
        }
    }

    /// Pre-render hook: runs once before each prompt is composed. Clears the
    /// slot so a slow job shows "no status" rather than last cycle's value,
    /// then dispatches the active strategy.
    pub fn on_pre_render(&mut self) {
        self.slot.clear();
        match self.strategy {
            Strategy::Disabled => {}
            Strategy::Synchronous => {
                self.slot = (self.status_fn)();
            }
            Strategy::PooledWorker => {
                self.worker.dispatch(self.status_fn.clone());
            }
            Strategy::SignalBased => self.dispatch_signal(),
        }
    }

    fn dispatch_signal(&mut self) {
        let owned = self
            .signal
            .as_ref()
            .map(SignalEngine::channel_owned)
            .unwrap_or(false);
        if !owned {
            // Something else claimed the notification channel after setup.
            // Latency behavior changes, so this one is reported loudly.
            self.downgrade("notification channel taken over", true);
            self.slot = (self.status_fn)();
            return;
        }
        let dispatched = self.signal.as_mut().map(SignalEngine::dispatch);
        if let Some(Err(err)) = dispatched {
            self.downgrade(&format!("status probe failed to start: {err:#}"), false);
            self.slot = (self.status_fn)();
        }
    }

    /// Permanent fallback to synchronous dispatch for the rest of the
    /// session. The signal engine is kept so a job already in flight can
    /// still deliver its result.
    fn downgrade(&mut self, reason: &str, user_visible: bool) {
        self.strategy = Strategy::Synchronous;
        crate::log_debug(&format!("status engine downgraded: {reason}"));
        if self.downgrade_reported {
            return;
        }
        self.downgrade_reported = true;
        if user_visible || self.verbose {
            eprintln!("promptline: {reason}; status updates are synchronous from now on");
        }
    }

    /// Drain async results at the foreground's safe point. Returns whether
    /// the prompt should be redrawn, clearing the request either way.
    pub fn poll(&mut self) -> bool {
        if let Some(status) = self.worker.poll() {
            self.slot = status;
            self.request_redraw();
        }
        // Drained even after a downgrade: a job dispatched before the
        // downgrade still gets its result honored.
        if let Some(engine) = self.signal.as_mut() {
            engine.reap();
            if let Some(status) = engine.poll() {
                self.slot = status;
                self.request_redraw();
            }
        }
        self.take_redraw_request()
    }

    /// Last computed status; empty means "no status yet" or "outside a
    /// tracked context".
    pub fn status(&self) -> &str {
        &self.slot
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Idempotent within a cycle: the request is a latch, not a counter.
    pub fn request_redraw(&mut self) {
        self.redraw = true;
    }

    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }
}


#[cfg(all(test, unix))]
mod signal_tests {
    use super::*;
    use crate::notify::{self, ProbeCommand, SignalEngine};
    use std::ffi::OsString;
    use std::process;
    use std::thread;
    use std::time::{Duration, Instant};

    fn shell_probe(script: String) -> ProbeCommand {
        ProbeCommand {
            program: OsString::from("sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
        }
    }

    fn wait_for_status(controller: &mut CycleController, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if controller.poll() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn hijacked_channel_downgrades_permanently_but_honors_late_results() {
        let _guard = crate::notify::test_support::signal_test_lock()
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let handoff = dir.path().join("handoff");
        let late = format!(
            "sleep 0.3; printf late > {}; kill -USR1 {}",
            handoff.display(),
            process::id()
        );
        let engine =
            SignalEngine::new(shell_probe(late), handoff.clone()).expect("engine setup");
        let mut controller =
            CycleController::with_signal_engine(engine, Arc::new(|| "sync".to_string()), false);

        // Cycle with the channel intact: job goes out asynchronously.
        controller.on_pre_render();
        assert_eq!(controller.strategy(), Strategy::SignalBased);
        assert_eq!(controller.status(), "");

        // The channel is taken over while the job is still in flight. The
        // stand-in handler keeps notifications observable so the late result
        // can still land.
        unsafe {
            libc::signal(
                libc::SIGUSR1,
                crate::notify::test_support::foreign_handler as usize,
            );
        }

        // Next cycle detects the hijack and computes inline.
        controller.on_pre_render();
        assert_eq!(controller.strategy(), Strategy::Synchronous);
        assert_eq!(controller.status(), "sync");

        // The pre-downgrade job completes late and is still honored.
        assert!(wait_for_status(&mut controller, Duration::from_secs(5)));
        assert_eq!(controller.status(), "late");

        // Downgrade is monotonic: every later cycle stays synchronous.
        controller.on_pre_render();
        assert_eq!(controller.strategy(), Strategy::Synchronous);
        assert_eq!(controller.status(), "sync");

        notify::install_notify_handler().expect("restore handler for other tests");
    }

    #[test]
    fn failing_probe_spawn_downgrades_quietly() {
        let _guard = crate::notify::test_support::signal_test_lock()
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let probe = ProbeCommand {
            program: OsString::from("/nonexistent/promptline-probe"),
            args: Vec::new(),
        };
        let engine = SignalEngine::new(probe, dir.path().join("handoff")).expect("engine setup");
        let mut controller =
            CycleController::with_signal_engine(engine, Arc::new(|| "sync".to_string()), false);
        controller.on_pre_render();
        assert_eq!(controller.strategy(), Strategy::Synchronous);
        assert_eq!(controller.status(), "sync");
    }
}
