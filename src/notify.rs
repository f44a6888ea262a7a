//! Signal-based engine: a throwaway child process computes the status, writes
//! it to a per-process handoff file, and raises SIGUSR1 at the parent. The
//! handler only flips an atomic flag; the foreground consumes the flag at its
//! poll point, reads the handoff, and requests a redraw.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::{env, process};

#[cfg(unix)]
use std::{io, mem, ptr};

static NOTIFY_PENDING: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn notify_handler(_signo: libc::c_int) {
    // Async-signal-safe: a single atomic store, nothing else.
    NOTIFY_PENDING.store(true, Ordering::SeqCst);
}

/// Consume a pending notification, if any.
pub fn take_notification() -> bool {
    NOTIFY_PENDING.swap(false, Ordering::SeqCst)
}

#[cfg(unix)]
fn current_handler() -> libc::sighandler_t {
    unsafe {
        let mut current: libc::sigaction = mem::zeroed();
        if libc::sigaction(libc::SIGUSR1, ptr::null(), &mut current) != 0 {
            return libc::SIG_ERR;
        }
        current.sa_sigaction
    }
}

/// Install our SIGUSR1 handler. SA_RESTART keeps interrupted reads in the
/// foreground loop from surfacing as spurious errors.
#[cfg(unix)]
pub fn install_notify_handler() -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = notify_handler as usize;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGUSR1, &action, ptr::null_mut()) != 0 {
            anyhow::bail!(
                "sigaction(SIGUSR1) failed: {}",
                io::Error::last_os_error()
            );
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_notify_handler() -> Result<()> {
    anyhow::bail!("signal notifications are unsupported on this platform");
}

/// Conflict marker: is the installed SIGUSR1 handler still ours?
#[cfg(unix)]
pub fn handler_currently_ours() -> bool {
    current_handler() == notify_handler as usize
}

#[cfg(not(unix))]
pub fn handler_currently_ours() -> bool {
    false
}

/// Startup probe: has something else already claimed SIGUSR1?
#[cfg(unix)]
pub fn foreign_handler_installed() -> bool {
    let handler = current_handler();
    handler != libc::SIG_DFL
        && handler != libc::SIG_IGN
        && handler != libc::SIG_ERR
        && handler != notify_handler as usize
}

#[cfg(not(unix))]
pub fn foreign_handler_installed() -> bool {
    false
}

/// Raise the completion notification at `pid`. Used by the status probe
/// child; failure means the parent is already gone, which is fine.
pub fn send_notify(pid: i32) {
    #[cfg(unix)]
    unsafe {
        if libc::kill(pid, libc::SIGUSR1) != 0 {
            crate::log_debug(&format!(
                "notify: SIGUSR1 to {pid} failed: {}",
                io::Error::last_os_error()
            ));
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Request termination of a superseded probe child. A target that already
/// exited naturally makes this fail; that is expected and not surfaced.
fn send_term(pid: u32) {
    #[cfg(unix)]
    unsafe {
        if libc::kill(pid as i32, libc::SIGTERM) != 0 {
            crate::log_debug(&format!("notify: SIGTERM to stale probe {pid} failed"));
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Handoff file scoped to this process, so concurrent sessions never collide.
pub fn default_handoff_path() -> PathBuf {
    env::temp_dir().join(format!("promptline-status-{}.tmp", process::id()))
}

/// Command line used to spawn one probe child.
#[derive(Debug, Clone)]
pub struct ProbeCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

/// Re-invoke this binary in its hidden probe mode against `handoff`.
pub fn default_probe_command(handoff: &Path) -> Result<ProbeCommand> {
    let exe = env::current_exe().context("locate promptline binary for the status probe")?;
    let args = vec![
        OsString::from("--status-probe"),
        OsString::from("--handoff"),
        handoff.as_os_str().to_os_string(),
        OsString::from("--notify-pid"),
        OsString::from(process::id().to_string()),
    ];
    Ok(ProbeCommand {
        program: exe.into_os_string(),
        args,
    })
}

/// Engine state: the outstanding probe child plus terminated-but-unreaped
/// predecessors awaiting a non-blocking wait.
pub struct SignalEngine {
    probe: ProbeCommand,
    handoff: PathBuf,
    outstanding: Option<Child>,
    graveyard: Vec<Child>,
}

impl SignalEngine {
    /// Install the notification handler and set up the engine.
    pub fn new(probe: ProbeCommand, handoff: PathBuf) -> Result<Self> {
        install_notify_handler()?;
        Ok(Self {
            probe,
            handoff,
            outstanding: None,
            graveyard: Vec::new(),
        })
    }

    /// Engine wired to re-invoke the current binary.
    pub fn with_default_probe() -> Result<Self> {
        let handoff = default_handoff_path();
        let probe = default_probe_command(&handoff)?;
        Self::new(probe, handoff)
    }

    /// Conflict marker check; the controller downgrades when this fails.
    pub fn channel_owned(&self) -> bool {
        handler_currently_ours()
    }

    /// Launch this cycle's probe child, superseding any predecessor first so
    /// at most one job is ever in flight.
    pub fn dispatch(&mut self) -> Result<()> {
        self.cancel_outstanding();
        // A notification still pending here belongs to the superseded job;
        // its artifact is stale by definition.
        take_notification();
        let child = Command::new(&self.probe.program)
            .args(&self.probe.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn status probe")?;
        self.outstanding = Some(child);
        Ok(())
    }

    fn cancel_outstanding(&mut self) {
        let Some(mut child) = self.outstanding.take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return; // exited naturally; nothing to cancel
        }
        send_term(child.id());
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => self.graveyard.push(child),
        }
    }

    /// Reap terminated predecessors without ever blocking the foreground.
    pub fn reap(&mut self) {
        self.graveyard
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }

    /// Consume a completion notification: read the handoff artifact and
    /// release the outstanding handle.
    pub fn poll(&mut self) -> Option<String> {
        if !take_notification() {
            return None;
        }
        if let Some(child) = self.outstanding.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                self.outstanding = None;
            }
            // A still-running child means the notification came from a
            // superseded predecessor that outran its termination; keep the
            // handle, the survivor will overwrite the artifact when it lands.
        }
        Some(fs::read_to_string(&self.handoff).unwrap_or_default())
    }

    pub fn has_outstanding_job(&self) -> bool {
        self.outstanding.is_some()
    }
}

impl Drop for SignalEngine {
    fn drop(&mut self) {
        // Leave no probe running past the session.
        self.cancel_outstanding();
        self.reap();
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::test_support::{foreign_handler, signal_test_lock};
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn shell_probe(script: String) -> ProbeCommand {
        ProbeCommand {
            program: OsString::from("sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
        }
    }

    fn wait_for_result(engine: &mut SignalEngine, limit: Duration) -> Option<String> {
        let start = Instant::now();
        while start.elapsed() < limit {
            engine.reap();
            if let Some(status) = engine.poll() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn installed_handler_is_recognized_as_ours() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        install_notify_handler().expect("install handler");
        assert!(handler_currently_ours());
        assert!(!foreign_handler_installed());
    }

    #[test]
    fn foreign_handler_trips_the_conflict_marker() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        install_notify_handler().expect("install handler");
        unsafe {
            libc::signal(libc::SIGUSR1, foreign_handler as usize);
        }
        assert!(!handler_currently_ours());
        assert!(foreign_handler_installed());
        install_notify_handler().expect("reinstall handler");
        assert!(handler_currently_ours());
    }

    #[test]
    fn raised_signal_sets_and_clears_the_flag_once() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        install_notify_handler().expect("install handler");
        take_notification();
        unsafe {
            libc::raise(libc::SIGUSR1);
        }
        assert!(take_notification());
        assert!(!take_notification());
    }

    #[test]
    fn probe_child_delivers_through_the_handoff() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let handoff = dir.path().join("handoff");
        let script = format!(
            "printf ' (main)' > {}; kill -USR1 {}",
            handoff.display(),
            process::id()
        );
        let mut engine =
            SignalEngine::new(shell_probe(script), handoff.clone()).expect("engine setup");
        engine.dispatch().expect("dispatch probe");
        assert!(engine.has_outstanding_job());
        let status = wait_for_result(&mut engine, Duration::from_secs(5));
        assert_eq!(status.as_deref(), Some(" (main)"));
    }

    #[test]
    fn supersede_terminates_the_outstanding_probe_first() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let handoff = dir.path().join("handoff");
        let marker = dir.path().join("slow-finished");
        let slow = format!(
            "sleep 1; printf slow > {}; : > {}; kill -USR1 {}",
            handoff.display(),
            marker.display(),
            process::id()
        );
        let fast = format!(
            "printf fast > {}; kill -USR1 {}",
            handoff.display(),
            process::id()
        );

        let mut engine =
            SignalEngine::new(shell_probe(slow), handoff.clone()).expect("engine setup");
        engine.dispatch().expect("dispatch slow probe");
        thread::sleep(Duration::from_millis(10));

        engine.probe = shell_probe(fast);
        engine.dispatch().expect("dispatch fast probe");

        let status = wait_for_result(&mut engine, Duration::from_secs(5));
        assert_eq!(status.as_deref(), Some("fast"));

        // The slow probe was cancelled before its payload ran.
        thread::sleep(Duration::from_millis(1200));
        assert!(
            !marker.exists(),
            "superseded probe must never complete its write"
        );
        engine.reap();
    }

    #[test]
    fn cancelling_an_already_exited_probe_is_silent() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let handoff = dir.path().join("handoff");
        let mut engine =
            SignalEngine::new(shell_probe("true".to_string()), handoff).expect("engine setup");
        engine.dispatch().expect("dispatch probe");
        thread::sleep(Duration::from_millis(200)); // let it exit naturally
        engine.dispatch().expect("second dispatch after natural exit");
        let _ = wait_for_result(&mut engine, Duration::from_millis(300));
        engine.reap();
    }

    #[test]
    fn missing_handoff_file_reads_as_no_status() {
        let _guard = signal_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("create temp dir");
        let handoff = dir.path().join("never-written");
        let script = format!("kill -USR1 {}", process::id());
        let mut engine = SignalEngine::new(shell_probe(script), handoff).expect("engine setup");
        engine.dispatch().expect("dispatch probe");
        let status = wait_for_result(&mut engine, Duration::from_secs(5));
        assert_eq!(status.as_deref(), Some(""));
    }

    #[test]
    fn default_handoff_path_is_process_scoped() {
        let path = default_handoff_path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        assert!(
            name.contains(&process::id().to_string()),
            "handoff name must embed the pid, got {name}"
        );
    }
}
