//! Capability probing: inspects the host environment once at startup and
//! selects the concurrency strategy used for the status computation. The
//! decision itself is a pure function over an `EnvSignals` snapshot; the only
//! side effect is the pooled-worker load attempt, whose failure is expected
//! and non-fatal.

use crate::config::AsyncMode;
use std::env;

/// Concurrency mechanism selected for the session. Chosen once; changed
/// afterwards only by a runtime downgrade to `Synchronous` or `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PooledWorker,
    SignalBased,
    Synchronous,
    Disabled,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::PooledWorker => "pooled-worker",
            Strategy::SignalBased => "signal-based",
            Strategy::Synchronous => "synchronous",
            Strategy::Disabled => "disabled",
        }
    }
}

/// Snapshot of the environment signals the prober consumes.
#[derive(Debug, Clone)]
pub struct EnvSignals {
    pub platform: String,
    pub host_shell_version: Option<String>,
    pub term: Option<String>,
    pub signals_supported: bool,
    pub foreign_notify_handler: bool,
}

impl EnvSignals {
    /// Capture the live process environment.
    pub fn capture() -> Self {
        Self {
            platform: detect_platform(),
            host_shell_version: env::var("ZSH_VERSION")
                .ok()
                .or_else(|| env::var("BASH_VERSION").ok()),
            term: env::var("TERM").ok(),
            signals_supported: cfg!(unix),
            foreign_notify_handler: crate::notify::foreign_handler_installed(),
        }
    }
}

fn detect_platform() -> String {
    if let Ok(ostype) = env::var("OSTYPE") {
        if !ostype.is_empty() {
            return ostype.to_ascii_lowercase();
        }
    }
    if env::var_os("MSYSTEM").is_some() {
        return "msys".to_string();
    }
    env::consts::OS.to_string()
}

/// Outcome of strategy selection; the reason feeds the doctor report and the
/// verbose diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub strategy: Strategy,
    pub reason: &'static str,
}

// Pooled workers misbehave on these platform families: cygwin's fork
// emulation makes the loader unreliable, and under msys the worker loads but
// never observably runs.
const POOLED_INCOMPATIBLE: &[&str] = &["cygwin", "msys"];
const MINIMAL_TERMS: &[&str] = &["dumb", "emacs"];
// Host shells before 4.0 deliver signals to foreground loops unreliably.
const MIN_ASYNC_SHELL_MAJOR: u32 = 4;

/// Pick the strategy. `loader` attempts to bring up the pooled-worker
/// mechanism and reports success; it runs at most once.
pub fn select_strategy(
    mode: AsyncMode,
    signals: &EnvSignals,
    loader: impl FnOnce() -> bool,
) -> Selection {
    match mode {
        AsyncMode::Worker => {
            return if loader() {
                select(Strategy::PooledWorker, "forced by configuration")
            } else {
                select(
                    Strategy::Disabled,
                    "forced pooled worker failed to load",
                )
            }
        }
        AsyncMode::Signal => return select(Strategy::SignalBased, "forced by configuration"),
        AsyncMode::Sync => return select(Strategy::Synchronous, "forced by configuration"),
        AsyncMode::Off => return select(Strategy::Disabled, "forced by configuration"),
        AsyncMode::Auto => {}
    }

    if let Some(version) = signals.host_shell_version.as_deref() {
        if has_scheduling_defect(version) {
            return select(
                Strategy::Synchronous,
                "host shell predates reliable async delivery",
            );
        }
    }
    if is_minimal_term(signals.term.as_deref()) {
        return select(
            Strategy::Synchronous,
            "terminal gains nothing from async redraw",
        );
    }
    let platform_allows_pooled = !POOLED_INCOMPATIBLE
        .iter()
        .any(|family| signals.platform.contains(family));
    if platform_allows_pooled && loader() {
        return select(Strategy::PooledWorker, "worker threads available");
    }
    if signals.signals_supported && !signals.foreign_notify_handler {
        return select(Strategy::SignalBased, "notification signal free and supported");
    }
    select(Strategy::Synchronous, "no async mechanism usable")
}

fn select(strategy: Strategy, reason: &'static str) -> Selection {
    Selection { strategy, reason }
}

fn has_scheduling_defect(version: &str) -> bool {
    version
        .split('.')
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .map(|major| major < MIN_ASYNC_SHELL_MAJOR)
        .unwrap_or(false)
}

fn is_minimal_term(term: Option<&str>) -> bool {
    match term {
        None => true,
        Some(term) => term.is_empty() || MINIMAL_TERMS.contains(&term),
    }
}
