//! Environment report for `--doctor`: what the prober sees and which
//! strategy the session would run with.

use crate::config::AppConfig;
use crate::probe::{self, EnvSignals};
use crate::worker;
use crossterm::terminal::size as terminal_size;
use std::process::{Command, Stdio};
use std::{env, fmt::Display};

pub struct DoctorReport {
    lines: Vec<String>,
}

impl DoctorReport {
    pub fn new(title: &str) -> Self {
        Self {
            lines: vec![title.to_string()],
        }
    }

    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("{title}:"));
    }

    pub fn push_kv(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("  {key}: {value}"));
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

pub fn base_doctor_report(config: &AppConfig) -> DoctorReport {
    let mut report = DoctorReport::new("promptline doctor");
    report.push_kv("version", env!("CARGO_PKG_VERSION"));
    report.push_kv("os", format!("{}/{}", env::consts::OS, env::consts::ARCH));

    report.section("Terminal");
    match terminal_size() {
        Ok((cols, rows)) => report.push_kv("size", format!("{cols}x{rows}")),
        Err(err) => report.push_kv("size", format!("error: {err}")),
    }
    if let Ok(term) = env::var("TERM") {
        report.push_kv("term", term);
    }
    if let Ok(colorterm) = env::var("COLORTERM") {
        report.push_kv("colorterm", colorterm);
    }
    if env::var("NO_COLOR").is_ok() {
        report.push_kv("no_color", "set");
    }

    let signals = EnvSignals::capture();
    report.section("Status engine");
    report.push_kv("platform", &signals.platform);
    report.push_kv(
        "host_shell_version",
        signals.host_shell_version.as_deref().unwrap_or("unknown"),
    );
    report.push_kv(
        "signal_support",
        if signals.signals_supported { "yes" } else { "no" },
    );
    report.push_kv(
        "notify_channel",
        if signals.foreign_notify_handler {
            "claimed by another handler"
        } else {
            "free"
        },
    );
    let selection = probe::select_strategy(config.async_mode, &signals, worker::probe_spawn);
    report.push_kv("strategy", selection.strategy.label());
    report.push_kv("reason", selection.reason);
    report.push_kv(
        "handoff_path",
        crate::notify::default_handoff_path().display(),
    );

    report.section("Git");
    match git_version() {
        Some(version) => report.push_kv("git", version),
        None => report.push_kv("git", "not found (status stays empty)"),
    }

    report.section("Config");
    let mut validated = config.clone();
    match validated.validate() {
        Ok(()) => report.push_kv("validation", "ok"),
        Err(err) => report.push_kv("validation", format!("error: {err}")),
    }
    report.push_kv("shell", config.effective_shell());
    report.push_kv("dirtrim", config.effective_dirtrim());
    report.push_kv("logs", if config.logs { "enabled" } else { "disabled" });
    report.push_kv("log_file", crate::log_file_path().display());

    report
}

fn git_version() -> Option<String> {
    let output = Command::new("git")
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
