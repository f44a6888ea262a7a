use anyhow::{Context, Result};
use clap::Parser;
use promptline::{
    compose_prompt, config::AppConfig, doctor::base_doctor_report, init_logging, log_debug,
    notify, prompt::EditMode, vcs,
};
use std::path::PathBuf;
use std::{env, fs};

#[cfg(not(test))]
fn main() -> Result<()> {
    run_with_args(env::args_os())
}

#[cfg_attr(test, allow(dead_code))]
fn run_with_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let mut config = AppConfig::parse_from(args);

    // The probe child stays minimal: no config file, no validation beyond
    // its own arguments, nothing interactive.
    if config.status_probe {
        return run_status_probe(&config);
    }

    if config.doctor {
        println!("{}", base_doctor_report(&config).render());
        return Ok(());
    }

    config.load_file()?;
    config.validate()?;
    init_logging(&config);

    if config.print_prompt {
        print_prompt(&config)?;
        return Ok(());
    }

    log_debug("=== promptline started ===");
    let result = promptline::run(config);
    log_debug("=== promptline exiting ===");
    if let Err(ref err) = result {
        log_debug(&format!("exit with error: {err:#}"));
    }
    result
}

/// Child half of the signal-based engine: compute, hand off, notify, exit.
fn run_status_probe(config: &AppConfig) -> Result<()> {
    let handoff = config
        .handoff
        .as_ref()
        .context("--status-probe requires --handoff")?;
    let pid = config
        .notify_pid
        .context("--status-probe requires --notify-pid")?;
    let status = vcs::compute_status(&current_dir());
    fs::write(handoff, &status)
        .with_context(|| format!("write handoff {}", handoff.display()))?;
    notify::send_notify(pid);
    Ok(())
}

/// Render one prompt line synchronously, for shell integration and smoke
/// testing the template outside the interactive loop.
fn print_prompt(config: &AppConfig) -> Result<()> {
    let theme = config.theme()?;
    let status = vcs::compute_status(&current_dir());
    let line = compose_prompt(config, &theme, &status, EditMode::Insert, 0);
    println!("{line}");
    Ok(())
}

fn current_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
