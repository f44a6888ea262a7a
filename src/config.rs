//! Command-line parsing, the optional config file, and validation helpers.

use crate::theme::{self, Theme};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

const DEFAULT_DIRTRIM: usize = 3;
const MAX_DIRTRIM: usize = 16;
const DEFAULT_TICK_MS: u64 = 50;
const MIN_TICK_MS: u64 = 10;
const MAX_TICK_MS: u64 = 1_000;
const DEFAULT_SHELL: &str = "/bin/sh";

/// Requested concurrency strategy. `Auto` defers to the capability prober;
/// anything else is honored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncMode {
    Auto,
    Worker,
    Signal,
    Sync,
    Off,
}

/// CLI options for the promptline shell front-end.
#[derive(Debug, Parser, Clone)]
#[command(
    about = "Interactive shell front-end with an asynchronous status line",
    author,
    version
)]
pub struct AppConfig {
    /// Concurrency strategy for the status computation
    #[arg(long = "async-mode", value_enum, default_value = "auto")]
    pub async_mode: AsyncMode,

    /// Shell used to run submitted commands (default: $SHELL, then /bin/sh)
    #[arg(long)]
    pub shell: Option<String>,

    /// Keep only the trailing N path components in the prompt (0 disables)
    #[arg(long)]
    pub dirtrim: Option<usize>,

    /// Hide the user@host segment
    #[arg(long = "no-user-host", action = clap::ArgAction::SetFalse, default_value_t = true)]
    pub show_user_host: bool,

    /// Disable ANSI colors
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Poll interval of the interactive loop (milliseconds)
    #[arg(long = "tick-ms", default_value_t = DEFAULT_TICK_MS)]
    pub tick_ms: u64,

    /// Config file location (default: ~/.config/promptline/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a capability report and exit
    #[arg(long)]
    pub doctor: bool,

    /// Render one prompt line to stdout and exit
    #[arg(long = "print-prompt")]
    pub print_prompt: bool,

    /// Print strategy diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Write debug traces to the log file
    #[arg(long)]
    pub logs: bool,

    /// Working-directory segment color
    #[arg(long = "path-color")]
    pub path_color: Option<String>,

    /// Branch/status segment color
    #[arg(long = "status-color")]
    pub status_color: Option<String>,

    /// Exit-code segment color
    #[arg(long = "exit-color")]
    pub exit_color: Option<String>,

    /// Mode-indicator segment color
    #[arg(long = "mode-color")]
    pub mode_color: Option<String>,

    /// user@host segment color
    #[arg(long = "user-host-color")]
    pub user_host_color: Option<String>,

    /// Prompt character color
    #[arg(long = "prompt-char-color")]
    pub prompt_char_color: Option<String>,

    /// Run as the background status probe (internal)
    #[arg(long = "status-probe", hide = true)]
    pub status_probe: bool,

    /// Handoff file the status probe writes (internal)
    #[arg(long, hide = true)]
    pub handoff: Option<PathBuf>,

    /// Process to notify after the handoff is written (internal)
    #[arg(long = "notify-pid", hide = true)]
    pub notify_pid: Option<i32>,
}

/// Values the config file may supply. Every field is optional; the CLI wins
/// on conflict and a missing file is not an error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub async_mode: Option<AsyncMode>,
    pub shell: Option<String>,
    pub dirtrim: Option<usize>,
    pub show_user_host: Option<bool>,
    pub colors: ColorOverrides,
}

/// Per-segment color names from the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ColorOverrides {
    pub path: Option<String>,
    pub status: Option<String>,
    pub exit: Option<String>,
    pub mode: Option<String>,
    pub user_host: Option<String>,
    pub prompt_char: Option<String>,
}

impl AppConfig {
    /// Parse CLI arguments, merge the config file, and validate right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.load_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config file (if any) and fill in values the CLI left unset.
    pub fn load_file(&mut self) -> Result<()> {
        let explicit = self.config.is_some();
        let path = match &self.config {
            Some(path) => path.clone(),
            None => default_config_path(),
        };
        let file = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<FileConfig>(&text)
                .with_context(|| format!("parse config file {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => FileConfig::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("read config file {}", path.display()))
            }
        };
        self.merge_file(file);
        Ok(())
    }

    fn merge_file(&mut self, file: FileConfig) {
        if matches!(self.async_mode, AsyncMode::Auto) {
            if let Some(mode) = file.async_mode {
                self.async_mode = mode;
            }
        }
        if self.shell.is_none() {
            self.shell = file.shell;
        }
        if self.dirtrim.is_none() {
            self.dirtrim = file.dirtrim;
        }
        self.show_user_host = self.show_user_host && file.show_user_host.unwrap_or(true);
        merge_color(&mut self.path_color, file.colors.path);
        merge_color(&mut self.status_color, file.colors.status);
        merge_color(&mut self.exit_color, file.colors.exit);
        merge_color(&mut self.mode_color, file.colors.mode);
        merge_color(&mut self.user_host_color, file.colors.user_host);
        merge_color(&mut self.prompt_char_color, file.colors.prompt_char);
    }

    /// Check merged values and reject anything the session cannot work with.
    pub fn validate(&mut self) -> Result<()> {
        if let Some(dirtrim) = self.dirtrim {
            if dirtrim > MAX_DIRTRIM {
                bail!("--dirtrim must be at most {MAX_DIRTRIM}, got {dirtrim}");
            }
        }
        if !(MIN_TICK_MS..=MAX_TICK_MS).contains(&self.tick_ms) {
            bail!(
                "--tick-ms must be between {MIN_TICK_MS} and {MAX_TICK_MS}, got {}",
                self.tick_ms
            );
        }
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                bail!("--shell must not be empty");
            }
        }
        if self.status_probe && (self.handoff.is_none() || self.notify_pid.is_none()) {
            bail!("--status-probe requires --handoff and --notify-pid");
        }
        // Surface bad color names at startup rather than on first render.
        self.theme()?;
        Ok(())
    }

    /// Build the prompt theme from the merged color settings.
    pub fn theme(&self) -> Result<Theme> {
        let mut theme = Theme::default();
        apply_color(&mut theme.path, self.path_color.as_deref())?;
        apply_color(&mut theme.status, self.status_color.as_deref())?;
        apply_color(&mut theme.exit, self.exit_color.as_deref())?;
        apply_color(&mut theme.mode, self.mode_color.as_deref())?;
        apply_color(&mut theme.user_host, self.user_host_color.as_deref())?;
        apply_color(&mut theme.prompt_char, self.prompt_char_color.as_deref())?;
        Ok(theme)
    }

    pub fn effective_dirtrim(&self) -> usize {
        self.dirtrim.unwrap_or(DEFAULT_DIRTRIM)
    }

    /// Shell used for submitted commands: flag, then $SHELL, then /bin/sh.
    pub fn effective_shell(&self) -> String {
        if let Some(shell) = &self.shell {
            return shell.clone();
        }
        match env::var("SHELL") {
            Ok(shell) if !shell.trim().is_empty() => shell,
            _ => DEFAULT_SHELL.to_string(),
        }
    }
}

fn merge_color(slot: &mut Option<String>, file_value: Option<String>) {
    if slot.is_none() {
        *slot = file_value;
    }
}

fn apply_color(slot: &mut Option<crossterm::style::Color>, spec: Option<&str>) -> Result<()> {
    if let Some(spec) = spec {
        *slot = theme::parse_color(spec)?;
    }
    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("promptline").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config() -> AppConfig {
        AppConfig::parse_from(["test-promptline"])
    }

    #[test]
    fn defaults_are_valid() {
        let mut config = test_config();
        config.validate().expect("defaults should be valid");
        assert_eq!(config.effective_dirtrim(), DEFAULT_DIRTRIM);
        assert!(config.show_user_host);
    }

    #[test]
    fn oversized_dirtrim_is_rejected() {
        let mut config = test_config();
        config.dirtrim = Some(MAX_DIRTRIM + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn tick_bounds_are_enforced() {
        let mut config = test_config();
        config.tick_ms = 0;
        assert!(config.validate().is_err());
        config.tick_ms = MAX_TICK_MS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_color_names_fail_validation() {
        let mut config = test_config();
        config.status_color = Some("no-such-color".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn probe_mode_needs_both_internal_args() {
        let mut config = test_config();
        config.status_probe = true;
        assert!(config.validate().is_err());
        config.handoff = Some(PathBuf::from("/tmp/h"));
        config.notify_pid = Some(1);
        config.validate().expect("complete probe args are valid");
    }

    #[test]
    fn file_values_fill_unset_fields_only() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.json");
        let mut file = fs::File::create(&path).expect("create config file");
        write!(
            file,
            r#"{{"async_mode": "sync", "dirtrim": 5, "shell": "/bin/bash",
                "colors": {{"status": "cyan"}}}}"#
        )
        .expect("write config file");

        let mut config = test_config();
        config.config = Some(path.clone());
        config.shell = Some("/bin/zsh".to_string());
        config.load_file().expect("load config file");

        assert!(matches!(config.async_mode, AsyncMode::Sync));
        assert_eq!(config.dirtrim, Some(5));
        // CLI-provided shell wins over the file.
        assert_eq!(config.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.status_color.as_deref(), Some("cyan"));
    }

    #[test]
    fn explicit_missing_config_file_is_an_error() {
        let mut config = test_config();
        config.config = Some(PathBuf::from("/nonexistent/promptline.json"));
        assert!(config.load_file().is_err());
    }

    #[test]
    fn cli_no_user_host_survives_file_merge() {
        let mut config = AppConfig::parse_from(["test-promptline", "--no-user-host"]);
        config.merge_file(FileConfig {
            show_user_host: Some(true),
            ..FileConfig::default()
        });
        assert!(!config.show_user_host);
    }

    #[test]
    fn file_cannot_reenable_what_it_never_disabled() {
        let mut config = test_config();
        config.merge_file(FileConfig {
            show_user_host: Some(false),
            ..FileConfig::default()
        });
        assert!(!config.show_user_host);
    }
}
