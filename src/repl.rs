//! Interactive read/eval loop: hosts the prompt, the line editor, and the
//! per-cycle status dispatch. Also owns the temp-file debug log so every
//! module can trace without corrupting the terminal.

use crate::config::AppConfig;
use crate::engine::{CycleController, StatusFn};
use crate::probe::{self, EnvSignals, Strategy};
use crate::prompt::{self, EditMode, PromptFields};
use crate::theme::Theme;
use crate::{vcs, worker};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{cursor, execute};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use unicode_width::UnicodeWidthStr;

/// Maximum history entries kept in memory.
const HISTORY_MAX: usize = 500;

static LOGS_ENABLED: AtomicBool = AtomicBool::new(false);

/// Path to the temp log file rotated between runs.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("promptline.log")
}

/// Append a debug line without touching the interactive surface.
pub fn log_debug(msg: &str) {
    if !LOGS_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path())
    {
        let _ = writeln!(file, "[{timestamp}] {msg}");
    }
}

/// Enable logging per config and drop the file if it grew past 5 MB.
pub fn init_logging(config: &AppConfig) {
    LOGS_ENABLED.store(config.logs, Ordering::Relaxed);
    if !config.logs {
        return;
    }
    if let Ok(metadata) = fs::metadata(log_file_path()) {
        const MAX_BYTES: u64 = 5 * 1024 * 1024;
        if metadata.len() > MAX_BYTES {
            let _ = fs::remove_file(log_file_path());
        }
    }
}

/// What a keystroke did to the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditorAction {
    Submit,
    Eof,
    Edited,
    ModeChanged,
    Ignored,
}

/// Vi-flavored line editor state.
#[derive(Debug, Default)]
pub struct LineEditor {
    pub buffer: String,
    /// Cursor position in characters, not bytes.
    pub cursor: usize,
    pub mode: EditMode,
    history: Vec<String>,
    history_ix: Option<usize>,
    pending: Option<char>,
}

impl LineEditor {
    fn char_len(&self) -> usize {
        self.buffer.chars().count()
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_idx)
            .map(|(idx, _)| idx)
            .unwrap_or(self.buffer.len())
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index(self.cursor);
        self.buffer.insert(idx, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let idx = self.byte_index(self.cursor);
            self.buffer.remove(idx);
        }
    }

    fn delete_under(&mut self) {
        if self.cursor < self.char_len() {
            let idx = self.byte_index(self.cursor);
            self.buffer.remove(idx);
        }
    }

    fn clear_line(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_ix = None;
    }

    fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let ix = match self.history_ix {
            None => self.history.len() - 1,
            Some(0) => 0,
            Some(ix) => ix - 1,
        };
        self.history_ix = Some(ix);
        self.buffer = self.history[ix].clone();
        self.cursor = self.char_len();
    }

    fn history_next(&mut self) {
        match self.history_ix {
            Some(ix) if ix + 1 < self.history.len() => {
                self.history_ix = Some(ix + 1);
                self.buffer = self.history[ix + 1].clone();
                self.cursor = self.char_len();
            }
            Some(_) => {
                self.history_ix = None;
                self.buffer.clear();
                self.cursor = 0;
            }
            None => {}
        }
    }

    /// Take the finished line, record it in history, and reset for the next
    /// prompt. Always returns to insert mode.
    pub fn take_line(&mut self) -> String {
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.mode = EditMode::Insert;
        self.history_ix = None;
        self.pending = None;
        let trimmed = line.trim();
        if !trimmed.is_empty() && self.history.last().map(String::as_str) != Some(trimmed) {
            self.history.push(trimmed.to_string());
            if self.history.len() > HISTORY_MAX {
                self.history.remove(0);
            }
        }
        line
    }

    fn handle_key(&mut self, key: KeyEvent) -> EditorAction {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => {
                    self.clear_line();
                    self.pending = None;
                    self.mode = EditMode::Insert;
                    EditorAction::ModeChanged
                }
                KeyCode::Char('d') if self.buffer.is_empty() => EditorAction::Eof,
                KeyCode::Char('d') => {
                    self.delete_under();
                    EditorAction::Edited
                }
                KeyCode::Char('u') => {
                    self.clear_line();
                    EditorAction::Edited
                }
                KeyCode::Char('a') => {
                    self.cursor = 0;
                    EditorAction::Edited
                }
                KeyCode::Char('e') => {
                    self.cursor = self.char_len();
                    EditorAction::Edited
                }
                _ => EditorAction::Ignored,
            };
        }
        match self.mode {
            EditMode::Insert => self.handle_insert_key(key.code),
            EditMode::Command => self.handle_command_key(key.code),
        }
    }

    fn handle_insert_key(&mut self, code: KeyCode) -> EditorAction {
        match code {
            KeyCode::Enter => EditorAction::Submit,
            KeyCode::Esc => {
                self.mode = EditMode::Command;
                self.cursor = self.cursor.saturating_sub(1);
                EditorAction::ModeChanged
            }
            KeyCode::Char(c) => {
                self.insert_char(c);
                EditorAction::Edited
            }
            KeyCode::Backspace => {
                self.backspace();
                EditorAction::Edited
            }
            KeyCode::Delete => {
                self.delete_under();
                EditorAction::Edited
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                EditorAction::Edited
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(self.char_len());
                EditorAction::Edited
            }
            KeyCode::Home => {
                self.cursor = 0;
                EditorAction::Edited
            }
            KeyCode::End => {
                self.cursor = self.char_len();
                EditorAction::Edited
            }
            KeyCode::Up => {
                self.history_prev();
                EditorAction::Edited
            }
            KeyCode::Down => {
                self.history_next();
                EditorAction::Edited
            }
            _ => EditorAction::Ignored,
        }
    }

    fn handle_command_key(&mut self, code: KeyCode) -> EditorAction {
        if self.pending == Some('d') {
            self.pending = None;
            if code == KeyCode::Char('d') {
                self.clear_line();
                return EditorAction::Edited;
            }
            return EditorAction::Ignored;
        }
        match code {
            KeyCode::Enter => EditorAction::Submit,
            KeyCode::Char('i') => {
                self.mode = EditMode::Insert;
                EditorAction::ModeChanged
            }
            KeyCode::Char('a') => {
                self.cursor = (self.cursor + 1).min(self.char_len());
                self.mode = EditMode::Insert;
                EditorAction::ModeChanged
            }
            KeyCode::Char('A') => {
                self.cursor = self.char_len();
                self.mode = EditMode::Insert;
                EditorAction::ModeChanged
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                EditorAction::Edited
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(self.char_len());
                EditorAction::Edited
            }
            KeyCode::Char('0') => {
                self.cursor = 0;
                EditorAction::Edited
            }
            KeyCode::Char('$') => {
                self.cursor = self.char_len();
                EditorAction::Edited
            }
            KeyCode::Char('x') => {
                self.delete_under();
                EditorAction::Edited
            }
            KeyCode::Char('d') => {
                self.pending = Some('d');
                EditorAction::Ignored
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.history_prev();
                EditorAction::Edited
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.history_next();
                EditorAction::Edited
            }
            KeyCode::Esc => EditorAction::Ignored,
            _ => EditorAction::Ignored,
        }
    }
}

/// Result of one interactive read.
enum ReplEvent {
    Line(String),
    Eof,
}

/// Builtin dispatch result.
#[derive(Debug, PartialEq, Eq)]
enum BuiltinOutcome {
    NotBuiltin,
    Exit,
    Status(i32),
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Run the interactive session until `exit` or end-of-input.
pub fn run(config: AppConfig) -> Result<()> {
    let theme = config.theme()?;
    let signals = EnvSignals::capture();
    let selection = probe::select_strategy(config.async_mode, &signals, worker::probe_spawn);
    log_debug(&format!(
        "strategy: {} ({})",
        selection.strategy.label(),
        selection.reason
    ));
    if config.verbose {
        eprintln!(
            "promptline: strategy {} ({})",
            selection.strategy.label(),
            selection.reason
        );
    }

    let status_fn: StatusFn = Arc::new(|| {
        let dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        vcs::compute_status(&dir)
    });
    let mut controller =
        match CycleController::new(selection.strategy, status_fn.clone(), config.verbose) {
            Ok(controller) => controller,
            Err(err) => {
                // Async setup trouble is never fatal to the session.
                log_debug(&format!("async setup failed: {err:#}"));
                if config.verbose {
                    eprintln!("promptline: async setup failed ({err:#}); staying synchronous");
                }
                CycleController::new(Strategy::Synchronous, status_fn, config.verbose)?
            }
        };

    let shell = config.effective_shell();
    let mut editor = LineEditor::default();
    let mut last_exit = 0;

    loop {
        controller.on_pre_render();
        match read_line(&mut controller, &config, &theme, &mut editor, last_exit)? {
            ReplEvent::Line(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match dispatch_builtin(&line) {
                    BuiltinOutcome::Exit => break,
                    BuiltinOutcome::Status(code) => last_exit = code,
                    BuiltinOutcome::NotBuiltin => last_exit = run_command(&shell, &line),
                }
            }
            ReplEvent::Eof => break,
        }
    }
    Ok(())
}

/// Read one line in raw mode, redrawing the prompt in place whenever the
/// status engine delivers a result mid-edit.
fn read_line(
    controller: &mut CycleController,
    config: &AppConfig,
    theme: &Theme,
    editor: &mut LineEditor,
    last_exit: i32,
) -> Result<ReplEvent> {
    let _guard = RawModeGuard::enable()?;
    let mut out = io::stdout();
    let mut prompt_text = compose_prompt(config, theme, controller.status(), editor.mode, last_exit);
    redraw_line(&mut out, &prompt_text, editor)?;
    let tick = Duration::from_millis(config.tick_ms);

    loop {
        let mut dirty = false;
        if event::poll(tick)? {
            match event::read()? {
                Event::Key(key) => match editor.handle_key(key) {
                    EditorAction::Submit => {
                        write!(out, "\r\n")?;
                        out.flush()?;
                        return Ok(ReplEvent::Line(editor.take_line()));
                    }
                    EditorAction::Eof => {
                        write!(out, "\r\n")?;
                        out.flush()?;
                        return Ok(ReplEvent::Eof);
                    }
                    EditorAction::Edited => dirty = true,
                    EditorAction::ModeChanged => {
                        prompt_text = compose_prompt(
                            config,
                            theme,
                            controller.status(),
                            editor.mode,
                            last_exit,
                        );
                        dirty = true;
                    }
                    EditorAction::Ignored => {}
                },
                Event::Resize(_, _) => dirty = true,
                _ => {}
            }
        }
        if controller.poll() {
            prompt_text =
                compose_prompt(config, theme, controller.status(), editor.mode, last_exit);
            dirty = true;
        }
        if dirty {
            redraw_line(&mut out, &prompt_text, editor)?;
        }
    }
}

/// Repaint the current prompt line and put the cursor where the editor says.
fn redraw_line(out: &mut impl Write, prompt_text: &str, editor: &LineEditor) -> Result<()> {
    let before_cursor: String = editor.buffer.chars().take(editor.cursor).collect();
    let col = prompt::visible_width(prompt_text) + before_cursor.as_str().width();
    execute!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(out, "{prompt_text}{}", editor.buffer)?;
    execute!(out, cursor::MoveToColumn(col as u16))?;
    out.flush()?;
    Ok(())
}

/// Compose a full prompt line from the live session state.
pub fn compose_prompt(
    config: &AppConfig,
    theme: &Theme,
    status: &str,
    mode: EditMode,
    last_exit: i32,
) -> String {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("?"));
    let home = env::var_os("HOME").map(PathBuf::from);
    let cwd_display = prompt::abbreviate_path(&cwd, home.as_deref(), config.effective_dirtrim());
    let user = current_user();
    let host = hostname();
    let fields = PromptFields {
        user: &user,
        host: &host,
        cwd: cwd_display,
        status,
        exit_code: last_exit,
        mode,
        root: is_root(),
        show_user_host: config.show_user_host,
    };
    prompt::render_prompt(&fields, theme, color_enabled(config))
}

pub fn color_enabled(config: &AppConfig) -> bool {
    !config.no_color && env::var_os("NO_COLOR").is_none()
}

fn dispatch_builtin(line: &str) -> BuiltinOutcome {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("exit") | Some("quit") => BuiltinOutcome::Exit,
        Some("cd") => BuiltinOutcome::Status(change_directory(parts.next())),
        _ => BuiltinOutcome::NotBuiltin,
    }
}

/// `cd` must run in-process; a child shell cannot move this session.
fn change_directory(target: Option<&str>) -> i32 {
    let home = env::var_os("HOME").map(PathBuf::from);
    let dest = match target {
        None | Some("~") => match &home {
            Some(home) => home.clone(),
            None => {
                eprintln!("promptline: cd: HOME not set");
                return 1;
            }
        },
        Some(path) => match path.strip_prefix("~/") {
            Some(rest) => match &home {
                Some(home) => home.join(rest),
                None => {
                    eprintln!("promptline: cd: HOME not set");
                    return 1;
                }
            },
            None => PathBuf::from(path),
        },
    };
    match env::set_current_dir(&dest) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("promptline: cd: {}: {err}", dest.display());
            1
        }
    }
}

/// Keeps Ctrl-C aimed at a foreground command from taking the session down;
/// the previous disposition comes back when the guard drops.
struct SigintGuard {
    #[cfg(unix)]
    previous: libc::sighandler_t,
}

impl SigintGuard {
    fn ignore() -> Self {
        #[cfg(unix)]
        {
            Self {
                previous: unsafe { libc::signal(libc::SIGINT, libc::SIG_IGN) },
            }
        }

        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for SigintGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::signal(libc::SIGINT, self.previous);
        }
    }
}

fn run_command(shell: &str, line: &str) -> i32 {
    log_debug(&format!("run: {line}"));
    let _guard = SigintGuard::ignore();
    match Command::new(shell).arg("-c").arg(line).status() {
        Ok(status) => exit_code(status),
        Err(err) => {
            eprintln!("promptline: {shell}: {err}");
            127
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn current_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "user".to_string())
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).to_string();
        if let Some(short) = name.split('.').next() {
            if !short.is_empty() {
                return short.to_string();
            }
        }
    }
    env::var("HOSTNAME").unwrap_or_else(|_| "host".to_string())
}

#[cfg(not(unix))]
fn hostname() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "host".to_string())
}

fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}
