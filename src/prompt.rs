//! Prompt assembly: turns the cached session fields into the visible prompt
//! line. Pure string work; the interactive loop owns when to redraw.

use crate::theme::{paint, Theme};
use std::path::Path;
use strip_ansi_escapes::strip;
use unicode_width::UnicodeWidthStr;

/// Line-editor input mode reflected in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    #[default]
    Insert,
    Command,
}

impl EditMode {
    /// Indicator shown next to the prompt character. Insert mode is the
    /// quiet default; command mode announces itself.
    pub fn indicator(self) -> &'static str {
        match self {
            EditMode::Insert => "",
            EditMode::Command => ":",
        }
    }
}

/// Everything the template reads when composing one prompt line.
#[derive(Debug)]
pub struct PromptFields<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub cwd: String,
    pub status: &'a str,
    pub exit_code: i32,
    pub mode: EditMode,
    pub root: bool,
    pub show_user_host: bool,
}

/// Compose the full prompt line, colors included.
pub fn render_prompt(fields: &PromptFields, theme: &Theme, color: bool) -> String {
    let mut line = String::new();
    if fields.exit_code != 0 {
        line.push_str(&paint(
            &format!("({}) ", fields.exit_code),
            theme.exit,
            color,
        ));
    }
    if fields.show_user_host {
        line.push_str(&paint(
            &format!("{}@{}", fields.user, fields.host),
            theme.user_host,
            color,
        ));
        line.push(' ');
    }
    line.push_str(&paint(&fields.cwd, theme.path, color));
    if !fields.status.is_empty() {
        line.push_str(&paint(fields.status, theme.status, color));
    }
    let indicator = fields.mode.indicator();
    if !indicator.is_empty() {
        line.push(' ');
        line.push_str(&paint(indicator, theme.mode, color));
    }
    line.push(' ');
    let prompt_char = if fields.root { "#" } else { "%" };
    line.push_str(&paint(prompt_char, theme.prompt_char, color));
    line.push(' ');
    line
}

/// Replace the home prefix with `~` and elide leading components so only the
/// trailing `dirtrim` segments stay visible. `dirtrim == 0` disables eliding.
pub fn abbreviate_path(path: &Path, home: Option<&Path>, dirtrim: usize) -> String {
    let mut display = path.display().to_string();
    if let Some(home) = home {
        if let Ok(rest) = path.strip_prefix(home) {
            display = if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            };
        }
    }
    if dirtrim == 0 {
        return display;
    }
    let parts: Vec<&str> = display.split('/').collect();
    if parts.len() <= dirtrim + 1 {
        return display;
    }
    let kept = &parts[parts.len() - dirtrim..];
    let lead = if parts[0] == "~" { "~/..." } else { "..." };
    format!("{lead}/{}", kept.join("/"))
}

/// Width of `text` as the terminal will display it: ANSI escapes stripped,
/// wide glyphs counted as two columns.
pub fn visible_width(text: &str) -> usize {
    let stripped = strip(text);
    String::from_utf8_lossy(&stripped).width()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fields<'a>(status: &'a str, exit_code: i32) -> PromptFields<'a> {
        PromptFields {
            user: "ada",
            host: "lovelace",
            cwd: "~/src".to_string(),
            status,
            exit_code,
            mode: EditMode::Insert,
            root: false,
            show_user_host: true,
        }
    }

    #[test]
    fn plain_prompt_contains_every_segment() {
        let line = render_prompt(&fields(" (main)", 0), &Theme::default(), false);
        assert_eq!(line, "ada@lovelace ~/src (main) % ");
    }

    #[test]
    fn nonzero_exit_code_is_shown_first() {
        let line = render_prompt(&fields("", 1), &Theme::default(), false);
        assert!(line.starts_with("(1) "), "got {line:?}");
    }

    #[test]
    fn zero_exit_code_is_hidden() {
        let line = render_prompt(&fields("", 0), &Theme::default(), false);
        assert!(!line.contains("(0)"));
    }

    #[test]
    fn command_mode_shows_its_indicator() {
        let mut f = fields("", 0);
        f.mode = EditMode::Command;
        let line = render_prompt(&f, &Theme::default(), false);
        assert!(line.contains(" : "), "got {line:?}");
    }

    #[test]
    fn root_prompt_char_is_a_hash() {
        let mut f = fields("", 0);
        f.root = true;
        let line = render_prompt(&f, &Theme::default(), false);
        assert!(line.ends_with("# "), "got {line:?}");
    }

    #[test]
    fn home_collapses_to_tilde() {
        let home = PathBuf::from("/home/ada");
        assert_eq!(
            abbreviate_path(&home, Some(home.as_path()), 3),
            "~".to_string()
        );
        assert_eq!(
            abbreviate_path(&home.join("src"), Some(home.as_path()), 3),
            "~/src".to_string()
        );
    }

    #[test]
    fn deep_paths_keep_only_the_trailing_segments() {
        let home = PathBuf::from("/home/ada");
        let deep = home.join("src/proj/sub/dir");
        assert_eq!(
            abbreviate_path(&deep, Some(home.as_path()), 2),
            "~/.../sub/dir".to_string()
        );
        let absolute = PathBuf::from("/var/lib/app/data/cache");
        assert_eq!(
            abbreviate_path(&absolute, None, 2),
            ".../data/cache".to_string()
        );
    }

    #[test]
    fn dirtrim_zero_disables_eliding() {
        let deep = PathBuf::from("/a/b/c/d/e/f");
        assert_eq!(abbreviate_path(&deep, None, 0), "/a/b/c/d/e/f".to_string());
    }

    #[test]
    fn visible_width_ignores_ansi_codes() {
        let line = render_prompt(&fields(" (main)", 0), &Theme::default(), true);
        let plain = render_prompt(&fields(" (main)", 0), &Theme::default(), false);
        assert_eq!(visible_width(&line), plain.chars().count());
    }

    #[test]
    fn visible_width_counts_wide_glyphs_twice() {
        assert_eq!(visible_width("漢字"), 4);
    }
}
