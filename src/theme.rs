//! Prompt color handling: parsing user-supplied color names into crossterm
//! styles and grouping the per-segment choices into a theme.

use anyhow::{bail, Result};
use crossterm::style::{Color, Stylize};

/// Per-segment foreground colors. `None` renders the segment unstyled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub user_host: Option<Color>,
    pub path: Option<Color>,
    pub status: Option<Color>,
    pub exit: Option<Color>,
    pub mode: Option<Color>,
    pub prompt_char: Option<Color>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            user_host: Some(Color::DarkGreen),
            path: Some(Color::DarkBlue),
            status: Some(Color::DarkYellow),
            exit: Some(Color::DarkRed),
            mode: Some(Color::DarkMagenta),
            prompt_char: None,
        }
    }
}

/// Parse a color spec: a name, a `bright-` prefixed name, a 256-color
/// index, or `none`/`default` to leave the segment unstyled.
pub fn parse_color(spec: &str) -> Result<Option<Color>> {
    let normalized = spec.trim().to_ascii_lowercase();
    let color = match normalized.as_str() {
        "none" | "default" => return Ok(None),
        "black" => Color::Black,
        "red" => Color::DarkRed,
        "green" => Color::DarkGreen,
        "yellow" => Color::DarkYellow,
        "blue" => Color::DarkBlue,
        "magenta" => Color::DarkMagenta,
        "cyan" => Color::DarkCyan,
        "white" => Color::Grey,
        "grey" | "gray" => Color::DarkGrey,
        "bright-red" => Color::Red,
        "bright-green" => Color::Green,
        "bright-yellow" => Color::Yellow,
        "bright-blue" => Color::Blue,
        "bright-magenta" => Color::Magenta,
        "bright-cyan" => Color::Cyan,
        "bright-white" => Color::White,
        other => match other.parse::<u8>() {
            Ok(index) => Color::AnsiValue(index),
            Err(_) => bail!("unknown color: {spec}"),
        },
    };
    Ok(Some(color))
}

/// Apply a foreground color to `text` when styling is enabled.
pub fn paint(text: &str, color: Option<Color>, enabled: bool) -> String {
    match color {
        Some(color) if enabled => format!("{}", text.with(color)),
        _ => text.to_string(),
    }
}
