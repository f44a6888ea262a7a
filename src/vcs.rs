//! Repository status formatter: drives the git CLI and renders the short
//! branch/dirty-state annotation shown in the prompt. Everything here is
//! stateless so the computation can run inline, on a worker thread, or in a
//! throwaway child process.

use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};

const AHEAD: char = '↑';
const BEHIND: char = '↓';
const CONFLICTED: char = '!';
const UNSTAGED: char = '*';
const STAGED: char = '+';
const UNTRACKED: char = '?';

/// Parsed view of `git status --porcelain --branch` output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
    pub staged: bool,
    pub unstaged: bool,
    pub untracked: bool,
    pub conflicted: bool,
}

/// Compute the prompt annotation for `dir`, e.g. `" (main *+)"`.
///
/// Empty when `dir` is outside a repository, when git is not installed, or
/// when the command fails for any reason; all of those mean "no status" to
/// the prompt, not an error.
pub fn compute_status(dir: &Path) -> String {
    let Some(porcelain) = run_git(dir, &["status", "--porcelain", "--branch"]) else {
        return String::new();
    };
    let Some(mut status) = parse_porcelain(&porcelain) else {
        return String::new();
    };
    if status.branch.is_empty() {
        // Detached HEAD: the header carries no name, show the commit instead.
        status.branch = run_git(dir, &["rev-parse", "--short", "HEAD"])
            .map(|sha| sha.trim().to_string())
            .unwrap_or_default();
        if status.branch.is_empty() {
            return String::new();
        }
    }
    format_status(&status)
}

fn run_git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse porcelain output. `None` when the header line is missing, which
/// means the text did not come from `--porcelain --branch`.
pub(crate) fn parse_porcelain(text: &str) -> Option<RepoStatus> {
    let mut lines = text.lines();
    let header = lines.next()?.strip_prefix("## ")?;
    let mut status = parse_branch_header(header);
    for line in lines {
        classify_entry(line, &mut status);
    }
    Some(status)
}

/// Decode the `## ...` header: branch name, upstream divergence, and the
/// unborn/detached special cases. A detached head leaves `branch` empty.
fn parse_branch_header(header: &str) -> RepoStatus {
    let mut status = RepoStatus::default();
    if header == "HEAD (no branch)" {
        return status;
    }
    if let Some(name) = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
    {
        status.branch = name.to_string();
        return status;
    }
    let (name_part, tracking) = match header.find(" [") {
        Some(idx) => (&header[..idx], Some(&header[idx..])),
        None => (header, None),
    };
    status.branch = name_part
        .split("...")
        .next()
        .unwrap_or(name_part)
        .to_string();
    if let Some(tracking) = tracking {
        status.ahead = capture_count(tracking, r"ahead (\d+)");
        status.behind = capture_count(tracking, r"behind (\d+)");
    }
    status
}

fn capture_count(text: &str, pattern: &str) -> u32 {
    let re = Regex::new(pattern).expect("static pattern is valid");
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Fold one `XY path` entry into the change-category flags.
fn classify_entry(line: &str, status: &mut RepoStatus) {
    let mut chars = line.chars();
    let x = chars.next().unwrap_or(' ');
    let y = chars.next().unwrap_or(' ');
    if x == '?' && y == '?' {
        status.untracked = true;
        return;
    }
    if x == '!' {
        return; // ignored entry
    }
    if matches!((x, y), ('D', 'D') | ('A', 'A') | ('U', _) | (_, 'U')) {
        status.conflicted = true;
        return;
    }
    if matches!(x, 'M' | 'A' | 'D' | 'R' | 'C' | 'T') {
        status.staged = true;
    }
    if matches!(y, 'M' | 'D' | 'T') {
        status.unstaged = true;
    }
}

/// Render the annotation. Symbols appear in a fixed order so the field is
/// stable between refreshes.
pub(crate) fn format_status(status: &RepoStatus) -> String {
    let mut symbols = String::new();
    if status.ahead > 0 {
        symbols.push(AHEAD);
        symbols.push_str(&status.ahead.to_string());
    }
    if status.behind > 0 {
        symbols.push(BEHIND);
        symbols.push_str(&status.behind.to_string());
    }
    if status.conflicted {
        symbols.push(CONFLICTED);
    }
    if status.unstaged {
        symbols.push(UNSTAGED);
    }
    if status.staged {
        symbols.push(STAGED);
    }
    if status.untracked {
        symbols.push(UNTRACKED);
    }
    if symbols.is_empty() {
        format!(" ({})", status.branch)
    } else {
        format!(" ({} {})", status.branch, symbols)
    }
}
