//! # lineup
//!
//! A CLI tool that performs a literal search-and-replace over a source file
//! while keeping multi-line parenthesized argument lists visually aligned.
//!
//! ## Overview
//!
//! `lineup` rewrites every occurrence of a search text in place. Whenever a
//! replaced identifier is followed by an opening parenthesis on the same
//! line, the continuation lines that were aligned on that parenthesis are
//! re-indented so the alignment survives the length change:
//!
//! ```text
//! function_call (param1,
//!                param2,
//!                param3);
//!
//! $ lineup function_call another_beautiful_name file.c
//!
//! another_beautiful_name (param1,
//!                         param2,
//!                         param3);
//! ```
//!
//! The search is case sensitive, regular expressions are not supported, and
//! no word-boundary matching is attempted: a match may occur inside a larger
//! identifier. The tool works with both tab and space indentation — each
//! continuation line keeps its own indentation style, only its width changes.
//! It assumes the input is already well indented and never repairs alignment
//! that was broken before the run.
//!
//! ## Key Components
//!
//! - **Text Geometry**: visual-column arithmetic with tab stops every 8
//!   columns, and leading-whitespace inspection per line.
//! - **Match Location**: literal, case-sensitive forward search producing
//!   ordered, non-overlapping match spans.
//! - **Alignment Adjustment**: detects the anchoring parenthesis after a
//!   match and rewrites the indentation of the aligned continuation block.
//! - **Substitution Engine**: drives the find → replace → realign loop over
//!   the whole buffer and collects run statistics.
//!
//! ## Algorithm Flow
//!
//! ```text
//! Input → Line Buffer → Substitution Loop → Output
//!                            ↓
//!                      For each match:
//!                        - Find anchor '(' on the match line
//!                        - Replace the match text
//!                        - Realign the continuation block
//!                        - Continue past the replacement
//! ```
//!
//! WARNING: the file is rewritten in place without a backup unless `--backup`
//! is given. Run it on version-controlled input so the diff can be reviewed.
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success (including zero matches) |
//! | 1 | General error (file not found, permission denied, I/O error) |
//! | 2 | Invalid command-line arguments |
//! | 3 | Dry-run mode: changes would be made |
//! | 4 | Parse error (invalid UTF-8 or binary input) |
//! | 5 | Alignment violation (replacement does not fit before the parenthesis) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use rich_rust::terminal;
use rich_rust::{ColorSystem, Console};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Exit Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic exit codes for scripting and CI integration
mod exit_codes {
    /// Success - completed without errors, including the zero-match case
    pub const SUCCESS: i32 = 0;
    /// General error (file not found, permission denied, I/O error)
    pub const ERROR: i32 = 1;
    /// Invalid command-line arguments
    pub const INVALID_ARGS: i32 = 2;
    /// Dry-run mode: changes would be made
    pub const WOULD_CHANGE: i32 = 3;
    /// Parse error (invalid UTF-8 or binary file detected)
    pub const PARSE_ERROR: i32 = 4;
    /// Alignment violation: a realigned line would need negative indentation
    pub const ALIGNMENT_ERROR: i32 = 5;
}

#[derive(Debug)]
struct ArgError(String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

#[derive(Debug)]
struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
struct AlignmentError(String);

impl fmt::Display for AlignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AlignmentError {}

#[derive(Debug)]
struct RunOutcome {
    dry_run: bool,
    would_change: bool,
}

fn error_chain_has<T: std::error::Error + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if error_chain_has::<ArgError>(err) {
        exit_codes::INVALID_ARGS
    } else if error_chain_has::<ParseError>(err) {
        exit_codes::PARSE_ERROR
    } else if error_chain_has::<AlignmentError>(err) {
        exit_codes::ALIGNMENT_ERROR
    } else {
        exit_codes::ERROR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColorMode {
    /// Auto-detect color support
    Auto,
    /// Always emit colors (even when not a TTY)
    Always,
    /// Never emit colors
    Never,
}

/// Alignment-preserving search and replace for parenthesized argument lists
#[derive(Parser, Debug)]
#[command(
    name = "lineup",
    version,
    about,
    long_about = None,
    after_help = "WARNING: FILE is rewritten in place without a backup unless --backup is given.\n\
                  Run lineup on version-controlled input so the diff can be reviewed.\n\n\
                  EXIT CODES:\n  0  Success (including zero matches)\n  1  General error (file not found, permission denied, I/O error)\n  2  Invalid command-line arguments\n  3  Dry-run mode: changes would be made\n  4  Parse error (invalid UTF-8 or binary input)\n  5  Alignment violation (replacement does not fit before the parenthesis)\n"
)]
struct Args {
    /// Text to search for (literal, case-sensitive, single-line)
    #[arg(value_name = "SEARCH_TEXT")]
    search_text: String,

    /// Replacement text (may be empty, single-line)
    #[arg(value_name = "REPLACEMENT")]
    replacement: String,

    /// File to rewrite in place
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Path to config file (default: search for .lineuprc)
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Ignore config files
    #[arg(long = "no-config")]
    no_config: bool,

    /// Preview changes without modifying the file (exit 0=no changes, 3=would change)
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show a unified diff of the changes
    #[arg(short = 'd', long)]
    diff: bool,

    /// Verbose output showing each match and realignment
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Color output: auto, always, or never
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Create a backup file before rewriting
    #[arg(long, conflicts_with = "dry_run")]
    backup: bool,

    /// Extension for backup files (default: .bak)
    #[arg(long, default_value = ".bak", requires = "backup")]
    backup_ext: String,

    /// Output results as JSON for programmatic processing
    #[arg(long, conflicts_with_all = ["verbose", "diff"])]
    json: bool,
}

fn validate_args(args: &Args) -> Result<()> {
    if args.search_text.is_empty() {
        return Err(ArgError("SEARCH_TEXT must not be empty".to_string()).into());
    }

    if args.search_text.contains('\n') || args.search_text.contains('\r') {
        return Err(
            ArgError("SEARCH_TEXT must be a single line (no line breaks)".to_string()).into(),
        );
    }

    if args.replacement.contains('\n') || args.replacement.contains('\r') {
        return Err(
            ArgError("REPLACEMENT must be a single line (no line breaks)".to_string()).into(),
        );
    }

    if args.file.as_os_str().is_empty() {
        return Err(ArgError("FILE must be a non-empty path".to_string()).into());
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration derived from CLI args and config file
#[derive(Debug)]
struct Config {
    dry_run: bool,
    diff: bool,
    verbose: bool,
    color: ColorMode,
    backup: bool,
    backup_ext: String,
    json: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            dry_run: args.dry_run,
            diff: args.diff,
            verbose: args.verbose,
            color: args.color,
            backup: args.backup,
            backup_ext: args.backup_ext.clone(),
            json: args.json,
        }
    }
}

/// Statistics collected during a substitution run
#[derive(Default, Clone)]
struct Stats {
    /// Number of occurrences replaced
    matches_replaced: usize,
    /// Number of replaced occurrences anchored on a parenthesis
    matches_anchored: usize,
    /// Number of continuation lines whose indentation was rewritten
    lines_realigned: usize,
    /// Total number of lines in the buffer
    total_lines: usize,
    /// Processing elapsed time
    elapsed: Duration,
}

impl Stats {
    /// Calculate lines processed per second
    fn lines_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_lines as f64 / secs
        } else {
            self.total_lines as f64
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Support
// ─────────────────────────────────────────────────────────────────────────────

/// Config file names searched in order
const CONFIG_FILENAMES: &[&str] = &[".lineuprc", ".lineuprc.toml", "lineuprc.toml"];

/// Configuration loaded from a .lineuprc file.
///
/// The tab width is deliberately not configurable: alignment arithmetic is
/// fixed at tab stops every 8 columns.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// Show verbose output
    verbose: Option<bool>,
    /// Color mode: auto, always, never
    color: Option<ColorMode>,
    /// Output as JSON
    json: Option<bool>,
    /// Show a unified diff of the changes
    diff: Option<bool>,
    /// Create backup before rewriting
    backup: Option<bool>,
    /// Backup file extension
    backup_ext: Option<String>,
}

/// Search for a config file starting from the given directory
fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    // Search up the directory tree
    loop {
        for filename in CONFIG_FILENAMES {
            let config_path = current.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        for filename in CONFIG_FILENAMES {
            let config_path = home.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Create Config by merging file config with CLI args (CLI wins)
fn create_config(args: &Args) -> Result<Config> {
    let mut config = Config::from(args);

    // Skip config file loading if --no-config is set
    if args.no_config {
        return Ok(config);
    }

    // Find and load config file
    let config_path = if let Some(ref path) = args.config_file {
        // Explicit config file specified
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        Some(path.clone())
    } else {
        // Search next to the input file
        let start_dir = args
            .file
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        find_config_file(&start_dir)
    };

    if let Some(path) = config_path {
        let file_config = load_config_file(&path)?;

        // Boolean flags: use file value if CLI flag wasn't set
        if !args.verbose {
            if let Some(v) = file_config.verbose {
                config.verbose = v;
            }
        }

        if args.color == ColorMode::Auto {
            if let Some(c) = file_config.color {
                config.color = c;
            }
        }

        if !args.json {
            if let Some(j) = file_config.json {
                config.json = j;
            }
        }

        if !args.diff {
            if let Some(d) = file_config.diff {
                config.diff = d;
            }
        }

        if !args.backup {
            if let Some(b) = file_config.backup {
                config.backup = b;
            }
        }

        // backup_ext: use file value if CLI used default
        if args.backup_ext == ".bak" {
            if let Some(ext) = file_config.backup_ext {
                config.backup_ext = ext;
            }
        }
    }

    Ok(config)
}

// ─────────────────────────────────────────────────────────────────────────────
// Console Output
// ─────────────────────────────────────────────────────────────────────────────

struct OutputStyle {
    use_color: bool,
}

impl OutputStyle {
    fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn wrap(&self, tag: &str, text: impl fmt::Display) -> String {
        if self.use_color {
            format!("[{}]{}[/]", tag, text)
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: impl fmt::Display) -> String {
        self.wrap("bold cyan", text)
    }

    fn match_line(&self, text: impl fmt::Display) -> String {
        self.wrap("yellow", text)
    }

    fn success(&self, text: impl fmt::Display) -> String {
        self.wrap("bold green", text)
    }

    fn dim(&self, text: impl fmt::Display) -> String {
        self.wrap("dim", text)
    }

    fn stat_label(&self, text: impl fmt::Display) -> String {
        self.wrap("bold blue", text)
    }

    fn separator(&self) -> String {
        self.wrap("dim", "───")
    }
}

fn build_console(color: ColorMode) -> (Console, OutputStyle) {
    match color {
        ColorMode::Never => (Console::new(), OutputStyle::new(false)),
        ColorMode::Always => {
            let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
            let console = Console::builder()
                .force_terminal(true)
                .color_system(system)
                .build();
            (console, OutputStyle::new(true))
        }
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                return (Console::new(), OutputStyle::new(false));
            }

            if std::env::var("FORCE_COLOR").is_ok() {
                let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
                let console = Console::builder()
                    .force_terminal(true)
                    .color_system(system)
                    .build();
                return (console, OutputStyle::new(true));
            }

            let console = Console::new();
            let use_color = console.is_color_enabled();
            (console, OutputStyle::new(use_color))
        }
    }
}

/// Print a statistics summary to the console
fn print_stats_summary(stats: &Stats, console: &Console, styles: &OutputStyle) {
    console.print("");
    console.print(&format!(
        "{} Summary {}",
        styles.separator(),
        styles.separator()
    ));

    console.print(&format!(
        "  {} {} replaced, {} anchored on a parenthesis",
        styles.stat_label("Matches:"),
        stats.matches_replaced,
        stats.matches_anchored
    ));

    console.print(&format!(
        "  {} {} realigned, {} total",
        styles.stat_label("Lines:"),
        stats.lines_realigned,
        stats.total_lines
    ));

    let elapsed_ms = stats.elapsed.as_secs_f64() * 1000.0;
    console.print(&format!(
        "  {} {:.2}ms ({:.0} lines/sec)",
        styles.stat_label("Time:"),
        elapsed_ms,
        stats.lines_per_second()
    ));

    console.print("");
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Output Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonOutput {
    version: &'static str,
    status: String,
    file: String,
    input: InputStats,
    substitution: SubstitutionStats,
    output: OutputStats,
}

#[derive(Serialize)]
struct InputStats {
    lines: usize,
    bytes: usize,
}

#[derive(Serialize)]
struct SubstitutionStats {
    matches_replaced: usize,
    matches_anchored: usize,
    lines_realigned: usize,
}

#[derive(Serialize)]
struct OutputStats {
    lines: usize,
    bytes: usize,
    changed: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Text Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed tab width for visual-column arithmetic. Not configurable.
const TAB_WIDTH: usize = 8;

/// Visual column of the position before the codepoint at `up_to`.
///
/// Starting at column 0, each tab advances to the next multiple of
/// [`TAB_WIDTH`] (a full stop when already on one); every other codepoint
/// advances by one column. Defined for `up_to` from 0 through the line
/// length inclusive.
fn visual_column(line: &str, up_to: usize) -> usize {
    let mut col = 0;
    for c in line.chars().take(up_to) {
        if c == '\t' {
            col += TAB_WIDTH - col % TAB_WIDTH;
        } else {
            col += 1;
        }
    }
    col
}

/// Byte offset of the codepoint at index `col`, or the line length when
/// `col` is past the end.
fn byte_offset(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(offset, _)| offset)
        .unwrap_or(line.len())
}

/// Result of inspecting a line's leading whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeadingInfo {
    /// Visual column of the first non-whitespace codepoint, or `None` for a
    /// blank or whitespace-only line
    text_start_col: Option<usize>,
    /// True if the leading whitespace run contains at least one tab
    contains_tab: bool,
}

/// Inspect the leading whitespace run (spaces and tabs) of a line.
fn leading_info(line: &str) -> LeadingInfo {
    let mut contains_tab = false;

    for (i, c) in line.chars().enumerate() {
        match c {
            '\t' => contains_tab = true,
            ' ' => {}
            _ => {
                return LeadingInfo {
                    text_start_col: Some(visual_column(line, i)),
                    contains_tab,
                };
            }
        }
    }

    LeadingInfo {
        text_start_col: None,
        contains_tab,
    }
}

/// Number of leading whitespace codepoints (spaces and tabs) of a line.
fn leading_len(line: &str) -> usize {
    line.chars().take_while(|&c| c == ' ' || c == '\t').count()
}

// ─────────────────────────────────────────────────────────────────────────────
// Match Location
// ─────────────────────────────────────────────────────────────────────────────

/// A position in the line buffer: line index plus codepoint column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    line: usize,
    col: usize,
}

/// One occurrence of the search text: a half-open codepoint span on a
/// single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    line: usize,
    start: usize,
    end: usize,
}

/// Find the next occurrence of `needle` at or after `from`.
///
/// Literal, case-sensitive search, strictly forward. The search text is
/// single-line by contract, so every span lies within one line. Matches may
/// occur inside larger identifiers; the caller keeps spans non-overlapping
/// by advancing `from` past each replacement.
fn find_next(lines: &[String], from: Position, needle: &str) -> Option<Span> {
    for line_idx in from.line..lines.len() {
        let line = &lines[line_idx];
        let start_col = if line_idx == from.line { from.col } else { 0 };
        let start_byte = byte_offset(line, start_col);

        if let Some(found) = line[start_byte..].find(needle) {
            let match_byte = start_byte + found;
            let start = line[..match_byte].chars().count();
            let end = start + needle.chars().count();
            return Some(Span {
                line: line_idx,
                start,
                end,
            });
        }
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Alignment Adjustment
// ─────────────────────────────────────────────────────────────────────────────

/// Visual column just after the first `(` at or past `from_col` on this
/// line, or `None` when the line has no parenthesis there.
///
/// Continuation lines of a well-aligned argument list start exactly at this
/// column, so it is the anchor the realignment pass matches against.
fn anchor_column(line: &str, from_col: usize) -> Option<usize> {
    line.chars()
        .enumerate()
        .skip(from_col)
        .find(|&(_, c)| c == '(')
        .map(|(i, _)| visual_column(line, i + 1))
}

/// Replace the half-open codepoint span `start..end` of a line.
fn replace_span(line: &mut String, start: usize, end: usize, replacement: &str) {
    let start_byte = byte_offset(line, start);
    let end_byte = byte_offset(line, end);
    line.replace_range(start_byte..end_byte, replacement);
}

/// Rewrite the indentation of one continuation line to `old_col + delta`
/// visual columns.
///
/// The whole leading whitespace run is deleted and rebuilt: `new / 8` tabs
/// plus `new % 8` spaces when the line's own indentation contained a tab,
/// plain spaces otherwise. A negative target width is a contract violation
/// reported as a fatal [`AlignmentError`].
fn realign_line(
    line: &mut String,
    line_idx: usize,
    old_col: usize,
    delta: isize,
    with_tabs: bool,
) -> Result<()> {
    let new_col = old_col as isize + delta;
    if new_col < 0 {
        return Err(AlignmentError(format!(
            "line {}: replacement would shrink the indentation below column 0 \
             (current column {}, shift {})",
            line_idx + 1,
            old_col,
            delta
        ))
        .into());
    }
    let new_col = new_col as usize;

    let indentation = if with_tabs {
        let mut s = "\t".repeat(new_col / TAB_WIDTH);
        s.push_str(&" ".repeat(new_col % TAB_WIDTH));
        s
    } else {
        " ".repeat(new_col)
    };

    let text_start_byte = byte_offset(line, leading_len(line));
    line.replace_range(..text_start_byte, &indentation);
    Ok(())
}

/// Realign the continuation block below a just-replaced match line.
///
/// Walks the lines immediately after `match_line`. A line whose first
/// non-whitespace codepoint sits exactly at `anchor_col` is a continuation
/// line and is realigned by `delta` columns; the first line that differs, or
/// is blank, ends the block permanently for this match. Returns the number
/// of lines rewritten.
fn realign_following_lines(
    lines: &mut [String],
    match_line: usize,
    anchor_col: usize,
    delta: isize,
) -> Result<usize> {
    let mut realigned = 0;

    for idx in match_line + 1..lines.len() {
        let info = leading_info(&lines[idx]);
        match info.text_start_col {
            Some(col) if col == anchor_col => {
                realign_line(&mut lines[idx], idx, col, delta, info.contains_tab)?;
                realigned += 1;
            }
            _ => break,
        }
    }

    Ok(realigned)
}

// ─────────────────────────────────────────────────────────────────────────────
// Substitution Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Replace every occurrence of `search_text` in the buffer, realigning the
/// continuation block of each anchored match.
///
/// The cursor starts at the buffer start. For each match, the anchor
/// parenthesis is located on the match line before the edit, the span is
/// replaced, the continuation block is realigned, and the cursor advances to
/// the position just past the replacement end — lengths may differ, and the
/// search must never re-trigger on text a replacement just inserted.
///
/// Every edit is intra-line, so line indices are stable for the whole run;
/// only same-line columns are re-derived after a mutation.
fn run_substitution(
    lines: &mut [String],
    search_text: &str,
    replacement: &str,
    config: &Config,
    console: &Console,
    styles: &OutputStyle,
) -> Result<Stats> {
    debug_assert!(!search_text.is_empty());

    let start_time = Instant::now();
    let mut stats = Stats {
        total_lines: lines.len(),
        ..Stats::default()
    };

    let search_len = search_text.chars().count();
    let replacement_len = replacement.chars().count();
    let delta = replacement_len as isize - search_len as isize;

    let mut cursor = Position { line: 0, col: 0 };
    while let Some(span) = find_next(lines, cursor, search_text) {
        // The anchor must be taken from the pre-replacement line: the
        // continuation block is still aligned on the old parenthesis column.
        let anchor = anchor_column(&lines[span.line], span.end);

        replace_span(&mut lines[span.line], span.start, span.end, replacement);
        stats.matches_replaced += 1;

        if config.verbose {
            console.print(&styles.match_line(format!(
                "  match at line {}, column {}",
                span.line + 1,
                span.start + 1
            )));
        }

        if let Some(anchor_col) = anchor {
            stats.matches_anchored += 1;
            let realigned = realign_following_lines(lines, span.line, anchor_col, delta)?;
            stats.lines_realigned += realigned;

            if config.verbose && realigned > 0 {
                console.print(&styles.dim(format!(
                    "    realigned {} continuation line(s) to column {}",
                    realigned,
                    anchor_col as isize + delta
                )));
            }
        }

        cursor = Position {
            line: span.line,
            col: span.start + replacement_len,
        };
    }

    stats.elapsed = start_time.elapsed();
    Ok(stats)
}

// ─────────────────────────────────────────────────────────────────────────────
// File I/O
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum file size (100 MB) - reject larger files to prevent memory issues
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// A loaded source file: its lines and whether it ended with a newline.
///
/// The loader normalizes CRLF to LF; the final-newline flag lets the saver
/// reproduce the file's original ending exactly.
#[derive(Debug)]
struct SourceFile {
    lines: Vec<String>,
    trailing_newline: bool,
}

/// Read a source file into a line buffer
fn read_source(path: &Path) -> Result<SourceFile> {
    // Check file size before reading
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;

    if metadata.len() > MAX_FILE_SIZE {
        return Err(ParseError(format!(
            "File too large: {} ({} MB). Maximum supported size is {} MB.",
            path.display(),
            metadata.len() / (1024 * 1024),
            MAX_FILE_SIZE / (1024 * 1024)
        ))
        .into());
    }

    let source_label = path.display().to_string();
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    parse_bytes(bytes, &source_label)
}

/// Convert raw bytes to a line buffer, checking for binary content and valid UTF-8
fn parse_bytes(bytes: Vec<u8>, source_label: &str) -> Result<SourceFile> {
    if bytes.contains(&0) {
        return Err(ParseError(format!("Input appears to be binary: {}", source_label)).into());
    }

    let content = String::from_utf8(bytes).map_err(|err| {
        let utf8_err = err.utf8_error();
        let valid_up_to = utf8_err.valid_up_to();
        let byte = err.as_bytes().get(valid_up_to).copied();
        let detail = match byte {
            Some(b) => format!(
                "Invalid UTF-8 at byte position {} (byte value: 0x{:02X}) in {}",
                valid_up_to, b, source_label
            ),
            None => format!("Invalid UTF-8 in {}", source_label),
        };
        ParseError(detail)
    })?;

    let trailing_newline = content.ends_with('\n');
    let lines = content.lines().map(String::from).collect();

    Ok(SourceFile {
        lines,
        trailing_newline,
    })
}

/// Serialize a line buffer back to file content
fn render(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Creates a backup of the file by appending the extension to the filename.
/// For example: "file.c" with extension ".bak" becomes "file.c.bak"
fn create_backup(path: &Path, ext: &str) -> Result<PathBuf> {
    let mut backup_name = path.as_os_str().to_owned();
    backup_name.push(ext);
    let backup_path = PathBuf::from(backup_name);

    fs::copy(path, &backup_path)
        .with_context(|| format!("Failed to create backup at {}", backup_path.display()))?;

    Ok(backup_path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

/// Result of processing the input file
struct FileResult {
    filename: String,
    original: Vec<String>,
    modified: Vec<String>,
    trailing_newline: bool,
    stats: Stats,
    would_change: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::INVALID_ARGS,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let exit_code = match run(args) {
        Ok(outcome) => {
            if outcome.dry_run && outcome.would_change {
                exit_codes::WOULD_CHANGE
            } else {
                exit_codes::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for_error(&err)
        }
    };

    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<RunOutcome> {
    validate_args(&args)?;

    let config = create_config(&args)?;
    let (console, styles) = build_console(config.color);

    let source = read_source(&args.file)?;
    let result = process_source(source, &args, &config, &console, &styles)?;

    output_result(&args, &config, &console, &styles, result)
}

/// Run the substitution over a loaded file and collect the result
fn process_source(
    source: SourceFile,
    args: &Args,
    config: &Config,
    console: &Console,
    styles: &OutputStyle,
) -> Result<FileResult> {
    if config.verbose {
        console.print(&styles.header(format!(
            "Processing {} ({} lines)...",
            args.file.display(),
            source.lines.len()
        )));
    }

    let original = source.lines.clone();
    let mut lines = source.lines;
    let stats = run_substitution(
        &mut lines,
        &args.search_text,
        &args.replacement,
        config,
        console,
        styles,
    )?;

    let would_change = original != lines;

    Ok(FileResult {
        filename: args.file.display().to_string(),
        original,
        modified: lines,
        trailing_newline: source.trailing_newline,
        stats,
        would_change,
    })
}

/// Handle output for the processed file
fn output_result(
    args: &Args,
    config: &Config,
    console: &Console,
    styles: &OutputStyle,
    result: FileResult,
) -> Result<RunOutcome> {
    if config.json {
        output_json(config, &result)?;
    }

    if config.diff {
        output_diff(&result, config.dry_run)?;
    }

    if config.dry_run {
        if config.verbose {
            if result.would_change {
                console.print(&styles.match_line(format!("Would modify: {}", result.filename)));
            } else {
                console.print(&styles.success(format!("No changes needed: {}", result.filename)));
            }
        }
    } else if result.would_change {
        if config.backup {
            let backup_path = create_backup(&args.file, &config.backup_ext)?;
            if config.verbose {
                console.print(&styles.dim(format!("Created backup: {}", backup_path.display())));
            }
        }

        let output = render(&result.modified, result.trailing_newline);
        fs::write(&args.file, &output)
            .with_context(|| format!("Failed to write to file: {}", args.file.display()))?;

        if config.verbose {
            console.print(&styles.success(format!("Rewrote {}", result.filename)));
        }
    } else if config.verbose {
        // Zero matches (or a replacement identical to the search text):
        // leave the file untouched byte for byte.
        console.print(&styles.success(format!("No changes needed: {}", result.filename)));
    }

    if config.verbose {
        print_stats_summary(&result.stats, console, styles);
    }

    Ok(RunOutcome {
        dry_run: config.dry_run,
        would_change: result.would_change,
    })
}

/// Output a unified diff of the changes
fn output_diff(result: &FileResult, proposed: bool) -> Result<()> {
    if !result.would_change {
        return Ok(());
    }

    let original_text = result.original.join("\n");
    let modified_text = result.modified.join("\n");
    let diff = TextDiff::from_lines(&original_text, &modified_text);
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "--- a/{}", result.filename)?;
    if proposed {
        writeln!(stdout, "+++ b/{} (proposed)", result.filename)?;
    } else {
        writeln!(stdout, "+++ b/{}", result.filename)?;
    }

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        writeln!(stdout, "{}", hunk.header())?;
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let line = change.value();
            if line.ends_with('\n') {
                write!(stdout, "{}{}", sign, line)?;
            } else {
                writeln!(stdout, "{}{}", sign, line)?;
            }
        }
    }

    Ok(())
}

/// Output the run result as JSON
fn output_json(config: &Config, result: &FileResult) -> Result<()> {
    let original_text = render(&result.original, result.trailing_newline);
    let modified_text = render(&result.modified, result.trailing_newline);

    let json_output = JsonOutput {
        version: "1.0",
        status: if config.dry_run {
            "dry_run".to_string()
        } else {
            "success".to_string()
        },
        file: result.filename.clone(),
        input: InputStats {
            lines: result.original.len(),
            bytes: original_text.len(),
        },
        substitution: SubstitutionStats {
            matches_replaced: result.stats.matches_replaced,
            matches_anchored: result.stats.matches_anchored,
            lines_realigned: result.stats.lines_realigned,
        },
        output: OutputStats {
            lines: result.modified.len(),
            bytes: modified_text.len(),
            changed: result.would_change,
        },
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json_output).context("Failed to serialize JSON output")?
    );

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
