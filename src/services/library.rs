//! Lookups and conversions against the external music library tool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use crate::analyzers::identity::strip_title_suffixes;
use crate::{Result, UpgraderError};

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:punct:]\p{P}]").unwrap());

/// Field separator of the lookup output format.
const LIST_FORMAT: &str = "$path\t$original_year\t$year\t$id";

/// Replaces punctuation with the optional wildcard `.?` and makes the first
/// letter case-insensitive: `Hey, That's Right!` becomes `[Hh]ey.? That.?s Right.?`.
pub fn regexify(token: &str) -> String {
    let wild = PUNCTUATION.replace_all(token, ".?");
    let mut chars = wild.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() => {
            let upper: String = first.to_uppercase().collect();
            let lower: String = first.to_lowercase().collect();
            if upper == lower {
                wild.into_owned()
            } else {
                format!("[{}{}]{}", upper, lower, chars.as_str())
            }
        }
        _ => wild.into_owned(),
    }
}

/// How a track is looked up, tried in a fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// The player's tag values as they are.
    Exact,
    /// Anchored patterns with punctuation wildcarded.
    Regex,
    /// Like `Regex`, with bracketed title suffixes removed and the track number pinned.
    Parsed,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Exact => "exact",
            SearchStrategy::Regex => "regex",
            SearchStrategy::Parsed => "parsed",
        }
    }

    pub fn is_fuzzy(&self) -> bool {
        !matches!(self, SearchStrategy::Exact)
    }

    pub fn build(&self, title: &str, artist: &str, album: &str, track_number: Option<u32>) -> TrackQuery {
        let mut terms = Vec::with_capacity(4);
        let mut push = |field: &'static str, value: &str, kind: TermMatch| {
            let value = value.trim();
            if !value.is_empty() {
                let value = match kind {
                    TermMatch::Pattern => regexify(value),
                    TermMatch::Whole | TermMatch::Number => value.to_string(),
                };
                terms.push(QueryTerm { field, value, kind });
            }
        };

        match self {
            SearchStrategy::Exact => {
                push("artist", artist, TermMatch::Whole);
                push("album", album, TermMatch::Whole);
                push("title", title, TermMatch::Whole);
            }
            SearchStrategy::Regex => {
                push("artist", artist, TermMatch::Pattern);
                push("album", album, TermMatch::Pattern);
                push("title", title, TermMatch::Pattern);
            }
            SearchStrategy::Parsed => {
                push("artist", artist, TermMatch::Pattern);
                push("album", album, TermMatch::Pattern);
                push("title", &strip_title_suffixes(title), TermMatch::Pattern);
                if let Some(number) = track_number.filter(|n| *n > 0) {
                    push("track", &number.to_string(), TermMatch::Number);
                }
            }
        }

        TrackQuery { strategy: *self, terms }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a term's value is compared against the library field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermMatch {
    /// The whole field, ignoring case.
    Whole,
    /// An anchored regular expression.
    Pattern,
    /// A numeric field.
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub field: &'static str,
    pub value: String,
    pub kind: TermMatch,
}

impl QueryTerm {
    /// `field:=~value` for whole-field terms, `field::^pattern$` for
    /// patterns, `field:value` for numbers.
    pub fn to_arg(&self) -> String {
        match self.kind {
            TermMatch::Whole => format!("{}:=~{}", self.field, self.value),
            TermMatch::Pattern => format!("{}::^{}$", self.field, self.value),
            TermMatch::Number => format!("{}:{}", self.field, self.value),
        }
    }
}

/// A query descriptor, independent of how the library tool is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackQuery {
    pub strategy: SearchStrategy,
    pub terms: Vec<QueryTerm>,
}

/// A track found in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryMatch {
    pub path: PathBuf,
    pub original_year: String,
    pub year: String,
    pub id: String,
}

pub trait LibraryService {
    /// Zero or one match. Malformed patterns fail with `UpgraderError::InvalidQuery`.
    fn find_track(&self, query: &TrackQuery) -> Result<Option<LibraryMatch>>;

    /// Transcodes a library file; the output location follows the tool's own layout.
    fn convert(&self, path: &Path) -> Result<()>;
}

/// Drives the library tool through its command line.
pub struct CliLibrary {
    command: Vec<String>,
}

impl CliLibrary {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(UpgraderError::Config("library command must not be empty".into()));
        }
        Ok(Self { command })
    }

    fn program(&self) -> &str {
        &self.command[0]
    }

    fn execute(&self, args: &[String]) -> Result<std::process::Output> {
        log::debug!("Running {} {:?}", self.command.join(" "), args);
        Command::new(self.program())
            .args(&self.command[1..])
            .args(args)
            .output()
            .map_err(|e| UpgraderError::Command {
                program: self.program().to_string(),
                message: e.to_string(),
            })
    }
}

impl LibraryService for CliLibrary {
    fn find_track(&self, query: &TrackQuery) -> Result<Option<LibraryMatch>> {
        let mut args = vec!["ls".to_string(), "-f".to_string(), LIST_FORMAT.to_string()];
        args.extend(query.terms.iter().map(QueryTerm::to_arg));

        let output = self.execute(&args)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let message = stderr.trim().to_string();
            if message.to_lowercase().contains("query") {
                return Err(UpgraderError::InvalidQuery(message));
            }
            return Err(UpgraderError::Command {
                program: self.program().to_string(),
                message,
            });
        }

        Ok(single_match(&String::from_utf8_lossy(&output.stdout), query.strategy))
    }

    fn convert(&self, path: &Path) -> Result<()> {
        let args = vec![
            "convert".to_string(),
            "-y".to_string(),
            format!("path:{}", path.display()),
        ];
        let output = self.execute(&args)?;
        if !output.status.success() {
            return Err(UpgraderError::Command {
                program: self.program().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// The one listed track, or `None` when there are none or several.
/// Several hits cannot be told apart, so none of them is trusted.
pub fn single_match(stdout: &str, strategy: SearchStrategy) -> Option<LibraryMatch> {
    let lines: Vec<&str> = stdout.lines().filter(|line| !line.trim().is_empty()).collect();
    match lines.as_slice() {
        [line] => Some(parse_list_line(line)),
        [] => None,
        several => {
            log::warn!("{} query matched {} tracks, ignoring them", strategy, several.len());
            None
        }
    }
}

fn parse_list_line(line: &str) -> LibraryMatch {
    let mut fields = line.split('\t');
    let mut next = || fields.next().unwrap_or("").trim().to_string();
    LibraryMatch {
        path: PathBuf::from(next()),
        original_year: next(),
        year: next(),
        id: next(),
    }
}
