//! Core types for stream observation

use std::fmt;
use std::str::FromStr;

/// One of the three standard streams attached to a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamName {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamName {
    pub const ALL: [StreamName; 3] = [StreamName::Stdin, StreamName::Stdout, StreamName::Stderr];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdin => "stdin",
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            StreamName::Stdin => 0,
            StreamName::Stdout => 1,
            StreamName::Stderr => 2,
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single stream; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
}

/// Event a pattern matcher listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchSource {
    /// Each completed line
    #[default]
    Line,
    /// The full rendered output after every chunk
    Output,
}

impl FromStr for MatchSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(Self::Line),
            "output" => Ok(Self::Output),
            other => Err(format!("unknown match source '{other}' (expected line or output)")),
        }
    }
}

/// Which occurrence is reported when a pattern matches several times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchSelect {
    #[default]
    First,
    Last,
}

impl FromStr for MatchSelect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(format!("unknown match selection '{other}' (expected first or last)")),
        }
    }
}

/// Pattern matcher configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub source: MatchSource,
    pub which: MatchSelect,
}

impl MatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: MatchSource) -> Self {
        self.source = source;
        self
    }

    pub fn which(mut self, which: MatchSelect) -> Self {
        self.which = which;
        self
    }
}

/// Pattern match event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Stream the match was found on
    pub stream: StreamName,
    /// The whole matched text
    pub matched: String,
    /// Capture groups in positional order; `None` for groups that did not participate
    pub captures: Vec<Option<String>>,
}

impl PatternMatch {
    pub(crate) fn from_captures(stream: StreamName, captures: &regex::Captures<'_>) -> Self {
        Self {
            stream,
            matched: captures
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            captures: captures
                .iter()
                .skip(1)
                .map(|m| m.map(|s| s.as_str().to_string()))
                .collect(),
        }
    }

    /// Capture group by position, starting at 1.
    pub fn group(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.captures.get(i))
            .and_then(|m| m.as_deref())
    }
}
