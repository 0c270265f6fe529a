//! Raw adapter replies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PROMPT;

/// Text lines the adapter returned for one transaction, before parsing.
///
/// Lines are trimmed; blank lines, the prompt and a line that merely echoes
/// the command are already gone. Everything else, including error tokens
/// and malformed junk, is kept for the decoder to classify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Command that produced this reply, without terminator.
    pub command: String,
    pub lines: Vec<String>,
    /// Time from write to prompt.
    #[serde(default)]
    pub elapsed: Duration,
}

impl RawResponse {
    pub fn new(command: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            command: command.into(),
            lines,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Split a complete reply (everything up to and including `>`) into
    /// lines. ELM327 separates lines with bare `\r` unless `ATL1` is set.
    pub fn from_reply(command: &str, reply: &str) -> Self {
        let lines = reply
            .split(['\r', '\n'])
            .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == char::from(PROMPT)))
            .filter(|line| !line.is_empty() && !is_echo(command, line))
            .map(str::to_string)
            .collect();
        Self::new(command.trim(), lines)
    }

    /// First line, handy for AT command acknowledgements.
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// Whole reply joined with spaces.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Uppercase with all whitespace removed, the form both commands and hex
/// lines are compared in.
pub fn squeeze(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn is_echo(command: &str, line: &str) -> bool {
    let command = squeeze(command);
    !command.is_empty() && squeeze(line) == command
}
