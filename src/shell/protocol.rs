//! Text framing for the tool's interactive shell.
//!
//! The shell has no message framing of its own. A response is complete once
//! the idle prompt shows up at the end of the output, and failures are
//! flagged inline with asterisk-delimited markers such as
//! `*** Error (-1: 'Unspecified error') ***`. Both patterns must match the
//! tool's output character for character.

use std::sync::LazyLock;

use regex::Regex;

use super::outcome::Outcome;

/// Error marker: a run of `*`, the word `Error` plus message, a run of `*`.
static ERROR_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*+\s*(Error.*?)\s*\*+").expect("valid regex for error marker")
});

/// Prompt recognizer for one tool.
///
/// Matches a trailing line such as `gphoto2: {/home/user} /> `: the tool tag,
/// a context token in braces, optional text, then `>` and optional whitespace
/// at the very end of the accumulated output.
#[derive(Debug, Clone)]
pub struct Protocol {
    prompt: Regex,
}

impl Protocol {
    /// Build the prompt pattern for the given tool tag (e.g. `gphoto2`).
    pub fn new(tool_tag: &str) -> Result<Self, regex::Error> {
        let pattern = format!(r"{}: \{{.*\}} .*>\s*$", regex::escape(tool_tag));
        Ok(Self {
            prompt: Regex::new(&pattern)?,
        })
    }

    /// Whether the accumulated output ends with a prompt.
    pub fn has_prompt(&self, text: &str) -> bool {
        self.prompt.is_match(text)
    }

    /// Returns the output preceding the prompt, or `None` if no prompt yet.
    pub fn strip_prompt<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.prompt.find(text).map(|m| &text[..m.start()])
    }
}

/// Whether the text contains an error marker.
pub fn has_error_marker(text: &str) -> bool {
    ERROR_MARKER.is_match(text)
}

/// Replace every error marker with the message it wraps.
pub fn strip_markers(text: &str) -> String {
    ERROR_MARKER.replace_all(text, "${1}").into_owned()
}

/// Remove the tool's echo of `command` from a trimmed response.
///
/// Leading lines consisting only of the command are dropped, as is a final
/// line consisting only of the command. Payload text that merely starts with
/// the command is kept.
pub fn strip_echo<'a>(command: &str, text: &'a str) -> &'a str {
    let command = command.trim();
    let mut rest = text.trim_start();
    if command.is_empty() {
        return rest;
    }

    while let Some(after) = rest.strip_prefix(command) {
        let line_end = after.find('\n').unwrap_or(after.len());
        if !after[..line_end].trim().is_empty() {
            break;
        }
        rest = after.trim_start();
    }

    if let Some((head, last)) = rest.rsplit_once('\n') {
        if last.trim() == command {
            rest = head.trim_end();
        }
    }
    rest
}

/// Turn the output of one command (prompt already removed) into an outcome.
pub fn classify_response(command: &str, response: &str) -> Outcome {
    let out = response.trim();
    let cleaned = strip_echo(command, out);
    if has_error_marker(out) {
        Outcome::reported(strip_markers(cleaned).trim())
    } else {
        Outcome::Success(cleaned.to_string())
    }
}

/// Outcome for a burst of stderr seen while the tool starts up.
///
/// The message may be empty when the tool wrote only whitespace.
pub fn bootstrap_failure(stderr: &str) -> Outcome {
    Outcome::reported(strip_markers(stderr.trim()))
}
