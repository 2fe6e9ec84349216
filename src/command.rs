//! Parsed protocol commands
//!
//! A `Command` is one line received from the chat server: a verb plus its
//! `key="value"` arguments. Only the parser builds them.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Verbs the chat server can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// A user (or the bot) joined the room
    Join,
    /// A user left the room
    Leave,
    /// A chat line
    Say,
    /// Server-side error report
    Error,
    /// Authentication reply
    Pass,
}

impl Verb {
    /// The literal used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Join => "JOIN",
            Verb::Leave => "LEAVE",
            Verb::Say => "SAY",
            Verb::Error => "ERROR",
            Verb::Pass => "PASS",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed line from the chat server
///
/// Argument keys are unique; when a line repeats a key the first value wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    /// The command verb
    pub name: Verb,
    /// Key/value arguments
    pub args: HashMap<String, String>,
}

impl Command {
    /// Get an argument, or an empty string when the key is absent
    pub fn get(&self, key: &str) -> &str {
        self.args.get(key).map(String::as_str).unwrap_or("")
    }

    /// Whether the line was produced by another bot (`bot="true"`)
    pub fn is_from_bot(&self) -> bool {
        self.get("bot") == "true"
    }
}
