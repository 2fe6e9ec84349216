//! Error types for the bot client
//!
//! One enum per layer: the parser, the protocol client and the session
//! facade. Uses thiserror for ergonomic error definitions. Every error is
//! `Clone` so it can travel inside an [`Event`](crate::event::Event).

use std::time::Duration;

use thiserror::Error;

use crate::command::Verb;

/// Errors produced while parsing one protocol line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The verb is not one of JOIN, LEAVE, SAY, ERROR, PASS
    #[error("parser: invalid command: {0:?}")]
    BadVerb(String),

    /// A key started or continued with an invalid character
    #[error("parser: invalid key character {ch:?} in {line:?}")]
    BadKeyChar { ch: char, line: String },

    /// A key was followed by something other than `=`
    #[error("parser: expected '=' after key, got {ch:?} in {line:?}")]
    MissingEquals { ch: char, line: String },

    /// A value did not start with `"`
    #[error("parser: invalid value start {ch:?} in {line:?}")]
    BadValueStart { ch: char, line: String },

    /// The line ended inside a value
    #[error("parser: unterminated value in {0:?}")]
    UnterminatedValue(String),

    /// Input ran out before the line terminator
    #[error("parser: incomplete message")]
    IncompleteMessage,

    /// The line ended without a complete command
    #[error("parser: incomplete command")]
    IncompleteCommand,
}

/// Errors returned by the protocol client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The connection went away; reported once per disconnect
    #[error("connection closed by the chat server (end of stream)")]
    EndOfStream,

    /// A line was received but could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// No complete line arrived within the read timeout
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The line could not be written within the write timeout
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The socket rejected the write
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The client was closed
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Whether this error marks a lost connection
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ClientError::EndOfStream)
    }
}

/// Errors returned by the session facade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BotError {
    /// Protocol client error
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The first connection could not be established (fatal)
    #[error("unable to connect to the chat server at {0}")]
    ConnectFailed(String),

    /// The server answered PASS with something other than success
    #[error("auth failure, check your credentials (result: {0:?})")]
    AuthFailure(String),

    /// No matching reply within the retry budget
    #[error("never heard back from {verb} after {attempts} attempts")]
    HandshakeTimeout { verb: Verb, attempts: u32 },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    /// An environment variable holds an unusable value
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
