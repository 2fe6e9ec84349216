//! Session state and broadcast events
//!
//! Everything a bot observes is published as an [`Event`]. Uses Serde's
//! tagged enum so a collaborator can stream events as JSON.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::command::Command;
use crate::error::ClientError;

/// Session state of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// Waiting for the chat server (initially or after a disconnect)
    Connecting,
    /// Socket is up, not yet in the room
    Connected,
    /// Authenticated and joined to the room
    Joined,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Joined => "Joined",
        };
        f.write_str(name)
    }
}

/// Bot activity broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session state changed
    StateChange { state: SessionState },
    /// A command was read from the chat server
    ReadCommand { command: Command },
    /// A read failed
    ReadError {
        #[serde(serialize_with = "display")]
        error: ClientError,
    },
    /// A line is being written
    Write { message: String },
    /// A write failed
    WriteError {
        #[serde(serialize_with = "display")]
        error: ClientError,
    },
}

fn display<S: Serializer>(error: &ClientError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}
