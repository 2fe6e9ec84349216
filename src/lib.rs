//! Resilient Chat Room Bot Library
//!
//! A client for a line-oriented chat protocol carried over TLS, built on
//! tokio using the Actor pattern.
//!
//! # Features
//! - Escaping-aware protocol line parser
//! - Single-owner connection loop with transparent reconnect and backoff
//! - PASS/JOIN handshake with bounded retries, re-run after every reconnect
//! - Room moderation commands (kick, ban, mute, erase, ...)
//! - Event broadcast to multiple subscribers with slow-consumer eviction
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ConnectionLoop` exclusively owns the socket; `ProtocolClient` talks to
//!   it through bounded request queues with private `oneshot` replies
//! - `EventHub` owns the subscriber registry and fans events out
//! - `Bot` composes both and drives the session state machine
//!
//! # Example
//! ```ignore
//! use roombot::{Bot, BotOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), roombot::BotError> {
//!     let bot = Bot::connect("chat.example.com:2020", "key", "secret", "owner-id", BotOptions::default()).await?;
//!     bot.join_room().await?;
//!
//!     loop {
//!         let Ok(cmd) = bot.read().await else { continue };
//!         if cmd.name == roombot::Verb::Say && !cmd.is_from_bot() {
//!             bot.say(cmd.get("message")).await?;
//!         }
//!     }
//! }
//! ```

pub mod bot;
pub mod client;
pub mod command;
pub mod config;
mod connection;
pub mod error;
pub mod event;
pub mod hub;
pub mod parser;
pub mod room;
pub mod throttle;
pub mod tls;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use bot::{Bot, BotOptions, Info};
pub use client::{ClientOptions, ProtocolClient, Stats, Transport};
pub use command::{Command, Verb};
pub use config::BotConfig;
pub use error::{BotError, ClientError, ConfigError, ParseError};
pub use event::{Event, SessionState};
pub use hub::{EventHub, HubHandle};
pub use parser::{parse, parse_line};
pub use room::{Role, Room};
pub use throttle::CommandThrottle;
pub use types::SubscriberId;
