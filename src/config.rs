//! Bot configuration
//!
//! Loaded from environment variables:
//!
//! | Variable           | Meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `CHAT_HOST`        | chat server `host:port`                   |
//! | `BOT_KEY`          | bot key (required)                        |
//! | `BOT_SECRET`       | bot secret (required)                     |
//! | `BOT_PUBLIC_ID`    | public id of the room owner (required)    |
//! | `CHAT_TLS`         | `insecure` (default), `verify` or `plain` |
//! | `BOT_LOG_COMMANDS` | `true` to log every line at debug level   |

use std::env;

use crate::bot::BotOptions;
use crate::client::{ClientOptions, Transport};
use crate::error::ConfigError;

/// Default chat server address
pub const DEFAULT_HOST: &str = "localhost:2020";

/// Everything needed to start a bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub host: String,
    pub key: String,
    pub secret: String,
    pub public_id: String,
    pub transport: Transport,
    pub log_commands: bool,
}

impl BotConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let transport = match lookup("CHAT_TLS").as_deref() {
            None | Some("") | Some("insecure") => Transport::Tls { verify: false },
            Some("verify") => Transport::Tls { verify: true },
            Some("plain") => Transport::Plain,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CHAT_TLS",
                    value: other.to_string(),
                })
            }
        };

        let log_commands = match lookup("BOT_LOG_COMMANDS").as_deref() {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "BOT_LOG_COMMANDS",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            host: lookup("CHAT_HOST")
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            key: required("BOT_KEY")?,
            secret: required("BOT_SECRET")?,
            public_id: required("BOT_PUBLIC_ID")?,
            transport,
            log_commands,
        })
    }

    /// Session options for this configuration, defaults elsewhere
    pub fn options(&self) -> BotOptions {
        BotOptions {
            client: ClientOptions {
                transport: self.transport,
                log_commands: self.log_commands,
                ..ClientOptions::default()
            },
            ..BotOptions::default()
        }
    }
}
