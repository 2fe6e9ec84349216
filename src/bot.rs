//! Session facade
//!
//! A `Bot` is one authenticated presence in a chat room. It builds protocol
//! lines with [`Room`], sends them through its [`ProtocolClient`], runs the
//! PASS/JOIN handshake (again, transparently, after every reconnect) and
//! publishes everything it sees to subscribers through the [`EventHub`].

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ClientOptions, ProtocolClient, Stats};
use crate::command::{Command, Verb};
use crate::config::BotConfig;
use crate::error::{BotError, ClientError};
use crate::event::{Event, SessionState};
use crate::hub::{EventHub, HubHandle};
use crate::room::Room;
use crate::types::SubscriberId;

/// Session settings
#[derive(Debug, Clone)]
pub struct BotOptions {
    /// Protocol client settings
    pub client: ClientOptions,
    /// How many times construction polls for the first connection
    pub connect_attempts: u32,
    /// Delay between those polls
    pub connect_poll: Duration,
    /// Reads allowed while waiting for a PASS or JOIN reply
    pub handshake_attempts: u32,
    /// Timeout of each handshake write and read
    pub handshake_timeout: Duration,
    /// Timeout of outbound chat actions
    pub write_timeout: Duration,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            connect_attempts: 10,
            connect_poll: Duration::from_secs(1),
            handshake_attempts: 5,
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// State and start time of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Info {
    pub state: SessionState,
    pub started: DateTime<Utc>,
}

/// A bot user connected to a chat room
///
/// All methods take `&self`; share a bot between a reader task and writers
/// with an `Arc`.
#[derive(Debug)]
pub struct Bot {
    room: Room,
    key: String,
    secret: String,
    client: ProtocolClient,
    state: RwLock<SessionState>,
    started: DateTime<Utc>,
    hub: HubHandle,
    options: BotOptions,
}

impl Bot {
    /// Connect to the chat server
    ///
    /// Waits up to `connect_attempts * connect_poll` for the first
    /// connection. Failure is final: build a new bot to try again.
    pub async fn connect(
        host: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
        user_public_id: &str,
        options: BotOptions,
    ) -> Result<Self, BotError> {
        let host = host.into();
        let bot = Self {
            room: Room::for_user(user_public_id),
            key: key.into(),
            secret: secret.into(),
            client: ProtocolClient::connect(host.clone(), options.client.clone()),
            state: RwLock::new(SessionState::Disconnected),
            started: Utc::now(),
            hub: EventHub::spawn(),
            options,
        };

        bot.set_state(SessionState::Connecting).await;
        for _ in 0..bot.options.connect_attempts {
            if bot.client.stats().online {
                bot.set_state(SessionState::Connected).await;
                return Ok(bot);
            }
            tokio::time::sleep(bot.options.connect_poll).await;
        }

        bot.client.close();
        bot.set_state(SessionState::Disconnected).await;
        Err(BotError::ConnectFailed(host))
    }

    /// Connect using a loaded configuration
    pub async fn from_config(config: BotConfig) -> Result<Self, BotError> {
        let options = config.options();
        Self::connect(
            config.host,
            config.key,
            config.secret,
            &config.public_id,
            options,
        )
        .await
    }

    /// Authenticate, then join the room
    pub async fn join_room(&self) -> Result<(), BotError> {
        self.pass().await?;
        self.join().await
    }

    /// Authenticate with the chat server
    pub async fn pass(&self) -> Result<(), BotError> {
        let command = self.room.pass(&self.key, &self.secret);
        let reply = self.exchange(command, Verb::Pass).await?;

        let result = reply.get("result");
        if result != "success" {
            warn!("Bot {} authentication rejected: {:?}", self.room, result);
            return Err(BotError::AuthFailure(result.to_string()));
        }

        if self.state() == SessionState::Connecting {
            self.set_state(SessionState::Connected).await;
        }
        Ok(())
    }

    /// Join the room
    pub async fn join(&self) -> Result<(), BotError> {
        self.exchange(self.room.join(), Verb::Join).await?;
        self.set_state(SessionState::Joined).await;
        Ok(())
    }

    /// Read one command, waiting as long as it takes
    pub async fn read(&self) -> Result<Command, BotError> {
        self.read_timeout(None).await
    }

    /// Read one command
    ///
    /// When the connection drops, the end-of-stream error is returned once,
    /// but only after the bot has authenticated and joined again; a failed
    /// re-handshake is returned instead.
    pub async fn read_timeout(&self, timeout: Option<Duration>) -> Result<Command, BotError> {
        match self.read_once(timeout).await {
            Ok(cmd) => Ok(cmd),
            Err(err) if err.is_end_of_stream() => {
                info!("Bot {} lost its connection, rejoining", self.room);
                self.set_state(SessionState::Connecting).await;
                self.pass().await?;
                self.join().await?;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Send a chat message to the room
    pub async fn say(&self, message: &str) -> Result<(), BotError> {
        self.send(self.room.say(message)).await
    }

    /// Kick a user out of the room
    pub async fn kick(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.kick(user_public_id)).await
    }

    /// Ban a user from the room
    pub async fn ban(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.ban(user_public_id)).await
    }

    /// Restore a banned user to the user role
    pub async fn unban(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.unban(user_public_id)).await
    }

    /// Make a user a moderator
    pub async fn moderate(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.moderate(user_public_id)).await
    }

    /// Mute a user with the guest role
    pub async fn mute_guest(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.mute_guest(user_public_id)).await
    }

    /// Mute a user
    pub async fn mute(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.mute(user_public_id)).await
    }

    /// Restore a muted user to the user role
    pub async fn unmute(&self, user_public_id: &str) -> Result<(), BotError> {
        self.send(self.room.unmute(user_public_id)).await
    }

    /// Erase a chat message
    pub async fn erase(&self, message_id: &str) -> Result<(), BotError> {
        self.send(self.room.erase(message_id)).await
    }

    /// Send LEAVE (best effort), close the connection and go `Disconnected`
    pub async fn leave(&self) {
        let leave = self.send(self.room.leave());
        match tokio::time::timeout(self.options.write_timeout, leave).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Bot {} could not send LEAVE: {}", self.room, e),
            Err(_) => warn!("Bot {} could not send LEAVE: timed out", self.room),
        }
        self.client.close();
        self.set_state(SessionState::Disconnected).await;
    }

    /// Current state and start time
    pub fn info(&self) -> Info {
        Info {
            state: self.state(),
            started: self.started,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection statistics of the underlying client
    pub fn stats(&self) -> Stats {
        self.client.stats()
    }

    /// The room this bot is bound to
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Wire id of the room, `user:{id}:web`
    pub fn room_id(&self) -> &str {
        self.room.as_str()
    }

    /// Receive every event from now on
    ///
    /// The queue holds 10 events; a subscriber that falls behind is dropped
    /// and its queue closes.
    pub async fn subscribe(&self, id: impl Into<SubscriberId>) -> mpsc::Receiver<Event> {
        self.hub.subscribe(id.into()).await
    }

    /// Stop delivering events to `id` and close its queue
    pub async fn unsubscribe(&self, id: impl Into<SubscriberId>) {
        self.hub.unsubscribe(id.into()).await
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count().await
    }

    /// Write `command` and wait for a reply with the given verb
    ///
    /// Replies with other verbs are skipped; read errors are retried until
    /// the attempt budget runs out. The line carries credentials, so only a
    /// failed write is published.
    async fn exchange(&self, command: String, verb: Verb) -> Result<Command, BotError> {
        let timeout = self.options.handshake_timeout;
        let attempts = self.options.handshake_attempts;

        if let Err(error) = self.client.write(command, Some(timeout)).await {
            self.emit(Event::WriteError {
                error: error.clone(),
            })
            .await;
            return Err(error.into());
        }

        for attempt in 1..=attempts {
            match self.read_once(Some(timeout)).await {
                Ok(cmd) if cmd.name == verb => return Ok(cmd),
                Ok(cmd) => {
                    debug!(
                        "{}: skipping {} reply (attempt {}/{})",
                        verb, cmd.name, attempt, attempts
                    );
                }
                Err(ClientError::Closed) => return Err(ClientError::Closed.into()),
                Err(e) => {
                    warn!(
                        "{}: read error: {} (attempt {}/{}). Trying again",
                        verb, e, attempt, attempts
                    );
                }
            }
        }

        Err(BotError::HandshakeTimeout { verb, attempts })
    }

    /// One client read, published as an event
    async fn read_once(&self, timeout: Option<Duration>) -> Result<Command, ClientError> {
        let result = self.client.read(timeout).await;
        let event = match &result {
            Ok(command) => Event::ReadCommand {
                command: command.clone(),
            },
            Err(error) => Event::ReadError {
                error: error.clone(),
            },
        };
        self.emit(event).await;
        result
    }

    async fn send(&self, message: String) -> Result<(), BotError> {
        self.emit(Event::Write {
            message: message.clone(),
        })
        .await;

        if let Err(error) = self
            .client
            .write(message, Some(self.options.write_timeout))
            .await
        {
            self.emit(Event::WriteError {
                error: error.clone(),
            })
            .await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn set_state(&self, state: SessionState) {
        {
            let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *current = state;
        }
        info!("Bot {} is {}", self.room, state);
        self.emit(Event::StateChange { state }).await;
    }

    async fn emit(&self, event: Event) {
        self.hub.publish(event).await;
    }
}
