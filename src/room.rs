//! Room identity and outbound command formatting
//!
//! A `Room` is derived from the owner's public id and embedded in most
//! outbound lines. All builders are pure string formatting.

use std::fmt;

/// Roles a moderator can assign with `CHANGEROLE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Banned from the room
    Banned,
    /// Regular user (used to unban and unmute)
    User,
    /// Room moderator
    Moderator,
    /// Muted guest
    MutedGuest,
    /// Muted user
    Mute,
}

impl Role {
    /// The role name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Banned => "banned",
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::MutedGuest => "mutedGuest",
            Role::Mute => "mute",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat room identity (`user:<public id>:web`)
///
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room(String);

impl Room {
    /// Derive the room owned by the given user
    pub fn for_user(user_public_id: &str) -> Self {
        Self(format!("user:{}:web", user_public_id))
    }

    /// The room id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Authenticate with the chat server
    pub fn pass(&self, key: &str, secret: &str) -> String {
        format!("PASS {} {}", key, secret)
    }

    /// Join this room
    pub fn join(&self) -> String {
        format!("JOIN {}", self.0)
    }

    /// Send a chat line
    pub fn say(&self, message: &str) -> String {
        format!("SAY {}", message)
    }

    /// Kick a user out of the room
    pub fn kick(&self, user_public_id: &str) -> String {
        format!("KICK {} {}", self.0, user_public_id)
    }

    /// Change a user's role in this room
    pub fn change_role(&self, user_public_id: &str, role: Role) -> String {
        format!("CHANGEROLE {} {} {}", user_public_id, self.0, role)
    }

    pub fn ban(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::Banned)
    }

    pub fn unban(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::User)
    }

    pub fn moderate(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::Moderator)
    }

    pub fn mute_guest(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::MutedGuest)
    }

    pub fn mute(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::Mute)
    }

    pub fn unmute(&self, user_public_id: &str) -> String {
        self.change_role(user_public_id, Role::User)
    }

    /// Erase a chat message
    pub fn erase(&self, message_id: &str) -> String {
        format!("ERASE {}", message_id)
    }

    /// Leave this room
    pub fn leave(&self) -> String {
        format!("LEAVE {}", self.0)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
