//! EventHub Actor implementation
//!
//! Owns the subscriber registry and fans events out to every subscriber.
//! Subscribe, unsubscribe and publish are all messages to the same actor, so
//! registry changes and broadcasts are serialized without locks.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::types::SubscriberId;

/// Capacity of each subscriber queue
pub const SUBSCRIBER_CAPACITY: usize = 10;

/// Channel buffer size for hub commands
const HUB_CHANNEL_SIZE: usize = 256;

/// Commands sent to the EventHub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Register (or replace) a subscriber
    Subscribe {
        id: SubscriberId,
        reply: oneshot::Sender<mpsc::Receiver<Event>>,
    },
    /// Remove a subscriber and close its queue
    Unsubscribe { id: SubscriberId },
    /// Broadcast an event
    Publish(Event),
    /// Number of live subscribers
    Count { reply: oneshot::Sender<usize> },
}

/// The EventHub actor
pub struct EventHub {
    /// Live subscribers: SubscriberId -> queue sender
    subscribers: HashMap<SubscriberId, mpsc::Sender<Event>>,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl EventHub {
    /// Create a new EventHub with the given command receiver
    pub fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            subscribers: HashMap::new(),
            receiver,
        }
    }

    /// Spawn a hub and return a handle to it
    pub fn spawn() -> HubHandle {
        let (tx, rx) = mpsc::channel(HUB_CHANNEL_SIZE);
        tokio::spawn(EventHub::new(rx).run());
        HubHandle { sender: tx }
    }

    /// Run the EventHub event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        debug!("EventHub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("EventHub shutting down");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Subscribe { id, reply } => {
                let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
                if self.subscribers.insert(id.clone(), tx).is_some() {
                    debug!("Subscriber {} replaced", id);
                } else {
                    info!("Subscriber {} added", id);
                }
                let _ = reply.send(rx);
            }
            HubCommand::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    info!("Subscriber {} removed", id);
                }
            }
            HubCommand::Publish(event) => self.broadcast(event),
            HubCommand::Count { reply } => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    /// Non-blocking send to every subscriber; a full or closed queue evicts it
    fn broadcast(&mut self, event: Event) {
        self.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Subscriber {} is not keeping up, unsubscribing", id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Subscriber {} went away", id);
                false
            }
        });
    }
}

/// Cloneable handle to a running EventHub
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Subscribe and receive the event queue
    ///
    /// The queue is closed when the subscriber is removed.
    /// A hub that already stopped yields a closed queue.
    pub async fn subscribe(&self, id: SubscriberId) -> mpsc::Receiver<Event> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::Subscribe { id, reply })
            .await
            .is_ok()
        {
            if let Ok(events) = rx.await {
                return events;
            }
        }
        let (_closed, events) = mpsc::channel(1);
        events
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.sender.send(HubCommand::Unsubscribe { id }).await;
    }

    pub async fn publish(&self, event: Event) {
        let _ = self.sender.send(HubCommand::Publish(event)).await;
    }

    /// Number of live subscribers, after all earlier commands were applied
    pub async fn subscriber_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(HubCommand::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
