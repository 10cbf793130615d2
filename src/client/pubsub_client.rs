use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::broker::Message;

/// Identity of one subscriber channel.
///
/// Two subscribers on the same topic are still distinct clients; the registry
/// is keyed by this id, never by what the client listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Represents a connected subscriber in the hub's registry.
///
/// Dropping the `Client` drops the only sender of its channel, which closes
/// the channel for the session reading from it.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for the client.
    pub id: ClientId,

    /// Channel the hub pushes published messages into.
    pub sender: UnboundedSender<Arc<Message>>,
}

impl Client {
    pub fn new(sender: UnboundedSender<Arc<Message>>) -> Self {
        Self {
            id: ClientId::new(),
            sender,
        }
    }

    /// Creates a fresh subscriber channel and the client that feeds it.
    pub fn channel() -> (Self, UnboundedReceiver<Arc<Message>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}
