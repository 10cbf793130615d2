//! Broker engine
//!
//! This module contains the hub:
//! - [`Broker`] is the registry of connected subscriber channels plus the
//!   message sequence. Its methods are synchronous and only ever called by
//!   the loop task that owns it.
//! - [`BrokerHandle`] is the intake side. Every operation is a non-blocking
//!   send on an unbounded conduit, so publishers and sessions never wait on
//!   the hub.
//!
//! Ordering notes:
//! - The loop handles exactly one intake event per iteration. When several
//!   conduits are ready it prefers registrations, then deregistrations, then
//!   messages. A publish racing a brand new subscriber is not guaranteed to
//!   reach it.
//! - Fan-out sends are unbounded, so a slow subscriber grows its own queue
//!   instead of stalling the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::message::{Message, Publication};
use crate::client::{Client, ClientId};
use crate::utils::error::{InfocenterError, Result};

/// Registry of subscriber channels and owner of the message sequence.
#[derive(Debug, Default)]
pub struct Broker {
    clients: HashMap<ClientId, Client>,
    sequence: u64,
}

impl Broker {
    /// Creates an empty registry. The first publication gets id `1`.
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            sequence: 0,
        }
    }

    /// Adds a subscriber channel. Only broadcasts processed after this call
    /// reach it.
    pub fn register_client(&mut self, client: Client) {
        let id = client.id;
        if self.clients.insert(id, client).is_some() {
            warn!(client = %id, "Client registered twice, previous channel replaced");
        }
        info!(client = %id, clients = self.clients.len(), "Added new client");
    }

    /// Removes a subscriber channel and closes it.
    ///
    /// The channel closes when its last sender is dropped, which happens here
    /// and nowhere else, so it can only close once. Removing an id that is
    /// not registered is a no-op and returns `false`.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        match self.clients.remove(client_id) {
            Some(client) => {
                drop(client);
                info!(client = %client_id, clients = self.clients.len(), "Removed client");
                true
            }
            None => {
                debug!(client = %client_id, "Client already removed");
                false
            }
        }
    }

    /// Assigns the next id to `publication` and pushes it to every registered
    /// channel, whatever the topic. Sessions do their own topic filtering.
    pub fn publish(&mut self, publication: Publication) -> Arc<Message> {
        self.sequence += 1;
        let message = Arc::new(publication.sequence(self.sequence));

        for (client_id, client) in &self.clients {
            if client.sender.send(Arc::clone(&message)).is_err() {
                // the session is gone and its deregistration is still queued
                warn!(client = %client_id, id = message.id, "Failed to send message to client");
            }
        }

        debug!(
            id = message.id,
            topic = %message.topic,
            clients = self.clients.len(),
            "Broadcast message"
        );
        message
    }

    /// Number of registered subscriber channels.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Id the next publication will get.
    #[cfg(test)]
    pub(crate) fn next_id(&self) -> u64 {
        self.sequence + 1
    }

    /// Moves the broker into its own task and returns the intake handle.
    ///
    /// The task ends once every clone of the handle has been dropped.
    pub fn spawn(self) -> (BrokerHandle, JoinHandle<()>) {
        let (new_clients_tx, new_clients) = mpsc::unbounded_channel();
        let (defunct_clients_tx, defunct_clients) = mpsc::unbounded_channel();
        let (messages_tx, messages) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicUsize::new(self.clients.len()));

        let handle = BrokerHandle {
            new_clients: new_clients_tx,
            defunct_clients: defunct_clients_tx,
            messages: messages_tx,
            connected: Arc::clone(&connected),
        };
        let intake = Intake {
            new_clients,
            defunct_clients,
            messages,
        };

        let task = tokio::spawn(self.run(intake, connected));
        (handle, task)
    }

    async fn run(mut self, mut intake: Intake, connected: Arc<AtomicUsize>) {
        info!("Broker loop started");

        loop {
            tokio::select! {
                biased;

                Some(client) = intake.new_clients.recv() => {
                    self.register_client(client);
                }
                Some(client_id) = intake.defunct_clients.recv() => {
                    self.remove_client(&client_id);
                }
                Some(publication) = intake.messages.recv() => {
                    self.publish(publication);
                }
                else => break,
            }

            connected.store(self.clients.len(), Ordering::Release);
        }

        info!(clients = self.clients.len(), "Broker loop stopped");
    }
}

/// Receiving ends of the three intake conduits, owned by the loop task.
struct Intake {
    new_clients: UnboundedReceiver<Client>,
    defunct_clients: UnboundedReceiver<ClientId>,
    messages: UnboundedReceiver<Publication>,
}

/// Cloneable entry point to a running [`Broker`] loop.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    new_clients: UnboundedSender<Client>,
    defunct_clients: UnboundedSender<ClientId>,
    messages: UnboundedSender<Publication>,
    connected: Arc<AtomicUsize>,
}

impl BrokerHandle {
    /// Queues a subscriber channel for registration.
    pub fn register(&self, client: Client) -> Result<()> {
        self.new_clients
            .send(client)
            .map_err(|_| InfocenterError::BrokerUnavailable)
    }

    /// Queues a subscriber for removal. Safe to call any number of times.
    pub fn deregister(&self, client_id: ClientId) -> Result<()> {
        self.defunct_clients
            .send(client_id)
            .map_err(|_| InfocenterError::BrokerUnavailable)
    }

    /// Queues a message for sequencing and fan-out. Returns as soon as the
    /// message is enqueued; delivery happens later on the loop task.
    pub fn publish(&self, topic: impl Into<String>, body: impl Into<String>) -> Result<()> {
        self.messages
            .send(Publication::new(topic, body))
            .map_err(|_| InfocenterError::BrokerUnavailable)
    }

    /// Registered subscribers as of the last event the loop processed.
    pub fn connected_clients(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the loop task is still accepting intake. Turns `false` once
    /// the loop has stopped or been aborted.
    pub fn is_running(&self) -> bool {
        !self.messages.is_closed()
    }
}
