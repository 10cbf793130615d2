//! Per-connection streaming state machine.
//!
//! A session starts in [`SessionState::Streaming`] and ends in exactly one
//! terminal state:
//! - `TimedOut`: the connection budget ran out; the timeout frame was the
//!   last frame written.
//! - `Disconnected`: the HTTP side went away, detected either while idle or
//!   on a failed write.
//! - `Closed`: the hub closed the subscriber channel.
//!
//! Whatever the exit path, the session asks the hub to deregister it when it
//! is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::broker::{BrokerHandle, Message};
use crate::client::{Client, ClientId};
use crate::event::{EVENT_TYPE, EventFormatter, SseEvent, TIMED_OUT_EVENT_TYPE};
use crate::utils::error::{InfocenterError, Result};

/// When the subscriber connected and what it listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub connected_at: Instant,
    pub topic: String,
}

impl SubscriptionInfo {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            connected_at: Instant::now(),
            topic: topic.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Streaming,
    TimedOut,
    Disconnected,
    Closed,
}

impl SessionState {
    /// Every state but `Streaming` ends the session.
    pub fn is_terminal(self) -> bool {
        self != SessionState::Streaming
    }
}

/// Timer resolution. The deadline sits one tick past the budget, so a
/// session only times out once it has been connected for longer than that.
const TIMER_TICK: Duration = Duration::from_millis(1);

/// What woke the session up.
enum Wake {
    Deadline,
    WriterClosed,
    Received(Option<Arc<Message>>),
}

/// One subscriber connection, holding its hub channel and frame queue,
/// bounded by its connection deadline.
pub struct Session {
    id: ClientId,
    info: SubscriptionInfo,
    receiver: UnboundedReceiver<Arc<Message>>,
    broker: BrokerHandle,
    formatter: Arc<dyn EventFormatter>,
    max_connection: Duration,
    frames: mpsc::Sender<String>,
    state: SessionState,
}

impl Session {
    /// Stamps the connection time and registers a fresh channel with the hub.
    ///
    /// Frames are written into `frames`; the receiving end belongs to the
    /// HTTP response body.
    pub fn open(
        broker: BrokerHandle,
        topic: impl Into<String>,
        max_connection: Duration,
        formatter: Arc<dyn EventFormatter>,
        frames: mpsc::Sender<String>,
    ) -> Result<Self> {
        let info = SubscriptionInfo::new(topic);
        let (client, receiver) = Client::channel();
        let id = client.id;
        broker.register(client)?;

        debug!(client = %id, topic = %info.topic, "Session opened");

        Ok(Self {
            id,
            info,
            receiver,
            broker,
            formatter,
            max_connection,
            frames,
            state: SessionState::Streaming,
        })
    }

    /// Id the session is registered under with the hub.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Topic and connection time.
    pub fn subscription(&self) -> &SubscriptionInfo {
        &self.info
    }

    /// Current state; `Streaming` until [`Session::run`] returns.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// First instant at which the session has been connected for longer
    /// than its budget.
    pub fn deadline(&self) -> Instant {
        self.info.connected_at + self.max_connection + TIMER_TICK
    }

    /// Streams until a terminal state is reached and returns it.
    pub async fn run(mut self) -> SessionState {
        let deadline = time::sleep_until(self.deadline());
        tokio::pin!(deadline);

        while !self.state.is_terminal() {
            // the deadline is checked first, so a message that is already
            // queued when time runs out is dropped rather than delivered
            let wake = tokio::select! {
                biased;

                _ = &mut deadline => Wake::Deadline,
                _ = self.frames.closed() => Wake::WriterClosed,
                received = self.receiver.recv() => Wake::Received(received),
            };

            self.state = match wake {
                Wake::Deadline => self.time_out().await,
                Wake::WriterClosed => SessionState::Disconnected,
                Wake::Received(Some(message)) => self.deliver(&message).await,
                Wake::Received(None) => SessionState::Closed,
            };
        }

        info!(
            client = %self.id,
            topic = %self.info.topic,
            state = ?self.state,
            elapsed_secs = self.info.elapsed().as_secs(),
            "Session ended"
        );
        self.state
    }

    async fn deliver(&self, message: &Message) -> SessionState {
        if message.topic != self.info.topic {
            return SessionState::Streaming;
        }

        let event = SseEvent::Standard {
            id: message.id,
            event: EVENT_TYPE.to_string(),
            data: message.body.clone(),
        };

        match self.write(&event).await {
            Ok(()) => SessionState::Streaming,
            Err(_) => SessionState::Disconnected,
        }
    }

    async fn time_out(&self) -> SessionState {
        let event = SseEvent::TimedOut {
            event: TIMED_OUT_EVENT_TYPE.to_string(),
            data: format!("{}s", self.max_connection.as_secs()),
        };

        match self.write(&event).await {
            Ok(()) => SessionState::TimedOut,
            Err(_) => SessionState::Disconnected,
        }
    }

    async fn write(&self, event: &SseEvent) -> Result<()> {
        let frame = self.formatter.format(event);
        self.frames.send(frame).await.map_err(|_| {
            debug!(
                client = %self.id,
                event = event.event_type(),
                "Write failed, client disconnected"
            );
            InfocenterError::ClientGone
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // the hub may already be gone during shutdown
        if self.broker.deregister(self.id).is_err() {
            debug!(client = %self.id, "Broker stopped before deregistration");
        }
    }
}
