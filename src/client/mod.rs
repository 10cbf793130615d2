//! The `client` module defines a connected subscriber.
//!
//! [`Client`] is the hub's view: an identity plus the sending half of the
//! subscriber channel. [`Session`] is the connection's view: it owns the
//! receiving half, filters by topic, enforces the connection time limit and
//! writes SSE frames for the HTTP response.

pub mod pubsub_client;
pub mod session;

pub use pubsub_client::{Client, ClientId};
pub use session::{Session, SessionState, SubscriptionInfo};
