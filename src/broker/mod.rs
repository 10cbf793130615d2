//! The `broker` module is the hub of the system.
//!
//! A single loop task owns the subscriber registry and the message sequence.
//! Everything else talks to it through a cloneable [`BrokerHandle`]:
//! registrations, deregistrations and publishes each travel on their own
//! conduit and are applied one at a time, so registry changes and fan-out
//! are totally ordered with no lock around the registry.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, BrokerHandle};
pub use message::{Message, Publication};
pub use topic::TopicResolver;
