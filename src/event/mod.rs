//! The `event` module turns structured events into Server-Sent-Events wire text.
//!
//! Formatting goes through the [`EventFormatter`] capability so sessions never
//! depend on a concrete encoding. Only the plain-text encoding exists today.

pub mod format;

pub use format::{EventFormatter, PlainTextFormatter, SseEvent};

/// Event type carried by every published message.
pub const EVENT_TYPE: &str = "msg";

/// Event type of the frame written right before a subscriber is disconnected.
pub const TIMED_OUT_EVENT_TYPE: &str = "timeout";
