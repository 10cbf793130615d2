//! # Infocenter
//!
//! `infocenter` is a single-process broadcaster: messages published to a
//! topic over HTTP are pushed to every subscriber of that topic as a
//! Server-Sent-Events stream. Subscribers are disconnected after a fixed
//! connection time, with a final `timeout` event.
//!
//! ## Core Modules
//!
//! - `broker`: the hub loop that owns the subscriber registry and sequences messages.
//! - `client`: subscriber identity and the per-connection streaming session.
//! - `config`: loading and merging server configuration.
//! - `event`: SSE frame formatting behind a swappable formatter.
//! - `transport`: the axum HTTP surface for subscribe and publish.
//! - `utils`: the error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod event;
pub mod transport;
pub mod utils;
