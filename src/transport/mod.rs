//! The `transport` module is the HTTP surface.
//!
//! It serves one path per service, `/<service>/<topic>`: `GET` opens an SSE
//! stream backed by a [`Session`](crate::client::Session), `POST` publishes
//! the `msg` form field to the topic.

pub mod http;

pub use http::{AppState, router, serve, start_http_server};

#[cfg(test)]
mod tests;
