//! The `error` module defines the error types used within the `infocenter` application.
//!
//! Hub intake, session writes, configuration and server startup all report
//! through [`InfocenterError`]; only `main` decides what is fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfocenterError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid topic pattern: {0}")]
    TopicPattern(#[from] regex::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The hub loop has stopped, so intake sends have nowhere to go.
    #[error("broker loop is not running")]
    BrokerUnavailable,

    /// The response stream of a subscriber went away mid-write.
    #[error("client disconnected")]
    ClientGone,
}

pub type Result<T> = std::result::Result<T, InfocenterError>;
