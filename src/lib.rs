//! Classroom and lab allocation over the network
//!
//! One resource pool served through two interchangeable transports: a
//! load-balancing broker with a worker pool, and an asynchronous server with
//! heartbeat liveness and scripted failover. Both reproduce the same
//! allocation semantics.

pub mod broker;
pub mod client;
pub mod core;
pub mod infrastructure;
pub mod net;
pub mod protocol;
pub mod server;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{Config, ConfigError};

use protocol::ProtocolError;
use thiserror::Error;

/// Main error type for the allocator
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AllocError>;
