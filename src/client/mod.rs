//! Asynchronous client
//!
//! - AsyncClient: connect with backoff, non-blocking requests, control calls
//! - session: FIFO pending slots, link health, traffic counters

pub mod connection;
pub mod session;

pub use connection::{AsyncClient, ClientError, RequestHandle, CONFIRMATION_ERROR};
pub use session::{ClientStats, LinkHealth, PendingRequests, RequestId};
