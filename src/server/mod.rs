//! Asynchronous allocation server
//!
//! - AsyncServer: accept loop, bounded handler pool, liveness sweep
//! - Dispatcher: per-message handling and server status
//! - ClientRegistry: last-contact tracking and eviction
//! - Failover / SemesterClock: scripted failover and semester epochs
//! - EventJournal: optional JSON-lines allocation record

pub mod handler;
pub mod journal;
pub mod listener;
pub mod liveness;
pub mod state;

pub use handler::{Dispatcher, ServerStatus};
pub use journal::{EventJournal, JournalRecord};
pub use listener::AsyncServer;
pub use liveness::ClientRegistry;
pub use state::{Failover, FailoverState, SemesterChange, SemesterClock};
