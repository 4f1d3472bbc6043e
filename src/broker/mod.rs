//! Load-balancing broker with a pool of stateless workers
//!
//! - ReadyQueue: FIFO of idle workers
//! - Worker: allocate one request at a time
//! - LoadBalancingBroker: dispatch loop and confirmation handling
//! - BrokerClient: lockstep request/confirm client

pub mod client;
pub mod ready_queue;
pub mod router;
pub mod worker;

pub use client::BrokerClient;
pub use ready_queue::{ReadyQueue, WorkerId};
pub use router::LoadBalancingBroker;
pub use worker::Worker;
