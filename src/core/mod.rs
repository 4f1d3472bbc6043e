//! Core allocation types
//!
//! - ResourcePool: all-or-nothing classroom/lab accounting
//! - Request / AllocationResult / Confirmation: the shared data model

pub mod model;
pub mod pool;

pub use model::{AllocationResult, Confirmation, ConfirmationVerb, Request, Summary, DENIED_SUMMARY};
pub use pool::{AllocationOutcome, Capacity, Inventory, ReleaseError, ResourcePool};
