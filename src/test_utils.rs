//! Shared test fixtures
//!
//! Tests that want log output call `init_test_tracing()` first; it is safe to
//! call from every test.

use crate::core::model::Request;
use crate::core::pool::{Capacity, ResourcePool};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Install a console subscriber once across all tests
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

/// Shared pool with the given capacities
pub fn test_pool(classrooms: u32, labs: u32) -> Arc<ResourcePool> {
    Arc::new(ResourcePool::new(Capacity::new(classrooms, labs)))
}

/// Request from a fixed faculty and program
pub fn sample_request(semester: u32, classrooms: u32, labs: u32) -> Request {
    Request::new("Ingenieria", "Sistemas", semester, classrooms, labs)
}
