//! Infrastructure - cold path only
//!
//! This module contains code off the allocation path:
//! - Logging and metrics
//! - Configuration management
//! - Monitoring API

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;

pub use api::start_server;
pub use metrics::{MetricsCollector, MetricsSnapshot};
