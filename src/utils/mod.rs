//! # Utility Modules
//!
//! Supporting utilities for logging, observability and timing.
//!
//! ## Components
//! - **Logging**: Subscriber setup with per-target level directives
//! - **Metrics**: Thread-safe observability counters and per-connection traffic
//! - **Timeout**: Async timeout wrappers and default durations

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, TrafficCounter};
