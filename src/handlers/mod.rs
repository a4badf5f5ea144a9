//! HTTP endpoint handlers for the sampler.
//!
//! - `/process/{pid}`: cached sample for one process (JSON)
//! - `/processes`: every cached sample (JSON)
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Health check endpoint

pub mod health;
pub mod metrics;
pub mod process;

// Re-export handlers
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use process::{process_handler, processes_handler};
