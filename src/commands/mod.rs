//! CLI command implementations for herakles-proc-sampler.
//!
//! - `watch`: poll processes and print snapshots
//! - `check`: procfs and privilege validation
//! - `config`: configuration file generation

pub mod check;
pub mod config;
pub mod watch;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use watch::command_watch;
