//! Library crate for scan-jobs-rs: queued scan jobs driven by an external scanner.
pub mod config;
pub mod error;
pub mod intake;
pub mod notifier;
pub mod queue;
pub mod rate_limit;
pub mod scanner;
pub mod server;
pub mod status;
pub mod types;
pub mod worker;
