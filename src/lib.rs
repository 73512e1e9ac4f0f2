//! Steward – asynchronous repository actions with eventual-consistency monitoring
//!
//! This crate implements the action layer of a content repository client:
//! - Single-target and batch actions running `confirm -> work -> poll -> complete`
//! - Status polling that tolerates a server whose writes become visible late
//! - An event dispatcher that resolves actions by name and claims their targets
//! - Pluggable alert, confirmation and result-view collaborators
//! - An HTTP client for the repository API and a small CLI on top of it

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Action runtime: dispatcher, actions, monitors and their collaborators
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{ActionEvent, ActionEventHandler, BaseContext, RuntimeConfig};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
