//! Error types for the Steward runtime
//!
//! Domain errors use thiserror. Failures are converted into user-visible
//! alerts at the action boundary and never propagate into the dispatcher.

use std::io;
use thiserror::Error;

use super::action::ActionKind;
use super::target::TargetId;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Remote request errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Action execution errors
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures of a single remote request (work, poll or record fetch)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("request failed with status {status}{}", stack_suffix(.error_stack))]
    Status {
        /// HTTP status code
        status: u16,
        /// Diagnostic payload (`errorStack`) supplied by the server
        error_stack: Option<String>,
    },

    /// The request never produced a response
    #[error("network error: {0}")]
    Network(String),

    /// A success status with a body that could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

fn stack_suffix(stack: &Option<String>) -> String {
    match stack {
        Some(stack) if !stack.trim().is_empty() => format!(": {}", stack.trim()),
        _ => String::new(),
    }
}

impl TransportError {
    /// HTTP status code, when the failure came from the server
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote object does not exist (404)
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Convenience result alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised while running an action lifecycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Work, poll or fetch request failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The dispatched event lacks a field the action needs
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The action was handed the wrong target shape
    #[error("{kind} expects {expected}")]
    TargetShape {
        /// Action kind that rejected the context
        kind: ActionKind,
        /// Human-readable description of the accepted shape
        expected: &'static str,
    },
}

/// Convenience result alias for action operations
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// Errors raised while resolving a dispatched event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The event named an action that does not exist
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The action kind has no registered implementation
    #[error("No implementation registered for {0}")]
    Unresolved(ActionKind),

    /// Another action currently owns the target
    #[error("Target {0} is busy with another action")]
    TargetBusy(TargetId),
}

/// Convenience result alias for dispatch operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Configuration file and value errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
