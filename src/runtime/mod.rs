//! Action runtime and public API
//!
//! Wires the collaborators every action needs (repository client, alert
//! sink, confirmation gate, result view) into an [`ActionEventHandler`] and
//! exposes the action, batch and monitoring machinery behind it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// Submodules
pub mod action;
pub mod alert;
pub mod batch;
pub mod config;
pub mod confirm;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod operation;
pub mod refresh;
pub mod registry;
pub mod target;
pub mod transport;

/// Configuration for the action runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Repository server, e.g. `https://repo.example.org`
    pub base_url: String,

    /// Path segment every API route lives under (default: `api`)
    pub api_root: String,

    /// Delay between status polls
    pub poll_interval_ms: u64,

    /// Status polls before a monitor gives up
    pub max_attempts: u32,

    /// Per-request timeout; `None` leaves it to the HTTP client
    pub request_timeout_secs: Option<u64>,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_root: "api".to_string(),
            poll_interval_ms: 1000,
            max_attempts: 30,
            request_timeout_secs: None,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub use action::{
    Action, ActionContext, ActionKind, ActionOutcome, ActionReport, ActionState, ObjectAction,
    SingleAction, SingleTargetAction,
};
pub use alert::{Alert, AlertLevel, AlertLog, AlertSink, TracingAlertSink};
pub use batch::{BatchAction, BatchHooks, ObjectBatchAction, PendingSet};
pub use confirm::{AutoConfirm, ConfirmPolicy, ConfirmSpec, ConfirmationGate, GateReply};
pub use dispatcher::{ActionEvent, ActionEventHandler, ActionTicket, BaseContext, ControlHandle};
pub use error::{ActionError, ConfigError, DispatchError, RuntimeError, TransportError};
pub use monitor::{ChangeDetection, MonitorHandle, PollOutcome, PollSpec, RemoteStateChangeMonitor};
pub use operation::Operation;
pub use refresh::{NoopResultView, RefreshResult, ResultView};
pub use registry::{ActionCatalog, ActionRegistry};
pub use target::{Target, TargetHandle, TargetId, TargetSelection, VersionToken};
pub use transport::{ApiPaths, HttpClient, Method, RemoteClient, RemoteRequest, RemoteResponse};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
    }
}
