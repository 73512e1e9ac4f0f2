//! Alert sink collaborator
//!
//! Actions surface success, error and informational messages through an
//! [`AlertSink`]; presentation (toasts, banners, terminal output) is up to
//! the implementation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Operation succeeded
    Success,
    /// Operation failed
    Error,
    /// Informational note
    Message,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Message => "message",
        };
        f.write_str(name)
    }
}

/// One alert carrying one or more lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Severity
    pub level: AlertLevel,
    /// Message lines
    pub messages: Vec<String>,
}

impl Alert {
    /// All lines joined with newlines
    pub fn text(&self) -> String {
        self.messages.join("\n")
    }
}

/// Sink for user-visible alerts
pub trait AlertSink: Send + Sync {
    /// Present an alert
    fn notify(&self, alert: Alert);
}

/// Message or message list accepted by the alert helpers
pub struct AlertMessages(Vec<String>);

impl From<String> for AlertMessages {
    fn from(message: String) -> Self {
        Self(vec![message])
    }
}

impl From<&str> for AlertMessages {
    fn from(message: &str) -> Self {
        Self(vec![message.to_string()])
    }
}

impl From<Vec<String>> for AlertMessages {
    fn from(messages: Vec<String>) -> Self {
        Self(messages)
    }
}

impl dyn AlertSink + '_ {
    /// Report success
    pub fn success(&self, messages: impl Into<AlertMessages>) {
        self.emit(AlertLevel::Success, messages.into());
    }

    /// Report failure
    pub fn error(&self, messages: impl Into<AlertMessages>) {
        self.emit(AlertLevel::Error, messages.into());
    }

    /// Report an informational note
    pub fn message(&self, messages: impl Into<AlertMessages>) {
        self.emit(AlertLevel::Message, messages.into());
    }

    fn emit(&self, level: AlertLevel, AlertMessages(messages): AlertMessages) {
        if messages.is_empty() {
            return;
        }
        self.notify(Alert { level, messages });
    }
}

/// Forwards alerts to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: Alert) {
        let text = alert.text();
        match alert.level {
            AlertLevel::Success => tracing::info!(target: "steward::alert", "{text}"),
            AlertLevel::Error => tracing::error!(target: "steward::alert", "{text}"),
            AlertLevel::Message => tracing::info!(target: "steward::alert", "note: {text}"),
        }
    }
}

/// Keeps every alert in memory
#[derive(Debug, Default)]
pub struct AlertLog {
    alerts: Mutex<Vec<Alert>>,
}

impl AlertLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every alert so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Alerts of one level
    pub fn of_level(&self, level: AlertLevel) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.level == level)
            .cloned()
            .collect()
    }

    /// Remove and return every alert
    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }
}

impl AlertSink for AlertLog {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
