//! Shared fixtures for the integration tests
#![allow(dead_code)]

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use steward::runtime::confirm::{ConfirmSpec, ConfirmationGate, GateReply};
use steward::runtime::error::{TransportError, TransportResult};
use steward::runtime::target::permission;
use steward::runtime::{
    ActionEventHandler, AlertLog, BaseContext, Method, RemoteClient, RemoteRequest,
    RemoteResponse, ResultView, RuntimeConfig, Target, TargetHandle, TargetId,
};

/// Per-path scripted responses; the last response for a path repeats.
/// Unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<TransportResult<RemoteResponse>>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, results: Vec<TransportResult<RemoteResponse>>) {
        self.scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(results);
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.script(path, vec![Ok(RemoteResponse::ok(body))]);
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RemoteRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl RemoteClient for ScriptedClient {
    fn send(&self, request: RemoteRequest) -> BoxFuture<'_, TransportResult<RemoteResponse>> {
        let path = request.path.clone();
        self.requests.lock().push(request);
        let result = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&path) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if queue.len() == 1 => queue[0].clone(),
                _ => Err(TransportError::Status {
                    status: 404,
                    error_stack: None,
                }),
            }
        };
        Box::pin(async move { result })
    }
}

/// Gate that answers every prompt the same way and records what it showed
pub struct ScriptedGate {
    reply: GateReply,
    shown: Mutex<Vec<ConfirmSpec>>,
}

impl ScriptedGate {
    pub fn confirming(entered: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            reply: GateReply::Confirmed {
                entered: entered.map(str::to_string),
            },
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn cancelling() -> Arc<Self> {
        Arc::new(Self {
            reply: GateReply::Cancelled,
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn shown(&self) -> Vec<ConfirmSpec> {
        self.shown.lock().clone()
    }
}

impl ConfirmationGate for ScriptedGate {
    fn open(&self, spec: ConfirmSpec) -> BoxFuture<'_, GateReply> {
        self.shown.lock().push(spec);
        let reply = self.reply.clone();
        Box::pin(async move { reply })
    }
}

/// Result view recording refreshed and removed ids
#[derive(Default)]
pub struct RecordingView {
    refreshed: Mutex<Vec<TargetId>>,
    removed: Mutex<Vec<TargetId>>,
}

impl RecordingView {
    pub fn refreshed(&self) -> Vec<TargetId> {
        self.refreshed.lock().clone()
    }

    pub fn removed(&self) -> Vec<TargetId> {
        self.removed.lock().clone()
    }
}

impl ResultView for RecordingView {
    fn refresh(&self, targets: &[TargetHandle]) {
        self.refreshed
            .lock()
            .extend(targets.iter().map(TargetHandle::id));
    }

    fn remove(&self, ids: &[TargetId]) {
        self.removed.lock().extend(ids.iter().cloned());
    }
}

/// Everything a test needs to drive the dispatcher
pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub alerts: Arc<AlertLog>,
    pub view: Arc<RecordingView>,
    pub handler: ActionEventHandler,
}

impl Harness {
    pub fn new(gate: Arc<dyn ConfirmationGate>) -> Self {
        Self::with_config(gate, test_config())
    }

    pub fn with_config(gate: Arc<dyn ConfirmationGate>, config: RuntimeConfig) -> Self {
        let client = ScriptedClient::new();
        let alerts = Arc::new(AlertLog::new());
        let view = Arc::new(RecordingView::default());
        let base = BaseContext::new(config, client.clone(), alerts.clone(), gate)
            .with_view(view.clone());
        Self {
            client,
            alerts,
            view,
            handler: ActionEventHandler::new(base),
        }
    }

    /// Let spawned follow-up actions (refreshes) run
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval_ms: 10,
        max_attempts: 5,
        ..RuntimeConfig::default()
    }
}

/// Object the current user may do anything to
pub fn object(id: &str, version: &str) -> Target {
    Target::new(id, version).with_permissions([
        permission::PUBLISH,
        permission::DELETE,
        permission::DESTROY,
        permission::REINDEX,
        permission::MOVE,
    ])
}

pub fn record(id: &str, version: &str, status: &[&str]) -> Value {
    json!({
        "id": id,
        "version": version,
        "status": status,
        "permissions": ["publish", "delete", "destroy", "reindex", "move"],
    })
}

pub fn version_path(id: &str) -> String {
    format!("/api/object/{id}/version")
}

pub fn object_path(id: &str) -> String {
    format!("/api/object/{id}")
}

pub fn server_error(stack: &str) -> TransportResult<RemoteResponse> {
    Err(TransportError::Status {
        status: 500,
        error_stack: Some(stack.to_string()),
    })
}
