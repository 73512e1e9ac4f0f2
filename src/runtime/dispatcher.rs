//! Action event dispatcher
//!
//! UI components never construct actions directly. They send an
//! [`ActionEvent`] naming the action and its targets; the
//! [`ActionEventHandler`] merges in the process-wide [`BaseContext`],
//! resolves the action from its registry and runs it on a background task.
//! Independently dispatched events are independent state machines; the
//! only coordination between them is the per-target busy claim.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use super::RuntimeConfig;
use super::action::{ActionContext, ActionKind, ActionOutcome, ActionReport};
use super::alert::AlertSink;
use super::confirm::{ConfirmPolicy, ConfirmSpec, ConfirmationGate};
use super::error::{self, DispatchError, DispatchResult};
use super::refresh::{NoopResultView, ResultView, WAIT_FOR_UPDATE};
use super::registry::ActionRegistry;
use super::target::{TargetClaim, TargetHandle, TargetId, TargetSelection};
use super::transport::{ApiPaths, HttpClient, RemoteClient};

/// Collaborators shared by every action, built once at startup
#[derive(Clone)]
pub struct BaseContext {
    /// Alert sink
    pub alerts: Arc<dyn AlertSink>,
    /// Confirmation gate
    pub gate: Arc<dyn ConfirmationGate>,
    /// Repository client
    pub client: Arc<dyn RemoteClient>,
    /// Runtime configuration
    pub config: Arc<RuntimeConfig>,
    /// API path layout derived from the configuration
    pub paths: ApiPaths,
    /// Result list
    pub view: Arc<dyn ResultView>,
}

impl BaseContext {
    /// Build a context without a result view
    pub fn new(
        config: RuntimeConfig,
        client: Arc<dyn RemoteClient>,
        alerts: Arc<dyn AlertSink>,
        gate: Arc<dyn ConfirmationGate>,
    ) -> Self {
        let paths = ApiPaths::from(&config);
        Self {
            alerts,
            gate,
            client,
            config: Arc::new(config),
            paths,
            view: Arc::new(NoopResultView),
        }
    }

    /// Validate `config` and build a context talking HTTP to its repository
    pub fn connect(
        config: RuntimeConfig,
        alerts: Arc<dyn AlertSink>,
        gate: Arc<dyn ConfirmationGate>,
    ) -> error::Result<Self> {
        config.validate()?;
        let client: Arc<dyn RemoteClient> = Arc::new(HttpClient::new(&config)?);
        Ok(Self::new(config, client, alerts, gate))
    }

    /// Attach the result list
    pub fn with_view(mut self, view: Arc<dyn ResultView>) -> Self {
        self.view = view;
        self
    }
}

/// Enabled flag of the UI control that fired an event
#[derive(Debug, Clone)]
pub struct ControlHandle {
    enabled: Arc<AtomicBool>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    /// An enabled control
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the control accepts input
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// One dispatched event
#[derive(Debug, Clone)]
pub struct ActionEvent {
    /// Action to run
    pub action: ActionKind,
    /// Targets
    pub target: TargetSelection,
    /// Confirmation policy
    pub confirm: ConfirmPolicy,
    /// Remaining fields (destination, waitForUpdate, ...)
    pub fields: Map<String, Value>,
    /// Control that fired the event
    pub control: Option<ControlHandle>,
}

impl ActionEvent {
    /// Event with default confirmation and no extra fields
    pub fn new(action: ActionKind, target: TargetSelection) -> Self {
        Self {
            action,
            target,
            confirm: ConfirmPolicy::default(),
            fields: Map::new(),
            control: None,
        }
    }

    /// Single-target event
    pub fn single(action: ActionKind, target: TargetHandle) -> Self {
        Self::new(action, TargetSelection::One(target))
    }

    /// Batch event over a candidate set
    pub fn batch(action: ActionKind, targets: Vec<TargetHandle>) -> Self {
        Self::new(action, TargetSelection::Many(targets))
    }

    /// RefreshResult for the given targets
    pub fn refresh(targets: Vec<TargetHandle>, wait_for_update: bool) -> Self {
        let mut event = Self::batch(ActionKind::RefreshResult, targets);
        if wait_for_update {
            event = event.with_field(WAIT_FOR_UPDATE, Value::Bool(true));
        }
        event
    }

    /// Override the confirmation policy
    pub fn with_confirm(mut self, confirm: impl Into<ConfirmPolicy>) -> Self {
        self.confirm = confirm.into();
        self
    }

    /// Add an extra field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Attach the originating control
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = Some(control);
        self
    }

    /// Decode a UI event `{action, target, confirm?, ...fields}`.
    ///
    /// `target` is an id or a list of ids, looked up through `lookup`; ids
    /// the lookup does not know are skipped.
    pub fn from_value<L>(value: Value, lookup: L) -> DispatchResult<Self>
    where
        L: Fn(&TargetId) -> Option<TargetHandle>,
    {
        let Value::Object(mut fields) = value else {
            return Err(DispatchError::UnknownAction("event is not an object".to_string()));
        };
        let action: ActionKind = match fields.remove("action") {
            Some(Value::String(name)) => name.parse()?,
            other => {
                return Err(DispatchError::UnknownAction(
                    other.map(|value| value.to_string()).unwrap_or_default(),
                ));
            }
        };

        let target = match fields.remove("target") {
            Some(Value::String(id)) => match lookup(&TargetId::new(id)) {
                Some(handle) => TargetSelection::One(handle),
                None => TargetSelection::Many(Vec::new()),
            },
            Some(Value::Array(ids)) => TargetSelection::Many(
                ids.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|id| lookup(&TargetId::new(id)))
                    .collect(),
            ),
            _ => TargetSelection::Many(Vec::new()),
        };

        let confirm = match fields.remove("confirm") {
            None => ConfirmPolicy::ActionDefault,
            Some(Value::Bool(confirm)) => ConfirmPolicy::from(confirm),
            Some(spec @ Value::Object(_)) => match serde_json::from_value::<ConfirmSpec>(spec) {
                Ok(spec) => ConfirmPolicy::Custom(spec),
                Err(err) => {
                    tracing::debug!("unreadable confirm spec, using action default: {err}");
                    ConfirmPolicy::ActionDefault
                }
            },
            Some(_) => ConfirmPolicy::ActionDefault,
        };

        Ok(Self {
            action,
            target,
            confirm,
            fields,
            control: None,
        })
    }
}

struct InFlight {
    kind: ActionKind,
    targets: Vec<TargetId>,
    abort: AbortHandle,
}

struct HandlerInner {
    base: BaseContext,
    registry: ActionRegistry,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
}

/// Resolves and runs dispatched events
#[derive(Clone)]
pub struct ActionEventHandler {
    inner: Arc<HandlerInner>,
}

impl ActionEventHandler {
    /// Handler with the default registry
    pub fn new(base: BaseContext) -> Self {
        Self::with_registry(base, ActionRegistry::default())
    }

    /// Handler with a custom registry
    pub fn with_registry(base: BaseContext, registry: ActionRegistry) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                base,
                registry,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Shared collaborators
    pub fn base(&self) -> &BaseContext {
        &self.inner.base
    }

    /// Dispatch an event. Must be called from within a tokio runtime.
    ///
    /// A single target is claimed before this returns; resolution and
    /// execution happen on a spawned task.
    pub fn dispatch(&self, event: ActionEvent) -> ActionTicket {
        let id = Uuid::new_v4();
        let kind = event.action;

        let claim = if self.inner.registry.claims_targets(kind) {
            match claim_single(&event.target) {
                Ok(claim) => claim,
                Err(err) => {
                    tracing::warn!(action = %id, kind = %kind, "rejecting event: {err}");
                    self.inner
                        .base
                        .alerts
                        .message(format!("{kind} skipped: {err}"));
                    return ActionTicket::settled(
                        self.clone(),
                        ActionReport::new(id, kind, ActionOutcome::Rejected(err)),
                    );
                }
            }
        } else {
            None
        };

        if let Some(control) = &event.control {
            control.set_enabled(false);
        }
        let guard = DispatchGuard {
            claim,
            control: event.control,
            finished: false,
        };

        let ctx = ActionContext {
            id,
            kind,
            targets: event.target,
            confirm: event.confirm,
            fields: event.fields,
            handler: self.clone(),
            base: self.inner.base.clone(),
        };
        let target_ids = ctx.targets.ids();

        let handler = self.clone();
        let mut in_flight = self.inner.in_flight.lock();
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let outcome = match handler.inner.registry.create(kind) {
                Ok(action) => {
                    tracing::debug!(action = %id, kind = %kind, "executing action");
                    action.execute(ctx).await
                }
                Err(err) => {
                    tracing::warn!(action = %id, kind = %kind, "dropping event: {err}");
                    ActionOutcome::Rejected(err)
                }
            };
            guard.finished = true;
            drop(guard);
            handler.inner.in_flight.lock().remove(&id);
            ActionReport::new(id, kind, outcome)
        });
        in_flight.insert(
            id,
            InFlight {
                kind,
                targets: target_ids,
                abort: task.abort_handle(),
            },
        );
        drop(in_flight);

        ActionTicket {
            id,
            kind,
            handler: self.clone(),
            task,
        }
    }

    /// Number of running actions
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Kinds of the running actions touching `id`
    pub fn in_flight_for(&self, id: &TargetId) -> Vec<ActionKind> {
        self.inner
            .in_flight
            .lock()
            .values()
            .filter(|entry| entry.targets.contains(id))
            .map(|entry| entry.kind)
            .collect()
    }

    /// Abort one running action
    pub fn cancel(&self, action: Uuid) -> bool {
        match self.inner.in_flight.lock().remove(&action) {
            Some(entry) => {
                tracing::debug!(action = %action, kind = %entry.kind, "cancelling action");
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Abort the running actions whose only target is `id`.
    ///
    /// Call when the target leaves the result list. Any follow-up poll the
    /// aborted actions own stops with them. Batches that also cover other
    /// targets keep running.
    pub fn cancel_for_target(&self, id: &TargetId) -> usize {
        self.cancel_matching(|_, entry| entry.targets.len() == 1 && &entry.targets[0] == id)
    }

    pub(crate) fn cancel_for_target_except(&self, id: &TargetId, keep: Uuid) -> usize {
        self.cancel_matching(|action, entry| {
            *action != keep && entry.targets.len() == 1 && &entry.targets[0] == id
        })
    }

    /// Abort every running action
    pub fn shutdown(&self) {
        let cancelled = self.cancel_matching(|_, _| true);
        tracing::debug!(cancelled, "action handler shut down");
    }

    fn cancel_matching(&self, matches: impl Fn(&Uuid, &InFlight) -> bool) -> usize {
        let mut in_flight = self.inner.in_flight.lock();
        let doomed: Vec<Uuid> = in_flight
            .iter()
            .filter(|(action, entry)| matches(action, entry))
            .map(|(action, _)| *action)
            .collect();
        for action in &doomed {
            if let Some(entry) = in_flight.remove(action) {
                tracing::debug!(action = %action, kind = %entry.kind, "cancelling action");
                entry.abort.abort();
            }
        }
        doomed.len()
    }
}

/// Claim the target of a single-target event.
///
/// Batch candidates are left alone here; a batch claims the subset it
/// resolves once it knows which candidates it will touch.
fn claim_single(selection: &TargetSelection) -> DispatchResult<Option<TargetClaim>> {
    match selection {
        TargetSelection::One(handle) => handle
            .try_claim()
            .map(Some)
            .ok_or_else(|| DispatchError::TargetBusy(handle.id())),
        TargetSelection::Many(_) => Ok(None),
    }
}

/// Releases the claim and the originating control when the action task
/// ends or is aborted.
struct DispatchGuard {
    claim: Option<TargetClaim>,
    control: Option<ControlHandle>,
    finished: bool,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(claim) = &self.claim {
                claim.handle().set_enabled(true);
            }
        }
        if let Some(control) = &self.control {
            control.set_enabled(true);
        }
    }
}

/// Handle to one dispatched action
pub struct ActionTicket {
    id: Uuid,
    kind: ActionKind,
    handler: ActionEventHandler,
    task: JoinHandle<ActionReport>,
}

impl ActionTicket {
    fn settled(handler: ActionEventHandler, report: ActionReport) -> Self {
        Self {
            id: report.id,
            kind: report.kind,
            handler,
            task: tokio::spawn(async move { report }),
        }
    }

    /// Action instance id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dispatched kind
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Abort the action
    pub fn cancel(&self) -> bool {
        self.handler.cancel(self.id)
    }

    /// Wait for the report; aborted actions report [`ActionOutcome::Aborted`].
    pub async fn join(self) -> ActionReport {
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                if !err.is_cancelled() {
                    tracing::error!(action = %self.id, kind = %self.kind, "action task panicked: {err}");
                }
                ActionReport::new(self.id, self.kind, ActionOutcome::Aborted)
            }
        }
    }
}
