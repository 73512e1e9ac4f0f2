//! Actions and the single-target lifecycle
//!
//! An action runs `confirm -> work -> follow-up -> complete` against the
//! targets of one dispatched event. Concrete actions only supply the hooks
//! in [`SingleAction`]; the shared lifecycle lives in [`run_single`].

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::RuntimeConfig;
use super::alert::AlertSink;
use super::confirm::{ConfirmPolicy, ConfirmSpec, ConfirmationGate, request_confirmation};
use super::dispatcher::{ActionEvent, ActionEventHandler, BaseContext};
use super::error::{ActionError, ActionResult, DispatchError};
use super::monitor::{ChangeDetection, PollSpec, RemoteStateChangeMonitor};
use super::operation::Operation;
use super::target::{Target, TargetHandle, TargetId, TargetSelection, VersionToken};
use super::transport::{ApiPaths, Method, RemoteClient, RemoteRequest};

/// Name of every dispatchable action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionKind {
    /// Operation on one target
    Single(Operation),
    /// Operation on the valid subset of a target set
    Batch(Operation),
    /// Re-read targets from authoritative data
    RefreshResult,
}

impl ActionKind {
    /// Every kind the default registry knows
    pub fn all() -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = Operation::ALL.iter().map(|op| Self::Single(*op)).collect();
        kinds.extend(Operation::ALL.iter().map(|op| Self::Batch(*op)));
        kinds.push(Self::RefreshResult);
        kinds
    }

    /// Operation performed, if any
    pub fn operation(self) -> Option<Operation> {
        match self {
            Self::Single(op) | Self::Batch(op) => Some(op),
            Self::RefreshResult => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(op) => write!(f, "{}", op.name()),
            Self::Batch(op) => write!(f, "Batch{}", op.name()),
            Self::RefreshResult => f.write_str("RefreshResult"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = DispatchError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name == "RefreshResult" {
            return Ok(Self::RefreshResult);
        }
        let (batch, op_name) = match name.strip_prefix("Batch") {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let op = Operation::ALL
            .into_iter()
            .find(|op| op.name() == op_name)
            .ok_or_else(|| DispatchError::UnknownAction(name.to_string()))?;
        Ok(if batch { Self::Batch(op) } else { Self::Single(op) })
    }
}

impl TryFrom<String> for ActionKind {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.to_string()
    }
}

/// Lifecycle state of one action instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionState {
    /// Not started, or ended without side effects
    Idle,
    /// Waiting on the confirmation gate
    Confirming,
    /// Work request in flight
    Working,
    /// Waiting for the remote change to become visible
    Polling,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Failed,
}

impl ActionState {
    /// Whether `next` is a legal successor
    pub fn can_advance_to(self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (Idle, Confirming)
                | (Idle, Working)
                | (Idle, Failed)
                | (Confirming, Idle)
                | (Confirming, Working)
                | (Working, Polling)
                | (Working, Complete)
                | (Working, Failed)
                | (Polling, Complete)
                | (Polling, Failed)
        )
    }
}

/// Tracks and logs the state of one running action
#[derive(Debug)]
pub struct Lifecycle {
    id: Uuid,
    kind: ActionKind,
    state: ActionState,
}

impl Lifecycle {
    /// Start in `Idle`
    pub fn new(id: Uuid, kind: ActionKind) -> Self {
        Self {
            id,
            kind,
            state: ActionState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Move to the next state
    pub fn advance(&mut self, next: ActionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(action = %self.id, kind = %self.kind, from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
    }
}

/// How an action ended
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Work was applied
    Completed {
        /// Targets whose completion effects fired
        completed: Vec<TargetId>,
        /// How the follow-up poll ended; `None` when no poll was needed
        detection: Option<ChangeDetection>,
        /// Timestamp of the work response
        server_timestamp: Option<DateTime<Utc>>,
    },
    /// The user declined the confirmation
    Cancelled,
    /// A batch whose candidates were all excluded
    NoValidTargets,
    /// A request failed or the event was unusable
    Failed(ActionError),
    /// The dispatcher refused or could not resolve the event
    Rejected(DispatchError),
    /// The action was cancelled while running
    Aborted,
}

impl ActionOutcome {
    /// Terminal lifecycle state implied by the outcome
    pub fn final_state(&self) -> ActionState {
        match self {
            Self::Completed { .. } => ActionState::Complete,
            Self::Failed(_) => ActionState::Failed,
            Self::Cancelled | Self::NoValidTargets | Self::Rejected(_) | Self::Aborted => {
                ActionState::Idle
            }
        }
    }

    /// Whether the work was applied
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Summary of one dispatched event
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// Action instance id
    pub id: Uuid,
    /// Dispatched kind
    pub kind: ActionKind,
    /// Terminal lifecycle state
    pub final_state: ActionState,
    /// Outcome details
    pub outcome: ActionOutcome,
}

impl ActionReport {
    /// Build a report, deriving the final state
    pub fn new(id: Uuid, kind: ActionKind, outcome: ActionOutcome) -> Self {
        Self {
            id,
            kind,
            final_state: outcome.final_state(),
            outcome,
        }
    }

    /// Timestamp of the work response, if the action completed
    pub fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        match &self.outcome {
            ActionOutcome::Completed { server_timestamp, .. } => *server_timestamp,
            _ => None,
        }
    }
}

/// Per-event context handed to an action
#[derive(Clone)]
pub struct ActionContext {
    /// Action instance id
    pub id: Uuid,
    /// Dispatched kind
    pub kind: ActionKind,
    /// Targets named by the event
    pub targets: TargetSelection,
    /// Confirmation policy of the event
    pub confirm: ConfirmPolicy,
    /// Remaining event fields
    pub fields: Map<String, Value>,
    /// Dispatcher that created this action
    pub handler: ActionEventHandler,
    /// Process-wide collaborators
    pub base: BaseContext,
}

impl ActionContext {
    /// Alert sink
    pub fn alerts(&self) -> &dyn AlertSink {
        &*self.base.alerts
    }

    /// Confirmation gate
    pub fn gate(&self) -> &dyn ConfirmationGate {
        &*self.base.gate
    }

    /// Repository client
    pub fn client(&self) -> Arc<dyn RemoteClient> {
        self.base.client.clone()
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.base.config
    }

    /// API path layout
    pub fn paths(&self) -> &ApiPaths {
        &self.base.paths
    }

    /// Boolean event field
    pub fn flag(&self, name: &str) -> bool {
        self.fields.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Ask the dispatcher to re-render targets from authoritative data
    pub fn request_refresh(&self, targets: Vec<TargetHandle>, wait_for_update: bool) {
        if targets.is_empty() {
            return;
        }
        let _ticket = self
            .handler
            .dispatch(ActionEvent::refresh(targets, wait_for_update));
    }

    /// Re-enable owned targets and surface a failure
    pub(crate) fn fail(
        &self,
        lifecycle: &mut Lifecycle,
        targets: &[TargetHandle],
        err: ActionError,
    ) -> ActionOutcome {
        for handle in targets {
            handle.set_enabled(true);
        }
        let ids: Vec<TargetId> = targets.iter().map(TargetHandle::id).collect();
        self.report_failure(lifecycle, &ids, err)
    }

    /// Surface a failure for targets this action does not own
    pub(crate) fn report_failure(
        &self,
        lifecycle: &mut Lifecycle,
        ids: &[TargetId],
        err: ActionError,
    ) -> ActionOutcome {
        let names: Vec<&str> = ids.iter().map(TargetId::as_str).collect();
        tracing::warn!(action = %self.id, kind = %self.kind, targets = ?names, "action failed: {err}");
        self.alerts()
            .error(format!("{} failed for {}: {err}", self.kind, names.join(", ")));
        lifecycle.advance(ActionState::Failed);
        ActionOutcome::Failed(err)
    }
}

/// A resolved, runnable action
pub trait Action: Send {
    /// Run to completion; never fails past this boundary
    fn execute(self: Box<Self>, ctx: ActionContext) -> BoxFuture<'static, ActionOutcome>;
}

/// Hooks of a single-target action
pub trait SingleAction: Send + Sync {
    /// Kind reported in logs and alerts
    fn kind(&self) -> ActionKind;

    /// Prompt shown when the event does not override it
    fn confirm_spec(&self, _target: &Target) -> Option<ConfirmSpec> {
        None
    }

    /// The state-changing request
    fn work_request(&self, ctx: &ActionContext, target: &Target) -> ActionResult<RemoteRequest>;

    /// Whether the work response already means completion
    fn work_done(&self, _body: &Value) -> bool {
        false
    }

    /// Update in-memory state after completion
    fn on_complete(&self, _target: &mut Target) {}

    /// Success alert text
    fn success_message(&self, target: &Target) -> String;
}

/// Adapts [`SingleAction`] hooks to [`Action`]
pub struct SingleTargetAction<H>(pub H);

impl<H: SingleAction + 'static> Action for SingleTargetAction<H> {
    fn execute(self: Box<Self>, ctx: ActionContext) -> BoxFuture<'static, ActionOutcome> {
        Box::pin(async move { run_single(&self.0, &ctx).await })
    }
}

/// Single-target lifecycle shared by every [`SingleAction`].
pub async fn run_single<H: SingleAction + ?Sized>(hooks: &H, ctx: &ActionContext) -> ActionOutcome {
    let mut lifecycle = Lifecycle::new(ctx.id, hooks.kind());
    let handle = match &ctx.targets {
        TargetSelection::One(handle) => handle.clone(),
        TargetSelection::Many(_) => {
            let err = ActionError::TargetShape {
                kind: hooks.kind(),
                expected: "a single target",
            };
            return ctx.report_failure(&mut lifecycle, &ctx.targets.ids(), err);
        }
    };
    let target = handle.snapshot();

    let request = match hooks.work_request(ctx, &target) {
        Ok(request) => request,
        Err(err) => return ctx.fail(&mut lifecycle, &[handle], err),
    };

    if let Some(spec) = ctx.confirm.resolve(hooks.confirm_spec(&target)) {
        lifecycle.advance(ActionState::Confirming);
        if !request_confirmation(ctx.gate(), spec).await {
            tracing::debug!(action = %ctx.id, target = %target.id, "confirmation declined");
            lifecycle.advance(ActionState::Idle);
            return ActionOutcome::Cancelled;
        }
    }

    lifecycle.advance(ActionState::Working);
    handle.set_enabled(false);
    let baseline = handle.read(|target| target.version.clone());

    let response = match ctx.client().send(request).await {
        Ok(response) => response,
        Err(err) => return ctx.fail(&mut lifecycle, &[handle], err.into()),
    };
    let server_timestamp = response
        .timestamp()
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let mut detection = None;
    let mut observed_version = None;
    if !hooks.work_done(&response.body) {
        lifecycle.advance(ActionState::Polling);
        let status_request = RemoteRequest::new(Method::Get, ctx.paths().version(&target.id));
        let previous = baseline.clone();
        let spec = PollSpec::from_config(status_request, ctx.config(), move |status| {
            VersionToken::from_value(&status.body) != previous
        });

        match RemoteStateChangeMonitor::new(ctx.client(), spec).watch().await {
            Ok(outcome) => {
                if outcome.detection == ChangeDetection::Observed {
                    observed_version = Some(VersionToken::from_value(&outcome.response.body));
                }
                detection = Some(outcome.detection);
            }
            Err(err) => return ctx.fail(&mut lifecycle, &[handle], err.into()),
        }
    }

    lifecycle.advance(ActionState::Complete);
    let completed = handle.update(|target| {
        target.enabled = true;
        hooks.on_complete(target);
        if let Some(version) = observed_version {
            target.version = version;
        }
        target.clone()
    });

    tracing::info!(action = %ctx.id, kind = %hooks.kind(), target = %completed.id, "action complete");
    ctx.alerts().success(hooks.success_message(&completed));
    if detection == Some(ChangeDetection::Exhausted) {
        ctx.alerts().message(format!(
            "{} may take a moment to show its latest state",
            completed.id
        ));
    }
    ctx.request_refresh(vec![handle], false);

    ActionOutcome::Completed {
        completed: vec![completed.id],
        detection,
        server_timestamp,
    }
}

/// Single-target repository operation
#[derive(Debug, Clone, Copy)]
pub struct ObjectAction {
    op: Operation,
}

impl ObjectAction {
    /// Action performing `op`
    pub fn new(op: Operation) -> Self {
        Self { op }
    }
}

impl SingleAction for ObjectAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Single(self.op)
    }

    fn confirm_spec(&self, target: &Target) -> Option<ConfirmSpec> {
        self.op.confirm_spec(target)
    }

    fn work_request(&self, ctx: &ActionContext, target: &Target) -> ActionResult<RemoteRequest> {
        self.op.single_request(ctx.paths(), &target.id, &ctx.fields)
    }

    fn work_done(&self, _body: &Value) -> bool {
        self.op.completes_synchronously()
    }

    fn on_complete(&self, target: &mut Target) {
        self.op.apply(target);
    }

    fn success_message(&self, target: &Target) -> String {
        format!("{} {}", self.op.past_tense(), target.id)
    }
}
