//! Batch actions
//!
//! A batch action resolves and claims the valid, idle subset of its
//! candidate targets, sends one work request for all of them, then polls a
//! pending-status endpoint.
//! Targets leave the [`PendingSet`] as the server stops reporting them,
//! fire their completion effects and give up their claim individually. The
//! batch ends when the set is empty.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::action::{Action, ActionContext, ActionKind, ActionOutcome, ActionState, Lifecycle};
use super::confirm::{ConfirmSpec, request_confirmation};
use super::error::{ActionError, ActionResult};
use super::monitor::{ChangeDetection, PollSpec, RemoteStateChangeMonitor};
use super::operation::{Operation, count_noun};
use super::target::{Target, TargetClaim, TargetHandle, TargetId};
use super::transport::{Method, RemoteRequest};

/// Ids still awaiting follow-up confirmation.
///
/// Ids are only ever removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSet {
    ids: BTreeSet<TargetId>,
}

impl PendingSet {
    /// Start with every resolved id pending
    pub fn new(ids: impl IntoIterator<Item = TargetId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of pending ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether `id` is pending
    pub fn contains(&self, id: &TargetId) -> bool {
        self.ids.contains(id)
    }

    /// Pending ids in order
    pub fn ids(&self) -> impl Iterator<Item = &TargetId> {
        self.ids.iter()
    }

    /// Apply one pending-status response; returns the ids that completed.
    ///
    /// `null`, `{}` and `[]` complete everything. Objects keep ids mapped to a
    /// truthy value, arrays keep the ids they list. Other shapes settle
    /// nothing.
    pub fn settle(&mut self, response: &Value) -> Vec<TargetId> {
        let Some(still_pending) = still_pending(response) else {
            tracing::debug!(response = %response, "unrecognised pending response");
            return Vec::new();
        };
        let settled: Vec<TargetId> = self
            .ids
            .iter()
            .filter(|id| !still_pending.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &settled {
            self.ids.remove(id);
        }
        settled
    }

    /// Remove and return everything still pending
    pub fn drain(&mut self) -> Vec<TargetId> {
        std::mem::take(&mut self.ids).into_iter().collect()
    }
}

fn still_pending(response: &Value) -> Option<BTreeSet<String>> {
    match response {
        Value::Null => Some(BTreeSet::new()),
        Value::Object(map) => Some(
            map.iter()
                .filter(|(_, value)| is_truthy(value))
                .map(|(id, _)| id.clone())
                .collect(),
        ),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

/// `null`, `false`, zero and the empty string mean "no longer pending"
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Hooks of a batch action
pub trait BatchHooks: Send + Sync {
    /// Kind reported in logs and alerts
    fn kind(&self) -> ActionKind;

    /// Membership test for the candidate set
    fn is_valid_target(&self, target: &Target) -> bool;

    /// Prompt shown when the event does not override it
    fn confirm_spec(&self, _targets: &[Target]) -> Option<ConfirmSpec> {
        None
    }

    /// The single state-changing request for every resolved id
    fn work_request(&self, ctx: &ActionContext, ids: &[TargetId]) -> ActionResult<RemoteRequest>;

    /// Whether the work response already means completion
    fn work_done(&self, _body: &Value) -> bool {
        false
    }

    /// Update one target's in-memory state after it completes
    fn on_target_complete(&self, _target: &mut Target) {}

    /// Success alert text for one completed target
    fn success_message(&self, target: &Target) -> String;
}

/// Adapts [`BatchHooks`] to [`Action`]
pub struct BatchAction<H> {
    hooks: Arc<H>,
}

impl<H> BatchAction<H> {
    /// Wrap batch hooks
    pub fn new(hooks: H) -> Self {
        Self {
            hooks: Arc::new(hooks),
        }
    }
}

impl<H: BatchHooks + 'static> Action for BatchAction<H> {
    fn execute(self: Box<Self>, ctx: ActionContext) -> BoxFuture<'static, ActionOutcome> {
        Box::pin(async move { run_batch(self.hooks, &ctx).await })
    }
}

/// Claims on the resolved targets, released one by one as they complete.
///
/// Targets still held when the batch goes away are re-enabled.
struct BatchClaims {
    held: Mutex<HashMap<TargetId, TargetClaim>>,
}

impl BatchClaims {
    fn release(&self, id: &TargetId) {
        self.held.lock().remove(id);
    }
}

impl Drop for BatchClaims {
    fn drop(&mut self) {
        for claim in self.held.get_mut().values() {
            claim.handle().set_enabled(true);
        }
    }
}

/// Per-target completion effects, shared with the poll predicate
struct Completion<H> {
    hooks: Arc<H>,
    ctx: ActionContext,
    handles: HashMap<TargetId, TargetHandle>,
    claims: BatchClaims,
    completed: Mutex<Vec<TargetId>>,
}

impl<H: BatchHooks> Completion<H> {
    fn complete(&self, ids: Vec<TargetId>) {
        let mut refreshed = Vec::new();
        for id in ids {
            let Some(handle) = self.handles.get(&id) else {
                continue;
            };
            let target = handle.update(|target| {
                target.enabled = true;
                self.hooks.on_target_complete(target);
                target.clone()
            });
            self.claims.release(&id);
            tracing::info!(action = %self.ctx.id, kind = %self.hooks.kind(), target = %id, "batch target complete");
            self.ctx.alerts().success(self.hooks.success_message(&target));
            self.completed.lock().push(id);
            refreshed.push(handle.clone());
        }
        for handle in refreshed {
            self.ctx.request_refresh(vec![handle], false);
        }
    }

    fn completed(&self) -> Vec<TargetId> {
        self.completed.lock().clone()
    }
}

/// Batch lifecycle shared by every [`BatchHooks`].
pub async fn run_batch<H: BatchHooks + 'static>(hooks: Arc<H>, ctx: &ActionContext) -> ActionOutcome {
    let mut lifecycle = Lifecycle::new(ctx.id, hooks.kind());

    let mut seen = BTreeSet::new();
    let mut held = HashMap::new();
    let resolved: Vec<TargetHandle> = ctx
        .targets
        .handles()
        .into_iter()
        .filter(|handle| handle.read(|target| hooks.is_valid_target(target)))
        .filter(|handle| seen.insert(handle.id()))
        .filter(|handle| match handle.try_claim() {
            Some(claim) => {
                held.insert(handle.id(), claim);
                true
            }
            None => {
                tracing::debug!(action = %ctx.id, target = %handle.id(), "skipping busy batch candidate");
                false
            }
        })
        .collect();
    let claims = BatchClaims {
        held: Mutex::new(held),
    };

    if resolved.is_empty() {
        tracing::debug!(action = %ctx.id, kind = %hooks.kind(), "no valid targets");
        return ActionOutcome::NoValidTargets;
    }

    let snapshots: Vec<Target> = resolved.iter().map(TargetHandle::snapshot).collect();
    let ids: Vec<TargetId> = snapshots.iter().map(|target| target.id.clone()).collect();
    tracing::debug!(action = %ctx.id, kind = %hooks.kind(), targets = ?ids, "resolved batch");

    let request = match hooks.work_request(ctx, &ids) {
        Ok(request) => request,
        Err(err) => return ctx.fail(&mut lifecycle, &resolved, err),
    };

    if let Some(spec) = ctx.confirm.resolve(hooks.confirm_spec(&snapshots)) {
        lifecycle.advance(ActionState::Confirming);
        if !request_confirmation(ctx.gate(), spec).await {
            tracing::debug!(action = %ctx.id, "batch confirmation declined");
            lifecycle.advance(ActionState::Idle);
            return ActionOutcome::Cancelled;
        }
    }

    lifecycle.advance(ActionState::Working);
    for handle in &resolved {
        handle.set_enabled(false);
    }

    let response = match ctx.client().send(request).await {
        Ok(response) => response,
        Err(err) => return ctx.fail(&mut lifecycle, &resolved, err.into()),
    };
    let server_timestamp = response
        .timestamp()
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let completion = Arc::new(Completion {
        hooks: hooks.clone(),
        ctx: ctx.clone(),
        handles: resolved
            .iter()
            .map(|handle| (handle.id(), handle.clone()))
            .collect(),
        claims,
        completed: Mutex::new(Vec::new()),
    });

    if hooks.work_done(&response.body) {
        lifecycle.advance(ActionState::Complete);
        completion.complete(ids);
        return ActionOutcome::Completed {
            completed: completion.completed(),
            detection: None,
            server_timestamp,
        };
    }

    lifecycle.advance(ActionState::Polling);
    let pending = Arc::new(Mutex::new(PendingSet::new(ids.iter().cloned())));
    let status_request =
        RemoteRequest::new(Method::Post, ctx.paths().pending()).with_body(json!({ "ids": ids }));

    let tick_pending = pending.clone();
    let tick_completion = completion.clone();
    let spec = PollSpec::from_config(status_request, ctx.config(), move |status| {
        let settled = tick_pending.lock().settle(&status.body);
        if !settled.is_empty() {
            tick_completion.complete(settled);
        }
        tick_pending.lock().is_empty()
    });

    match RemoteStateChangeMonitor::new(ctx.client(), spec).watch().await {
        Ok(outcome) => {
            if outcome.detection == ChangeDetection::Exhausted {
                let remaining = pending.lock().drain();
                tracing::warn!(action = %ctx.id, remaining = ?remaining, "batch poll budget exhausted");
                ctx.alerts().message(format!(
                    "{} may take a moment to show their latest state",
                    count_noun(remaining.len())
                ));
                completion.complete(remaining);
            }
            lifecycle.advance(ActionState::Complete);
            ActionOutcome::Completed {
                completed: completion.completed(),
                detection: Some(outcome.detection),
                server_timestamp,
            }
        }
        Err(err) => {
            let remaining = pending.lock().drain();
            let unfinished: Vec<TargetHandle> = remaining
                .iter()
                .filter_map(|id| completion.handles.get(id).cloned())
                .collect();
            ctx.fail(&mut lifecycle, &unfinished, ActionError::from(err))
        }
    }
}

/// Batch repository operation
#[derive(Debug, Clone, Copy)]
pub struct ObjectBatchAction {
    op: Operation,
}

impl ObjectBatchAction {
    /// Batch action performing `op`
    pub fn new(op: Operation) -> Self {
        Self { op }
    }
}

impl BatchHooks for ObjectBatchAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Batch(self.op)
    }

    fn is_valid_target(&self, target: &Target) -> bool {
        self.op.is_valid_target(target)
    }

    fn confirm_spec(&self, targets: &[Target]) -> Option<ConfirmSpec> {
        Some(self.op.batch_confirm_spec(targets))
    }

    fn work_request(&self, ctx: &ActionContext, ids: &[TargetId]) -> ActionResult<RemoteRequest> {
        self.op.batch_request(ctx.paths(), ids, &ctx.fields)
    }

    fn work_done(&self, _body: &Value) -> bool {
        self.op.completes_synchronously()
    }

    fn on_target_complete(&self, target: &mut Target) {
        self.op.apply(target);
    }

    fn success_message(&self, target: &Target) -> String {
        format!("{} {}", self.op.past_tense(), target.id)
    }
}
