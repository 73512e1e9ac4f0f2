//! RefreshResult: re-read targets from authoritative data
//!
//! Emitted after every completed action so the result list re-renders from
//! the server's records rather than from the optimistic in-memory update.

use futures::future::{BoxFuture, join_all};

use super::action::{Action, ActionContext, ActionKind, ActionOutcome, ActionState, Lifecycle};
use super::error::{ActionError, TransportError};
use super::monitor::{ChangeDetection, PollSpec, RemoteStateChangeMonitor};
use super::target::{TargetHandle, TargetId, VersionToken};
use super::transport::{Method, RemoteRequest, fetch_record};

/// Event field asking RefreshResult to wait for a version change first
pub const WAIT_FOR_UPDATE: &str = "waitForUpdate";

/// The result list collaborator (`resultTable`)
pub trait ResultView: Send + Sync {
    /// Re-render rows for the given targets
    fn refresh(&self, targets: &[TargetHandle]);

    /// Drop rows for objects that no longer exist
    fn remove(&self, ids: &[TargetId]);
}

/// View that renders nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResultView;

impl ResultView for NoopResultView {
    fn refresh(&self, _targets: &[TargetHandle]) {}

    fn remove(&self, _ids: &[TargetId]) {}
}

/// Read-only refresh action
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshResult;

impl Action for RefreshResult {
    fn execute(self: Box<Self>, ctx: ActionContext) -> BoxFuture<'static, ActionOutcome> {
        Box::pin(async move { run_refresh(&ctx).await })
    }
}

enum Refreshed {
    Updated(TargetHandle),
    Removed(TargetId),
}

async fn run_refresh(ctx: &ActionContext) -> ActionOutcome {
    let mut lifecycle = Lifecycle::new(ctx.id, ActionKind::RefreshResult);
    let wait = ctx.flag(WAIT_FOR_UPDATE);
    let handles = ctx.targets.handles();

    lifecycle.advance(ActionState::Working);
    let results = join_all(handles.iter().map(|handle| refresh_one(ctx, handle, wait))).await;

    let mut updated = Vec::new();
    let mut removed = Vec::new();
    let mut exhausted = false;
    let mut failed: Vec<TargetId> = Vec::new();
    let mut failure = None;
    for (handle, result) in handles.iter().zip(results) {
        match result {
            Ok((Refreshed::Updated(handle), detection)) => {
                exhausted |= detection == Some(ChangeDetection::Exhausted);
                updated.push(handle);
            }
            Ok((Refreshed::Removed(id), _)) => removed.push(id),
            Err(err) => {
                tracing::warn!(action = %ctx.id, target = %handle.id(), "refresh failed: {err}");
                failed.push(handle.id());
                failure.get_or_insert(err);
            }
        }
    }

    if !removed.is_empty() {
        for id in &removed {
            ctx.handler.cancel_for_target_except(id, ctx.id);
        }
        ctx.base.view.remove(&removed);
    }
    if !updated.is_empty() {
        ctx.base.view.refresh(&updated);
    }

    // targets are not owned here; their enabled flag stays as it is
    if let Some(err) = failure {
        return ctx.report_failure(&mut lifecycle, &failed, ActionError::from(err));
    }

    lifecycle.advance(ActionState::Complete);
    let mut completed: Vec<TargetId> = updated.iter().map(TargetHandle::id).collect();
    completed.extend(removed);
    ActionOutcome::Completed {
        completed,
        detection: wait.then_some(if exhausted {
            ChangeDetection::Exhausted
        } else {
            ChangeDetection::Observed
        }),
        server_timestamp: None,
    }
}

async fn refresh_one(
    ctx: &ActionContext,
    handle: &TargetHandle,
    wait: bool,
) -> Result<(Refreshed, Option<ChangeDetection>), TransportError> {
    let id = handle.id();
    let mut detection = None;

    if wait {
        let baseline = handle.read(|target| target.version.clone());
        let request = RemoteRequest::new(Method::Get, ctx.paths().version(&id));
        let spec = PollSpec::from_config(request, ctx.config(), move |status| {
            VersionToken::from_value(&status.body) != baseline
        });
        match RemoteStateChangeMonitor::new(ctx.client(), spec).watch().await {
            Ok(outcome) => detection = Some(outcome.detection),
            Err(err) if err.is_not_found() => return Ok((Refreshed::Removed(id), None)),
            Err(err) => return Err(err),
        }
    }

    match fetch_record(&*ctx.client(), ctx.paths(), &id).await {
        Ok(record) => {
            handle.update(|target| {
                target.version = record.version;
                target.status = record.status;
                target.permissions = record.permissions;
                target.collection = record.collection;
            });
            Ok((Refreshed::Updated(handle.clone()), detection))
        }
        Err(err) if err.is_not_found() => Ok((Refreshed::Removed(id), detection)),
        Err(err) => Err(err),
    }
}
