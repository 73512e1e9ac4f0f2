//! Integration tests for single-target actions
//!
//! Drives actions through the dispatcher against a scripted repository and
//! checks requests, alerts and the in-memory target state.

mod common;

use chrono::{DateTime, Utc};
use serde_json::json;

use common::{Harness, ScriptedGate, object, object_path, record, server_error, version_path};
use steward::runtime::target::status;
use steward::runtime::{
    ActionError, ActionEvent, ActionKind, ActionOutcome, ActionState, AlertLevel,
    ChangeDetection, ConfirmPolicy, ConfirmSpec, ControlHandle, Method, Operation,
    RemoteResponse, TargetHandle, TargetId, TargetSelection, TransportError,
};

fn publish(handle: &TargetHandle) -> ActionEvent {
    ActionEvent::single(ActionKind::Single(Operation::Publish), handle.clone())
}

#[tokio::test(start_paused = true)]
async fn test_publish_polls_until_version_changes() {
    let harness = Harness::new(ScriptedGate::cancelling());
    let client = &harness.client;
    client.respond("/api/object/obj-1/publish", json!({ "timestamp": 1_700_000_000_000i64 }));
    client.script(
        &version_path("obj-1"),
        vec![
            Ok(RemoteResponse::ok(json!("v1"))),
            Ok(RemoteResponse::ok(json!("v2"))),
        ],
    );
    client.respond(&object_path("obj-1"), record("obj-1", "v2", &[status::PUBLISHED]));

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let report = harness.handler.dispatch(publish(&handle)).join().await;
    harness.settle().await;

    assert_eq!(report.final_state, ActionState::Complete);
    match &report.outcome {
        ActionOutcome::Completed {
            completed,
            detection,
            ..
        } => {
            assert_eq!(completed, &vec![TargetId::new("obj-1")]);
            assert_eq!(*detection, Some(ChangeDetection::Observed));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        report.server_timestamp(),
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
    );

    assert_eq!(client.count(Method::Put, "/api/object/obj-1/publish"), 1);
    assert_eq!(client.count(Method::Get, &version_path("obj-1")), 2);

    let target = handle.snapshot();
    assert!(target.has_status(status::PUBLISHED));
    assert!(target.enabled);
    assert_eq!(target.version.0, "v2");
    assert!(!handle.is_busy());

    let successes = harness.alerts.of_level(AlertLevel::Success);
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].text(), "Published obj-1");
    assert!(harness.alerts.of_level(AlertLevel::Error).is_empty());

    // exactly one follow-up refresh re-read the record
    assert_eq!(client.count(Method::Get, &object_path("obj-1")), 1);
    assert_eq!(harness.view.refreshed(), vec![TargetId::new("obj-1")]);
    assert_eq!(harness.handler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_work_failure_surfaces_error_stack() {
    let harness = Harness::new(ScriptedGate::cancelling());
    harness
        .client
        .script("/api/object/obj-1/publish", vec![server_error("boom")]);

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let report = harness.handler.dispatch(publish(&handle)).join().await;
    harness.settle().await;

    assert_eq!(report.final_state, ActionState::Failed);
    assert_eq!(
        report.outcome,
        ActionOutcome::Failed(ActionError::Transport(TransportError::Status {
            status: 500,
            error_stack: Some("boom".to_string()),
        }))
    );

    let errors = harness.alerts.of_level(AlertLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text().contains("boom"));
    assert!(harness.alerts.of_level(AlertLevel::Success).is_empty());

    assert_eq!(harness.client.count(Method::Get, &version_path("obj-1")), 0);
    assert!(handle.snapshot().enabled);
    assert!(!handle.snapshot().has_status(status::PUBLISHED));
    assert!(harness.view.refreshed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_fails_action() {
    let harness = Harness::new(ScriptedGate::cancelling());
    harness.client.respond("/api/object/obj-1/publish", json!({}));
    harness.client.script(
        &version_path("obj-1"),
        vec![
            Ok(RemoteResponse::ok(json!("v1"))),
            Err(TransportError::Network("connection reset".into())),
            Ok(RemoteResponse::ok(json!("v2"))),
        ],
    );

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let report = harness.handler.dispatch(publish(&handle)).join().await;

    assert_eq!(report.final_state, ActionState::Failed);
    assert_eq!(harness.client.count(Method::Get, &version_path("obj-1")), 2);
    assert!(handle.snapshot().enabled);
    assert_eq!(harness.alerts.of_level(AlertLevel::Error).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_completes_with_note() {
    let harness = Harness::new(ScriptedGate::cancelling());
    harness.client.respond("/api/object/obj-1/publish", json!({}));
    harness.client.respond(&version_path("obj-1"), json!("v1"));
    harness
        .client
        .respond(&object_path("obj-1"), record("obj-1", "v1", &[]));

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let report = harness.handler.dispatch(publish(&handle)).join().await;
    harness.settle().await;

    match report.outcome {
        ActionOutcome::Completed { detection, .. } => {
            assert_eq!(detection, Some(ChangeDetection::Exhausted));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(harness.client.count(Method::Get, &version_path("obj-1")), 5);
    assert_eq!(harness.alerts.of_level(AlertLevel::Success).len(), 1);
    assert_eq!(harness.alerts.of_level(AlertLevel::Message).len(), 1);
    assert!(handle.snapshot().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_confirmation_sends_nothing() {
    let gate = ScriptedGate::cancelling();
    let harness = Harness::new(gate.clone());

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let event = ActionEvent::single(ActionKind::Single(Operation::Delete), handle.clone());
    let report = harness.handler.dispatch(event).join().await;

    assert_eq!(report.outcome, ActionOutcome::Cancelled);
    assert_eq!(report.final_state, ActionState::Idle);
    assert_eq!(gate.shown().len(), 1);
    assert!(harness.client.requests().is_empty());
    assert!(harness.alerts.alerts().is_empty());
    assert!(handle.snapshot().enabled);
    assert!(!handle.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_destroy_requires_exact_match_text() {
    let wrong = ScriptedGate::confirming(Some("Destroy"));
    let harness = Harness::new(wrong.clone());
    let handle = TargetHandle::new(object("obj-1", "v1").with_status([status::DELETED]));
    let event = ActionEvent::single(ActionKind::Single(Operation::Destroy), handle.clone());

    let report = harness.handler.dispatch(event.clone()).join().await;
    assert_eq!(report.outcome, ActionOutcome::Cancelled);
    assert_eq!(
        wrong.shown()[0].confirm_match_text.as_deref(),
        Some("destroy")
    );
    assert!(harness.client.requests().is_empty());

    let right = ScriptedGate::confirming(Some("destroy"));
    let harness = Harness::new(right);
    harness.client.respond("/api/object/obj-1/destroy", json!({}));

    let report = harness.handler.dispatch(event).join().await;
    match report.outcome {
        ActionOutcome::Completed { detection, .. } => assert_eq!(detection, None),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(harness.client.count(Method::Delete, "/api/object/obj-1/destroy"), 1);
    assert_eq!(harness.client.count(Method::Get, &version_path("obj-1")), 0);
    assert!(handle.snapshot().has_status(status::DESTROYED));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_policy_overrides() {
    let gate = ScriptedGate::confirming(None);
    let harness = Harness::new(gate.clone());
    harness.client.respond("/api/object/obj-1/publish", json!({}));
    harness.client.respond(&version_path("obj-1"), json!("v2"));
    harness
        .client
        .respond(&object_path("obj-1"), record("obj-1", "v2", &[status::PUBLISHED]));

    let handle = TargetHandle::new(object("obj-1", "v1"));
    let report = harness
        .handler
        .dispatch(publish(&handle).with_confirm(true))
        .join()
        .await;
    assert!(report.outcome.is_completed());
    assert_eq!(gate.shown()[0].prompt_text, "Are you sure?");

    let custom = ConfirmSpec::new("Go live?").confirm_label("Ship it");
    harness
        .handler
        .dispatch(publish(&handle).with_confirm(custom.clone()))
        .join()
        .await;
    assert_eq!(gate.shown()[1], custom);

    let skip_gate = ScriptedGate::cancelling();
    let harness = Harness::new(skip_gate.clone());
    harness.client.script(
        &object_path("obj-2"),
        vec![
            Ok(RemoteResponse::ok(json!({}))),
            Ok(RemoteResponse::ok(record("obj-2", "v2", &[status::DELETED]))),
        ],
    );
    harness.client.respond(&version_path("obj-2"), json!("v2"));
    let handle = TargetHandle::new(object("obj-2", "v1"));
    let event = ActionEvent::single(ActionKind::Single(Operation::Delete), handle)
        .with_confirm(ConfirmPolicy::Skip);
    harness.handler.dispatch(event).join().await;
    assert!(skip_gate.shown().is_empty());
    assert_eq!(harness.client.count(Method::Delete, &object_path("obj-2")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_move_without_destination_is_rejected() {
    let harness = Harness::new(ScriptedGate::confirming(None));
    let handle = TargetHandle::new(object("obj-1", "v1"));
    let event = ActionEvent::single(ActionKind::Single(Operation::Move), handle.clone());

    let report = harness.handler.dispatch(event).join().await;
    assert!(matches!(
        report.outcome,
        ActionOutcome::Failed(ActionError::InvalidEvent(_))
    ));
    assert!(harness.client.requests().is_empty());
    assert!(handle.snapshot().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_control_is_disabled_while_running() {
    let harness = Harness::new(ScriptedGate::cancelling());
    harness.client.respond("/api/object/obj-1/publish", json!({}));
    harness.client.respond(&version_path("obj-1"), json!("v2"));

    let control = ControlHandle::new();
    let handle = TargetHandle::new(object("obj-1", "v1"));
    let ticket = harness
        .handler
        .dispatch(publish(&handle).with_control(control.clone()));

    assert!(!control.is_enabled());
    assert!(handle.is_busy());
    ticket.join().await;
    assert!(control.is_enabled());
    assert!(!handle.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_single_action_over_many_targets_names_them() {
    let harness = Harness::new(ScriptedGate::cancelling());
    let a = TargetHandle::new(object("a", "v1"));
    let b = TargetHandle::new(object("b", "v1"));
    let event = ActionEvent::new(
        ActionKind::Single(Operation::Publish),
        TargetSelection::Many(vec![a.clone(), b.clone()]),
    );

    let report = harness.handler.dispatch(event).join().await;
    assert!(matches!(
        report.outcome,
        ActionOutcome::Failed(ActionError::TargetShape { .. })
    ));
    let errors = harness.alerts.of_level(AlertLevel::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].text(),
        "Publish failed for a, b: Publish expects a single target"
    );
    assert!(harness.client.requests().is_empty());
    assert!(!a.is_busy());
}
