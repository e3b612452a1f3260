//! Workflow behaviour through the coordinator with in-memory collaborators

mod common;

use cim_saga::{
    CompleteAction, CoordinatorConfig, DefinitionId, Disposition, InboundCommand, RetryPolicy,
    RunDefinitionRequest, RunEvent, RunId, RunKey, RunState, StepId, StepResult, TraceMetadata,
};
use common::Harness;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;

fn start(run_id: RunId, definition_id: DefinitionId) -> InboundCommand {
    InboundCommand::RunDefinition(RunDefinitionRequest {
        run_id,
        definition_id,
        trace: TraceMetadata::new().with("tenant", "acme"),
    })
}

fn complete(harness: &Harness, result: StepResult) -> InboundCommand {
    let (_, request) = harness.dispatcher.last();
    InboundCommand::CompleteAction(CompleteAction {
        run_id: request.run_id,
        definition_id: request.definition_id,
        step_id: request.step_id,
        result,
        trace: request.trace,
    })
}

fn completion_for(key: RunKey, step_id: StepId, result: StepResult) -> InboundCommand {
    InboundCommand::CompleteAction(CompleteAction {
        run_id: key.run_id,
        definition_id: key.definition_id,
        step_id,
        result,
        trace: TraceMetadata::new(),
    })
}

#[tokio::test]
async fn pipeline_runs_to_completion() {
    let harness = Harness::new();
    let definition_id = harness
        .define(
            &["fetchURL", "filterSuccess"],
            json!({"url": "https://example.com", "method": "GET"}),
        )
        .await;
    let run_id = RunId::new();

    assert_eq!(
        harness
            .coordinator
            .handle(start(run_id, definition_id))
            .await,
        Disposition::Ack
    );
    let (name, request) = harness.dispatcher.last();
    assert_eq!(name, "fetchURL");
    assert_eq!(
        request.input,
        json!({"url": "https://example.com", "method": "GET"})
    );
    assert_eq!(request.trace.get("tenant"), Some("acme"));

    let html = json!({"body": "<html></html>"});
    let disposition = harness
        .coordinator
        .handle(complete(&harness, StepResult::Data(html.clone())))
        .await;
    assert_eq!(disposition, Disposition::Ack);
    let (name, request) = harness.dispatcher.last();
    assert_eq!(name, "filterSuccess");
    assert_eq!(request.input, html);

    let filtered = json!({"ok": true});
    harness
        .coordinator
        .handle(complete(&harness, StepResult::Data(filtered.clone())))
        .await;

    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].run_id, run_id);
    assert_eq!(notifications[0].result, StepResult::Data(filtered));
    assert_eq!(notifications[0].trace.get("tenant"), Some("acme"));
}

#[tokio::test]
async fn duplicate_final_completion_is_absorbed() {
    let harness = Harness::new();
    let definition_id = harness.define(&["notify"], json!({})).await;
    harness
        .coordinator
        .handle(start(RunId::new(), definition_id))
        .await;

    let completion = complete(&harness, StepResult::NoData);
    harness.coordinator.handle(completion.clone()).await;
    let writes = harness.runs.writes();
    let disposition = harness.coordinator.handle(completion).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(harness.runs.writes(), writes);
    // The notifier is at-least-once: the duplicate reports the same result.
    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0], notifications[1]);
}

#[tokio::test]
async fn stale_completion_for_unknown_step_is_absorbed() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a", "b"], json!({})).await;
    let run_id = RunId::new();
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;
    let writes = harness.runs.writes();

    let disposition = harness
        .coordinator
        .handle(completion_for(
            RunKey::new(run_id, definition_id),
            StepId::new(),
            StepResult::NoData,
        ))
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(harness.runs.writes(), writes);
}

#[tokio::test]
async fn duplicate_completion_self_heals_stuck_step() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a", "b"], json!({})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;

    let first_completion = complete(&harness, StepResult::Data(json!(1)));
    harness.coordinator.handle(first_completion.clone()).await;
    let stuck = harness
        .runs
        .snapshot(&key)
        .await
        .unwrap()
        .running_step_id()
        .unwrap();

    harness.coordinator.handle(first_completion).await;

    let run = harness.runs.snapshot(&key).await.unwrap();
    let healed = run.running_step_id().unwrap();
    assert_ne!(healed, stuck);
    assert!(run
        .events()
        .iter()
        .any(|e| matches!(e, RunEvent::StepCanceled { step_id } if *step_id == stuck)));
    assert_eq!(harness.dispatcher.last().1.step_id, healed);
    assert_eq!(harness.dispatcher.last().0, "b");
}

#[tokio::test]
async fn redelivered_completion_re_advances_after_failed_dispatch() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a", "b"], json!({})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;

    let completion = complete(&harness, StepResult::Data(json!("x")));
    harness.dispatcher.fail_next(1);
    assert_eq!(
        harness.coordinator.handle(completion.clone()).await,
        Disposition::Drop
    );
    let run = harness.runs.snapshot(&key).await.unwrap();
    assert_eq!(run.running_step_id(), None);
    assert!(matches!(run.events().last(), Some(RunEvent::StepFailed { .. })));

    assert_eq!(
        harness.coordinator.handle(completion).await,
        Disposition::Ack
    );
    let (name, request) = harness.dispatcher.last();
    assert_eq!(name, "b");
    assert_eq!(request.input, json!("x"));
    assert_eq!(
        harness.runs.snapshot(&key).await.unwrap().running_step_id(),
        Some(request.step_id)
    );
}

#[tokio::test]
async fn failed_first_dispatch_is_retried_by_redelivery() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a"], json!({"n": 1})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);

    harness.dispatcher.fail_next(1);
    assert_eq!(
        harness
            .coordinator
            .handle(start(run_id, definition_id))
            .await,
        Disposition::Drop
    );
    assert_eq!(harness.dispatcher.count(), 0);
    assert_eq!(
        harness.runs.snapshot(&key).await.unwrap().state(),
        RunState::StepSettled
    );

    assert_eq!(
        harness
            .coordinator
            .handle(start(run_id, definition_id))
            .await,
        Disposition::Ack
    );
    assert_eq!(harness.dispatcher.count(), 1);
    assert_eq!(
        harness.runs.snapshot(&key).await.unwrap().state(),
        RunState::StepRunning
    );
}

#[tokio::test]
async fn notification_failure_fails_run() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a"], json!({})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;

    harness.notifier.fail_next(1);
    let completion = complete(&harness, StepResult::Data(json!({"done": true})));
    assert_eq!(
        harness.coordinator.handle(completion.clone()).await,
        Disposition::Drop
    );

    let run = harness.runs.snapshot(&key).await.unwrap();
    assert_eq!(run.state(), RunState::Failed);
    assert!(harness.notifier.notifications().is_empty());

    // Nothing advances or reports a failed run.
    let writes = harness.runs.writes();
    harness.coordinator.handle(completion).await;
    assert_eq!(harness.runs.writes(), writes);
    assert!(harness.notifier.notifications().is_empty());
}

#[tokio::test]
async fn lost_notification_is_reported_on_redelivery() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a"], json!({})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;

    harness.notifier.fail_next(1);
    harness.notifier.fault_writes_on_failure(&harness.runs);
    let completion = complete(&harness, StepResult::Data(json!({"done": true})));
    assert_eq!(
        harness.coordinator.handle(completion.clone()).await,
        Disposition::Redeliver
    );
    assert_eq!(
        harness.runs.snapshot(&key).await.unwrap().state(),
        RunState::DefinitionCompleted
    );
    assert!(harness.notifier.notifications().is_empty());

    assert_eq!(
        harness.coordinator.handle(completion).await,
        Disposition::Ack
    );
    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].run_id, run_id);
    assert_eq!(
        notifications[0].result,
        StepResult::Data(json!({"done": true}))
    );
    assert_eq!(
        harness.runs.snapshot(&key).await.unwrap().state(),
        RunState::DefinitionCompleted
    );
}

#[tokio::test]
async fn lost_first_dispatch_is_repeated_on_redelivery() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a", "b"], json!({"n": 1})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);

    harness.dispatcher.fail_next(1);
    harness.dispatcher.fault_writes_on_failure(&harness.runs);
    assert_eq!(
        harness
            .coordinator
            .handle(start(run_id, definition_id))
            .await,
        Disposition::Redeliver
    );
    assert_eq!(harness.dispatcher.count(), 0);
    let stranded = harness.runs.snapshot(&key).await.unwrap();
    assert_eq!(stranded.state(), RunState::StepRunning);

    assert_eq!(
        harness
            .coordinator
            .handle(start(run_id, definition_id))
            .await,
        Disposition::Ack
    );
    let (name, request) = harness.dispatcher.last();
    assert_eq!(harness.dispatcher.count(), 1);
    assert_eq!(name, "a");
    assert_eq!(request.input, json!({"n": 1}));
    assert_eq!(Some(request.step_id), stranded.running_step_id());

    // The dispatched step completes normally.
    harness
        .coordinator
        .handle(complete(&harness, StepResult::Data(json!("x"))))
        .await;
    assert_eq!(harness.dispatcher.last().0, "b");
    let run = harness.runs.snapshot(&key).await.unwrap();
    assert_eq!(run.completed_step_count(), 1);
}

#[tokio::test]
async fn missing_run_is_dropped() {
    let harness = Harness::new();

    let disposition = harness
        .coordinator
        .handle(completion_for(
            RunKey::new(RunId::new(), DefinitionId::new()),
            StepId::new(),
            StepResult::NoData,
        ))
        .await;

    assert_eq!(disposition, Disposition::Drop);
}

#[tokio::test]
async fn invalid_definition_is_dropped_before_any_write() {
    let harness = Harness::new();
    let empty = harness.define(&[], json!({})).await;

    assert_eq!(
        harness.coordinator.handle(start(RunId::new(), empty)).await,
        Disposition::Drop
    );
    assert_eq!(
        harness
            .coordinator
            .handle(start(RunId::new(), DefinitionId::new()))
            .await,
        Disposition::Drop
    );
    assert_eq!(harness.runs.writes(), 0);
}

#[tokio::test]
async fn storage_fault_asks_for_redelivery() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a"], json!({})).await;

    harness.runs.fail_next_reads(1);
    assert_eq!(
        harness
            .coordinator
            .handle(start(RunId::new(), definition_id))
            .await,
        Disposition::Redeliver
    );
    assert_eq!(harness.dispatcher.count(), 0);
}

#[tokio::test]
async fn exhausted_conflict_retries_ask_for_redelivery() {
    let harness = Harness::with_config(CoordinatorConfig {
        retry: RetryPolicy { max_attempts: 2 },
        ..CoordinatorConfig::default()
    });
    let definition_id = harness.define(&["a"], json!({})).await;
    harness.runs.inject_conflicts(2);

    assert_eq!(
        harness
            .coordinator
            .handle(start(RunId::new(), definition_id))
            .await,
        Disposition::Redeliver
    );

    harness.runs.inject_conflicts(1);
    assert_eq!(
        harness
            .coordinator
            .handle(start(RunId::new(), definition_id))
            .await,
        Disposition::Ack
    );
}

#[tokio::test]
async fn concurrent_duplicate_completions_leave_one_running_step() {
    let harness = Harness::new();
    let definition_id = harness.define(&["a", "b", "c"], json!({})).await;
    let run_id = RunId::new();
    let key = RunKey::new(run_id, definition_id);
    harness
        .coordinator
        .handle(start(run_id, definition_id))
        .await;

    let completion = complete(&harness, StepResult::Data(json!("payload")));
    let deliveries = (0..8).map(|_| harness.coordinator.handle(completion.clone()));
    let dispositions = futures::future::join_all(deliveries).await;
    assert!(dispositions.iter().all(|d| *d == Disposition::Ack));

    let run = harness.runs.snapshot(&key).await.unwrap();
    let started: Vec<StepId> = run
        .events()
        .iter()
        .filter_map(|e| match e {
            RunEvent::StepRunning { step_id, .. } => Some(*step_id),
            _ => None,
        })
        .collect();
    let dispatched: HashSet<StepId> = harness
        .dispatcher
        .requests()
        .into_iter()
        .map(|(_, request)| request.step_id)
        .collect();

    assert_eq!(run.completed_step_count(), 1);
    assert_eq!(started.len(), dispatched.len());
    assert!(dispatched.contains(&run.running_step_id().unwrap()));
    // Every later step started was "b", fed by the same payload.
    assert!(harness
        .dispatcher
        .requests()
        .iter()
        .skip(1)
        .all(|(name, request)| name == "b" && request.input == json!("payload")));
}
