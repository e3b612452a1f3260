//! Shared fakes for the workflow tests

#![allow(dead_code)]

use async_trait::async_trait;
use cim_saga::{
    ActionDispatcher, ActionRequest, CompletionNotifier, CoordinatorConfig, Definition,
    DefinitionId, DispatchError, InMemoryDefinitionStore, InMemoryRunStore, RunCoordinator,
    RunId, StepResult, StepSpec, TraceMetadata,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Store whose next write faults whenever a fake fails its call
#[derive(Default)]
struct WriteFaults(Mutex<Option<Arc<InMemoryRunStore>>>);

impl WriteFaults {
    fn arm(&self, runs: &Arc<InMemoryRunStore>) {
        *self.0.lock().unwrap() = Some(runs.clone());
    }

    fn trigger(&self) {
        if let Some(runs) = self.0.lock().unwrap().as_ref() {
            runs.fail_next_writes(1);
        }
    }
}

/// Dispatcher that records every request and can be told to fail
#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<(String, ActionRequest)>>,
    failures: AtomicUsize,
    write_faults: WriteFaults,
}

impl RecordingDispatcher {
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Each failed dispatch also faults the next write to `runs`
    pub fn fault_writes_on_failure(&self, runs: &Arc<InMemoryRunStore>) {
        self.write_faults.arm(runs);
    }

    pub fn requests(&self) -> Vec<(String, ActionRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> (String, ActionRequest) {
        self.requests().pop().expect("nothing dispatched")
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, step_name: &str, request: ActionRequest) -> Result<(), DispatchError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.write_faults.trigger();
            return Err(DispatchError::Transport("broker unavailable".into()));
        }
        self.requests
            .lock()
            .unwrap()
            .push((step_name.to_string(), request));
        Ok(())
    }
}

/// A recorded completion notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub run_id: RunId,
    pub definition_id: DefinitionId,
    pub result: StepResult,
    pub trace: TraceMetadata,
}

/// Notifier that records every notification and can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
    failures: AtomicUsize,
    write_faults: WriteFaults,
}

impl RecordingNotifier {
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Each failed notification also faults the next write to `runs`
    pub fn fault_writes_on_failure(&self, runs: &Arc<InMemoryRunStore>) {
        self.write_faults.arm(runs);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify_completed(
        &self,
        run_id: RunId,
        definition_id: DefinitionId,
        result: &StepResult,
        trace: &TraceMetadata,
    ) -> Result<(), DispatchError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.write_faults.trigger();
            return Err(DispatchError::Timeout { after_ms: 5_000 });
        }
        self.notifications.lock().unwrap().push(Notification {
            run_id,
            definition_id,
            result: result.clone(),
            trace: trace.clone(),
        });
        Ok(())
    }
}

/// A coordinator wired to in-memory collaborators
pub struct Harness {
    pub coordinator: RunCoordinator,
    pub definitions: InMemoryDefinitionStore,
    pub runs: Arc<InMemoryRunStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let definitions = InMemoryDefinitionStore::new();
        let runs = Arc::new(InMemoryRunStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = RunCoordinator::new(
            config,
            Arc::new(definitions.clone()),
            runs.clone(),
            dispatcher.clone(),
            notifier.clone(),
        );
        Self {
            coordinator,
            definitions,
            runs,
            dispatcher,
            notifier,
        }
    }

    pub async fn define(&self, steps: &[&str], input: serde_json::Value) -> DefinitionId {
        let definition = Definition::new(
            DefinitionId::new(),
            steps.iter().map(|name| StepSpec::new(*name)).collect(),
            input,
        );
        let id = definition.id;
        self.definitions.insert(definition).await;
        id
    }
}
