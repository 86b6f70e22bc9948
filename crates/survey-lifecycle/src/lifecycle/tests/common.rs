use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::clock::ManualClock;
use crate::lifecycle::{
    ActionDispatcher, ActionError, ActionExecutor, ActionInvocation, ActionOutcome,
    ActionRegistry, AutoAction, LifecycleService, StateEngine, SurveyRecord, TransitionProcessor,
};
use crate::notifications::{MemoryStore, NotificationHub};

pub(super) const NOTIFICATION_CAPACITY: usize = 100;

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub(super) fn pending(id: &str) -> SurveyRecord {
    SurveyRecord::assigned(id, format!("worker-{id}"), t0())
}

pub(super) fn started(id: &str) -> SurveyRecord {
    let mut record = pending(id);
    record.started_at = Some(t0() + Duration::days(2));
    record
}

pub(super) fn completed(id: &str, risk: f32) -> SurveyRecord {
    let mut record = started(id);
    record.completed_at = Some(t0() + Duration::days(5));
    record.risk_score = Some(risk);
    record
}

pub(super) fn unassigned(id: &str) -> SurveyRecord {
    let mut record = pending(id);
    record.assigned_at = None;
    record
}

/// A mix of every kind of record, `count` long.
pub(super) fn mixed_records(count: usize) -> Vec<SurveyRecord> {
    (0..count)
        .map(|index| {
            let id = format!("s-{index:03}");
            match index % 4 {
                0 => pending(&id),
                1 => started(&id),
                2 => completed(&id, 2.0),
                _ => completed(&id, 8.0),
            }
        })
        .collect()
}

/// Executor that remembers every invocation it receives.
#[derive(Default)]
pub(super) struct RecordingExecutor {
    calls: Mutex<Vec<ActionInvocation>>,
}

impl RecordingExecutor {
    pub(super) fn calls(&self) -> Vec<ActionInvocation> {
        self.calls.lock().expect("executor mutex poisoned").clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError> {
        self.calls
            .lock()
            .expect("executor mutex poisoned")
            .push(invocation.clone());
        Ok(ActionOutcome::new(format!(
            "{} for {}",
            invocation.action(),
            invocation.record_id()
        )))
    }
}

pub(super) struct FailingExecutor;

#[async_trait]
impl ActionExecutor for FailingExecutor {
    async fn execute(&self, _invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError> {
        Err(ActionError::Unavailable("report renderer offline".to_string()))
    }
}

/// Sleeps before succeeding so sibling calls can be observed finishing first.
pub(super) struct SlowExecutor(pub(super) StdDuration);

#[async_trait]
impl ActionExecutor for SlowExecutor {
    async fn execute(&self, _invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError> {
        tokio::time::sleep(self.0).await;
        Ok(ActionOutcome::new("slow action finished"))
    }
}

pub(super) struct PanickingExecutor;

#[async_trait]
impl ActionExecutor for PanickingExecutor {
    async fn execute(&self, _invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError> {
        panic!("dashboard cache exploded");
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<LifecycleService>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) hub: Arc<NotificationHub>,
    pub(super) store: Arc<MemoryStore>,
    pub(super) recorder: Arc<RecordingExecutor>,
}

/// Every action routed to one recording executor.
pub(super) fn recording_registry(recorder: &Arc<RecordingExecutor>) -> ActionRegistry {
    AutoAction::ordered()
        .into_iter()
        .fold(ActionRegistry::new(), |registry, action| {
            registry.with(action, recorder.clone())
        })
}

pub(super) fn harness_with(
    now: DateTime<Utc>,
    batch_size: usize,
    registry: impl FnOnce(&Arc<RecordingExecutor>) -> ActionRegistry,
) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(MemoryStore::default());
    let hub = Arc::new(NotificationHub::new(
        NOTIFICATION_CAPACITY,
        store.clone(),
        clock.clone(),
    ));
    let recorder = Arc::new(RecordingExecutor::default());
    let dispatcher = ActionDispatcher::new(registry(&recorder), hub.clone());
    let processor = TransitionProcessor::new(StateEngine::default(), batch_size);
    let service = Arc::new(LifecycleService::new(processor, dispatcher, clock.clone()));

    Harness {
        service,
        clock,
        hub,
        store,
        recorder,
    }
}

pub(super) fn harness(now: DateTime<Utc>) -> Harness {
    harness_with(now, crate::lifecycle::DEFAULT_BATCH_SIZE, recording_registry)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
