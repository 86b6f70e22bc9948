use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::common::*;
use crate::clock::{Clock, ManualClock};
use crate::lifecycle::{
    ActionDispatcher, ActionRegistry, LifecycleService, Scheduler, StateEngine, SurveyId,
    SurveyState, TimeRange, TransitionProcessor,
};
use crate::notifications::{MemoryStore, NotificationHub};

/// Read exactly once per pass, so `reads` counts passes that got past the
/// no-data check. Optionally fails the first read.
struct PassClock {
    now: DateTime<Utc>,
    reads: AtomicUsize,
    fail_first: bool,
}

impl PassClock {
    fn new(now: DateTime<Utc>, fail_first: bool) -> Arc<Self> {
        Arc::new(Self {
            now,
            reads: AtomicUsize::new(0),
            fail_first,
        })
    }

    fn passes(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Clock for PassClock {
    fn now(&self) -> DateTime<Utc> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && read == 0 {
            panic!("time source unavailable");
        }
        self.now
    }
}

fn service_on(clock: Arc<PassClock>, batch_size: usize) -> Arc<LifecycleService> {
    let hub = Arc::new(NotificationHub::new(
        NOTIFICATION_CAPACITY,
        Arc::new(MemoryStore::default()),
        Arc::new(ManualClock::new(clock.now)),
    ));
    Arc::new(LifecycleService::new(
        TransitionProcessor::new(StateEngine::default(), batch_size),
        ActionDispatcher::new(ActionRegistry::new(), hub),
        clock,
    ))
}

async fn wait_until_processing(service: &LifecycleService) {
    for _ in 0..1_000 {
        if service.is_processing() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("scheduler never started a pass");
}

async fn wait_until_idle(service: &LifecycleService) {
    while service.is_processing() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn ticks_reevaluate_records_as_time_passes() {
    let harness = harness(at(2024, 3, 1));
    let mut events = harness.service.subscribe();
    harness.service.update_records(vec![pending("a")]);

    let scheduler = Scheduler::spawn(harness.service.clone(), StdDuration::from_secs(60));

    let first = events.recv().await.expect("first tick event");
    assert_eq!(first.transition.to_state, SurveyState::ExpiringSoon);

    harness.clock.set(at(2024, 4, 5));
    let second = events.recv().await.expect("second tick event");
    assert_eq!(second.transition.from_state, SurveyState::ExpiringSoon);
    assert_eq!(second.transition.to_state, SurveyState::Expired);

    scheduler.shutdown().await;
    assert!(!harness.service.is_processing());
}

#[tokio::test(start_paused = true)]
async fn new_records_wake_the_scheduler_before_the_next_tick() {
    let harness = harness(at(2024, 2, 20));
    let mut events = harness.service.subscribe();
    let tick = StdDuration::from_secs(3600);

    let scheduler = Scheduler::spawn(harness.service.clone(), tick);
    // Let the immediate first tick find no data.
    tokio::time::sleep(StdDuration::from_secs(1)).await;

    let started = Instant::now();
    scheduler.update_records(vec![pending("a")]);
    let event = events.recv().await.expect("data arrival event");

    assert_eq!(event.record_id.0, "a");
    assert_eq!(event.transition.to_state, SurveyState::ExpiringSoon);
    assert!(started.elapsed() < tick);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn forced_trigger_runs_a_pass() {
    let harness = harness(at(2024, 1, 10));
    let tick = StdDuration::from_secs(3600);
    let scheduler = Scheduler::spawn(harness.service.clone(), tick);
    tokio::time::sleep(StdDuration::from_secs(1)).await;

    harness.service.update_records(vec![started("a")]);
    let mut events = harness.service.subscribe();
    let trigger = scheduler.trigger();
    trigger.force_process();

    let event = events.recv().await.expect("forced pass event");
    assert_eq!(event.transition.to_state, SurveyState::InProgress);
    assert_eq!(harness.service.stats().count(SurveyState::InProgress), 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_further_passes() {
    let harness = harness(at(2024, 3, 1));
    let scheduler = Scheduler::spawn(harness.service.clone(), StdDuration::from_secs(60));
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    scheduler.shutdown().await;

    harness.service.update_records(vec![pending("a")]);
    tokio::time::sleep(StdDuration::from_secs(600)).await;

    assert!(harness.service.transition_log(Default::default()).expect("valid range").is_empty());
    assert_eq!(harness.service.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_running_pass_commit() {
    let now = at(2024, 2, 20);
    let harness = harness_with(now, 1, recording_registry);
    harness.service.update_records(mixed_records(200));
    let expected = TransitionProcessor::new(StateEngine::default(), 500)
        .process_all(mixed_records(200), now)
        .await;

    let scheduler = Scheduler::spawn(harness.service.clone(), StdDuration::from_secs(3600));
    wait_until_processing(&harness.service).await;
    scheduler.shutdown().await;

    assert!(!harness.service.is_processing());
    assert_eq!(harness.service.stats(), expected.stats);
    assert_eq!(
        harness.service.transition_log(TimeRange::all()).expect("valid range").len(),
        expected.transitions.len()
    );
    assert_eq!(harness.service.records(), expected.records);
}

#[tokio::test(start_paused = true)]
async fn forced_triggers_during_a_pass_are_dropped() {
    let clock = PassClock::new(at(2024, 2, 20), false);
    let service = service_on(clock.clone(), 1);
    service.update_records(mixed_records(200));

    let scheduler = Scheduler::spawn(service.clone(), StdDuration::from_secs(3600));
    wait_until_processing(&service).await;
    let trigger = scheduler.trigger();
    for _ in 0..3 {
        trigger.force_process();
    }
    wait_until_idle(&service).await;
    tokio::time::sleep(StdDuration::from_secs(10)).await;

    assert_eq!(clock.passes(), 1);
    assert_eq!(service.stats().total, 200);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn record_upload_during_a_pass_reruns_once_without_queueing() {
    let clock = PassClock::new(at(2024, 2, 20), false);
    let service = service_on(clock.clone(), 1);
    service.update_records(mixed_records(200));

    let scheduler = Scheduler::spawn(service.clone(), StdDuration::from_secs(3600));
    wait_until_processing(&service).await;
    scheduler.update_records(vec![pending("fresh")]);
    tokio::time::sleep(StdDuration::from_secs(10)).await;

    // The superseded pass plus its rerun; the upload's own trigger was dropped.
    assert_eq!(clock.passes(), 2);
    assert_eq!(service.stats().total, 1);
    assert_eq!(
        service
            .record(&SurveyId("fresh".to_string()))
            .map(|record| record.current_state),
        Some(SurveyState::ExpiringSoon)
    );

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_pass_does_not_stop_the_scheduler() {
    let clock = PassClock::new(at(2024, 3, 1), true);
    let service = service_on(clock.clone(), 50);
    let scheduler = Scheduler::spawn(service.clone(), StdDuration::from_secs(3600));
    tokio::time::sleep(StdDuration::from_secs(1)).await;

    service.update_records(vec![pending("a")]);
    scheduler.force_process();
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(clock.passes(), 1);
    assert!(!service.is_processing());
    assert_eq!(service.stats().total, 0);

    let mut events = service.subscribe();
    scheduler.force_process();
    let event = events.recv().await.expect("pass after the panic");
    assert_eq!(event.record_id.0, "a");
    assert_eq!(event.transition.to_state, SurveyState::ExpiringSoon);
    assert_eq!(service.stats().total, 1);

    scheduler.shutdown().await;
}
