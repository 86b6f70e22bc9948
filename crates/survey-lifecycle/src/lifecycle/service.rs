use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::actions::{ActionDispatcher, AutoActionConfig, DispatchHandle};
use super::domain::{InvalidRecord, SurveyId, SurveyRecord, TransitionLogEntry};
use super::processor::{ProcessingStats, TransitionProcessor};
use super::scheduler::Trigger;
use super::LifecycleError;
use crate::clock::Clock;
use crate::notifications::NotificationHub;

const EVENT_BUFFER: usize = 256;

/// Inclusive bounds applied to the transition log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| at >= since) && self.until.map_or(true, |until| at <= until)
    }

    fn validate(&self) -> Result<(), LifecycleError> {
        match (self.since, self.until) {
            (Some(since), Some(until)) if since > until => Err(LifecycleError::InvalidTimeRange),
            _ => Ok(()),
        }
    }
}

/// Summary of a completed pass.
#[derive(Debug)]
pub struct PassReport {
    pub trigger: Trigger,
    pub processed_at: DateTime<Utc>,
    pub transitions: Vec<TransitionLogEntry>,
    pub skipped: Vec<InvalidRecord>,
    pub stats: ProcessingStats,
    /// Executor calls started by this pass. Await `join` to observe them.
    pub dispatch: DispatchHandle,
}

#[derive(Debug)]
pub enum PassResult {
    Completed(PassReport),
    /// No record set has been supplied yet.
    NoData,
    /// Another pass held the in-flight guard; this trigger was dropped.
    AlreadyRunning,
    /// The working set was replaced mid-pass; results were discarded.
    Superseded,
}

#[derive(Debug, Default)]
struct WorkingSet {
    records: Option<Vec<SurveyRecord>>,
    generation: u64,
    log: Vec<TransitionLogEntry>,
    stats: ProcessingStats,
}

/// Cleared on drop so a panicking pass cannot wedge the guard.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One lifecycle engine per host process: owns the working record set, the
/// transition log, the latest stats, and the auto-action configuration.
pub struct LifecycleService {
    processor: TransitionProcessor,
    dispatcher: ActionDispatcher,
    clock: Arc<dyn Clock>,
    working: RwLock<WorkingSet>,
    auto_actions: RwLock<AutoActionConfig>,
    in_flight: AtomicBool,
    events: broadcast::Sender<TransitionLogEntry>,
}

impl LifecycleService {
    pub fn new(
        processor: TransitionProcessor,
        dispatcher: ActionDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            processor,
            dispatcher,
            clock,
            working: RwLock::new(WorkingSet::default()),
            auto_actions: RwLock::new(AutoActionConfig::default()),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn with_auto_actions(self, config: AutoActionConfig) -> Self {
        *self.auto_actions.write().expect("auto-action lock poisoned") = config;
        self
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        self.dispatcher.notifications()
    }

    pub fn processor(&self) -> &TransitionProcessor {
        &self.processor
    }

    /// Replace the working set. Takes effect on the next pass.
    pub fn update_records(&self, records: Vec<SurveyRecord>) {
        let mut working = self.write();
        working.generation += 1;
        info!(
            count = records.len(),
            generation = working.generation,
            "survey working set replaced"
        );
        working.records = Some(records);
    }

    /// Copy of the current working set.
    pub fn records(&self) -> Vec<SurveyRecord> {
        self.read().records.clone().unwrap_or_default()
    }

    pub fn record(&self, id: &SurveyId) -> Option<SurveyRecord> {
        self.read()
            .records
            .as_ref()
            .and_then(|records| records.iter().find(|record| &record.id == id).cloned())
    }

    pub fn stats(&self) -> ProcessingStats {
        self.read().stats.clone()
    }

    /// Logged transitions inside `range`, newest first.
    pub fn transition_log(&self, range: TimeRange) -> Result<Vec<TransitionLogEntry>, LifecycleError> {
        range.validate()?;
        Ok(self
            .read()
            .log
            .iter()
            .rev()
            .filter(|entry| range.contains(entry.transition.timestamp))
            .cloned()
            .collect())
    }

    pub fn auto_actions(&self) -> AutoActionConfig {
        self.auto_actions
            .read()
            .expect("auto-action lock poisoned")
            .clone()
    }

    /// Merge a partial update keyed by action name.
    pub fn set_auto_actions(
        &self,
        partial: &HashMap<String, bool>,
    ) -> Result<AutoActionConfig, LifecycleError> {
        let mut guard = self.auto_actions.write().expect("auto-action lock poisoned");
        let mut next = guard.clone();
        next.merge_keys(partial)?;
        *guard = next.clone();
        info!(config = ?next, "auto-actions updated");
        Ok(next)
    }

    /// Live feed of transitions as passes detect them.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionLogEntry> {
        self.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one pass immediately, unless another pass is in flight.
    pub async fn force_process(&self) -> PassResult {
        self.run_pass(Trigger::Forced).await
    }

    /// Run a single pass over a snapshot of the working set.
    pub async fn run_pass(&self, trigger: Trigger) -> PassResult {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!(%trigger, "pass already in flight; trigger ignored");
            return PassResult::AlreadyRunning;
        };

        let (snapshot, generation) = {
            let working = self.read();
            match &working.records {
                Some(records) => (records.clone(), working.generation),
                None => {
                    debug!(%trigger, "no survey records supplied yet; nothing to process");
                    return PassResult::NoData;
                }
            }
        };

        let now = self.clock.now();
        let outcome = self.processor.process_all(snapshot, now).await;

        let transitions = {
            let mut working = self.write();
            if working.generation != generation {
                info!(%trigger, "working set replaced during pass; discarding results");
                return PassResult::Superseded;
            }
            working.records = Some(outcome.records);
            working.log.extend(outcome.transitions.iter().cloned());
            working.stats = outcome.stats.clone();
            outcome.transitions
        };

        for entry in &transitions {
            info!(
                record_id = %entry.record_id,
                from = %entry.transition.from_state,
                to = %entry.transition.to_state,
                reason = %entry.transition.reason,
                "survey state transition"
            );
            // No subscribers is not an error.
            let _ = self.events.send(entry.clone());
        }

        let config = self.auto_actions();
        let dispatch = self.dispatcher.dispatch(&config, &transitions);

        info!(
            %trigger,
            total = outcome.stats.total,
            transitions = transitions.len(),
            skipped = outcome.skipped.len(),
            actions = dispatch.len(),
            "lifecycle pass finished"
        );

        PassResult::Completed(PassReport {
            trigger,
            processed_at: now,
            transitions,
            skipped: outcome.skipped,
            stats: outcome.stats,
            dispatch,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, WorkingSet> {
        self.working.read().expect("working set lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorkingSet> {
        self.working.write().expect("working set lock poisoned")
    }
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService")
            .field("processor", &self.processor)
            .field("in_flight", &self.is_processing())
            .finish()
    }
}
