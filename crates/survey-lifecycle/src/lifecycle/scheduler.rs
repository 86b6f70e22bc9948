use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::domain::SurveyRecord;
use super::service::{LifecycleService, PassResult};

const TRIGGER_BUFFER: usize = 16;

/// What caused a pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Tick,
    Forced,
    DataArrived,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Tick => write!(f, "tick"),
            Trigger::Forced => write!(f, "forced"),
            Trigger::DataArrived => write!(f, "data_arrived"),
        }
    }
}

/// Cloneable sender for on-demand passes.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    service: Arc<LifecycleService>,
    triggers: mpsc::Sender<Trigger>,
}

impl TriggerHandle {
    /// Ask for an immediate pass. Dropped if one is already running.
    pub fn force_process(&self) {
        self.send(Trigger::Forced);
    }

    /// Replace the working set and ask for a pass over it.
    pub fn update_records(&self, records: Vec<SurveyRecord>) {
        self.service.update_records(records);
        self.send(Trigger::DataArrived);
    }

    fn send(&self, trigger: Trigger) {
        if self.service.is_processing() {
            debug!(%trigger, "pass in flight; trigger ignored");
            return;
        }
        if let Err(err) = self.triggers.try_send(trigger) {
            debug!(%trigger, error = %err, "scheduler not accepting triggers");
        }
    }
}

/// Periodic ticker plus on-demand triggers driving the lifecycle service.
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    /// Start the loop on the current runtime. The first tick fires immediately.
    pub fn spawn(service: Arc<LifecycleService>, tick_interval: Duration) -> SchedulerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(
            service.clone(),
            tick_interval,
            trigger_rx,
            shutdown_rx,
        ));

        info!(interval_secs = tick_interval.as_secs(), "lifecycle scheduler started");

        SchedulerHandle {
            triggers: TriggerHandle {
                service,
                triggers: trigger_tx,
            },
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner of a running scheduler loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    triggers: TriggerHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn trigger(&self) -> TriggerHandle {
        self.triggers.clone()
    }

    pub fn force_process(&self) {
        self.triggers.force_process();
    }

    pub fn update_records(&self, records: Vec<SurveyRecord>) {
        self.triggers.update_records(records);
    }

    /// Stop ticking. A pass already running is allowed to finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "lifecycle scheduler task ended abnormally");
        }
        info!("lifecycle scheduler stopped");
    }
}

async fn run_loop(
    service: Arc<LifecycleService>,
    tick_interval: Duration,
    mut triggers: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let trigger = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => Trigger::Tick,
            Some(trigger) = triggers.recv() => trigger,
        };

        let mut next = Some(trigger);
        while let Some(trigger) = next.take() {
            match run_isolated(&service, trigger).await {
                Some(PassResult::Superseded) => next = Some(Trigger::DataArrived),
                Some(PassResult::AlreadyRunning | PassResult::NoData | PassResult::Completed(_))
                | None => {}
            }
        }
    }
}

/// Runs one pass on its own task so a panic inside it cannot end the loop.
async fn run_isolated(service: &Arc<LifecycleService>, trigger: Trigger) -> Option<PassResult> {
    let service = service.clone();
    match tokio::spawn(async move { service.run_pass(trigger).await }).await {
        Ok(result) => Some(result),
        Err(err) => {
            error!(%trigger, error = %err, "lifecycle pass aborted; scheduler keeps running");
            None
        }
    }
}
