use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::domain::{StateTransition, SurveyId, SurveyState, TransitionLogEntry, WorkerId};
use super::LifecycleError;
use crate::notifications::{
    NewNotification, NotificationHub, NotificationKind, NotificationPriority,
};

/// Automatic side effects a transition can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoAction {
    SendReminder,
    Escalate,
    GenerateReport,
    RefreshDashboard,
}

impl AutoAction {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::SendReminder,
            Self::Escalate,
            Self::GenerateReport,
            Self::RefreshDashboard,
        ]
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::SendReminder => "SEND_REMINDER",
            Self::Escalate => "ESCALATE",
            Self::GenerateReport => "GENERATE_REPORT",
            Self::RefreshDashboard => "REFRESH_DASHBOARD",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|action| action.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Whether a transition into `target` triggers this action.
    pub const fn triggered_by(self, target: SurveyState) -> bool {
        match self {
            Self::SendReminder => matches!(target, SurveyState::ExpiringSoon),
            Self::Escalate => matches!(target, SurveyState::Expired),
            Self::GenerateReport => target.is_completed(),
            Self::RefreshDashboard => true,
        }
    }
}

impl fmt::Display for AutoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Enabled flag per action. Updates merge into the current map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AutoActionConfig {
    enabled: BTreeMap<AutoAction, bool>,
}

impl Default for AutoActionConfig {
    fn default() -> Self {
        Self {
            enabled: AutoAction::ordered()
                .into_iter()
                .map(|action| (action, action != AutoAction::GenerateReport))
                .collect(),
        }
    }
}

impl AutoActionConfig {
    pub fn all_disabled() -> Self {
        Self {
            enabled: AutoAction::ordered()
                .into_iter()
                .map(|action| (action, false))
                .collect(),
        }
    }

    pub fn is_enabled(&self, action: AutoAction) -> bool {
        self.enabled.get(&action).copied().unwrap_or(false)
    }

    pub fn set(&mut self, action: AutoAction, enabled: bool) {
        self.enabled.insert(action, enabled);
    }

    pub fn merge(&mut self, partial: &BTreeMap<AutoAction, bool>) {
        for (action, enabled) in partial {
            self.set(*action, *enabled);
        }
    }

    /// Merge a string-keyed update. Any unknown key rejects the whole update.
    pub fn merge_keys(&mut self, partial: &HashMap<String, bool>) -> Result<(), LifecycleError> {
        let mut parsed = BTreeMap::new();
        for (key, enabled) in partial {
            let action = AutoAction::from_key(key)
                .ok_or_else(|| LifecycleError::UnknownAutoAction(key.clone()))?;
            parsed.insert(action, *enabled);
        }
        self.merge(&parsed);
        Ok(())
    }

    /// Enabled actions a transition into `target` should trigger.
    pub fn actions_for(&self, target: SurveyState) -> Vec<AutoAction> {
        AutoAction::ordered()
            .into_iter()
            .filter(|action| action.triggered_by(target) && self.is_enabled(*action))
            .collect()
    }
}

/// Payload handed to an executor, one variant per action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionInvocation {
    SendReminder {
        record_id: SurveyId,
        worker_id: WorkerId,
        transition: StateTransition,
    },
    Escalate {
        record_id: SurveyId,
        worker_id: WorkerId,
        transition: StateTransition,
    },
    GenerateReport {
        record_id: SurveyId,
        worker_id: WorkerId,
        follow_up: bool,
        transition: StateTransition,
    },
    RefreshDashboard {
        record_id: SurveyId,
        transition: StateTransition,
    },
}

impl ActionInvocation {
    pub fn build(action: AutoAction, entry: &TransitionLogEntry) -> Self {
        let record_id = entry.record_id.clone();
        let worker_id = entry.worker_id.clone();
        let transition = entry.transition.clone();
        match action {
            AutoAction::SendReminder => Self::SendReminder {
                record_id,
                worker_id,
                transition,
            },
            AutoAction::Escalate => Self::Escalate {
                record_id,
                worker_id,
                transition,
            },
            AutoAction::GenerateReport => Self::GenerateReport {
                record_id,
                worker_id,
                follow_up: transition.to_state == SurveyState::RequiresFollowUp,
                transition,
            },
            AutoAction::RefreshDashboard => Self::RefreshDashboard {
                record_id,
                transition,
            },
        }
    }

    pub fn action(&self) -> AutoAction {
        match self {
            Self::SendReminder { .. } => AutoAction::SendReminder,
            Self::Escalate { .. } => AutoAction::Escalate,
            Self::GenerateReport { .. } => AutoAction::GenerateReport,
            Self::RefreshDashboard { .. } => AutoAction::RefreshDashboard,
        }
    }

    pub fn record_id(&self) -> &SurveyId {
        match self {
            Self::SendReminder { record_id, .. }
            | Self::Escalate { record_id, .. }
            | Self::GenerateReport { record_id, .. }
            | Self::RefreshDashboard { record_id, .. } => record_id,
        }
    }

    pub fn transition(&self) -> &StateTransition {
        match self {
            Self::SendReminder { transition, .. }
            | Self::Escalate { transition, .. }
            | Self::GenerateReport { transition, .. }
            | Self::RefreshDashboard { transition, .. } => transition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub summary: String,
}

impl ActionOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),
    #[error("action transport unavailable: {0}")]
    Unavailable(String),
    #[error("action task aborted: {0}")]
    Aborted(String),
}

/// Outbound hook performing one kind of automatic action (reminder mailer,
/// escalation queue, report renderer, dashboard cache).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError>;
}

/// Typed lookup from action to its executor.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    executors: HashMap<AutoAction, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: AutoAction, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(action, executor);
    }

    pub fn with(mut self, action: AutoAction, executor: Arc<dyn ActionExecutor>) -> Self {
        self.register(action, executor);
        self
    }

    pub fn get(&self, action: AutoAction) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&action).cloned()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.executors.keys().copied().collect();
        registered.sort();
        f.debug_struct("ActionRegistry")
            .field("registered", &registered)
            .finish()
    }
}

/// Final result of one executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub action: AutoAction,
    pub record_id: SurveyId,
    pub result: Result<ActionOutcome, ActionError>,
}

/// In-flight executor calls started by a dispatch. Dropping it detaches them.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    pending: Vec<(AutoAction, SurveyId, JoinHandle<DispatchReport>)>,
}

impl DispatchHandle {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every call. A panicking executor is reported as `Aborted`.
    pub async fn join(self) -> Vec<DispatchReport> {
        let mut reports = Vec::with_capacity(self.pending.len());
        for (action, record_id, handle) in self.pending {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_error) => {
                    error!(%action, %record_id, error = %join_error, "action task aborted");
                    DispatchReport {
                        action,
                        record_id,
                        result: Err(ActionError::Aborted(join_error.to_string())),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

/// Turns transitions into notifications and executor calls.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    registry: ActionRegistry,
    notifications: Arc<NotificationHub>,
}

impl ActionDispatcher {
    pub fn new(registry: ActionRegistry, notifications: Arc<NotificationHub>) -> Self {
        Self {
            registry,
            notifications,
        }
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    /// Create one notification per transition and spawn every enabled action.
    ///
    /// Executors run on their own tasks, so a slow or failing action never
    /// holds up the pass or its siblings. Must be called inside a Tokio runtime.
    pub fn dispatch(
        &self,
        config: &AutoActionConfig,
        transitions: &[TransitionLogEntry],
    ) -> DispatchHandle {
        let mut handle = DispatchHandle::default();

        for entry in transitions {
            self.notifications.create(transition_notification(entry));

            for action in config.actions_for(entry.transition.to_state) {
                let Some(executor) = self.registry.get(action) else {
                    debug!(%action, record_id = %entry.record_id, "no executor registered; skipping");
                    continue;
                };

                let invocation = ActionInvocation::build(action, entry);
                let notifications = self.notifications.clone();
                let task = tokio::spawn(run_action(executor, invocation, notifications));
                handle.pending.push((action, entry.record_id.clone(), task));
            }
        }

        handle
    }
}

async fn run_action(
    executor: Arc<dyn ActionExecutor>,
    invocation: ActionInvocation,
    notifications: Arc<NotificationHub>,
) -> DispatchReport {
    let action = invocation.action();
    let record_id = invocation.record_id().clone();
    let result = executor.execute(&invocation).await;

    match &result {
        Ok(outcome) => {
            info!(%action, %record_id, summary = %outcome.summary, "auto-action completed");
        }
        Err(err) => {
            error!(%action, %record_id, error = %err, "auto-action failed");
            notifications.create(
                NewNotification::new(
                    NotificationKind::Error,
                    NotificationPriority::High,
                    format!("Falló la acción automática {action}"),
                    format!("Encuesta {record_id}: {err}"),
                )
                .with_metadata("record_id", record_id.0.clone())
                .with_metadata("action", action.key()),
            );
        }
    }

    DispatchReport {
        action,
        record_id,
        result,
    }
}

fn transition_notification(entry: &TransitionLogEntry) -> NewNotification {
    let (kind, priority, title) = match entry.transition.to_state {
        SurveyState::ExpiringSoon => (
            NotificationKind::Warning,
            NotificationPriority::High,
            "Encuesta próxima a vencer",
        ),
        SurveyState::Expired => (
            NotificationKind::Critical,
            NotificationPriority::Critical,
            "Encuesta vencida",
        ),
        SurveyState::RequiresFollowUp => (
            NotificationKind::Warning,
            NotificationPriority::High,
            "Encuesta requiere seguimiento",
        ),
        SurveyState::Completed => (
            NotificationKind::Success,
            NotificationPriority::Low,
            "Encuesta completada",
        ),
        SurveyState::InProgress => (
            NotificationKind::Info,
            NotificationPriority::Low,
            "Encuesta en progreso",
        ),
        SurveyState::Pending => (
            NotificationKind::Info,
            NotificationPriority::Low,
            "Encuesta pendiente",
        ),
    };

    NewNotification::new(
        kind,
        priority,
        title,
        format!("{}: {}", entry.record_id, entry.transition.reason),
    )
    .with_metadata("record_id", entry.record_id.0.clone())
    .with_metadata("worker_id", entry.worker_id.0.clone())
    .with_metadata("from_state", entry.transition.from_state.as_str())
    .with_metadata("to_state", entry.transition.to_state.as_str())
}
