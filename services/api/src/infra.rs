use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use survey_lifecycle::lifecycle::{
    ActionError, ActionExecutor, ActionInvocation, ActionOutcome, ActionRegistry, AutoAction,
};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Executor that records the action in the service log. Stands in for the
/// mailer, escalation queue, report renderer and dashboard cache until those
/// integrations are wired.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutcome, ActionError> {
        let summary = match invocation {
            ActionInvocation::SendReminder { worker_id, .. } => {
                format!("reminder queued for worker {worker_id}")
            }
            ActionInvocation::Escalate { worker_id, .. } => {
                format!("expired survey escalated for worker {worker_id}")
            }
            ActionInvocation::GenerateReport {
                worker_id,
                follow_up,
                ..
            } => {
                if *follow_up {
                    format!("follow-up report requested for worker {worker_id}")
                } else {
                    format!("completion report requested for worker {worker_id}")
                }
            }
            ActionInvocation::RefreshDashboard { .. } => "dashboard refresh requested".to_string(),
        };

        info!(
            action = %invocation.action(),
            record_id = %invocation.record_id(),
            %summary,
            "auto-action executed"
        );
        Ok(ActionOutcome::new(summary))
    }
}

pub(crate) fn logging_registry() -> ActionRegistry {
    let executor = Arc::new(LoggingExecutor);
    AutoAction::ordered()
        .into_iter()
        .fold(ActionRegistry::new(), |registry, action| {
            registry.with(action, executor.clone())
        })
}

/// Accepts RFC 3339 instants or plain `YYYY-MM-DD` dates (midnight UTC).
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as RFC 3339 or YYYY-MM-DD ({err})"))
        .and_then(|date| {
            date.and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .ok_or_else(|| format!("'{raw}' has no midnight"))
        })
}
