use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{InvalidRecord, SurveyRecord, SurveyState};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Thresholds used to derive a survey's state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Days after assignment before an unfinished survey expires.
    pub expiry_days: i64,
    /// Remaining-day count at or below which a survey is expiring soon.
    pub warning_days: i64,
    /// Completed surveys at or above this risk score require follow-up.
    pub follow_up_risk_threshold: f32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            expiry_days: 90,
            warning_days: 60,
            follow_up_risk_threshold: 6.0,
        }
    }
}

/// Pure state derivation. Holds no state beyond its policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEngine {
    policy: LifecyclePolicy,
}

impl StateEngine {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Derive the lifecycle state of `record` at `now`.
    ///
    /// Completion wins over any time-based rule; otherwise the remaining days
    /// until expiry decide between `EXPIRED`, `EXPIRING_SOON` and the
    /// started/not-started states.
    pub fn derive_state(
        &self,
        record: &SurveyRecord,
        now: DateTime<Utc>,
    ) -> Result<SurveyState, InvalidRecord> {
        if record.id.0.trim().is_empty() {
            return Err(InvalidRecord::BlankId(record.id.clone()));
        }

        let assigned_at = record
            .assigned_at
            .ok_or_else(|| InvalidRecord::MissingAssignedAt(record.id.clone()))?;

        if record.completed_at.is_some() {
            return Ok(if self.needs_follow_up(record) {
                SurveyState::RequiresFollowUp
            } else {
                SurveyState::Completed
            });
        }

        let days_remaining = self
            .days_remaining(assigned_at, now)
            .ok_or_else(|| InvalidRecord::AssignedAtOutOfRange(record.id.clone()))?;

        let state = if days_remaining < 0 {
            SurveyState::Expired
        } else if days_remaining <= self.policy.warning_days {
            SurveyState::ExpiringSoon
        } else if record.started_at.is_some() {
            SurveyState::InProgress
        } else {
            SurveyState::Pending
        };

        Ok(state)
    }

    /// Whole days until expiry, rounded up. Negative once the deadline passed.
    ///
    /// `None` when the deadline falls outside the representable date range.
    pub fn days_remaining(&self, assigned_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
        let window = TimeDelta::try_days(self.policy.expiry_days)?;
        let deadline = assigned_at.checked_add_signed(window)?;
        let millis = deadline.signed_duration_since(now).num_milliseconds();
        Some(-((-millis).div_euclid(MILLIS_PER_DAY)))
    }

    /// Audit text for a transition into `target`.
    pub fn reason_for(&self, target: SurveyState, record: &SurveyRecord, now: DateTime<Utc>) -> String {
        let days = record
            .assigned_at
            .and_then(|assigned_at| self.days_remaining(assigned_at, now));

        match target {
            SurveyState::Pending => "Encuesta asignada, pendiente de inicio".to_string(),
            SurveyState::InProgress => "Encuesta iniciada por el trabajador".to_string(),
            SurveyState::ExpiringSoon => format!(
                "Encuesta próxima a vencer ({} días restantes)",
                days.unwrap_or_default()
            ),
            SurveyState::Expired => format!(
                "Encuesta vencida ({} días de retraso)",
                days.map(|value| -value).unwrap_or_default()
            ),
            SurveyState::Completed => "Encuesta completada".to_string(),
            SurveyState::RequiresFollowUp => match record.risk_score {
                Some(score) if score >= self.policy.follow_up_risk_threshold => format!(
                    "Encuesta completada con puntaje de riesgo {score:.1}; requiere seguimiento"
                ),
                _ => "Encuesta completada; marcada para seguimiento".to_string(),
            },
        }
    }

    fn needs_follow_up(&self, record: &SurveyRecord) -> bool {
        record.requires_follow_up
            || record
                .risk_score
                .is_some_and(|score| score >= self.policy.follow_up_risk_threshold)
    }
}
