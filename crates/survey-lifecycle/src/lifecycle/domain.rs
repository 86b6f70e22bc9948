use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier wrapper for assigned surveys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveyId(pub String);

impl fmt::Display for SurveyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the worker the questionnaire was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a survey, always derived from the record's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyState {
    Pending,
    InProgress,
    ExpiringSoon,
    Expired,
    Completed,
    RequiresFollowUp,
}

impl SurveyState {
    pub const fn ordered() -> [Self; 6] {
        [
            Self::Pending,
            Self::InProgress,
            Self::ExpiringSoon,
            Self::Expired,
            Self::Completed,
            Self::RequiresFollowUp,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::ExpiringSoon => "EXPIRING_SOON",
            Self::Expired => "EXPIRED",
            Self::Completed => "COMPLETED",
            Self::RequiresFollowUp => "REQUIRES_FOLLOW_UP",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pendiente",
            Self::InProgress => "En progreso",
            Self::ExpiringSoon => "Próxima a vencer",
            Self::Expired => "Vencida",
            Self::Completed => "Completada",
            Self::RequiresFollowUp => "Requiere seguimiento",
        }
    }

    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed | Self::RequiresFollowUp)
    }
}

impl Default for SurveyState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for SurveyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change of derived state. Immutable once appended to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: SurveyState,
    pub to_state: SurveyState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// One worker's assigned health questionnaire and its lifecycle history.
///
/// `assigned_at` is optional on the wire so that malformed upstream rows can be
/// represented and skipped instead of failing the whole import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub id: SurveyId,
    pub worker_id: WorkerId,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub risk_score: Option<f32>,
    #[serde(default)]
    pub requires_follow_up: bool,
    #[serde(default)]
    pub current_state: SurveyState,
    #[serde(default)]
    pub state_history: Vec<StateTransition>,
}

impl SurveyRecord {
    /// A freshly assigned survey in its initial state.
    pub fn assigned(id: impl Into<String>, worker_id: impl Into<String>, assigned_at: DateTime<Utc>) -> Self {
        Self {
            id: SurveyId(id.into()),
            worker_id: WorkerId(worker_id.into()),
            assigned_at: Some(assigned_at),
            started_at: None,
            completed_at: None,
            risk_score: None,
            requires_follow_up: false,
            current_state: SurveyState::Pending,
            state_history: Vec::new(),
        }
    }

    pub(crate) fn apply_transition(&mut self, transition: StateTransition) {
        self.current_state = transition.to_state;
        self.state_history.push(transition);
    }
}

/// Transition as exposed in the consumer-facing log, tagged with its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub record_id: SurveyId,
    pub worker_id: WorkerId,
    #[serde(flatten)]
    pub transition: StateTransition,
}

/// Why a record was left out of a processing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum InvalidRecord {
    #[error("survey {0} has no assignment timestamp")]
    MissingAssignedAt(SurveyId),
    #[error("survey {0} has a blank identifier")]
    BlankId(SurveyId),
    #[error("survey {0} has an assignment date too far out to compute its deadline")]
    AssignedAtOutOfRange(SurveyId),
}
