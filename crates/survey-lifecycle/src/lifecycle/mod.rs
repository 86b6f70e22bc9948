//! Survey lifecycle engine: state derivation, transition processing, automatic
//! actions, and the scheduler that drives them.

pub mod actions;
pub mod domain;
mod engine;
pub mod import;
mod processor;
pub mod router;
mod scheduler;
mod service;

#[cfg(test)]
mod tests;

pub use actions::{
    ActionDispatcher, ActionError, ActionExecutor, ActionInvocation, ActionOutcome,
    ActionRegistry, AutoAction, AutoActionConfig, DispatchHandle, DispatchReport,
};
pub use domain::{
    InvalidRecord, StateTransition, SurveyId, SurveyRecord, SurveyState, TransitionLogEntry,
    WorkerId,
};
pub use engine::{LifecyclePolicy, StateEngine};
pub use import::{RecordImportError, SurveyRecordImporter};
pub use processor::{ProcessOutcome, ProcessingStats, TransitionProcessor, DEFAULT_BATCH_SIZE};
pub use router::{lifecycle_router, LifecycleApi};
pub use scheduler::{Scheduler, SchedulerHandle, Trigger, TriggerHandle};
pub use service::{LifecycleService, PassReport, PassResult, TimeRange};

/// Errors raised synchronously to consumers of the lifecycle API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("unknown auto-action '{0}'")]
    UnknownAutoAction(String),
    #[error("a processing pass is already running")]
    PassInFlight,
    #[error("invalid time range: since is after until")]
    InvalidTimeRange,
}
