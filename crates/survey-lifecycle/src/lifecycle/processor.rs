use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{
    InvalidRecord, StateTransition, SurveyRecord, SurveyState, TransitionLogEntry,
};
use super::engine::StateEngine;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Per-state counts for the most recent pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total: usize,
    pub by_state: BTreeMap<SurveyState, usize>,
    pub skipped: usize,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_state: SurveyState::ordered()
                .into_iter()
                .map(|state| (state, 0))
                .collect(),
            skipped: 0,
            processed_at: None,
        }
    }
}

impl ProcessingStats {
    pub fn count(&self, state: SurveyState) -> usize {
        self.by_state.get(&state).copied().unwrap_or_default()
    }
}

/// Result of one `process_all` call.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// The full snapshot after the pass, in input order.
    pub records: Vec<SurveyRecord>,
    pub transitions: Vec<TransitionLogEntry>,
    pub skipped: Vec<InvalidRecord>,
    pub stats: ProcessingStats,
    updated: Vec<usize>,
}

impl ProcessOutcome {
    /// Records whose state changed during the pass.
    pub fn updated_records(&self) -> impl Iterator<Item = &SurveyRecord> {
        self.updated.iter().map(|index| &self.records[*index])
    }

    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }
}

/// Walks a snapshot of records, re-deriving each state and recording deltas.
#[derive(Debug, Clone)]
pub struct TransitionProcessor {
    engine: StateEngine,
    batch_size: usize,
}

impl TransitionProcessor {
    pub fn new(engine: StateEngine, batch_size: usize) -> Self {
        Self {
            engine,
            batch_size: batch_size.max(1),
        }
    }

    pub fn engine(&self) -> &StateEngine {
        &self.engine
    }

    /// Process every record against `now`. Yields to the runtime between
    /// batches; batch boundaries never change the result.
    pub async fn process_all(
        &self,
        mut records: Vec<SurveyRecord>,
        now: DateTime<Utc>,
    ) -> ProcessOutcome {
        let mut transitions = Vec::new();
        let mut skipped = Vec::new();
        let mut updated = Vec::new();
        let mut stats = ProcessingStats {
            processed_at: Some(now),
            ..ProcessingStats::default()
        };

        let batch_size = self.batch_size;
        for (batch_index, batch) in records.chunks_mut(batch_size).enumerate() {
            for (offset, record) in batch.iter_mut().enumerate() {
                match self.process_record(record, now) {
                    Ok(Some(entry)) => {
                        updated.push(batch_index * batch_size + offset);
                        transitions.push(entry);
                    }
                    Ok(None) => {}
                    Err(invalid) => {
                        warn!(record_id = %record.id, error = %invalid, "skipping invalid survey record");
                        skipped.push(invalid);
                        continue;
                    }
                }

                stats.total += 1;
                *stats.by_state.entry(record.current_state).or_default() += 1;
            }

            debug!(batch = batch_index, size = batch.len(), "processed survey batch");
            tokio::task::yield_now().await;
        }

        stats.skipped = skipped.len();

        ProcessOutcome {
            records,
            transitions,
            skipped,
            stats,
            updated,
        }
    }

    /// Derive one record's state and apply the transition if it changed.
    pub fn process_record(
        &self,
        record: &mut SurveyRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionLogEntry>, InvalidRecord> {
        let next = self.engine.derive_state(record, now)?;
        if next == record.current_state {
            return Ok(None);
        }

        let transition = StateTransition {
            from_state: record.current_state,
            to_state: next,
            timestamp: now,
            reason: self.engine.reason_for(next, record, now),
        };
        record.apply_transition(transition.clone());

        Ok(Some(TransitionLogEntry {
            record_id: record.id.clone(),
            worker_id: record.worker_id.clone(),
            transition,
        }))
    }
}

impl Default for TransitionProcessor {
    fn default() -> Self {
        Self::new(StateEngine::default(), DEFAULT_BATCH_SIZE)
    }
}
