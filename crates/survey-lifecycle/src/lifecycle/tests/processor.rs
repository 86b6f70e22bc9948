use chrono::{DateTime, Duration, Utc};

use super::common::*;
use crate::lifecycle::{
    InvalidRecord, StateEngine, SurveyId, SurveyState, TransitionProcessor,
};

#[tokio::test]
async fn first_pass_logs_every_change_from_pending() {
    let processor = TransitionProcessor::default();
    let records = vec![pending("a"), started("b"), completed("c", 2.0), completed("d", 9.0)];

    let outcome = processor.process_all(records, at(2024, 1, 15)).await;

    let targets: Vec<_> = outcome
        .transitions
        .iter()
        .map(|entry| (entry.record_id.0.as_str(), entry.transition.to_state))
        .collect();
    assert_eq!(
        targets,
        vec![
            ("b", SurveyState::InProgress),
            ("c", SurveyState::Completed),
            ("d", SurveyState::RequiresFollowUp),
        ]
    );
    assert_eq!(outcome.updated_count(), 3);
    assert_eq!(outcome.stats.total, 4);
    assert_eq!(outcome.stats.count(SurveyState::Pending), 1);
    assert_eq!(outcome.stats.processed_at, Some(at(2024, 1, 15)));
}

#[tokio::test]
async fn second_pass_at_same_instant_is_idempotent() {
    let processor = TransitionProcessor::default();
    let now = at(2024, 2, 20);

    let first = processor.process_all(mixed_records(12), now).await;
    assert!(!first.transitions.is_empty());

    let second = processor.process_all(first.records.clone(), now).await;
    assert!(second.transitions.is_empty());
    assert_eq!(second.updated_count(), 0);
    assert_eq!(second.records, first.records);
    assert_eq!(second.stats.by_state, first.stats.by_state);
}

#[tokio::test]
async fn batch_size_does_not_change_results() {
    let now = at(2024, 3, 1);
    let records = mixed_records(53);

    let single = TransitionProcessor::new(StateEngine::default(), 1)
        .process_all(records.clone(), now)
        .await;
    let odd = TransitionProcessor::new(StateEngine::default(), 7)
        .process_all(records.clone(), now)
        .await;
    let whole = TransitionProcessor::new(StateEngine::default(), 500)
        .process_all(records, now)
        .await;

    assert_eq!(single.records, odd.records);
    assert_eq!(odd.records, whole.records);
    assert_eq!(single.transitions, whole.transitions);
    assert_eq!(single.stats, whole.stats);
}

#[tokio::test]
async fn invalid_records_are_skipped_and_left_out_of_stats() {
    let processor = TransitionProcessor::default();
    let records = vec![pending("ok"), unassigned("broken"), pending("  ")];

    let outcome = processor.process_all(records, at(2024, 1, 10)).await;

    assert_eq!(outcome.stats.total, 1);
    assert_eq!(outcome.stats.skipped, 2);
    assert_eq!(
        outcome.skipped,
        vec![
            InvalidRecord::MissingAssignedAt(SurveyId("broken".to_string())),
            InvalidRecord::BlankId(SurveyId("  ".to_string())),
        ]
    );
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.records[1].current_state, SurveyState::Pending);
    assert!(outcome.records[1].state_history.is_empty());
}

#[tokio::test]
async fn assignment_beyond_the_calendar_is_skipped_without_stopping_the_batch() {
    let processor = TransitionProcessor::new(StateEngine::default(), 1);
    let mut far_future = pending("far");
    far_future.assigned_at = Some(DateTime::<Utc>::MAX_UTC - Duration::days(10));
    let records = vec![far_future, started("b"), pending("c")];

    let outcome = processor.process_all(records, at(2024, 3, 1)).await;

    assert_eq!(
        outcome.skipped,
        vec![InvalidRecord::AssignedAtOutOfRange(SurveyId("far".to_string()))]
    );
    assert_eq!(outcome.stats.total, 2);
    assert_eq!(outcome.stats.skipped, 1);
    assert_eq!(outcome.stats.count(SurveyState::ExpiringSoon), 2);
    assert_eq!(outcome.transitions.len(), 2);
    assert_eq!(outcome.records[0].current_state, SurveyState::Pending);
}

#[tokio::test]
async fn history_grows_only_on_change() {
    let processor = TransitionProcessor::default();
    let mut records = vec![pending("a")];

    for now in [at(2024, 1, 5), at(2024, 1, 20), at(2024, 2, 10), at(2024, 2, 20), at(2024, 4, 2)] {
        records = processor.process_all(records, now).await.records;
    }

    let history: Vec<_> = records[0]
        .state_history
        .iter()
        .map(|transition| (transition.from_state, transition.to_state))
        .collect();
    assert_eq!(
        history,
        vec![
            (SurveyState::Pending, SurveyState::ExpiringSoon),
            (SurveyState::ExpiringSoon, SurveyState::Expired),
        ]
    );
    assert_eq!(records[0].current_state, SurveyState::Expired);
}

#[tokio::test]
async fn updated_records_point_at_changed_entries() {
    let processor = TransitionProcessor::default();
    let mut already_current = started("b");
    already_current.current_state = SurveyState::InProgress;

    let outcome = processor
        .process_all(vec![pending("a"), already_current, completed("c", 1.0)], at(2024, 1, 12))
        .await;

    let updated: Vec<_> = outcome
        .updated_records()
        .map(|record| record.id.0.clone())
        .collect();
    assert_eq!(updated, vec!["c".to_string()]);
}

#[test]
fn process_record_reports_transition_with_reason() {
    let processor = TransitionProcessor::default();
    let mut record = pending("a");

    let entry = processor
        .process_record(&mut record, at(2024, 3, 1))
        .expect("record is valid")
        .expect("state changed");

    assert_eq!(entry.record_id.0, "a");
    assert_eq!(entry.worker_id.0, "worker-a");
    assert_eq!(entry.transition.from_state, SurveyState::Pending);
    assert_eq!(entry.transition.to_state, SurveyState::ExpiringSoon);
    assert_eq!(entry.transition.timestamp, at(2024, 3, 1));
    assert_eq!(
        entry.transition.reason,
        "Encuesta próxima a vencer (30 días restantes)"
    );
    assert_eq!(record.current_state, SurveyState::ExpiringSoon);
    assert_eq!(record.state_history.len(), 1);
}
