use crate::infra::logging_registry;
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use survey_lifecycle::clock::ManualClock;
use survey_lifecycle::config::AppConfig;
use survey_lifecycle::error::AppError;
use survey_lifecycle::lifecycle::{
    ActionDispatcher, AutoAction, AutoActionConfig, DispatchReport, LifecycleService, PassReport,
    PassResult, StateEngine, SurveyRecordImporter, SurveyState, TransitionProcessor,
};
use survey_lifecycle::notifications::{MemoryStore, NotificationHub};

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    /// Survey export to evaluate (`.csv`, otherwise JSON)
    #[arg(long)]
    pub(crate) records: PathBuf,
    /// Evaluation instant (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_instant)]
    pub(crate) at: Option<DateTime<Utc>>,
    /// Print every detected transition with its reason
    #[arg(long)]
    pub(crate) list_transitions: bool,
    /// Also run GENERATE_REPORT for completed surveys
    #[arg(long)]
    pub(crate) generate_reports: bool,
}

pub(crate) async fn run_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let EvaluateArgs {
        records,
        at,
        list_transitions,
        generate_reports,
    } = args;

    let config = AppConfig::load()?;
    let now = at.unwrap_or_else(Utc::now);
    let loaded = SurveyRecordImporter::from_path(&records)?;

    let clock = Arc::new(ManualClock::new(now));
    let hub = Arc::new(NotificationHub::new(
        config.notifications.capacity,
        Arc::new(MemoryStore::default()),
        clock.clone(),
    ));
    let processor = TransitionProcessor::new(
        StateEngine::new(config.lifecycle.policy),
        config.lifecycle.batch_size,
    );
    let mut auto_actions = AutoActionConfig::default();
    auto_actions.set(AutoAction::GenerateReport, generate_reports);
    let service = LifecycleService::new(
        processor,
        ActionDispatcher::new(logging_registry(), hub),
        clock,
    )
    .with_auto_actions(auto_actions);

    service.update_records(loaded);
    match service.force_process().await {
        PassResult::Completed(mut report) => {
            let dispatched = std::mem::take(&mut report.dispatch).join().await;
            render_pass(&records, &report, &dispatched, list_transitions);
        }
        PassResult::NoData | PassResult::AlreadyRunning | PassResult::Superseded => {
            println!("No lifecycle pass was run for {}", records.display());
        }
    }

    Ok(())
}

pub(crate) fn render_pass(
    source: &Path,
    report: &PassReport,
    dispatched: &[DispatchReport],
    list_transitions: bool,
) {
    println!("Survey lifecycle evaluation");
    println!(
        "Source: {} (evaluated {})",
        source.display(),
        report.processed_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!(
        "{} records processed, {} skipped, {} transitions",
        report.stats.total,
        report.skipped.len(),
        report.transitions.len()
    );

    println!("\nState breakdown");
    for state in SurveyState::ordered() {
        println!("- {}: {}", state.label(), report.stats.count(state));
    }

    if !report.skipped.is_empty() {
        println!("\nSkipped records");
        for invalid in &report.skipped {
            println!("- {invalid}");
        }
    }

    if list_transitions {
        if report.transitions.is_empty() {
            println!("\nTransitions: none");
        } else {
            println!("\nTransitions");
            for entry in &report.transitions {
                println!(
                    "- {} ({}): {} -> {} | {}",
                    entry.record_id,
                    entry.worker_id,
                    entry.transition.from_state,
                    entry.transition.to_state,
                    entry.transition.reason
                );
            }
        }
    }

    if dispatched.is_empty() {
        println!("\nAutomatic actions: none");
    } else {
        println!("\nAutomatic actions");
        for call in dispatched {
            match &call.result {
                Ok(outcome) => println!("- {} {}: {}", call.action, call.record_id, outcome.summary),
                Err(err) => println!("- {} {}: FAILED ({err})", call.action, call.record_id),
            }
        }
    }
}
