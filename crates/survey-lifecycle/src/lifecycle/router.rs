use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use super::domain::SurveyRecord;
use super::scheduler::TriggerHandle;
use super::service::{LifecycleService, PassResult, TimeRange};
use super::LifecycleError;
use crate::error::AppError;

/// Shared state for the lifecycle endpoints.
#[derive(Debug, Clone)]
pub struct LifecycleApi {
    pub service: Arc<LifecycleService>,
    /// When present, record uploads wake the scheduler instead of waiting for
    /// the next tick.
    pub triggers: Option<TriggerHandle>,
}

/// Router exposing stats, the transition log, record intake, and auto-action
/// configuration.
pub fn lifecycle_router(api: LifecycleApi) -> Router {
    Router::new()
        .route("/api/v1/surveys/stats", get(stats_handler))
        .route("/api/v1/surveys/transitions", get(transitions_handler))
        .route("/api/v1/surveys/records", put(records_handler))
        .route("/api/v1/surveys/process", post(process_handler))
        .route(
            "/api/v1/surveys/auto-actions",
            get(auto_actions_handler).patch(update_auto_actions_handler),
        )
        .with_state(api)
}

pub(crate) async fn stats_handler(State(api): State<LifecycleApi>) -> Response {
    (StatusCode::OK, Json(api.service.stats())).into_response()
}

pub(crate) async fn transitions_handler(
    State(api): State<LifecycleApi>,
    Query(range): Query<TimeRange>,
) -> Response {
    match api.service.transition_log(range) {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn records_handler(
    State(api): State<LifecycleApi>,
    Json(records): Json<Vec<SurveyRecord>>,
) -> Response {
    let count = records.len();
    match &api.triggers {
        Some(triggers) => triggers.update_records(records),
        None => api.service.update_records(records),
    }
    (StatusCode::ACCEPTED, Json(json!({ "accepted": count }))).into_response()
}

pub(crate) async fn process_handler(State(api): State<LifecycleApi>) -> Response {
    match api.service.force_process().await {
        PassResult::Completed(report) => {
            let payload = json!({
                "status": "completed",
                "processed_at": report.processed_at,
                "transitions": report.transitions,
                "skipped": report.skipped.len(),
                "actions_dispatched": report.dispatch.len(),
                "stats": report.stats,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        PassResult::NoData => {
            let payload = json!({ "status": "no_data" });
            (StatusCode::OK, Json(payload)).into_response()
        }
        PassResult::Superseded => {
            let payload = json!({ "status": "superseded" });
            (StatusCode::OK, Json(payload)).into_response()
        }
        PassResult::AlreadyRunning => error_response(LifecycleError::PassInFlight),
    }
}

pub(crate) async fn auto_actions_handler(State(api): State<LifecycleApi>) -> Response {
    (StatusCode::OK, Json(api.service.auto_actions())).into_response()
}

pub(crate) async fn update_auto_actions_handler(
    State(api): State<LifecycleApi>,
    Json(partial): Json<HashMap<String, bool>>,
) -> Response {
    match api.service.set_auto_actions(&partial) {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: LifecycleError) -> Response {
    AppError::from(err).into_response()
}
