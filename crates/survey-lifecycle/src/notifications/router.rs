use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    Notification, NotificationError, NotificationFilter, NotificationId, NotificationKind,
    NotificationPriority, NotificationSort,
};
use super::hub::NotificationHub;
use crate::error::AppError;

/// Query string accepted by the list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub priority: Option<NotificationPriority>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub include_dismissed: bool,
    #[serde(default)]
    pub sort: NotificationSort,
}

impl ListQuery {
    fn filter(&self) -> NotificationFilter {
        NotificationFilter {
            kind: self.kind,
            priority: self.priority,
            unread_only: self.unread,
            include_dismissed: self.include_dismissed,
        }
    }
}

/// Router exposing the notification API.
pub fn notification_router(hub: Arc<NotificationHub>) -> Router {
    Router::new()
        .route(
            "/api/v1/notifications",
            get(list_handler).delete(clear_handler),
        )
        .route("/api/v1/notifications/stats", get(stats_handler))
        .route("/api/v1/notifications/read-all", post(read_all_handler))
        .route("/api/v1/notifications/:id/read", post(read_handler))
        .route("/api/v1/notifications/:id/dismiss", post(dismiss_handler))
        .route("/api/v1/notifications/:id", delete(remove_handler))
        .with_state(hub)
}

pub(crate) async fn list_handler(
    State(hub): State<Arc<NotificationHub>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let notifications = hub.list(&query.filter(), query.sort);
    (StatusCode::OK, Json(notifications)).into_response()
}

pub(crate) async fn stats_handler(State(hub): State<Arc<NotificationHub>>) -> Response {
    (StatusCode::OK, Json(hub.stats())).into_response()
}

pub(crate) async fn read_handler(
    State(hub): State<Arc<NotificationHub>>,
    Path(id): Path<String>,
) -> Response {
    respond(hub.mark_as_read(&NotificationId(id)))
}

pub(crate) async fn dismiss_handler(
    State(hub): State<Arc<NotificationHub>>,
    Path(id): Path<String>,
) -> Response {
    respond(hub.dismiss(&NotificationId(id)))
}

pub(crate) async fn remove_handler(
    State(hub): State<Arc<NotificationHub>>,
    Path(id): Path<String>,
) -> Response {
    respond(hub.remove(&NotificationId(id)))
}

pub(crate) async fn read_all_handler(State(hub): State<Arc<NotificationHub>>) -> Response {
    let updated = hub.mark_all_as_read();
    (StatusCode::OK, Json(json!({ "updated": updated }))).into_response()
}

pub(crate) async fn clear_handler(State(hub): State<Arc<NotificationHub>>) -> Response {
    hub.clear_all();
    StatusCode::NO_CONTENT.into_response()
}

fn respond(result: Result<Notification, NotificationError>) -> Response {
    match result {
        Ok(notification) => (StatusCode::OK, Json(notification)).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}
