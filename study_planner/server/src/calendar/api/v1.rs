use crate::auth::CurrentUser;
use crate::calendar::sync::{CalendarSyncService, CreateEventRequest, SyncError, SyncReport};
use crate::calendar::{CalendarError, CalendarState};
use crate::task::api::v1::task_error_response;
use crate::task::parse_due_date;
use crate::web::api::v1::ServerErrorResponse;
use axum::{
    Extension, Router,
    extract::State,
    http::StatusCode,
    response::{Json, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Event to create in the user's calendar.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEventJson {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD`, wall clock in the configured time zone
    pub start: String,
    /// Defaults to one hour after `start`
    #[serde(default)]
    pub end: Option<String>,
    /// Task to link to the new event
    #[serde(default)]
    pub task_id: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEventResponse {
    pub success: bool,
    pub event_id: String,
    pub html_link: Option<String>,
}

fn sync_error_response(err: SyncError) -> Response {
    match err {
        SyncError::Task(task_err) => task_error_response(task_err),
        SyncError::MissingDueDate(_) | SyncError::InvalidTimeRange => {
            ServerErrorResponse::response(StatusCode::BAD_REQUEST, err.to_string())
        }
        SyncError::Calendar(
            CalendarError::NotConfigured | CalendarError::NotConnected | CalendarError::TokenExpired,
        ) => ServerErrorResponse::response(StatusCode::BAD_REQUEST, err.to_string()),
        SyncError::Calendar(CalendarError::EventNotFound(_)) => {
            ServerErrorResponse::response(StatusCode::NOT_FOUND, err.to_string())
        }
        SyncError::Calendar(CalendarError::Api { .. } | CalendarError::Http(_)) => {
            tracing::error!("Calendar request failed: {}", err);
            ServerErrorResponse::response(
                StatusCode::BAD_GATEWAY,
                "Google Calendar did not accept the request",
            )
        }
        _ => {
            tracing::error!("Calendar operation failed: {:?}", err);
            ServerErrorResponse::internal("Calendar operation failed")
        }
    }
}

fn parse_time(raw: &str) -> Result<chrono::NaiveDateTime, Response> {
    match parse_due_date(raw) {
        Ok(Some(time)) => Ok(time),
        _ => Err(ServerErrorResponse::response(
            StatusCode::BAD_REQUEST,
            format!("Could not understand time '{}'", raw),
        )),
    }
}

/// Handler for POST /api/v1/calendar/events - creates an event, optionally linked to a task.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/api/v1/calendar/events",
    request_body = CreateEventJson,
    responses(
        (status = 200, description = "Event created", body = CreateEventResponse),
        (status = 400, description = "Invalid times or calendar not connected", body = ServerErrorResponse),
        (status = 403, description = "Task belongs to another user", body = ServerErrorResponse),
        (status = 404, description = "No such task", body = ServerErrorResponse),
        (status = 409, description = "Task is already linked to an event", body = ServerErrorResponse),
        (status = 502, description = "Google Calendar refused the event", body = ServerErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Calendar"
)]
pub async fn create_event_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateEventJson>,
) -> Result<Json<CreateEventResponse>, Response> {
    let request = CreateEventRequest {
        summary: body.summary,
        description: body.description.filter(|description| !description.trim().is_empty()),
        start: parse_time(&body.start)?,
        end: body.end.as_deref().map(parse_time).transpose()?,
        task_id: body.task_id,
    };

    let service = CalendarSyncService::new(&state.db, state.provider.as_ref(), &state.settings);
    let event = service
        .create_event(user.id, request)
        .await
        .map_err(sync_error_response)?;

    Ok(Json(CreateEventResponse {
        success: true,
        event_id: event.id,
        html_link: event.html_link,
    }))
}

/// Handler for POST /api/v1/calendar/sync - imports upcoming events as tasks.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/api/v1/calendar/sync",
    responses(
        (status = 200, description = "Import finished", body = SyncReport),
        (status = 400, description = "Calendar not connected", body = ServerErrorResponse),
        (status = 502, description = "Google Calendar could not be read", body = ServerErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Calendar"
)]
pub async fn sync_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<SyncReport>, Response> {
    let service = CalendarSyncService::new(&state.db, state.provider.as_ref(), &state.settings);
    let report = service
        .import_events(user.id)
        .await
        .map_err(sync_error_response)?;
    Ok(Json(report))
}

/// Creates the calendar API routes, relative to `/api/v1`.
pub fn create_api_router(state: Arc<CalendarState>) -> Router {
    Router::new()
        .route("/calendar/events", post(create_event_handler))
        .route("/calendar/sync", post(sync_handler))
        .with_state(state)
}
