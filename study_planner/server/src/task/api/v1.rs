use crate::auth::CurrentUser;
use crate::calendar::CalendarState;
use crate::task::{Task, TaskService, TaskServiceError, TaskStatus};
use crate::web::api::v1::ServerErrorResponse;
use axum::{
    Extension, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// JSON representation of a Task for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    /// Wall-clock due date, `YYYY-MM-DDTHH:MM:SS`
    pub due_date: Option<chrono::NaiveDateTime>,
    pub category: Option<String>,
    pub status: TaskStatus,
    pub is_complete: bool,
    /// Id of the linked Google Calendar event
    pub google_event_id: Option<String>,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().map(str::to_string),
            due_date: task.due_date(),
            category: task.category().map(str::to_string),
            status: task.status(),
            is_complete: task.is_complete(),
            google_event_id: task.google_event_id().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TasksResponse {
    pub tasks: Vec<TaskJson>,
    pub count: usize,
}

/// Body of a status change, e.g. `{"status": "doing"}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    /// One of `todo`, `doing`, `done`
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdateResponse {
    pub success: bool,
    pub task_id: i32,
    pub new_status: TaskStatus,
}

/// Maps task service failures onto API responses.
pub(crate) fn task_error_response(err: TaskServiceError) -> Response {
    match err {
        TaskServiceError::TaskNotFound(_) => {
            ServerErrorResponse::response(StatusCode::NOT_FOUND, err.to_string())
        }
        TaskServiceError::Forbidden(_) => {
            ServerErrorResponse::response(StatusCode::FORBIDDEN, "Unauthorized")
        }
        TaskServiceError::DuplicateCalendarEvent(_) => {
            ServerErrorResponse::response(StatusCode::CONFLICT, err.to_string())
        }
        TaskServiceError::Database(db_err) => {
            tracing::error!("Task query failed: {}", db_err);
            ServerErrorResponse::internal("Failed to access tasks")
        }
    }
}

/// Handler for GET /api/v1/tasks - all tasks of the caller, by due date.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses(
        (status = 200, description = "Tasks of the authenticated user", body = TasksResponse),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Internal server error", body = ServerErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn list_tasks_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<TasksResponse>, Response> {
    let tasks = TaskService::new(&state.db)
        .get_tasks_by_due_date(user.id)
        .await
        .map_err(task_error_response)?;
    let tasks: Vec<TaskJson> = tasks.into_iter().map(TaskJson::from).collect();
    let count = tasks.len();
    Ok(Json(TasksResponse { tasks, count }))
}

/// Handler for PUT /api/v1/tasks/{id}/status - moves a task between kanban columns.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}/status",
    params(("id" = i32, Path, description = "Task id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status changed", body = StatusUpdateResponse),
        (status = 400, description = "Unknown status", body = ServerErrorResponse),
        (status = 403, description = "Task belongs to another user", body = ServerErrorResponse),
        (status = 404, description = "No such task", body = ServerErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn update_status_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<StatusUpdateResponse>, Response> {
    let status: TaskStatus = request
        .status
        .parse()
        .map_err(|_| ServerErrorResponse::response(StatusCode::BAD_REQUEST, "Invalid status"))?;

    let task = TaskService::new(&state.db)
        .update_status(user.id, id, status)
        .await
        .map_err(task_error_response)?;

    Ok(Json(StatusUpdateResponse {
        success: true,
        task_id: task.id(),
        new_status: task.status(),
    }))
}

/// Creates the task API routes, relative to `/api/v1`.
pub fn create_api_router(state: Arc<CalendarState>) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks_handler))
        .route("/tasks/{id}/status", put(update_status_handler))
        .with_state(state)
}
