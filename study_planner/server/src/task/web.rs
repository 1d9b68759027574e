use askama::Template;
use axum::{
    Extension, Form, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::calendar::CalendarState;
use crate::calendar::sync::{CalendarSyncService, SyncError};
use crate::flash::{self, FlashLevel};
use crate::task::{DEFAULT_CATEGORIES, Task, TaskForm, TaskService, TaskServiceError};
use crate::web::{PageContext, error_page};

/// Custom error type for task handler operations.
#[derive(Debug, thiserror::Error)]
enum TaskWebError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error("Task service error")]
    Service(#[from] TaskServiceError),
}

impl IntoResponse for TaskWebError {
    fn into_response(self) -> Response {
        match self {
            TaskWebError::Service(TaskServiceError::TaskNotFound(_)) => {
                error_page(StatusCode::NOT_FOUND, "That task does not exist.")
            }
            TaskWebError::Service(TaskServiceError::Forbidden(_)) => error_page(
                StatusCode::FORBIDDEN,
                "You are not authorized to view this task.",
            ),
            other => {
                tracing::error!("Task request failed: {:?}", other);
                error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred while processing your request. Please try again later.",
                )
            }
        }
    }
}

/// One entry of the category drop-down.
pub struct CategoryOption {
    pub value: &'static str,
    pub selected: bool,
}

fn category_options(selected: &str) -> Vec<CategoryOption> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|&value| CategoryOption {
            value,
            selected: value == selected,
        })
        .collect()
}

#[derive(Template)]
#[template(path = "tasks.html")]
struct TasksTemplate {
    page: PageContext,
    todo: Vec<Task>,
    doing: Vec<Task>,
    done: Vec<Task>,
}

#[derive(Template)]
#[template(path = "task_form.html")]
struct TaskFormTemplate {
    page: PageContext,
    heading: &'static str,
    action: String,
    form: TaskForm,
    categories: Vec<CategoryOption>,
    error: Option<String>,
}

impl TaskFormTemplate {
    fn new(
        page: PageContext,
        heading: &'static str,
        action: String,
        form: TaskForm,
        error: Option<String>,
    ) -> Self {
        let categories = category_options(&form.category);
        Self {
            page,
            heading,
            action,
            form,
            categories,
            error,
        }
    }
}

/// Creates the kanban board and task form routes.
pub fn create_task_router(state: Arc<CalendarState>) -> Router {
    Router::new()
        .route("/tasks", get(tasks_handler))
        .route("/tasks/add", get(add_task_page_handler).post(add_task_handler))
        .route(
            "/tasks/{id}/edit",
            get(edit_task_page_handler).post(edit_task_handler),
        )
        .route("/tasks/{id}/delete", post(delete_task_handler))
        .route("/tasks/{id}/complete", post(complete_task_handler))
        .route("/tasks/{id}/sync", post(sync_task_handler))
        .with_state(state)
}

fn sync_service(state: &CalendarState) -> CalendarSyncService<'_> {
    CalendarSyncService::new(&state.db, state.provider.as_ref(), &state.settings)
}

fn back_to_tasks(jar: CookieJar, level: FlashLevel, message: impl Into<String>) -> Response {
    (flash::push(jar, level, message), Redirect::to("/tasks")).into_response()
}

fn not_authorized(jar: CookieJar, action: &str) -> Response {
    back_to_tasks(
        jar,
        FlashLevel::Danger,
        format!("You are not authorized to {} this task.", action),
    )
}

/// The kanban board: todo, doing and done columns, oldest first.
#[tracing::instrument(skip(state, jar))]
async fn tasks_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), TaskWebError> {
    let board = TaskService::new(&state.db).get_board(user.id).await?;

    let (jar, flash) = flash::take(jar);
    let template = TasksTemplate {
        page: PageContext::new(Some(&user), flash),
        todo: board.todo,
        doing: board.doing,
        done: board.done,
    };
    Ok((jar, Html(template.render()?)))
}

#[tracing::instrument(skip(jar))]
async fn add_task_page_handler(
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), TaskWebError> {
    let (jar, flash) = flash::take(jar);
    let form = TaskForm {
        category: "Study".to_string(),
        ..Default::default()
    };
    let template = TaskFormTemplate::new(
        PageContext::new(Some(&user), flash),
        "Add New Task",
        "/tasks/add".to_string(),
        form,
        None,
    );
    Ok((jar, Html(template.render()?)))
}

#[tracing::instrument(skip(state, jar))]
async fn add_task_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
    Form(form): Form<TaskForm>,
) -> Result<Response, TaskWebError> {
    let details = match form.validate() {
        Ok(details) => details,
        Err(err) => {
            let template = TaskFormTemplate::new(
                PageContext::new(Some(&user), None),
                "Add New Task",
                "/tasks/add".to_string(),
                form,
                Some(err.to_string()),
            );
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(template.render()?)).into_response());
        }
    };

    TaskService::new(&state.db)
        .create_task(user.id, details)
        .await?;
    Ok(back_to_tasks(jar, FlashLevel::Success, "Task added successfully!"))
}

#[tracing::instrument(skip(state, jar))]
async fn edit_task_page_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, TaskWebError> {
    let task = match TaskService::new(&state.db).get_task(user.id, id).await {
        Ok(task) => task,
        Err(TaskServiceError::Forbidden(_)) => return Ok(not_authorized(jar, "edit")),
        Err(err) => return Err(err.into()),
    };

    let (jar, flash) = flash::take(jar);
    let template = TaskFormTemplate::new(
        PageContext::new(Some(&user), flash),
        "Edit Task",
        format!("/tasks/{}/edit", task.id()),
        TaskForm::from_task(&task),
        None,
    );
    Ok((jar, Html(template.render()?)).into_response())
}

/// Saves the edited task and, when it is linked, pushes the change to the calendar.
#[tracing::instrument(skip(state, jar))]
async fn edit_task_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
    Form(form): Form<TaskForm>,
) -> Result<Response, TaskWebError> {
    let details = match form.validate() {
        Ok(details) => details,
        Err(err) => {
            let template = TaskFormTemplate::new(
                PageContext::new(Some(&user), None),
                "Edit Task",
                format!("/tasks/{}/edit", id),
                form,
                Some(err.to_string()),
            );
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(template.render()?)).into_response());
        }
    };

    let task = match TaskService::new(&state.db)
        .edit_task(user.id, id, details)
        .await
    {
        Ok(task) => task,
        Err(TaskServiceError::Forbidden(_)) => return Ok(not_authorized(jar, "edit")),
        Err(err) => return Err(err.into()),
    };

    if task.google_event_id().is_some() && task.due_date().is_some() {
        if let Err(err) = sync_service(&state).push_task(user.id, task.id()).await {
            tracing::warn!("Could not update calendar event of task {}: {}", task.id(), err);
            return Ok(back_to_tasks(
                jar,
                FlashLevel::Warning,
                format!(
                    "Your task has been updated, but Google Calendar was not: {}",
                    err.user_message()
                ),
            ));
        }
    }
    Ok(back_to_tasks(jar, FlashLevel::Success, "Your task has been updated!"))
}

/// Deletes a task and the calendar event linked to it.
#[tracing::instrument(skip(state, jar))]
async fn delete_task_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let task = match task_service.get_task(user.id, id).await {
        Ok(task) => task,
        Err(TaskServiceError::Forbidden(_)) => return Ok(not_authorized(jar, "delete")),
        Err(err) => return Err(err.into()),
    };

    let calendar_result = sync_service(&state).remove_task_event(user.id, &task).await;
    task_service.delete_task(user.id, id).await?;

    match calendar_result {
        Ok(()) => Ok(back_to_tasks(jar, FlashLevel::Success, "Your task has been deleted!")),
        Err(err) => {
            tracing::warn!("Could not delete calendar event of task {}: {}", id, err);
            Ok(back_to_tasks(
                jar,
                FlashLevel::Warning,
                format!(
                    "Your task has been deleted, but its Google Calendar event was not: {}",
                    err.user_message()
                ),
            ))
        }
    }
}

#[tracing::instrument(skip(state, jar))]
async fn complete_task_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, TaskWebError> {
    match TaskService::new(&state.db).toggle_complete(user.id, id).await {
        Ok(_) => Ok(back_to_tasks(jar, FlashLevel::Success, "Task status updated!")),
        Err(TaskServiceError::Forbidden(_)) => Ok(not_authorized(jar, "complete")),
        Err(err) => Err(err.into()),
    }
}

/// Creates or updates the calendar event of a task.
#[tracing::instrument(skip(state, jar))]
async fn sync_task_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, TaskWebError> {
    match sync_service(&state).push_task(user.id, id).await {
        Ok(task) => Ok(back_to_tasks(
            jar,
            FlashLevel::Success,
            format!("'{}' is now in your Google Calendar.", task.title()),
        )),
        Err(SyncError::Task(TaskServiceError::Forbidden(_))) => Ok(not_authorized(jar, "sync")),
        Err(SyncError::Task(err)) => Err(err.into()),
        Err(err @ SyncError::MissingDueDate(_)) => {
            Ok(back_to_tasks(jar, FlashLevel::Warning, err.to_string()))
        }
        Err(err) => {
            tracing::error!("Could not push task {} to the calendar: {}", id, err);
            Ok(back_to_tasks(
                jar,
                FlashLevel::Danger,
                format!("Could not sync with Google Calendar: {}", err.user_message()),
            ))
        }
    }
}
