use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::entities::*;

pub mod api;
pub mod web;

/// Categories offered by the task form; anything else is stored as a custom category.
pub const DEFAULT_CATEGORIES: [&str; 4] = ["Study", "Work", "Personal", "Other"];
/// Category given to tasks imported from the calendar.
pub const CALENDAR_CATEGORY: &str = "Calendar";

const MAX_TITLE_LEN: usize = 100;
const MAX_CATEGORY_LEN: usize = 50;

/// Kanban column of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("'{0}' is not a valid task status")]
pub struct InvalidStatus(pub String);

impl FromStr for TaskStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "doing" => Ok(TaskStatus::Doing),
            "done" => Ok(TaskStatus::Done),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// A user-owned to-do item with an optional due date and calendar link.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Task {
    id: i32,
    user_id: i32,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    due_date: Option<NaiveDateTime>,
    category: Option<String>,
    is_complete: bool,
    status: TaskStatus,
    google_event_id: Option<String>,
    synced_to_calendar: bool,
}

impl Task {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn due_date(&self) -> Option<NaiveDateTime> {
        self.due_date
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn google_event_id(&self) -> Option<&str> {
        self.google_event_id.as_deref()
    }

    pub fn synced_to_calendar(&self) -> bool {
        self.synced_to_calendar
    }

    pub fn due_date_display(&self) -> String {
        self.due_date
            .map(|due| due.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }
}

impl From<task::Model> for Task {
    fn from(model: task::Model) -> Self {
        let status = model.status.parse().unwrap_or_else(|e: InvalidStatus| {
            tracing::warn!("Task {} has {}, showing it as todo", model.id, e);
            TaskStatus::Todo
        });
        Self {
            id: model.id,
            user_id: model.user_id,
            title: model.title,
            description: model.description,
            created_at: model.created_at,
            due_date: model.due_date,
            category: model.category,
            is_complete: model.is_complete,
            status,
            google_event_id: model.google_event_id,
            synced_to_calendar: model.synced_to_calendar,
        }
    }
}

/// User-editable fields of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDetails {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDateTime>,
    pub category: Option<String>,
}

/// A calendar event about to become a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDateTime>,
    pub google_event_id: String,
}

/// Kanban board of one user.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Board {
    pub todo: Vec<Task>,
    pub doing: Vec<Task>,
    pub done: Vec<Task>,
}

/// Submitted add/edit task form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub other_category: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskFormError {
    #[error("Title is required")]
    MissingTitle,
    #[error("Title must be at most {MAX_TITLE_LEN} characters")]
    TitleTooLong,
    #[error("Could not understand due date '{0}'")]
    InvalidDueDate(String),
    #[error("Please choose a category")]
    InvalidCategory,
    #[error("Category must be at most {MAX_CATEGORY_LEN} characters")]
    CategoryTooLong,
}

impl TaskForm {
    /// Pre-fills the form from a stored task; custom categories show as "Other".
    pub fn from_task(task: &Task) -> Self {
        let (category, other_category) = match task.category() {
            Some(category) if DEFAULT_CATEGORIES.contains(&category) => {
                (category.to_string(), String::new())
            }
            Some(custom) => ("Other".to_string(), custom.to_string()),
            None => ("Other".to_string(), String::new()),
        };
        Self {
            title: task.title().to_string(),
            description: task.description().unwrap_or_default().to_string(),
            due_date: task
                .due_date()
                .map(|due| due.format("%Y-%m-%dT%H:%M").to_string())
                .unwrap_or_default(),
            category,
            other_category,
        }
    }

    pub fn validate(&self) -> Result<TaskDetails, TaskFormError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(TaskFormError::MissingTitle);
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(TaskFormError::TitleTooLong);
        }

        let category = match self.category.as_str() {
            "Other" if !self.other_category.trim().is_empty() => {
                self.other_category.trim().to_string()
            }
            chosen if DEFAULT_CATEGORIES.contains(&chosen) => chosen.to_string(),
            _ => return Err(TaskFormError::InvalidCategory),
        };
        if category.chars().count() > MAX_CATEGORY_LEN {
            return Err(TaskFormError::CategoryTooLong);
        }

        let description = Some(self.description.trim())
            .filter(|description| !description.is_empty())
            .map(str::to_string);

        Ok(TaskDetails {
            title: title.to_string(),
            description,
            due_date: parse_due_date(&self.due_date)?,
            category: Some(category),
        })
    }
}

/// Accepts `datetime-local` input values, plain dates (midnight) and the empty string.
pub fn parse_due_date(raw: &str) -> Result<Option<NaiveDateTime>, TaskFormError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN)))
        .map(Some)
        .map_err(|_| TaskFormError::InvalidDueDate(raw.to_string()))
}

/// Cuts a string to at most `max` characters.
pub(crate) fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Error type for TaskService operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    #[error("Task with ID {0} not found")]
    TaskNotFound(i32),
    #[error("Task with ID {0} belongs to another user")]
    Forbidden(i32),
    #[error("A task is already linked to calendar event '{0}'")]
    DuplicateCalendarEvent(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct TaskService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TaskService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskService<'_> {
        TaskService { db }
    }

    /// Creates a task in the `todo` column.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(
        &self,
        user_id: i32,
        details: TaskDetails,
    ) -> Result<Task, TaskServiceError> {
        let active_model = task::ActiveModel {
            user_id: ActiveValue::Set(user_id),
            title: ActiveValue::Set(details.title),
            description: ActiveValue::Set(details.description),
            created_at: ActiveValue::Set(Utc::now()),
            due_date: ActiveValue::Set(details.due_date),
            category: ActiveValue::Set(details.category),
            is_complete: ActiveValue::Set(false),
            status: ActiveValue::Set(TaskStatus::Todo.to_string()),
            google_event_id: ActiveValue::Set(None),
            synced_to_calendar: ActiveValue::Set(false),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Ok(Task::from(created_model))
    }

    /// Replaces the user-editable fields of a task.
    #[tracing::instrument(skip(self))]
    pub async fn edit_task(
        &self,
        user_id: i32,
        id: i32,
        details: TaskDetails,
    ) -> Result<Task, TaskServiceError> {
        let mut active_model: task::ActiveModel = self.find_owned_model(user_id, id).await?.into();
        active_model.title = ActiveValue::Set(details.title);
        active_model.description = ActiveValue::Set(details.description);
        active_model.due_date = ActiveValue::Set(details.due_date);
        active_model.category = ActiveValue::Set(details.category);
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    /// Deletes a task and returns it as it was.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, user_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        let model = self.find_owned_model(user_id, id).await?;
        let deleted = Task::from(model);
        task::Entity::delete_by_id(id).exec(self.db).await?;
        Ok(deleted)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, user_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        Ok(Task::from(self.find_owned_model(user_id, id).await?))
    }

    /// Tasks of one column, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_tasks_by_status(
        &self,
        user_id: i32,
        status: TaskStatus,
    ) -> Result<Vec<Task>, TaskServiceError> {
        let tasks = task::Entity::find()
            .filter(task::Column::UserId.eq(user_id))
            .filter(task::Column::Status.eq(status.as_str()))
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .all(self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        Ok(tasks)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_board(&self, user_id: i32) -> Result<Board, TaskServiceError> {
        Ok(Board {
            todo: self.get_tasks_by_status(user_id, TaskStatus::Todo).await?,
            doing: self.get_tasks_by_status(user_id, TaskStatus::Doing).await?,
            done: self.get_tasks_by_status(user_id, TaskStatus::Done).await?,
        })
    }

    /// All tasks of a user, earliest due date first and undated tasks last.
    #[tracing::instrument(skip(self))]
    pub async fn get_tasks_by_due_date(&self, user_id: i32) -> Result<Vec<Task>, TaskServiceError> {
        let mut tasks: Vec<Task> = task::Entity::find()
            .filter(task::Column::UserId.eq(user_id))
            .all(self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        tasks.sort_by_key(|task| (task.due_date.is_none(), task.due_date, task.id));
        Ok(tasks)
    }

    /// Open tasks due at or after `now`, soonest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_upcoming_tasks(
        &self,
        user_id: i32,
        now: NaiveDateTime,
        limit: u64,
    ) -> Result<Vec<Task>, TaskServiceError> {
        let tasks = task::Entity::find()
            .filter(task::Column::UserId.eq(user_id))
            .filter(task::Column::Status.ne(TaskStatus::Done.as_str()))
            .filter(task::Column::DueDate.gte(now))
            .order_by_asc(task::Column::DueDate)
            .limit(limit)
            .all(self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        Ok(tasks)
    }

    /// Moves a task to another kanban column.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        user_id: i32,
        id: i32,
        status: TaskStatus,
    ) -> Result<Task, TaskServiceError> {
        let mut active_model: task::ActiveModel = self.find_owned_model(user_id, id).await?.into();
        active_model.status = ActiveValue::Set(status.to_string());
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    /// Flips the completion flag, which is independent of the kanban status.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_complete(&self, user_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        let model = self.find_owned_model(user_id, id).await?;
        let is_complete = model.is_complete;
        let mut active_model: task::ActiveModel = model.into();
        active_model.is_complete = ActiveValue::Set(!is_complete);
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_by_google_event_id(
        &self,
        user_id: i32,
        event_id: &str,
    ) -> Result<Option<Task>, TaskServiceError> {
        let model = task::Entity::find()
            .filter(task::Column::UserId.eq(user_id))
            .filter(task::Column::GoogleEventId.eq(event_id))
            .one(self.db)
            .await?;
        Ok(model.map(Task::from))
    }

    /// Calendar event ids already linked to tasks of the user.
    #[tracing::instrument(skip(self))]
    pub async fn google_event_ids(&self, user_id: i32) -> Result<HashSet<String>, TaskServiceError> {
        let ids = task::Entity::find()
            .filter(task::Column::UserId.eq(user_id))
            .filter(task::Column::GoogleEventId.is_not_null())
            .all(self.db)
            .await?
            .into_iter()
            .filter_map(|model| model.google_event_id)
            .collect();
        Ok(ids)
    }

    /// Creates a task for a calendar event, unless one is already linked to it.
    #[tracing::instrument(skip(self))]
    pub async fn import_calendar_task(
        &self,
        user_id: i32,
        imported: ImportedTask,
    ) -> Result<Task, TaskServiceError> {
        if self
            .find_by_google_event_id(user_id, &imported.google_event_id)
            .await?
            .is_some()
        {
            return Err(TaskServiceError::DuplicateCalendarEvent(
                imported.google_event_id,
            ));
        }

        let event_id = imported.google_event_id.clone();
        let active_model = task::ActiveModel {
            user_id: ActiveValue::Set(user_id),
            title: ActiveValue::Set(truncate_chars(&imported.title, MAX_TITLE_LEN)),
            description: ActiveValue::Set(imported.description),
            created_at: ActiveValue::Set(Utc::now()),
            due_date: ActiveValue::Set(imported.due_date),
            category: ActiveValue::Set(Some(CALENDAR_CATEGORY.to_string())),
            is_complete: ActiveValue::Set(false),
            status: ActiveValue::Set(TaskStatus::Todo.to_string()),
            google_event_id: ActiveValue::Set(Some(imported.google_event_id)),
            synced_to_calendar: ActiveValue::Set(true),
            ..Default::default()
        };
        match active_model.insert(self.db).await {
            Ok(created_model) => Ok(Task::from(created_model)),
            Err(err) if is_unique_violation(&err) => {
                Err(TaskServiceError::DuplicateCalendarEvent(event_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Records that a task is mirrored by a calendar event.
    #[tracing::instrument(skip(self))]
    pub async fn link_calendar_event(
        &self,
        user_id: i32,
        id: i32,
        event_id: &str,
    ) -> Result<Task, TaskServiceError> {
        let model = self.find_owned_model(user_id, id).await?;
        if let Some(other) = self.find_by_google_event_id(user_id, event_id).await? {
            if other.id() != id {
                return Err(TaskServiceError::DuplicateCalendarEvent(
                    event_id.to_string(),
                ));
            }
        }
        let mut active_model: task::ActiveModel = model.into();
        active_model.google_event_id = ActiveValue::Set(Some(event_id.to_string()));
        active_model.synced_to_calendar = ActiveValue::Set(true);
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    /// Forgets the calendar event of a task.
    #[tracing::instrument(skip(self))]
    pub async fn unlink_calendar_event(
        &self,
        user_id: i32,
        id: i32,
    ) -> Result<Task, TaskServiceError> {
        let mut active_model: task::ActiveModel = self.find_owned_model(user_id, id).await?.into();
        active_model.google_event_id = ActiveValue::Set(None);
        active_model.synced_to_calendar = ActiveValue::Set(false);
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    async fn find_owned_model(&self, user_id: i32, id: i32) -> Result<task::Model, TaskServiceError> {
        let model = task::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        if model.user_id != user_id {
            return Err(TaskServiceError::Forbidden(id));
        }
        Ok(model)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
