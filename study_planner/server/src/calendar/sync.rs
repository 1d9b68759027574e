use chrono::{Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::calendar::token::GoogleToken;
use crate::calendar::{CalendarError, CalendarEvent, CalendarProvider, NewCalendarEvent, UNTITLED_EVENT};
use crate::config::Config;
use crate::task::{ImportedTask, Task, TaskService, TaskServiceError};
use crate::user::{User, UserService, UserServiceError};

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Length of events created for tasks that only carry a due date.
const DEFAULT_EVENT_HOURS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Zone of task due dates, attached to pushed events.
    pub time_zone: Tz,
    /// How many upcoming events are fetched per import or schedule view.
    pub upcoming_events_limit: u32,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            time_zone: config.calendar_time_zone,
            upcoming_events_limit: config.upcoming_events_limit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Task(#[from] TaskServiceError),
    #[error(transparent)]
    User(#[from] UserServiceError),
    #[error("Task {0} needs a due date before it can be added to the calendar")]
    MissingDueDate(i32),
    #[error("An event must end after it starts")]
    InvalidTimeRange,
}

impl SyncError {
    /// Text fit for a flash message or notice; database and calendar internals stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Calendar(err) => err.user_message(),
            SyncError::Task(TaskServiceError::Database(_)) | SyncError::User(_) => {
                "Your planner could not be updated, please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// A user together with a usable access token.
#[derive(Debug, Clone)]
pub struct CalendarSession {
    pub user: User,
    pub token: GoogleToken,
}

/// Outcome of one import pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    /// Events that became new tasks
    pub imported: usize,
    /// Cancelled events and events already linked to a task
    pub skipped: usize,
    /// Events that could not be imported
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Imported {} event(s) from Google Calendar, skipped {}.",
            self.imported, self.skipped
        );
        if !self.errors.is_empty() {
            summary.push_str(&format!(" {} event(s) failed.", self.errors.len()));
        }
        summary
    }
}

/// An upcoming event that mirrors one of the user's tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEvent {
    pub task_id: i32,
    pub task_title: String,
    pub event: CalendarEvent,
}

/// Everything the schedule page shows.
#[derive(Debug, Default)]
pub struct Schedule {
    pub tasks: Vec<Task>,
    pub linked_events: Vec<LinkedEvent>,
    pub external_events: Vec<CalendarEvent>,
    pub calendar_connected: bool,
    /// Why calendar events are missing, if they are.
    pub notice: Option<String>,
}

/// A calendar event requested through the JSON API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    /// Defaults to one hour after `start`.
    pub end: Option<NaiveDateTime>,
    /// Task to link to the created event.
    pub task_id: Option<i32>,
}

/// Splits upcoming events into those mirroring a task and the rest.
///
/// Every event lands in exactly one of the two lists, in the order it came in.
pub fn partition_events(
    tasks: &[Task],
    events: Vec<CalendarEvent>,
) -> (Vec<LinkedEvent>, Vec<CalendarEvent>) {
    let tasks_by_event: HashMap<&str, &Task> = tasks
        .iter()
        .filter_map(|task| task.google_event_id().map(|event_id| (event_id, task)))
        .collect();

    let mut linked = Vec::new();
    let mut external = Vec::new();
    for event in events {
        match tasks_by_event.get(event.id.as_str()) {
            Some(task) => linked.push(LinkedEvent {
                task_id: task.id(),
                task_title: task.title().to_string(),
                event,
            }),
            None => external.push(event),
        }
    }
    (linked, external)
}

pub struct CalendarSyncService<'a> {
    db: &'a DatabaseConnection,
    provider: &'a dyn CalendarProvider,
    settings: &'a SyncSettings,
}

impl<'a> CalendarSyncService<'a> {
    pub fn new(
        db: &'a DatabaseConnection,
        provider: &'a dyn CalendarProvider,
        settings: &'a SyncSettings,
    ) -> Self {
        Self {
            db,
            provider,
            settings,
        }
    }

    /// Loads the user's token, refreshing it once when it is about to expire.
    #[tracing::instrument(skip(self))]
    pub async fn session(&self, user_id: i32) -> Result<CalendarSession, SyncError> {
        let user_service = UserService::new(self.db);
        let user = user_service.get_user_by_id(user_id).await?;
        let token = match user.google_token() {
            Some(raw) if user.calendar_sync_enabled() => {
                GoogleToken::parse(raw).map_err(CalendarError::from)?
            }
            _ => return Err(CalendarError::NotConnected.into()),
        };

        if !token.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(CalendarSession { user, token });
        }
        if !token.can_refresh() {
            tracing::warn!("Google token of user {} expired without refresh token", user_id);
            return Err(CalendarError::TokenExpired.into());
        }

        let refreshed = self.provider.refresh_token(&token).await?;
        let user = user_service.update_google_token(user_id, &refreshed).await?;
        tracing::info!("Refreshed Google token of user {}", user_id);
        Ok(CalendarSession {
            user,
            token: refreshed,
        })
    }

    /// Imports upcoming events as tasks. Events already linked to a task are left alone,
    /// so running the pass again imports nothing new.
    #[tracing::instrument(skip(self))]
    pub async fn import_events(&self, user_id: i32) -> Result<SyncReport, SyncError> {
        let session = self.session(user_id).await?;
        let events = self
            .provider
            .list_upcoming_events(
                &session.token,
                session.user.calendar_id(),
                self.settings.upcoming_events_limit,
            )
            .await?;

        let task_service = TaskService::new(self.db);
        let mut linked_ids = task_service.google_event_ids(user_id).await?;
        let mut report = SyncReport::default();

        for event in events {
            if event.is_cancelled() || linked_ids.contains(&event.id) {
                report.skipped += 1;
                continue;
            }

            let imported = ImportedTask {
                title: event.title().to_string(),
                description: event.description.clone(),
                due_date: event.start.map(|start| start.local(self.settings.time_zone)),
                google_event_id: event.id.clone(),
            };
            match task_service.import_calendar_task(user_id, imported).await {
                Ok(task) => {
                    tracing::debug!("Imported event {} as task {}", event.id, task.id());
                    linked_ids.insert(event.id);
                    report.imported += 1;
                }
                Err(TaskServiceError::DuplicateCalendarEvent(_)) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!("Could not import event {}: {}", event.id, err);
                    report.errors.push(format!(
                        "{}: {}",
                        event.title(),
                        SyncError::Task(err).user_message()
                    ));
                }
            }
        }

        tracing::info!(
            "Calendar import for user {}: {} imported, {} skipped, {} failed",
            user_id,
            report.imported,
            report.skipped,
            report.errors.len()
        );
        Ok(report)
    }

    /// Writes a task to the calendar, updating its linked event or creating and linking a new one.
    #[tracing::instrument(skip(self))]
    pub async fn push_task(&self, user_id: i32, task_id: i32) -> Result<Task, SyncError> {
        let task_service = TaskService::new(self.db);
        let task = task_service.get_task(user_id, task_id).await?;
        let due = task.due_date().ok_or(SyncError::MissingDueDate(task_id))?;
        let session = self.session(user_id).await?;
        let calendar_id = session.user.calendar_id();

        let event = NewCalendarEvent {
            summary: task.title().to_string(),
            description: task.description().map(str::to_string),
            start: due,
            end: due + Duration::hours(DEFAULT_EVENT_HOURS),
            time_zone: self.settings.time_zone.name().to_string(),
        };

        if let Some(event_id) = task.google_event_id() {
            match self
                .provider
                .update_event(&session.token, calendar_id, event_id, &event)
                .await
            {
                Ok(updated) => {
                    return Ok(task_service
                        .link_calendar_event(user_id, task_id, &updated.id)
                        .await?);
                }
                Err(CalendarError::EventNotFound(_)) => {
                    tracing::warn!(
                        "Event {} of task {} is gone from the calendar, creating a new one",
                        event_id,
                        task_id
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        let created = self
            .provider
            .insert_event(&session.token, calendar_id, &event)
            .await?;
        Ok(task_service
            .link_calendar_event(user_id, task_id, &created.id)
            .await?)
    }

    /// Deletes the event linked to `task`. An event that no longer exists counts as deleted.
    #[tracing::instrument(skip(self, task), fields(task_id = task.id()))]
    pub async fn remove_task_event(&self, user_id: i32, task: &Task) -> Result<(), SyncError> {
        let Some(event_id) = task.google_event_id() else {
            return Ok(());
        };
        let session = self.session(user_id).await?;
        match self
            .provider
            .delete_event(&session.token, session.user.calendar_id(), event_id)
            .await
        {
            Ok(()) | Err(CalendarError::EventNotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Creates an event and optionally links it to one of the user's tasks. A task that already
    /// mirrors an event is refused so that event is never orphaned.
    #[tracing::instrument(skip(self))]
    pub async fn create_event(
        &self,
        user_id: i32,
        request: CreateEventRequest,
    ) -> Result<CalendarEvent, SyncError> {
        let end = request
            .end
            .unwrap_or(request.start + Duration::hours(DEFAULT_EVENT_HOURS));
        if end <= request.start {
            return Err(SyncError::InvalidTimeRange);
        }

        let task_service = TaskService::new(self.db);
        if let Some(task_id) = request.task_id {
            let task = task_service.get_task(user_id, task_id).await?;
            if let Some(event_id) = task.google_event_id() {
                return Err(TaskServiceError::DuplicateCalendarEvent(event_id.to_string()).into());
            }
        }

        let summary = match request.summary.trim() {
            "" => UNTITLED_EVENT.to_string(),
            summary => summary.to_string(),
        };
        let event = NewCalendarEvent {
            summary,
            description: request.description,
            start: request.start,
            end,
            time_zone: self.settings.time_zone.name().to_string(),
        };

        let session = self.session(user_id).await?;
        let created = self
            .provider
            .insert_event(&session.token, session.user.calendar_id(), &event)
            .await?;

        if let Some(task_id) = request.task_id {
            task_service
                .link_calendar_event(user_id, task_id, &created.id)
                .await?;
        }
        Ok(created)
    }

    /// Collects the user's tasks and upcoming events. Calendar failures become a notice.
    #[tracing::instrument(skip(self))]
    pub async fn build_schedule(&self, user_id: i32) -> Result<Schedule, SyncError> {
        let tasks = TaskService::new(self.db)
            .get_tasks_by_due_date(user_id)
            .await?;
        let user = UserService::new(self.db).get_user_by_id(user_id).await?;
        let calendar_connected = user.calendar_sync_enabled() && user.google_token().is_some();
        if !calendar_connected {
            return Ok(Schedule {
                tasks,
                ..Default::default()
            });
        }

        match self.upcoming_events(user_id).await {
            Ok(events) => {
                let (linked_events, external_events) = partition_events(&tasks, events);
                Ok(Schedule {
                    tasks,
                    linked_events,
                    external_events,
                    calendar_connected,
                    notice: None,
                })
            }
            Err(err) => {
                tracing::warn!("Could not load calendar events for user {}: {}", user_id, err);
                Ok(Schedule {
                    tasks,
                    calendar_connected,
                    notice: Some(err.user_message()),
                    ..Default::default()
                })
            }
        }
    }

    async fn upcoming_events(&self, user_id: i32) -> Result<Vec<CalendarEvent>, SyncError> {
        let session = self.session(user_id).await?;
        Ok(self
            .provider
            .list_upcoming_events(
                &session.token,
                session.user.calendar_id(),
                self.settings.upcoming_events_limit,
            )
            .await?)
    }
}
