//! Calendar integration.
//!
//! The external calendar is reached only through the [`CalendarProvider`] trait so that the
//! synchronization logic in [`sync`] and the handlers in [`web`] and [`api`] can be exercised
//! against a mock. [`google::GoogleCalendarClient`] is the production implementation.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use mockall::automock;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod api;
pub mod google;
pub mod sync;
pub mod token;
pub mod web;

use self::sync::SyncSettings;
use self::token::GoogleToken;

/// Title given to events that have none.
pub const UNTITLED_EVENT: &str = "(No title)";

/// Start or end of a calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// A timed event, with the offset of the calendar it came from.
    At(DateTime<FixedOffset>),
    /// An all-day event.
    AllDay(NaiveDate),
}

impl EventTime {
    /// Wall-clock time of the event in `time_zone`; all-day events start at midnight.
    pub fn local(&self, time_zone: Tz) -> NaiveDateTime {
        match self {
            EventTime::At(date_time) => date_time.with_timezone(&time_zone).naive_local(),
            EventTime::AllDay(date) => date.and_time(NaiveTime::MIN),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::AllDay(_))
    }
}

/// An event as reported by the calendar service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub html_link: Option<String>,
    pub status: Option<String>,
}

impl CalendarEvent {
    pub fn title(&self) -> &str {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
            .unwrap_or(UNTITLED_EVENT)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Start formatted for display, empty when unknown.
    pub fn start_display(&self) -> String {
        match self.start {
            Some(EventTime::At(date_time)) => date_time.format("%Y-%m-%d %H:%M").to_string(),
            Some(EventTime::AllDay(date)) => format!("{} (all day)", date.format("%Y-%m-%d")),
            None => String::new(),
        }
    }
}

/// An event to be written to the calendar service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalendarEvent {
    pub summary: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// IANA zone the wall-clock `start` and `end` are expressed in.
    pub time_zone: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Google Calendar integration is not configured")]
    NotConfigured,
    #[error("Google Calendar is not connected")]
    NotConnected,
    #[error("Google Calendar access has expired, please reconnect your calendar")]
    TokenExpired,
    #[error("Calendar resource {0} not found")]
    EventNotFound(String),
    #[error("Calendar API returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid calendar URL: {0}")]
    InvalidUrl(String),
    #[error("Calendar request failed")]
    Http(#[from] reqwest::Error),
    #[error("Stored Google token is malformed")]
    MalformedToken(#[from] serde_json::Error),
}

impl CalendarError {
    /// Text fit for a flash message or notice. Response bodies and transport details are left
    /// to the logs.
    pub fn user_message(&self) -> String {
        match self {
            CalendarError::Api { .. } | CalendarError::Http(_) | CalendarError::InvalidUrl(_) => {
                "Google Calendar could not be reached, please try again later.".to_string()
            }
            CalendarError::MalformedToken(_) => {
                "Your Google Calendar connection is broken, please reconnect your calendar."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Operations the planner needs from an external calendar service.
///
/// Every call that touches a user's calendar takes the user's current access token and the id
/// of the calendar to act on. Token freshness is the caller's concern, see
/// [`sync::CalendarSyncService::session`].
#[automock]
#[async_trait::async_trait]
pub trait CalendarProvider: Send + Sync {
    /// URL of the consent page the user is sent to; `state` is echoed back to the callback.
    fn authorization_url(&self, state: &str) -> Result<String, CalendarError>;

    /// Trades an authorization code for a token.
    async fn exchange_code(&self, code: &str) -> Result<GoogleToken, CalendarError>;

    /// Obtains a new access token using the refresh token of `token`.
    async fn refresh_token(&self, token: &GoogleToken) -> Result<GoogleToken, CalendarError>;

    /// Events starting from now, in start order.
    async fn list_upcoming_events(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;

    async fn insert_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError>;

    async fn update_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError>;

    async fn delete_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError>;
}

/// Shared state of every route that talks to the calendar service.
#[derive(Clone)]
pub struct CalendarState {
    pub db: Arc<DatabaseConnection>,
    pub provider: Arc<dyn CalendarProvider>,
    pub settings: SyncSettings,
    pub secure_cookies: bool,
}
