//! Google Calendar v3 client over plain HTTPS.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::calendar::token::{GoogleToken, TokenResponse};
use crate::calendar::{CalendarError, CalendarEvent, CalendarProvider, EventTime, NewCalendarEvent};
use crate::config::Config;

/// Permission to read and write the user's calendars.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// OAuth client credentials and service endpoints.
#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
}

impl GoogleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            auth_url: config.google_auth_url.clone(),
            token_url: config.google_token_url.clone(),
            api_base_url: config.google_api_base_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

pub struct GoogleCalendarClient {
    http: reqwest::Client,
    settings: GoogleSettings,
}

impl GoogleCalendarClient {
    pub fn new(settings: GoogleSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn events_url(&self, calendar_id: &str, event_id: Option<&str>) -> Result<Url, CalendarError> {
        let mut url = Url::parse(&self.settings.api_base_url)
            .map_err(|e| CalendarError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CalendarError::InvalidUrl(self.settings.api_base_url.clone())
            })?;
            segments.pop_if_empty().push("calendars").push(calendar_id).push("events");
            if let Some(event_id) = event_id {
                segments.push(event_id);
            }
        }
        Ok(url)
    }

    async fn request_token(
        &self,
        form: &[(&str, &str)],
        previous_refresh_token: Option<String>,
    ) -> Result<GoogleToken, CalendarError> {
        if !self.settings.is_configured() {
            return Err(CalendarError::NotConfigured);
        }
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: TokenResponse = response.json().await?;
        Ok(GoogleToken::from_response(
            body,
            Utc::now(),
            previous_refresh_token,
        ))
    }
}

#[async_trait::async_trait]
impl CalendarProvider for GoogleCalendarClient {
    fn authorization_url(&self, state: &str) -> Result<String, CalendarError> {
        if !self.settings.is_configured() {
            return Err(CalendarError::NotConfigured);
        }
        let mut url = Url::parse(&self.settings.auth_url)
            .map_err(|e| CalendarError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", CALENDAR_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    #[tracing::instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str) -> Result<GoogleToken, CalendarError> {
        self.request_token(
            &[
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ],
            None,
        )
        .await
    }

    #[tracing::instrument(skip_all)]
    async fn refresh_token(&self, token: &GoogleToken) -> Result<GoogleToken, CalendarError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(CalendarError::TokenExpired)?;
        self.request_token(
            &[
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ],
            token.refresh_token.clone(),
        )
        .await
        .map_err(|err| match err {
            CalendarError::Api { status, message }
                if status == StatusCode::BAD_REQUEST.as_u16()
                    || status == StatusCode::UNAUTHORIZED.as_u16() =>
            {
                tracing::warn!("Token endpoint rejected the refresh token: {}", message);
                CalendarError::TokenExpired
            }
            other => other,
        })
    }

    #[tracing::instrument(skip(self, token))]
    async fn list_upcoming_events(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let time_min = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = max_results.to_string();
        let response = self
            .http
            .get(self.events_url(calendar_id, None)?)
            .bearer_auth(&token.access_token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("maxResults", max_results.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await?;
        let response = check_status(response, calendar_id).await?;
        let list: GoogleEventList = response.json().await?;
        Ok(list.items.into_iter().map(CalendarEvent::from).collect())
    }

    #[tracing::instrument(skip(self, token))]
    async fn insert_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError> {
        let response = self
            .http
            .post(self.events_url(calendar_id, None)?)
            .bearer_auth(&token.access_token)
            .json(&GoogleEventBody::from(event))
            .send()
            .await?;
        let response = check_status(response, calendar_id).await?;
        let created: GoogleEvent = response.json().await?;
        Ok(CalendarEvent::from(created))
    }

    #[tracing::instrument(skip(self, token))]
    async fn update_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError> {
        let response = self
            .http
            .put(self.events_url(calendar_id, Some(event_id))?)
            .bearer_auth(&token.access_token)
            .json(&GoogleEventBody::from(event))
            .send()
            .await?;
        let response = check_status(response, event_id).await?;
        let updated: GoogleEvent = response.json().await?;
        Ok(CalendarEvent::from(updated))
    }

    #[tracing::instrument(skip(self, token))]
    async fn delete_event(
        &self,
        token: &GoogleToken,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let response = self
            .http
            .delete(self.events_url(calendar_id, Some(event_id))?)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        check_status(response, event_id).await?;
        Ok(())
    }
}

/// Maps non-success answers onto [`CalendarError`].
async fn check_status(
    response: reqwest::Response,
    resource: &str,
) -> Result<reqwest::Response, CalendarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(CalendarError::TokenExpired),
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(CalendarError::EventNotFound(resource.to_string()))
        }
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start: Option<GoogleEventTime>,
    #[serde(default)]
    end: Option<GoogleEventTime>,
    #[serde(default)]
    html_link: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl GoogleEventTime {
    fn to_event_time(&self) -> Option<EventTime> {
        if let Some(date_time) = self.date_time.as_deref() {
            match DateTime::<FixedOffset>::parse_from_rfc3339(date_time) {
                Ok(parsed) => return Some(EventTime::At(parsed)),
                Err(e) => tracing::warn!("Ignoring unparsable event time {}: {}", date_time, e),
            }
        }
        self.date.map(EventTime::AllDay)
    }

    fn wall_clock(date_time: NaiveDateTime, time_zone: &str) -> Self {
        Self {
            date: None,
            date_time: Some(date_time.format("%Y-%m-%dT%H:%M:%S").to_string()),
            time_zone: Some(time_zone.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct GoogleEventBody {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    start: GoogleEventTime,
    end: GoogleEventTime,
}

impl From<&NewCalendarEvent> for GoogleEventBody {
    fn from(event: &NewCalendarEvent) -> Self {
        Self {
            summary: event.summary.clone(),
            description: event.description.clone(),
            start: GoogleEventTime::wall_clock(event.start, &event.time_zone),
            end: GoogleEventTime::wall_clock(event.end, &event.time_zone),
        }
    }
}

impl From<GoogleEvent> for CalendarEvent {
    fn from(event: GoogleEvent) -> Self {
        Self {
            start: event.start.as_ref().and_then(GoogleEventTime::to_event_time),
            end: event.end.as_ref().and_then(GoogleEventTime::to_event_time),
            id: event.id,
            summary: event.summary,
            description: event.description,
            html_link: event.html_link,
            status: event.status,
        }
    }
}
