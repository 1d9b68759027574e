use askama::Template;
use axum::{
    Extension, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::calendar::sync::{CalendarSyncService, LinkedEvent, SyncError};
use crate::calendar::{CalendarEvent, CalendarState};
use crate::flash::{self, FlashLevel};
use crate::task::Task;
use crate::user::{UserService, UserServiceError};
use crate::web::{PageContext, error_page};

const OAUTH_STATE_COOKIE: &str = "oauth_state";
const OAUTH_STATE_MINUTES: i64 = 10;

#[derive(Debug, thiserror::Error)]
enum CalendarWebError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error("Calendar sync error")]
    Sync(#[from] SyncError),
    #[error("User service error")]
    User(#[from] UserServiceError),
}

impl IntoResponse for CalendarWebError {
    fn into_response(self) -> Response {
        tracing::error!("Calendar page failed: {:?}", self);
        error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred while processing your request. Please try again later.",
        )
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "schedule.html")]
struct ScheduleTemplate {
    page: PageContext,
    tasks: Vec<Task>,
    linked_events: Vec<LinkedEvent>,
    external_events: Vec<CalendarEvent>,
    calendar_connected: bool,
    notice: Option<String>,
}

/// Creates the schedule page and the calendar connection routes.
pub fn create_calendar_router(state: Arc<CalendarState>) -> Router {
    Router::new()
        .route("/schedule", get(schedule_handler))
        .route("/calendar/authorize", get(authorize_handler))
        .route("/calendar/callback", get(callback_handler))
        .route("/calendar/disconnect", post(disconnect_handler))
        .route("/calendar/sync", post(sync_handler))
        .with_state(state)
}

fn sync_service(state: &CalendarState) -> CalendarSyncService<'_> {
    CalendarSyncService::new(&state.db, state.provider.as_ref(), &state.settings)
}

/// Tasks by due date next to the upcoming calendar events.
#[tracing::instrument(skip(state, jar))]
async fn schedule_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), CalendarWebError> {
    let schedule = sync_service(&state).build_schedule(user.id).await?;

    let (jar, flash) = flash::take(jar);
    let template = ScheduleTemplate {
        page: PageContext::new(Some(&user), flash),
        tasks: schedule.tasks,
        linked_events: schedule.linked_events,
        external_events: schedule.external_events,
        calendar_connected: schedule.calendar_connected,
        notice: schedule.notice,
    };
    Ok((jar, Html(template.render()?)))
}

/// Sends the user to the Google consent page, remembering a random state value.
#[tracing::instrument(skip(state, jar))]
async fn authorize_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let oauth_state = Uuid::new_v4().to_string();
    match state.provider.authorization_url(&oauth_state) {
        Ok(url) => {
            tracing::info!("Starting Google authorization for user {}", user.id);
            let cookie = Cookie::build((OAUTH_STATE_COOKIE, oauth_state))
                .http_only(true)
                .secure(state.secure_cookies)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::minutes(OAUTH_STATE_MINUTES))
                .path("/")
                .build();
            (jar.add(cookie), Redirect::to(&url))
        }
        Err(err) => {
            tracing::warn!("Cannot start Google authorization: {}", err);
            let jar = flash::push(jar, FlashLevel::Danger, err.user_message());
            (jar, Redirect::to("/schedule"))
        }
    }
}

/// Completes the authorization-code flow and stores the token.
#[tracing::instrument(skip(state, jar, query))]
async fn callback_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Redirect), CalendarWebError> {
    let expected_state = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|cookie| cookie.value().to_string());
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE).path("/"));

    if let Some(error) = query.error {
        tracing::info!("Google authorization declined: {}", error);
        let jar = flash::push(
            jar,
            FlashLevel::Warning,
            "Google Calendar was not connected.",
        );
        return Ok((jar, Redirect::to("/schedule")));
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        let jar = flash::push(jar, FlashLevel::Danger, "Google authorization failed.");
        return Ok((jar, Redirect::to("/schedule")));
    };
    if expected_state.as_deref() != Some(returned_state.as_str()) {
        tracing::warn!("OAuth state mismatch for user {}", user.id);
        let jar = flash::push(
            jar,
            FlashLevel::Danger,
            "Google authorization failed, please try again.",
        );
        return Ok((jar, Redirect::to("/schedule")));
    }

    let token = match state.provider.exchange_code(&code).await {
        Ok(token) => token,
        Err(err) => {
            tracing::error!("Failed to exchange authorization code: {}", err);
            let jar = flash::push(
                jar,
                FlashLevel::Danger,
                format!("Could not connect Google Calendar: {}", err.user_message()),
            );
            return Ok((jar, Redirect::to("/schedule")));
        }
    };
    UserService::new(&state.db)
        .set_google_token(user.id, &token)
        .await?;

    tracing::info!("User {} connected Google Calendar", user.id);
    let jar = flash::push(
        jar,
        FlashLevel::Success,
        "Google Calendar connected successfully!",
    );
    Ok((jar, Redirect::to("/schedule")))
}

#[tracing::instrument(skip(state, jar))]
async fn disconnect_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), CalendarWebError> {
    UserService::new(&state.db)
        .clear_google_token(user.id)
        .await?;
    let jar = flash::push(jar, FlashLevel::Info, "Google Calendar disconnected.");
    Ok((jar, Redirect::to("/schedule")))
}

/// Runs an import pass and reports the outcome as a flash message.
#[tracing::instrument(skip(state, jar))]
async fn sync_handler(
    State(state): State<Arc<CalendarState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let jar = match sync_service(&state).import_events(user.id).await {
        Ok(report) if report.errors.is_empty() => {
            flash::push(jar, FlashLevel::Success, report.summary())
        }
        Ok(report) => flash::push(jar, FlashLevel::Warning, report.summary()),
        Err(err) => {
            tracing::error!("Calendar import failed for user {}: {}", user.id, err);
            flash::push(
                jar,
                FlashLevel::Danger,
                format!("Sync failed: {}", err.user_message()),
            )
        }
    };
    (jar, Redirect::to("/schedule"))
}
