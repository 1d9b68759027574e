use askama::Template;
use axum::Router;
use axum::extract::{Extension, State};
use axum::http::{StatusCode, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use chrono::Utc;
use chrono_tz::Tz;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{
    AuthState, CurrentUser, auth_user_middleware, create_auth_router, login_redirect_middleware,
};
use crate::calendar::google::{GoogleCalendarClient, GoogleSettings};
use crate::calendar::sync::SyncSettings;
use crate::calendar::web::create_calendar_router;
use crate::calendar::{CalendarProvider, CalendarState};
use crate::config::Config;
use crate::flash::{self, FlashMessage};
use crate::flashcard::web::{FlashcardState, create_flashcard_router};
use crate::task::web::create_task_router;
use crate::task::{Task, TaskService, TaskServiceError};
use crate::user::{UserService, UserServiceError};

use self::middleware::{RequestSpan, no_store_layer};

pub mod api;
pub mod middleware;

const DASHBOARD_UPCOMING_TASKS: u64 = 5;

/// State of the general pages.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub calendar_configured: bool,
    /// Zone task due dates are written in.
    pub time_zone: Tz,
}

/// Data every page layout needs.
#[derive(Debug, Default)]
pub struct PageContext {
    pub username: Option<String>,
    pub flash: Option<FlashMessage>,
}

impl PageContext {
    pub fn new(current_user: Option<&CurrentUser>, flash: Option<FlashMessage>) -> Self {
        Self {
            username: current_user.map(|user| user.username.clone()),
            flash,
        }
    }
}

/// Custom error type for web handler operations.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error("Task service error")]
    Task(#[from] TaskServiceError),
    #[error("User service error")]
    User(#[from] UserServiceError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        tracing::error!("Page request failed: {:?}", self);
        error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred while processing your request. Please try again later.",
        )
    }
}

#[derive(Template)]
#[template(path = "error_message.html")]
struct ErrorMessageTemplate<'a> {
    page: PageContext,
    message: &'a str,
}

/// Renders the shared error page, falling back to a bare status when even that fails.
pub fn error_page(status: StatusCode, message: &str) -> Response {
    let template = ErrorMessageTemplate {
        page: PageContext::default(),
        message,
    };
    let Ok(rendered) = template.render() else {
        return status.into_response();
    };
    (status, Html(rendered)).into_response()
}

/// Builds the whole application router around an already migrated database.
pub fn create_app(
    config: &Config,
    db: DatabaseConnection,
    provider: Arc<dyn CalendarProvider>,
) -> Router {
    let db = Arc::new(db);
    let auth_state = Arc::new(AuthState::from_config(config, db.clone()));
    let calendar_state = Arc::new(CalendarState {
        db: db.clone(),
        provider,
        settings: SyncSettings::from_config(config),
        secure_cookies: config.secure_cookies,
    });
    let app_state = Arc::new(AppState {
        db: db.clone(),
        calendar_configured: GoogleSettings::from_config(config).is_configured(),
        time_zone: config.calendar_time_zone,
    });
    let flashcard_state = Arc::new(FlashcardState { db: db.clone() });

    let pages_router = Router::new()
        .route("/", get(dashboard_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/settings", get(settings_handler))
        .route("/pomodoro", get(pomodoro_handler))
        .with_state(app_state);

    let protected_routes = Router::new()
        .merge(pages_router)
        .merge(create_task_router(calendar_state.clone()))
        .merge(create_flashcard_router(flashcard_state))
        .merge(create_calendar_router(calendar_state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware))
                .layer(from_fn(login_redirect_middleware))
                .layer(no_store_layer()),
        );

    let public_routes = Router::new()
        .route("/health", get(health_check_handler))
        .merge(create_auth_router(auth_state.clone()))
        .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .merge(api::create_api_router(auth_state, calendar_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api::ApiDoc::openapi()))
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.db_url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied successfully");

    seed_admin(&config, &db).await?;

    let google_settings = GoogleSettings::from_config(&config);
    if !google_settings.is_configured() {
        tracing::warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set, calendar sync is disabled");
    }
    let provider = Arc::new(GoogleCalendarClient::new(google_settings));

    let app = create_app(&config, db, provider).layer(
        ServiceBuilder::new()
            .layer(SetSensitiveRequestHeadersLayer::new([
                header::AUTHORIZATION,
                header::COOKIE,
            ]))
            .layer(TraceLayer::new_for_http().make_span_with(RequestSpan))
            .layer(CorsLayer::new()),
    );

    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Creates the configured admin account on first start.
async fn seed_admin(config: &Config, db: &DatabaseConnection) -> anyhow::Result<()> {
    let (Some(username), Some(email), Some(password)) = (
        config.admin_username.as_deref(),
        config.admin_email.as_deref(),
        config.admin_password.as_deref(),
    ) else {
        return Ok(());
    };
    let user = UserService::new(db)
        .ensure_user(username, email, password)
        .await?;
    tracing::info!("Admin account {} is ready", user.username());
    Ok(())
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    page: PageContext,
    todo_count: usize,
    doing_count: usize,
    done_count: usize,
    upcoming: Vec<Task>,
}

#[tracing::instrument(skip(state, jar))]
async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), WebError> {
    let task_service = TaskService::new(&state.db);
    let board = task_service.get_board(user.id).await?;
    let now = Utc::now().with_timezone(&state.time_zone).naive_local();
    let upcoming = task_service
        .get_upcoming_tasks(user.id, now, DASHBOARD_UPCOMING_TASKS)
        .await?;

    let (jar, flash) = flash::take(jar);
    let template = DashboardTemplate {
        page: PageContext::new(Some(&user), flash),
        todo_count: board.todo.len(),
        doing_count: board.doing.len(),
        done_count: board.done.len(),
        upcoming,
    };
    Ok((jar, Html(template.render()?)))
}

#[derive(Template)]
#[template(path = "settings.html")]
struct SettingsTemplate {
    page: PageContext,
    email: String,
    calendar_configured: bool,
    calendar_connected: bool,
}

#[tracing::instrument(skip(state, jar))]
async fn settings_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), WebError> {
    let account = UserService::new(&state.db).get_user_by_id(user.id).await?;

    let (jar, flash) = flash::take(jar);
    let template = SettingsTemplate {
        page: PageContext::new(Some(&user), flash),
        email: account.email().to_string(),
        calendar_configured: state.calendar_configured,
        calendar_connected: account.calendar_sync_enabled() && account.google_token().is_some(),
    };
    Ok((jar, Html(template.render()?)))
}

#[derive(Template)]
#[template(path = "pomodoro.html")]
struct PomodoroTemplate {
    page: PageContext,
}

#[tracing::instrument(skip(jar))]
async fn pomodoro_handler(
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), WebError> {
    let (jar, flash) = flash::take(jar);
    let template = PomodoroTemplate {
        page: PageContext::new(Some(&user), flash),
    };
    Ok((jar, Html(template.render()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn can_handle_template_error_with_internal_server_error() {
        let template_error = askama::Error::Custom("Simulated template rendering failure".into());

        let response = WebError::Template(template_error).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_text = std::str::from_utf8(&body).unwrap();
        assert!(body_text.contains(
            "An unexpected error occurred while processing your request. Please try again later."
        ));
    }

    #[test]
    fn page_context_takes_the_username() {
        let user = CurrentUser::new(3, "grace".to_string());

        let page = PageContext::new(Some(&user), None);

        assert_eq!(page.username.as_deref(), Some("grace"));
        assert!(page.flash.is_none());
    }
}
