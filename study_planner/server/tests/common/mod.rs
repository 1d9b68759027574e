#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Response, header};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use study_planner_server::auth::{AUTH_COOKIE, encode_jwt};
use study_planner_server::calendar::MockCalendarProvider;
use study_planner_server::calendar::token::GoogleToken;
use study_planner_server::config::Config;
use study_planner_server::user::{User, UserService};
use study_planner_server::web::create_app;

pub const TEST_SECRET: &str = "test_secret";
pub const TEST_PASSWORD: &str = "correct horse";

/// Fresh in-memory database with every migration applied.
pub async fn setup_db() -> anyhow::Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_config() -> Config {
    Config::new("sqlite::memory:", TEST_SECRET)
}

/// The whole application backed by `db`, talking to `provider` instead of Google.
pub fn test_app(db: &DatabaseConnection, provider: MockCalendarProvider) -> Router {
    create_app(&test_config(), db.clone(), Arc::new(provider))
}

pub async fn register_user(db: &DatabaseConnection, username: &str) -> anyhow::Result<User> {
    let user = UserService::new(db)
        .register(username, &format!("{username}@example.com"), TEST_PASSWORD)
        .await?;
    Ok(user)
}

/// Registers a user whose calendar is connected with a long-lived token.
pub async fn register_connected_user(
    db: &DatabaseConnection,
    username: &str,
) -> anyhow::Result<User> {
    let user = register_user(db, username).await?;
    let token = GoogleToken {
        access_token: "access-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
    };
    let user = UserService::new(db).set_google_token(user.id(), &token).await?;
    Ok(user)
}

pub fn bearer_token(user: &User) -> String {
    encode_jwt(user.id(), user.username(), TEST_SECRET).unwrap()
}

/// `Cookie` header value of a logged-in browser.
pub fn auth_cookie(user: &User) -> String {
    format!("{}={}", AUTH_COOKIE, bearer_token(user))
}

/// `name=value` part of every `set-cookie` header.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .collect()
}

/// The `set-cookie` header for `name`, as a browser would send it back.
pub fn returned_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    set_cookies(headers)
        .into_iter()
        .filter(|cookie| cookie.starts_with(&format!("{name}=")))
        .map(|cookie| cookie.split(';').next().unwrap_or_default().to_string())
        .next()
}

pub fn location(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
