use askama::Template;
use axum::Router;
use axum::extract::{Extension, Form, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::encode;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::Config;
use crate::flash::{self, FlashLevel};
use crate::user::{User, UserService, UserServiceError};
use crate::web::{PageContext, error_page};

pub mod api;

pub const AUTH_COOKIE: &str = "auth_token";
const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Represents the currently authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
}

impl CurrentUser {
    pub fn new(id: i32, username: String) -> Self {
        Self { id, username }
    }
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self::new(claims.sub, claims.username)
    }
}

/// Authentication state: the account store and the JWT secret.
#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<DatabaseConnection>,
    pub jwt_secret: String,
    pub secure_cookies: bool,
}

impl AuthState {
    pub fn from_config(config: &Config, db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
            secure_cookies: config.secure_cookies,
        }
    }
}

/// Creates the login, registration and logout routes.
pub fn create_auth_router(state: Arc<AuthState>) -> Router<()> {
    Router::new()
        .route("/login", get(login_page_handler).post(login_handler))
        .route("/register", get(register_page_handler).post(register_handler))
        .route("/logout", get(logout_handler).post(logout_handler))
        .with_state(state)
}

/// Populates the CurrentUser extension from the auth cookie. Never redirects.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token_cookie) = jar.get(AUTH_COOKIE) {
        if let Ok(claims) = decode_jwt(token_cookie.value(), &state.jwt_secret) {
            request.extensions_mut().insert(CurrentUser::from(claims));
        }
    }

    next.run(request).await
}

/// Sends requests without a CurrentUser to the login page.
/// Must run after auth_user_middleware.
pub async fn login_redirect_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none() {
        return Redirect::to("/login").into_response();
    }

    next.run(request).await
}

#[derive(serde::Deserialize, Debug)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(serde::Deserialize, Debug)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct Claims {
    pub exp: usize,
    pub iat: usize,
    /// Id of the user the token was issued to.
    pub sub: i32,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error("JWT operation failed")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("User service error")]
    User(#[from] UserServiceError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        tracing::error!("Authentication request failed: {:?}", self);
        error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred while processing your request. Please try again later.",
        )
    }
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub page: PageContext,
}

#[tracing::instrument(skip(jar))]
pub async fn login_page_handler(
    current_user: Option<Extension<CurrentUser>>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let (jar, flash) = flash::take(jar);
    let html = LoginTemplate {
        page: PageContext::new(None, flash),
    }
    .render()?;
    Ok((jar, Html(html)).into_response())
}

/// Checks the submitted email and password and sets the auth cookie on success.
#[tracing::instrument(skip(state, jar, form), fields(email = %form.email))]
pub async fn login_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Redirect), AuthError> {
    let user_service = UserService::new(&state.db);
    let Some(user) = user_service
        .verify_credentials(&form.email, &form.password)
        .await?
    else {
        tracing::info!("Rejected login attempt");
        let jar = flash::push(jar, FlashLevel::Danger, "Invalid email or password.");
        return Ok((jar, Redirect::to("/login")));
    };

    let jar = jar.add(auth_cookie(&state, &user)?);
    let jar = flash::push(
        jar,
        FlashLevel::Success,
        format!("Welcome back, {}!", user.username()),
    );
    Ok((jar, Redirect::to("/dashboard")))
}

#[tracing::instrument(skip(jar))]
pub async fn register_page_handler(
    current_user: Option<Extension<CurrentUser>>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let (jar, flash) = flash::take(jar);
    let html = RegisterTemplate {
        page: PageContext::new(None, flash),
    }
    .render()?;
    Ok((jar, Html(html)).into_response())
}

/// Creates an account and sends the new user to the login page.
#[tracing::instrument(skip(state, jar, form), fields(username = %form.username))]
pub async fn register_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    Form(form): Form<RegisterForm>,
) -> Result<(CookieJar, Redirect), AuthError> {
    if form.password != form.password2 {
        let jar = flash::push(jar, FlashLevel::Danger, "Passwords must match.");
        return Ok((jar, Redirect::to("/register")));
    }

    let user_service = UserService::new(&state.db);
    match user_service
        .register(&form.username, &form.email, &form.password)
        .await
    {
        Ok(_) => {
            let jar = flash::push(
                jar,
                FlashLevel::Success,
                "Your account has been created. You can now log in.",
            );
            Ok((jar, Redirect::to("/login")))
        }
        Err(UserServiceError::DuplicateUsername(_)) => {
            let jar = flash::push(jar, FlashLevel::Danger, "Please use a different username.");
            Ok((jar, Redirect::to("/register")))
        }
        Err(UserServiceError::DuplicateEmail(_)) => {
            let jar = flash::push(
                jar,
                FlashLevel::Danger,
                "Please use a different email address.",
            );
            Ok((jar, Redirect::to("/register")))
        }
        Err(UserServiceError::InvalidInput(message)) => {
            let jar = flash::push(jar, FlashLevel::Danger, message);
            Ok((jar, Redirect::to("/register")))
        }
        Err(err) => Err(err.into()),
    }
}

#[tracing::instrument(skip(jar))]
pub async fn logout_handler(jar: CookieJar) -> (CookieJar, Redirect) {
    let jar = jar.remove(Cookie::build(AUTH_COOKIE).path("/"));
    let jar = flash::push(jar, FlashLevel::Info, "You have been logged out.");
    (jar, Redirect::to("/login"))
}

fn auth_cookie(state: &AuthState, user: &User) -> Result<Cookie<'static>, AuthError> {
    let jwt_token = encode_jwt(user.id(), user.username(), &state.jwt_secret)?;
    Ok(Cookie::build((AUTH_COOKIE, jwt_token))
        .http_only(true)
        .secure(state.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(TOKEN_LIFETIME_HOURS))
        .path("/")
        .build())
}

pub fn encode_jwt(
    user_id: i32,
    username: &str,
    jwt_secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let expire = chrono::Duration::hours(TOKEN_LIFETIME_HOURS);
    let claims = Claims {
        exp: (now + expire).timestamp() as usize,
        iat: now.timestamp() as usize,
        sub: user_id,
        username: username.to_string(),
    };
    encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

pub fn decode_jwt(token: &str, jwt_secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = jsonwebtoken::decode(
        token,
        &jsonwebtoken::DecodingKey::from_secret(jwt_secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )?;
    Ok(token_data.claims)
}
