use crate::auth::{AUTH_COOKIE, AuthState, CurrentUser, decode_jwt, encode_jwt};
use crate::user::UserService;
use crate::web::api::v1::ServerErrorResponse;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Credentials for API login.
#[derive(Deserialize, Debug, ToSchema)]
pub struct JsonLoginRequest {
    /// Email address of the account
    pub email: String,
    pub password: String,
}

/// Bearer token for subsequent API calls.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct LoginResponse {
    pub token: String,
}

/// JSON body of authentication failures.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Creates the JSON login route, relative to `/api/v1`.
pub fn create_api_router(state: Arc<AuthState>) -> Router<()> {
    Router::new()
        .route("/login", post(json_login_handler))
        .with_state(state)
}

/// Sets the CurrentUser extension from an `Authorization: Bearer` header, falling back to the
/// auth cookie so that pages can call the API with the session they already have.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let token = bearer.or_else(|| jar.get(AUTH_COOKIE).map(|cookie| cookie.value()));

    if let Some(token) = token {
        if let Ok(claims) = decode_jwt(token, &state.jwt_secret) {
            request.extensions_mut().insert(CurrentUser::from(claims));
        }
    }

    next.run(request).await
}

/// Answers UNAUTHORIZED unless auth_user_middleware found a user.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none() {
        let error_response = ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: "Authentication required to access this resource".to_string(),
        };
        return (StatusCode::UNAUTHORIZED, Json(error_response)).into_response();
    }

    next.run(request).await
}

/// Handler for POST /api/v1/login - exchanges credentials for a JWT.
#[tracing::instrument(skip(state, payload), fields(email = %payload.email))]
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = JsonLoginRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = LoginResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ServerErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn json_login_handler(
    State(state): State<Arc<AuthState>>,
    Json(payload): Json<JsonLoginRequest>,
) -> Result<Json<LoginResponse>, Response> {
    let user_service = UserService::new(&state.db);
    let user = match user_service
        .verify_credentials(&payload.email, &payload.password)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "INVALID_CREDENTIALS".to_string(),
                    message: "Invalid email or password".to_string(),
                }),
            )
                .into_response());
        }
        Err(err) => {
            tracing::error!("Failed to verify credentials: {}", err);
            return Err(ServerErrorResponse::internal("Failed to verify credentials"));
        }
    };

    let token = encode_jwt(user.id(), user.username(), &state.jwt_secret).map_err(|err| {
        tracing::error!("Failed to encode token: {}", err);
        ServerErrorResponse::internal("Failed to generate authentication token")
    })?;

    Ok(Json(LoginResponse { token }))
}
