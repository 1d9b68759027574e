use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};
use tower::ServiceBuilder;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::{self, AuthState};
use crate::calendar::{self, CalendarState};
use crate::task;

pub mod v1;

#[derive(OpenApi)]
#[openapi(
    info(title = "Study Planner API", description = "Tasks and calendar sync"),
    modifiers(&BearerSecurity),
    paths(
        auth::api::v1::json_login_handler,
        task::api::v1::list_tasks_handler,
        task::api::v1::update_status_handler,
        calendar::api::v1::create_event_handler,
        calendar::api::v1::sync_handler,
    ),
    tags(
        (name = "Auth", description = "Token issuing"),
        (name = "Tasks", description = "Kanban board"),
        (name = "Calendar", description = "Google Calendar synchronization")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the protected paths.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Creates the `/api/v1` routes. Everything but login needs a bearer token or the auth cookie.
pub fn create_api_router(auth_state: Arc<AuthState>, calendar_state: Arc<CalendarState>) -> Router {
    let login_router = auth::api::v1::create_api_router(auth_state.clone());
    let protected_routes = Router::new()
        .merge(task::api::v1::create_api_router(calendar_state.clone()))
        .merge(calendar::api::v1::create_api_router(calendar_state))
        .layer(from_fn(auth::api::v1::require_auth_middleware));
    let api_routes = login_router.merge(protected_routes);
    Router::new()
        .nest("/api/v1", api_routes)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::api::v1::auth_user_middleware,
        )))
}
