use askama::Template;
use axum::{
    Extension, Form, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::flash::{self, FlashLevel};
use crate::flashcard::{Flashcard, FlashcardForm, FlashcardService, FlashcardServiceError};
use crate::web::{PageContext, error_page};

#[derive(Clone, Debug)]
pub struct FlashcardState {
    pub db: Arc<sea_orm::DatabaseConnection>,
}

#[derive(Debug, thiserror::Error)]
enum FlashcardWebError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error("Flashcard service error")]
    Service(#[from] FlashcardServiceError),
}

impl IntoResponse for FlashcardWebError {
    fn into_response(self) -> Response {
        match self {
            FlashcardWebError::Service(FlashcardServiceError::FlashcardNotFound(_)) => {
                error_page(StatusCode::NOT_FOUND, "That flashcard does not exist.")
            }
            other => {
                tracing::error!("Flashcard request failed: {:?}", other);
                error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred while processing your request. Please try again later.",
                )
            }
        }
    }
}

#[derive(Template)]
#[template(path = "flashcards.html")]
struct FlashcardsTemplate {
    page: PageContext,
    flashcards: Vec<Flashcard>,
}

#[derive(Template)]
#[template(path = "flashcard_form.html")]
struct FlashcardFormTemplate {
    page: PageContext,
    heading: &'static str,
    action: String,
    form: FlashcardForm,
    error: Option<&'static str>,
}

pub fn create_flashcard_router(state: Arc<FlashcardState>) -> Router {
    Router::new()
        .route("/flashcards", get(flashcards_handler))
        .route(
            "/flashcards/add",
            get(add_flashcard_page_handler).post(add_flashcard_handler),
        )
        .route(
            "/flashcards/{id}/edit",
            get(edit_flashcard_page_handler).post(edit_flashcard_handler),
        )
        .route("/flashcards/{id}/delete", post(delete_flashcard_handler))
        .with_state(state)
}

fn back_to_flashcards(jar: CookieJar, level: FlashLevel, message: impl Into<String>) -> Response {
    (flash::push(jar, level, message), Redirect::to("/flashcards")).into_response()
}

fn not_authorized(jar: CookieJar, action: &str) -> Response {
    back_to_flashcards(
        jar,
        FlashLevel::Danger,
        format!("You are not authorized to {} this flashcard.", action),
    )
}

#[tracing::instrument(skip(state, jar))]
async fn flashcards_handler(
    State(state): State<Arc<FlashcardState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), FlashcardWebError> {
    let flashcards = FlashcardService::new(&state.db)
        .get_flashcards(user.id)
        .await?;

    let (jar, flash) = flash::take(jar);
    let template = FlashcardsTemplate {
        page: PageContext::new(Some(&user), flash),
        flashcards,
    };
    Ok((jar, Html(template.render()?)))
}

#[tracing::instrument(skip(jar))]
async fn add_flashcard_page_handler(
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), FlashcardWebError> {
    let (jar, flash) = flash::take(jar);
    let template = FlashcardFormTemplate {
        page: PageContext::new(Some(&user), flash),
        heading: "Add Flashcard",
        action: "/flashcards/add".to_string(),
        form: FlashcardForm::default(),
        error: None,
    };
    Ok((jar, Html(template.render()?)))
}

#[tracing::instrument(skip(state, jar))]
async fn add_flashcard_handler(
    State(state): State<Arc<FlashcardState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
    Form(form): Form<FlashcardForm>,
) -> Result<Response, FlashcardWebError> {
    let (question, answer) = match form.validate() {
        Ok(sides) => sides,
        Err(message) => {
            let template = FlashcardFormTemplate {
                page: PageContext::new(Some(&user), None),
                heading: "Add Flashcard",
                action: "/flashcards/add".to_string(),
                form,
                error: Some(message),
            };
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(template.render()?)).into_response());
        }
    };

    FlashcardService::new(&state.db)
        .create_flashcard(user.id, question, answer)
        .await?;
    Ok(back_to_flashcards(
        jar,
        FlashLevel::Success,
        "Your flashcard has been added!",
    ))
}

#[tracing::instrument(skip(state, jar))]
async fn edit_flashcard_page_handler(
    State(state): State<Arc<FlashcardState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, FlashcardWebError> {
    let flashcard = match FlashcardService::new(&state.db)
        .get_flashcard(user.id, id)
        .await
    {
        Ok(flashcard) => flashcard,
        Err(FlashcardServiceError::Forbidden(_)) => return Ok(not_authorized(jar, "edit")),
        Err(err) => return Err(err.into()),
    };

    let (jar, flash) = flash::take(jar);
    let template = FlashcardFormTemplate {
        page: PageContext::new(Some(&user), flash),
        heading: "Edit Flashcard",
        action: format!("/flashcards/{}/edit", flashcard.id()),
        form: FlashcardForm::from(&flashcard),
        error: None,
    };
    Ok((jar, Html(template.render()?)).into_response())
}

#[tracing::instrument(skip(state, jar))]
async fn edit_flashcard_handler(
    State(state): State<Arc<FlashcardState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
    Form(form): Form<FlashcardForm>,
) -> Result<Response, FlashcardWebError> {
    let (question, answer) = match form.validate() {
        Ok(sides) => sides,
        Err(message) => {
            let template = FlashcardFormTemplate {
                page: PageContext::new(Some(&user), None),
                heading: "Edit Flashcard",
                action: format!("/flashcards/{}/edit", id),
                form,
                error: Some(message),
            };
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(template.render()?)).into_response());
        }
    };

    match FlashcardService::new(&state.db)
        .edit_flashcard(user.id, id, question, answer)
        .await
    {
        Ok(_) => Ok(back_to_flashcards(
            jar,
            FlashLevel::Success,
            "Your flashcard has been updated!",
        )),
        Err(FlashcardServiceError::Forbidden(_)) => Ok(not_authorized(jar, "edit")),
        Err(err) => Err(err.into()),
    }
}

#[tracing::instrument(skip(state, jar))]
async fn delete_flashcard_handler(
    State(state): State<Arc<FlashcardState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    jar: CookieJar,
) -> Result<Response, FlashcardWebError> {
    match FlashcardService::new(&state.db)
        .delete_flashcard(user.id, id)
        .await
    {
        Ok(()) => Ok(back_to_flashcards(
            jar,
            FlashLevel::Success,
            "Your flashcard has been deleted!",
        )),
        Err(FlashcardServiceError::Forbidden(_)) => Ok(not_authorized(jar, "delete")),
        Err(err) => Err(err.into()),
    }
}
