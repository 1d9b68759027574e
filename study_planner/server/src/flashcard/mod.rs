use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::Deserialize;

use crate::entities::*;

pub mod web;

/// A question/answer card for self-testing.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Flashcard {
    id: i32,
    user_id: i32,
    question: String,
    answer: String,
    created_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl From<flashcard::Model> for Flashcard {
    fn from(model: flashcard::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            question: model.question,
            answer: model.answer,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlashcardForm {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

impl FlashcardForm {
    /// Both sides are required; surrounding whitespace is dropped.
    pub fn validate(&self) -> Result<(String, String), &'static str> {
        let question = self.question.trim();
        let answer = self.answer.trim();
        if question.is_empty() {
            return Err("Question is required");
        }
        if answer.is_empty() {
            return Err("Answer is required");
        }
        Ok((question.to_string(), answer.to_string()))
    }
}

impl From<&Flashcard> for FlashcardForm {
    fn from(flashcard: &Flashcard) -> Self {
        Self {
            question: flashcard.question.clone(),
            answer: flashcard.answer.clone(),
        }
    }
}

/// Error type for FlashcardService operations.
#[derive(Debug, thiserror::Error)]
pub enum FlashcardServiceError {
    #[error("Flashcard with ID {0} not found")]
    FlashcardNotFound(i32),
    #[error("Flashcard with ID {0} belongs to another user")]
    Forbidden(i32),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct FlashcardService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl FlashcardService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> FlashcardService<'_> {
        FlashcardService { db }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_flashcard(
        &self,
        user_id: i32,
        question: String,
        answer: String,
    ) -> Result<Flashcard, FlashcardServiceError> {
        let active_model = flashcard::ActiveModel {
            user_id: ActiveValue::Set(user_id),
            question: ActiveValue::Set(question),
            answer: ActiveValue::Set(answer),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Ok(Flashcard::from(created_model))
    }

    /// Flashcards of a user, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_flashcards(&self, user_id: i32) -> Result<Vec<Flashcard>, FlashcardServiceError> {
        let flashcards = flashcard::Entity::find()
            .filter(flashcard::Column::UserId.eq(user_id))
            .order_by_desc(flashcard::Column::CreatedAt)
            .order_by_desc(flashcard::Column::Id)
            .all(self.db)
            .await?
            .into_iter()
            .map(Flashcard::from)
            .collect();
        Ok(flashcards)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_flashcard(&self, user_id: i32, id: i32) -> Result<Flashcard, FlashcardServiceError> {
        Ok(Flashcard::from(self.find_owned_model(user_id, id).await?))
    }

    #[tracing::instrument(skip(self))]
    pub async fn edit_flashcard(
        &self,
        user_id: i32,
        id: i32,
        question: String,
        answer: String,
    ) -> Result<Flashcard, FlashcardServiceError> {
        let mut active_model: flashcard::ActiveModel =
            self.find_owned_model(user_id, id).await?.into();
        active_model.question = ActiveValue::Set(question);
        active_model.answer = ActiveValue::Set(answer);
        let updated_model = active_model.update(self.db).await?;
        Ok(Flashcard::from(updated_model))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_flashcard(&self, user_id: i32, id: i32) -> Result<(), FlashcardServiceError> {
        self.find_owned_model(user_id, id).await?;
        flashcard::Entity::delete_by_id(id).exec(self.db).await?;
        Ok(())
    }

    async fn find_owned_model(
        &self,
        user_id: i32,
        id: i32,
    ) -> Result<flashcard::Model, FlashcardServiceError> {
        let model = flashcard::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(FlashcardServiceError::FlashcardNotFound(id))?;
        if model.user_id != user_id {
            return Err(FlashcardServiceError::Forbidden(id));
        }
        Ok(model)
    }
}
