use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sea_orm::*;

use crate::calendar::token::GoogleToken;
use crate::entities::*;

/// An account of the planner.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct User {
    id: i32,
    username: String,
    email: String,
    google_token: Option<String>,
    google_calendar_id: Option<String>,
    calendar_sync_enabled: bool,
}

impl User {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// The stored Google credential, still serialized.
    pub fn google_token(&self) -> Option<&str> {
        self.google_token.as_deref()
    }

    /// Calendar to synchronize with; Google's alias for the account's main calendar by default.
    pub fn calendar_id(&self) -> &str {
        self.google_calendar_id.as_deref().unwrap_or("primary")
    }

    pub fn calendar_sync_enabled(&self) -> bool {
        self.calendar_sync_enabled
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            google_token: model.google_token,
            google_calendar_id: model.google_calendar_id,
            calendar_sync_enabled: model.calendar_sync_enabled,
        }
    }
}

/// Error type for UserService operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("Email '{0}' is already registered")]
    DuplicateEmail(String),
    #[error("User with ID {0} not found")]
    UserNotFound(i32),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
    #[error("Could not serialize Google token")]
    TokenSerialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct UserService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl UserService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> UserService<'_> {
        UserService { db }
    }

    /// Registers a new account.
    ///
    /// # Arguments
    ///
    /// * `username` - Unique display name.
    /// * `email` - Unique login email.
    /// * `password` - Plain-text password, stored as an argon2 hash.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `User`, or an error when the username or email is taken.
    #[tracing::instrument(skip(self, password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let username = username.trim();
        let email = email.trim().to_lowercase();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(UserServiceError::InvalidInput(
                "Username, email and password are required".to_string(),
            ));
        }
        if !email.contains('@') {
            return Err(UserServiceError::InvalidInput(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        let username_taken = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?
            .is_some();
        if username_taken {
            return Err(UserServiceError::DuplicateUsername(username.to_string()));
        }
        if self.find_model_by_email(&email).await?.is_some() {
            return Err(UserServiceError::DuplicateEmail(email));
        }

        let active_model = user::ActiveModel {
            username: ActiveValue::Set(username.to_string()),
            email: ActiveValue::Set(email),
            password_hash: ActiveValue::Set(hash_password(password)?),
            google_token: ActiveValue::Set(None),
            google_calendar_id: ActiveValue::Set(None),
            calendar_sync_enabled: ActiveValue::Set(false),
            created_at: ActiveValue::Set(chrono::Utc::now()),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        tracing::info!("Registered user {}", created_model.username);
        Ok(User::from(created_model))
    }

    /// Creates the account unless one with the same email already exists.
    #[tracing::instrument(skip(self, password))]
    pub async fn ensure_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        match self.find_model_by_email(&email.trim().to_lowercase()).await? {
            Some(existing) => Ok(User::from(existing)),
            None => self.register(username, email, password).await,
        }
    }

    /// Checks an email/password pair.
    ///
    /// # Returns
    ///
    /// `Some(User)` when the credentials match, `None` otherwise.
    #[tracing::instrument(skip(self, password))]
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let Some(model) = self.find_model_by_email(&email.trim().to_lowercase()).await? else {
            return Ok(None);
        };
        if verify_password(password, &model.password_hash) {
            Ok(Some(User::from(model)))
        } else {
            Ok(None)
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: i32) -> Result<User, UserServiceError> {
        let model = user::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;
        Ok(User::from(model))
    }

    /// Stores a freshly granted Google credential and turns calendar sync on.
    #[tracing::instrument(skip(self, token))]
    pub async fn set_google_token(
        &self,
        id: i32,
        token: &GoogleToken,
    ) -> Result<User, UserServiceError> {
        let mut active_model = self.find_active_model(id).await?;
        active_model.google_token = ActiveValue::Set(Some(serde_json::to_string(token)?));
        active_model.calendar_sync_enabled = ActiveValue::Set(true);
        let updated_model = active_model.update(self.db).await?;
        Ok(User::from(updated_model))
    }

    /// Replaces the stored credential after a refresh, leaving the sync flag alone.
    #[tracing::instrument(skip(self, token))]
    pub async fn update_google_token(
        &self,
        id: i32,
        token: &GoogleToken,
    ) -> Result<User, UserServiceError> {
        let mut active_model = self.find_active_model(id).await?;
        active_model.google_token = ActiveValue::Set(Some(serde_json::to_string(token)?));
        let updated_model = active_model.update(self.db).await?;
        Ok(User::from(updated_model))
    }

    /// Forgets the Google credential and turns calendar sync off.
    #[tracing::instrument(skip(self))]
    pub async fn clear_google_token(&self, id: i32) -> Result<User, UserServiceError> {
        let mut active_model = self.find_active_model(id).await?;
        active_model.google_token = ActiveValue::Set(None);
        active_model.calendar_sync_enabled = ActiveValue::Set(false);
        let updated_model = active_model.update(self.db).await?;
        Ok(User::from(updated_model))
    }

    async fn find_model_by_email(
        &self,
        email: &str,
    ) -> Result<Option<user::Model>, UserServiceError> {
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db)
            .await?)
    }

    async fn find_active_model(&self, id: i32) -> Result<user::ActiveModel, UserServiceError> {
        let model = user::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;
        Ok(model.into())
    }
}

fn hash_password(password: &str) -> Result<String, UserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| UserServiceError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        tracing::warn!("Stored password hash could not be parsed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
