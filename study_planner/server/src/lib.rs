pub mod config {
    use chrono_tz::Tz;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, Clone)]
    pub struct Config {
        pub db_url: String,
        #[serde(default = "default_port")]
        pub port: u16,
        pub jwt_secret: String,
        /// Seeds a first account at start-up when all three are present.
        #[serde(default)]
        pub admin_username: Option<String>,
        #[serde(default)]
        pub admin_email: Option<String>,
        #[serde(default)]
        pub admin_password: Option<String>,
        #[serde(default)]
        pub secure_cookies: bool,
        #[serde(default)]
        pub google_client_id: String,
        #[serde(default)]
        pub google_client_secret: String,
        #[serde(default = "default_google_redirect_uri")]
        pub google_redirect_uri: String,
        #[serde(default = "default_google_auth_url")]
        pub google_auth_url: String,
        #[serde(default = "default_google_token_url")]
        pub google_token_url: String,
        #[serde(default = "default_google_api_base_url")]
        pub google_api_base_url: String,
        /// IANA zone of task due dates; events are read into it and pushed with it.
        #[serde(default = "default_calendar_time_zone")]
        pub calendar_time_zone: Tz,
        #[serde(default = "default_upcoming_events_limit")]
        pub upcoming_events_limit: u32,
    }

    impl Config {
        /// Loads configuration from environment variables.
        pub fn from_env() -> anyhow::Result<Self> {
            let settings = config::Config::builder()
                .add_source(config::Environment::default())
                .build()?;

            let config: Config = settings.try_deserialize()?;
            Ok(config)
        }

        /// Builds a configuration with every optional setting at its default.
        pub fn new(db_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
            Self {
                db_url: db_url.into(),
                port: default_port(),
                jwt_secret: jwt_secret.into(),
                admin_username: None,
                admin_email: None,
                admin_password: None,
                secure_cookies: false,
                google_client_id: String::new(),
                google_client_secret: String::new(),
                google_redirect_uri: default_google_redirect_uri(),
                google_auth_url: default_google_auth_url(),
                google_token_url: default_google_token_url(),
                google_api_base_url: default_google_api_base_url(),
                calendar_time_zone: default_calendar_time_zone(),
                upcoming_events_limit: default_upcoming_events_limit(),
            }
        }
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_google_redirect_uri() -> String {
        "http://localhost:8080/calendar/callback".to_string()
    }

    fn default_google_auth_url() -> String {
        "https://accounts.google.com/o/oauth2/v2/auth".to_string()
    }

    fn default_google_token_url() -> String {
        "https://oauth2.googleapis.com/token".to_string()
    }

    fn default_google_api_base_url() -> String {
        "https://www.googleapis.com/calendar/v3".to_string()
    }

    fn default_calendar_time_zone() -> Tz {
        chrono_tz::UTC
    }

    fn default_upcoming_events_limit() -> u32 {
        20
    }

}

pub mod auth;
pub mod calendar;
pub mod entities;
pub mod flash;
pub mod flashcard;
pub mod task;
pub mod user;
pub mod web;
