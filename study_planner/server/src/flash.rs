//! One-shot notices carried to the next rendered page in a cookie.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

pub const FLASH_COOKIE: &str = "flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Danger,
}

impl FlashLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Warning => "warning",
            FlashLevel::Danger => "danger",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(FlashLevel::Success),
            "info" => Some(FlashLevel::Info),
            "warning" => Some(FlashLevel::Warning),
            "danger" => Some(FlashLevel::Danger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub message: String,
}

impl FlashMessage {
    /// CSS class of the alert box.
    pub fn css_class(&self) -> &'static str {
        self.level.as_str()
    }

    fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("level", self.level.as_str())
            .append_pair("message", &self.message)
            .finish()
    }

    fn decode(raw: &str) -> Option<Self> {
        let mut level = None;
        let mut message = None;
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "level" => level = FlashLevel::parse(&value),
                "message" => message = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(Self {
            level: level?,
            message: message?,
        })
    }
}

/// Stores a message for the next page, replacing any pending one.
pub fn push(jar: CookieJar, level: FlashLevel, message: impl Into<String>) -> CookieJar {
    let flash = FlashMessage {
        level,
        message: message.into(),
    };
    let cookie = Cookie::build((FLASH_COOKIE, flash.encode()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    jar.add(cookie)
}

/// Pops the pending message, if any. The cookie is only cleared when one was present.
pub fn take(jar: CookieJar) -> (CookieJar, Option<FlashMessage>) {
    let Some(raw) = jar.get(FLASH_COOKIE).map(|cookie| cookie.value().to_string()) else {
        return (jar, None);
    };
    let flash = FlashMessage::decode(&raw);
    if flash.is_none() {
        tracing::debug!("Dropping unreadable flash cookie");
    }
    (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), flash)
}
