/// Row types for the `users`, `messages`, `follows` and `likes` tables.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_IMAGE_URL: &str = "/static/images/default-pic.png";
pub const MAX_MESSAGE_LEN: usize = 140;

/// A user that has not been written to the store yet. `password` must already
/// hold a hash; see `warbler_auth::signup` for the production path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub image_url: String,
    pub header_image_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

impl NewUser {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password_hash.into(),
            image_url: DEFAULT_IMAGE_URL.to_string(),
            header_image_url: None,
            bio: None,
            location: None,
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }
}

/// No id has been assigned yet, so it renders as `#None`.
impl fmt::Display for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<User #None: {}, {}>", self.username, self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub image_url: String,
    pub header_image_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<User #{}: {}, {}>", self.id, self.username, self.email)
    }
}

/// Replacement values for a user's profile. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct UpdateProfile {
    pub email: Option<String>,
    pub username: Option<String>,
    pub image_url: Option<String>,
    pub header_image_url: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub location: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub user_id: i64,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, user_id: i64) -> Self {
        Self {
            text: text.into(),
            user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
}

/// Directed edge: `follower_id` follows `followed_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Follow {
    pub follower_id: i64,
    pub followed_id: i64,
}

impl Follow {
    pub fn new(follower_id: i64, followed_id: i64) -> Self {
        Self {
            follower_id,
            followed_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Like {
    pub id: i64,
    pub user_id: i64,
    pub message_id: i64,
}
