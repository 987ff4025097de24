//! Account creation and credential checks for warbler users.
//!
//! `signup` only builds a [`NewUser`]; persisting it is the caller's job, and
//! that is where a taken email or username surfaces as
//! [`DbError::DuplicateCredential`]. `authenticate` never treats a bad login as
//! an error: it returns [`AuthResult::NotFound`].

pub mod password;

use thiserror::Error;
use tracing::debug;
use warbler_db::models::DEFAULT_IMAGE_URL;
use warbler_db::{Database, DbError, NewUser, User};

pub use password::{PasswordError, hash_password, verify_password};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Found(User),
    NotFound,
}

impl AuthResult {
    pub fn user(self) -> Option<User> {
        match self {
            Self::Found(user) => Some(user),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Build an unpersisted user whose password column holds an Argon2id hash of
/// `password`. `image_url` falls back to the default placeholder.
pub fn signup(
    email: &str,
    username: &str,
    password: &str,
    image_url: Option<&str>,
) -> Result<NewUser, PasswordError> {
    let hashed = hash_password(password)?;

    Ok(NewUser::new(email, username, hashed)
        .with_image_url(image_url.unwrap_or(DEFAULT_IMAGE_URL)))
}

/// Look up `username` (exact match) and check `password` against its hash.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<AuthResult, AuthError> {
    let Some(user) = db.get_user_by_username(username)? else {
        debug!(username, "authentication failed: unknown user");
        return Ok(AuthResult::NotFound);
    };

    if verify_password(password, &user.password)? {
        Ok(AuthResult::Found(user))
    } else {
        debug!(username, "authentication failed: wrong password");
        Ok(AuthResult::NotFound)
    }
}
