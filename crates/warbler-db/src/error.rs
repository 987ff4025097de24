use rusqlite::ffi;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// A write collided with an existing `users.email` or `users.username`.
    #[error("duplicate credential: users.{field} is already taken")]
    DuplicateCredential { field: String },

    #[error("a user cannot follow themself")]
    SelfFollow,

    #[error("message is {len} characters long, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("user {id} still owns {messages} messages, {likes} likes and {follows} follow edges")]
    HasDependents {
        id: i64,
        messages: i64,
        likes: i64,
        follows: i64,
    },

    /// Any other constraint the store rejected.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(failure, Some(msg)) = &err else {
            return Self::Sqlite(err);
        };
        if failure.code != rusqlite::ErrorCode::ConstraintViolation {
            return Self::Sqlite(err);
        }

        // SQLite reports "UNIQUE constraint failed: users.email"
        if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE {
            let columns = msg.rsplit(": ").next().unwrap_or_default();
            if let Some(field) = columns
                .split(", ")
                .find_map(|col| col.strip_prefix("users."))
            {
                return Self::DuplicateCredential {
                    field: field.to_string(),
                };
            }
        }

        Self::Integrity(msg.clone())
    }
}
