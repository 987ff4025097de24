use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, Row, params};
use tracing::{debug, warn};

use crate::models::{Follow, Like, MAX_MESSAGE_LEN, Message, NewMessage, NewUser, UpdateProfile, User};
use crate::{Database, DbError, DeletePolicy, Result};

const USER_COLUMNS: &str =
    "u.id, u.email, u.username, u.password, u.image_url, u.header_image_url, u.bio, u.location";
const MESSAGE_COLUMNS: &str = "m.id, m.text, m.timestamp, m.user_id";

/// Row counts per table, reported by the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub users: i64,
    pub messages: i64,
    pub follows: i64,
    pub likes: i64,
}

impl Database {
    // -- Users --

    /// Persist `user`. Fails with `DbError::DuplicateCredential` when the
    /// email or username is already taken.
    pub fn insert_user(&self, user: &NewUser) -> Result<User> {
        self.with_conn(|conn| insert_user(conn, user))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_by_id(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_by_username(conn, username))
    }

    pub fn search_users(&self, query: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| search_users(conn, query))
    }

    pub fn update_profile(&self, id: i64, changes: &UpdateProfile) -> Result<User> {
        self.transaction(|tx| update_profile(tx, id, changes))
    }

    pub fn delete_user(&self, id: i64) -> Result<()> {
        let policy = self.delete_policy();
        self.transaction(|tx| delete_user(tx, id, policy))
    }

    // -- Messages --

    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.with_conn(|conn| insert_message(conn, message))
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| get_message(conn, id))
    }

    pub fn list_messages(&self, user_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| list_messages(conn, user_id))
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.transaction(|tx| delete_message(tx, id))
    }

    pub fn home_timeline(&self, user_id: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| home_timeline(conn, user_id, limit))
    }

    // -- Follows --

    /// Record that `edge.follower_id` follows `edge.followed_id`.
    /// Returns false if the edge already existed.
    pub fn follow(&self, edge: Follow) -> Result<bool> {
        self.with_conn(|conn| follow(conn, edge))
    }

    pub fn unfollow(&self, edge: Follow) -> Result<bool> {
        self.with_conn(|conn| unfollow(conn, edge))
    }

    /// Users who follow `user_id`.
    pub fn list_followers(&self, user_id: i64) -> Result<Vec<User>> {
        self.with_conn(|conn| list_followers(conn, user_id))
    }

    /// Users that `user_id` follows.
    pub fn list_following(&self, user_id: i64) -> Result<Vec<User>> {
        self.with_conn(|conn| list_following(conn, user_id))
    }

    pub fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        self.with_conn(|conn| is_following(conn, follower_id, followed_id))
    }

    // -- Likes --

    /// Toggle a like: removes it if present, inserts it if not.
    /// Returns the new like, or `None` when the like was removed.
    pub fn toggle_like(&self, user_id: i64, message_id: i64) -> Result<Option<Like>> {
        self.transaction(|tx| toggle_like(tx, user_id, message_id))
    }

    pub fn list_liked_messages(&self, user_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| list_liked_messages(conn, user_id))
    }

    pub fn table_counts(&self) -> Result<TableCounts> {
        self.with_conn(table_counts)
    }
}

// -- Users --

pub fn insert_user(conn: &Connection, user: &NewUser) -> Result<User> {
    conn.execute(
        "INSERT INTO users (email, username, password, image_url, header_image_url, bio, location)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.email,
            user.username,
            user.password,
            user.image_url,
            user.header_image_url,
            user.bio,
            user.location,
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(user_id = id, username = %user.username, "user inserted");

    Ok(User {
        id,
        email: user.email.clone(),
        username: user.username.clone(),
        password: user.password.clone(),
        image_url: user.image_url.clone(),
        header_image_url: user.header_image_url.clone(),
        bio: user.bio.clone(),
        location: user.location.clone(),
    })
}

pub fn get_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
    conn.query_row(&sql, [id], user_from_row).optional()
}

/// Exact, case-sensitive match on username.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1");
    conn.query_row(&sql, [username], user_from_row).optional()
}

/// Users whose username contains `query`, ordered by username.
pub fn search_users(conn: &Connection, query: &str) -> Result<Vec<User>> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users u
         WHERE u.username LIKE ?1 ESCAPE '\\'
         ORDER BY u.username"
    );
    collect_users(conn, &sql, params![format!("%{escaped}%")])
}

pub fn update_profile(conn: &Connection, id: i64, changes: &UpdateProfile) -> Result<User> {
    let mut user = get_user_by_id(conn, id)?.ok_or(DbError::UserNotFound(id))?;

    if let Some(email) = &changes.email {
        user.email = email.clone();
    }
    if let Some(username) = &changes.username {
        user.username = username.clone();
    }
    if let Some(image_url) = &changes.image_url {
        user.image_url = image_url.clone();
    }
    if let Some(header_image_url) = &changes.header_image_url {
        user.header_image_url = header_image_url.clone();
    }
    if let Some(bio) = &changes.bio {
        user.bio = bio.clone();
    }
    if let Some(location) = &changes.location {
        user.location = location.clone();
    }

    conn.execute(
        "UPDATE users
         SET email = ?1, username = ?2, image_url = ?3, header_image_url = ?4, bio = ?5, location = ?6
         WHERE id = ?7",
        params![
            user.email,
            user.username,
            user.image_url,
            user.header_image_url,
            user.bio,
            user.location,
            id,
        ],
    )?;
    debug!(user_id = id, "profile updated");

    Ok(user)
}

/// Delete a user. Under `DeletePolicy::Restrict` the user must not own any
/// messages, likes or follow edges; under `Cascade` those rows go too.
/// Callers should run this inside a transaction.
pub fn delete_user(conn: &Connection, id: i64, policy: DeletePolicy) -> Result<()> {
    if get_user_by_id(conn, id)?.is_none() {
        return Err(DbError::UserNotFound(id));
    }

    match policy {
        DeletePolicy::Restrict => {
            let messages = count(conn, "SELECT COUNT(*) FROM messages WHERE user_id = ?1", id)?;
            let likes = count(conn, "SELECT COUNT(*) FROM likes WHERE user_id = ?1", id)?;
            let follows = count(
                conn,
                "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 OR followed_id = ?1",
                id,
            )?;
            if messages + likes + follows > 0 {
                return Err(DbError::HasDependents {
                    id,
                    messages,
                    likes,
                    follows,
                });
            }
        }
        DeletePolicy::Cascade => {
            conn.execute(
                "DELETE FROM likes
                 WHERE user_id = ?1
                    OR message_id IN (SELECT id FROM messages WHERE user_id = ?1)",
                [id],
            )?;
            conn.execute("DELETE FROM messages WHERE user_id = ?1", [id])?;
            conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 OR followed_id = ?1",
                [id],
            )?;
        }
    }

    conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    debug!(user_id = id, ?policy, "user deleted");
    Ok(())
}

// -- Messages --

pub fn insert_message(conn: &Connection, message: &NewMessage) -> Result<Message> {
    let len = message.text.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(DbError::MessageTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }

    // Stored at microsecond precision so the returned value matches a re-read.
    let timestamp = Utc::now().trunc_subsecs(6);
    conn.execute(
        "INSERT INTO messages (text, timestamp, user_id) VALUES (?1, ?2, ?3)",
        params![
            message.text,
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            message.user_id,
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(message_id = id, user_id = message.user_id, "message inserted");

    Ok(Message {
        id,
        text: message.text.clone(),
        timestamp,
        user_id: message.user_id,
    })
}

pub fn get_message(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

/// Messages owned by `user_id`, newest first.
pub fn list_messages(conn: &Connection, user_id: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.user_id = ?1
         ORDER BY julianday(m.timestamp) DESC, m.id DESC"
    );
    collect_messages(conn, &sql, params![user_id])
}

/// Deletes the message and any likes on it. Returns false if it did not exist.
pub fn delete_message(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM likes WHERE message_id = ?1", [id])?;
    let removed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
    Ok(removed > 0)
}

/// Messages by `user_id` and by everyone they follow, newest first.
pub fn home_timeline(conn: &Connection, user_id: i64, limit: u32) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.user_id = ?1
            OR m.user_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)
         ORDER BY julianday(m.timestamp) DESC, m.id DESC
         LIMIT ?2"
    );
    collect_messages(conn, &sql, params![user_id, limit])
}

// -- Follows --

pub fn follow(conn: &Connection, edge: Follow) -> Result<bool> {
    if edge.follower_id == edge.followed_id {
        return Err(DbError::SelfFollow);
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id) VALUES (?1, ?2)",
        params![edge.follower_id, edge.followed_id],
    )?;
    if inserted > 0 {
        debug!(follower = edge.follower_id, followed = edge.followed_id, "follow added");
    }
    Ok(inserted > 0)
}

pub fn unfollow(conn: &Connection, edge: Follow) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
        params![edge.follower_id, edge.followed_id],
    )?;
    Ok(removed > 0)
}

pub fn list_followers(conn: &Connection, user_id: i64) -> Result<Vec<User>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM follows f
         JOIN users u ON u.id = f.follower_id
         WHERE f.followed_id = ?1
         ORDER BY u.id"
    );
    collect_users(conn, &sql, params![user_id])
}

pub fn list_following(conn: &Connection, user_id: i64) -> Result<Vec<User>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM follows f
         JOIN users u ON u.id = f.followed_id
         WHERE f.follower_id = ?1
         ORDER BY u.id"
    );
    collect_users(conn, &sql, params![user_id])
}

pub fn is_following(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<bool> {
    let found = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND followed_id = ?2)",
        params![follower_id, followed_id],
        |row| row.get(0),
    )?;
    Ok(found)
}

// -- Likes --

pub fn toggle_like(conn: &Connection, user_id: i64, message_id: i64) -> Result<Option<Like>> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM likes WHERE user_id = ?1 AND message_id = ?2",
            params![user_id, message_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(existing_id) = existing {
        conn.execute("DELETE FROM likes WHERE id = ?1", [existing_id])?;
        debug!(user_id, message_id, "like removed");
        return Ok(None);
    }

    conn.execute(
        "INSERT INTO likes (user_id, message_id) VALUES (?1, ?2)",
        params![user_id, message_id],
    )?;
    debug!(user_id, message_id, "like added");
    Ok(Some(Like {
        id: conn.last_insert_rowid(),
        user_id,
        message_id,
    }))
}

pub fn list_liked_messages(conn: &Connection, user_id: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM likes l
         JOIN messages m ON m.id = l.message_id
         WHERE l.user_id = ?1
         ORDER BY julianday(m.timestamp) DESC, m.id DESC"
    );
    collect_messages(conn, &sql, params![user_id])
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    let total = |table: &str| -> Result<i64> {
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n)
    };

    Ok(TableCounts {
        users: total("users")?,
        messages: total("messages")?,
        follows: total("follows")?,
        likes: total("likes")?,
    })
}

// -- Row mapping --

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password: row.get(3)?,
        image_url: row.get(4)?,
        header_image_url: row.get(5)?,
        bio: row.get(6)?,
        location: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(2)?;

    Ok(Message {
        id,
        text: row.get(1)?,
        timestamp: parse_timestamp(&raw).unwrap_or_else(|| {
            warn!("Corrupt timestamp '{}' on message '{}'", raw, id);
            DateTime::default()
        }),
        user_id: row.get(3)?,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by hand through sqlite3 use datetime('now'), which
            // has no timezone. Treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

fn collect_users(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn collect_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(conn: &Connection, sql: &str, id: i64) -> Result<i64> {
    Ok(conn.query_row(sql, [id], |row| row.get(0))?)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_default_timestamps() {
        let rfc = parse_timestamp("2024-03-01T12:30:00.123456Z").unwrap();
        assert_eq!(rfc.timestamp_subsec_micros(), 123456);

        let naive = parse_timestamp("2024-03-01 12:30:00").unwrap();
        assert_eq!(naive.timestamp(), rfc.timestamp());

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&NewUser::new("a@test.com", "a_b", "HASHED_PASSWORD")).unwrap();
        db.insert_user(&NewUser::new("c@test.com", "axb", "HASHED_PASSWORD")).unwrap();

        let found = db.search_users("a_").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "a_b");

        assert_eq!(db.search_users("").unwrap().len(), 2);
    }
}
