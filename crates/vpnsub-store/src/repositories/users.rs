use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::StoreError;
use crate::models::User;
use crate::util::{parse_datetime, to_rfc3339};

pub struct UserRepo<'a> {
    conn: &'a Connection,
}

impl<'a> UserRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        UserRepo { conn }
    }

    pub fn by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, username, referral_code, trial_used, is_admin, created_at
                 FROM users WHERE id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, username, referral_code, trial_used, is_admin, created_at
                 FROM users WHERE referral_code = ?1",
                params![code],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn create(&self, user_id: i64, username: &str, referral_code: &str) -> Result<User, StoreError> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO users (id, username, referral_code, trial_used, is_admin, created_at)
                 VALUES (?1, ?2, ?3, 0, 0, ?4)",
                params![user_id, username, referral_code, to_rfc3339(&created_at)],
            )
            .map_err(classify_create_error)?;

        Ok(User {
            id: user_id,
            username: username.to_string(),
            referral_code: referral_code.to_string(),
            trial_used: false,
            is_admin: false,
            created_at,
        })
    }

    pub fn mark_trial_used(&self, user_id: i64) -> Result<(), StoreError> {
        self.conn
            .execute("UPDATE users SET trial_used = 1 WHERE id = ?1", params![user_id])?;
        Ok(())
    }
}

/// `users` has two independently-unique columns, so a single column hint
/// to `StoreError::from_insert` can't tell them apart. Inspect the raw
/// SQLite message instead, falling back to `from_insert`'s generic
/// handling for anything else.
fn classify_create_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(sqlite_err, Some(msg)) = &err {
        if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("users.referral_code") {
                return StoreError::UniqueViolation("users.referral_code".to_string());
            }
            if msg.contains("users.username") {
                return StoreError::UniqueViolation("users.username".to_string());
            }
        }
    }
    StoreError::from_insert(err, "users.id")
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<Result<User, StoreError>> {
    let created_at_raw: String = row.get(5)?;
    Ok((|| {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            referral_code: row.get(2)?,
            trial_used: row.get::<_, i64>(3)? != 0,
            is_admin: row.get::<_, i64>(4)? != 0,
            created_at: parse_datetime(&created_at_raw)?,
        })
    })())
}
