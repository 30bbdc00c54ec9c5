use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(String),
    #[error("decimal parse error: {0}")]
    DecimalParse(String),
    #[error("unique constraint violation on {0}")]
    UniqueViolation(String),
    #[error("unit of work already finished")]
    UnitOfWorkFinished,
    #[error("user not found with id: {0}")]
    UserNotFound(i64),
    #[error("tariff not found with id: {0}")]
    TariffNotFound(i64),
    #[error("subscription not found with id: {0}")]
    SubscriptionNotFound(i64),
    #[error("payment not found with id: {0}")]
    PaymentNotFound(i64),
}

impl StoreError {
    /// Classify a raw rusqlite error, turning constraint violations on a
    /// named column into `UniqueViolation` so callers can distinguish
    /// "this row already exists" from an unexpected database failure.
    pub fn from_insert(err: rusqlite::Error, column_hint: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(sqlite_err, Some(msg))
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                if msg.contains(column_hint) {
                    StoreError::UniqueViolation(column_hint.to_string())
                } else {
                    StoreError::Database(err)
                }
            }
            _ => StoreError::Database(err),
        }
    }
}
