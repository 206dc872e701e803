use rusqlite::ErrorCode;
use tandem_core::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or check constraint refused the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),

    /// A guarded write found its precondition false inside the transaction.
    /// The transaction was rolled back.
    #[error("rejected: {0}")]
    Rejected(ChatError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<ChatError> for StoreError {
    fn from(e: ChatError) -> Self {
        StoreError::Rejected(e)
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Rejected(inner) => inner,
            StoreError::NotFound(what) => ChatError::NotFound(what),
            other => ChatError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_unwraps_to_domain_error() {
        let err: ChatError = StoreError::Rejected(ChatError::ConflictAlreadyConnected).into();
        assert_eq!(err, ChatError::ConflictAlreadyConnected);
    }

    #[test]
    fn database_errors_become_transport() {
        let err: ChatError = StoreError::Database("disk full".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn not_found_keeps_subject() {
        let err: ChatError = StoreError::NotFound("connection 7".into()).into();
        assert_eq!(err, ChatError::NotFound("connection 7".into()));
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StoreError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, StoreError::Conflict(_)), "got: {err:?}");
    }
}
