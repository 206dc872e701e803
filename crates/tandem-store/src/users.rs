use rusqlite::{Connection, OptionalExtension};
use tracing::instrument;

use tandem_core::models::User;
use tandem_core::{ChatError, ConnectionId, UserId};

use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, username, created_at, current_connection_id";

pub struct UserRepo;

impl UserRepo {
    #[instrument(skip(conn))]
    pub fn create(conn: &Connection, username: &str) -> Result<User, StoreError> {
        let now = row_helpers::now();
        conn.execute(
            "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
            rusqlite::params![username, row_helpers::format_ts(now)],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => ChatError::UsernameTaken(username.to_string()).into(),
            other => other,
        })?;
        Ok(User {
            id: UserId::from_raw(conn.last_insert_rowid()),
            username: username.to_string(),
            created_at: now,
            current_connection_id: None,
        })
    }

    #[instrument(skip(conn), fields(user_id = %id))]
    pub fn get(conn: &Connection, id: UserId) -> Result<Option<User>, StoreError> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE id = ?1"))?;
        let mut rows = stmt.query([id.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(conn))]
    pub fn by_username(conn: &Connection, username: &str) -> Result<Option<User>, StoreError> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE username = ?1"))?;
        let mut rows = stmt.query([username])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    /// Compare-and-set both users' current connection from NULL. Returns the
    /// number of rows claimed; anything but 2 means someone was already paired.
    #[instrument(skip(conn), fields(connection_id = %connection_id))]
    pub fn claim_pair(
        conn: &Connection,
        a: UserId,
        b: UserId,
        connection_id: ConnectionId,
    ) -> Result<usize, StoreError> {
        Ok(conn.execute(
            "UPDATE users SET current_connection_id = ?1
             WHERE id IN (?2, ?3) AND current_connection_id IS NULL",
            rusqlite::params![connection_id.get(), a.get(), b.get()],
        )?)
    }

    /// Clear the current connection of whoever points at `connection_id`.
    #[instrument(skip(conn), fields(connection_id = %connection_id))]
    pub fn release(conn: &Connection, connection_id: ConnectionId) -> Result<usize, StoreError> {
        Ok(conn.execute(
            "UPDATE users SET current_connection_id = NULL WHERE current_connection_id = ?1",
            [connection_id.get()],
        )?)
    }

    pub fn current_connection_id(
        conn: &Connection,
        id: UserId,
    ) -> Result<Option<ConnectionId>, StoreError> {
        let raw: Option<Option<i64>> = conn
            .query_row(
                "SELECT current_connection_id FROM users WHERE id = ?1",
                [id.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.flatten().map(ConnectionId::from_raw))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User, StoreError> {
    Ok(User {
        id: UserId::from_raw(row_helpers::get(row, 0, "users", "id")?),
        username: row_helpers::get(row, 1, "users", "username")?,
        created_at: row_helpers::get_ts(row, 2, "users", "created_at")?,
        current_connection_id: row_helpers::get_opt::<i64>(row, 3, "users", "current_connection_id")?
            .map(ConnectionId::from_raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn setup() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn create_and_fetch() {
        let db = setup();
        let user = db.with_conn(|c| UserRepo::create(c, "alice")).unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.current_connection_id.is_none());

        let by_id = db.with_conn(|c| UserRepo::get(c, user.id)).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        let by_name = db.with_conn(|c| UserRepo::by_username(c, "alice")).unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
    }

    #[test]
    fn duplicate_username_is_taken() {
        let db = setup();
        db.with_conn(|c| UserRepo::create(c, "alice")).unwrap();
        let err = db.with_conn(|c| UserRepo::create(c, "alice")).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ChatError::UsernameTaken(_))));
    }

    #[test]
    fn unknown_user_is_none() {
        let db = setup();
        assert!(db.with_conn(|c| UserRepo::get(c, UserId::from_raw(99))).unwrap().is_none());
        assert!(db.with_conn(|c| UserRepo::by_username(c, "nobody")).unwrap().is_none());
    }

    #[test]
    fn ids_are_sequential() {
        let db = setup();
        let a = db.with_conn(|c| UserRepo::create(c, "alice")).unwrap();
        let b = db.with_conn(|c| UserRepo::create(c, "bob")).unwrap();
        assert_eq!(a.id.get(), 1);
        assert_eq!(b.id.get(), 2);
    }
}
