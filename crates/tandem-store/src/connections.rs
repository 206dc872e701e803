use rusqlite::Connection as SqlConnection;
use tracing::instrument;

use tandem_core::models::{Connection, ConnectionStatus, User};
use tandem_core::{ConnectionId, UserId};

use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, user_a_id, user_b_id, user_a_username, user_b_username, status,
                       created_at, connected_at, ended_at";

pub struct ConnectionRepo;

impl ConnectionRepo {
    /// Insert a pairing that is live from the start.
    #[instrument(skip(conn, a, b), fields(user_a_id = %a.id, user_b_id = %b.id))]
    pub fn insert_connected(
        conn: &SqlConnection,
        a: &User,
        b: &User,
    ) -> Result<Connection, StoreError> {
        let now = row_helpers::now();
        let ts = row_helpers::format_ts(now);
        conn.execute(
            "INSERT INTO connections
                (user_a_id, user_b_id, user_a_username, user_b_username, status, created_at, connected_at)
             VALUES (?1, ?2, ?3, ?4, 'connected', ?5, ?5)",
            rusqlite::params![a.id.get(), b.id.get(), a.username, b.username, ts],
        )?;
        Ok(Connection {
            id: ConnectionId::from_raw(conn.last_insert_rowid()),
            user_a_id: a.id,
            user_b_id: b.id,
            user_a_username: a.username.clone(),
            user_b_username: b.username.clone(),
            status: ConnectionStatus::Connected,
            created_at: now,
            connected_at: Some(now),
            ended_at: None,
        })
    }

    #[instrument(skip(conn), fields(connection_id = %id))]
    pub fn get(conn: &SqlConnection, id: ConnectionId) -> Result<Option<Connection>, StoreError> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM connections WHERE id = ?1"))?;
        let mut rows = stmt.query([id.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_connection(row)?)),
            None => Ok(None),
        }
    }

    /// Mark a connected pairing ended. Returns rows changed; zero means it
    /// was already ended.
    #[instrument(skip(conn), fields(connection_id = %id, ended_by = %ended_by))]
    pub fn end(
        conn: &SqlConnection,
        id: ConnectionId,
        ended_by: UserId,
    ) -> Result<usize, StoreError> {
        let ts = row_helpers::format_ts(row_helpers::now());
        Ok(conn.execute(
            "UPDATE connections SET status = 'disconnected', ended_at = ?1, ended_by = ?2
             WHERE id = ?3 AND status = 'connected'",
            rusqlite::params![ts, ended_by.get(), id.get()],
        )?)
    }
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> Result<Connection, StoreError> {
    let status: String = row_helpers::get(row, 5, "connections", "status")?;
    Ok(Connection {
        id: ConnectionId::from_raw(row_helpers::get(row, 0, "connections", "id")?),
        user_a_id: UserId::from_raw(row_helpers::get(row, 1, "connections", "user_a_id")?),
        user_b_id: UserId::from_raw(row_helpers::get(row, 2, "connections", "user_b_id")?),
        user_a_username: row_helpers::get(row, 3, "connections", "user_a_username")?,
        user_b_username: row_helpers::get(row, 4, "connections", "user_b_username")?,
        status: row_helpers::parse_enum(&status, "connections", "status")?,
        created_at: row_helpers::get_ts(row, 6, "connections", "created_at")?,
        connected_at: row_helpers::get_ts_opt(row, 7, "connections", "connected_at")?,
        ended_at: row_helpers::get_ts_opt(row, 8, "connections", "ended_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::users::UserRepo;

    fn setup() -> (Database, User, User) {
        let db = Database::in_memory().unwrap();
        let a = db.with_conn(|c| UserRepo::create(c, "alice")).unwrap();
        let b = db.with_conn(|c| UserRepo::create(c, "bob")).unwrap();
        (db, a, b)
    }

    #[test]
    fn insert_and_get() {
        let (db, a, b) = setup();
        let created = db.with_conn(|c| ConnectionRepo::insert_connected(c, &a, &b)).unwrap();
        assert!(created.is_active());
        let fetched = db.with_conn(|c| ConnectionRepo::get(c, created.id)).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn end_is_one_shot() {
        let (db, a, b) = setup();
        let created = db.with_conn(|c| ConnectionRepo::insert_connected(c, &a, &b)).unwrap();
        assert_eq!(db.with_conn(|c| ConnectionRepo::end(c, created.id, a.id)).unwrap(), 1);
        assert_eq!(db.with_conn(|c| ConnectionRepo::end(c, created.id, b.id)).unwrap(), 0);

        let ended = db.with_conn(|c| ConnectionRepo::get(c, created.id)).unwrap().unwrap();
        assert_eq!(ended.status, ConnectionStatus::Disconnected);
        assert!(ended.ended_at.is_some());
    }

    #[test]
    fn self_pairing_violates_check() {
        let (db, a, _) = setup();
        let err = db.with_conn(|c| ConnectionRepo::insert_connected(c, &a, &a)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
