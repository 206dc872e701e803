use rusqlite::Connection;
use tracing::instrument;

use tandem_core::models::{ConnectionRequest, RequestStatus, User};
use tandem_core::{ChatError, RequestId, UserId};

use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, from_user_id, from_username, to_username, status, created_at";

pub struct RequestRepo;

impl RequestRepo {
    /// Insert a pending request. The partial unique index turns a second
    /// pending request for the same pair into `DuplicateRequest`.
    #[instrument(skip(conn, from), fields(from_user_id = %from.id))]
    pub fn create(
        conn: &Connection,
        from: &User,
        to_username: &str,
    ) -> Result<ConnectionRequest, StoreError> {
        let now = row_helpers::now();
        conn.execute(
            "INSERT INTO connection_requests (from_user_id, from_username, to_username, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![
                from.id.get(),
                from.username,
                to_username,
                row_helpers::format_ts(now)
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => ChatError::DuplicateRequest(to_username.to_string()).into(),
            other => other,
        })?;

        Ok(ConnectionRequest {
            id: RequestId::from_raw(conn.last_insert_rowid()),
            from_user_id: from.id,
            from_username: from.username.clone(),
            to_username: to_username.to_string(),
            status: RequestStatus::Pending,
            created_at: now,
        })
    }

    #[instrument(skip(conn), fields(request_id = %id))]
    pub fn get(conn: &Connection, id: RequestId) -> Result<Option<ConnectionRequest>, StoreError> {
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM connection_requests WHERE id = ?1"))?;
        let mut rows = stmt.query([id.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_request(row)?)),
            None => Ok(None),
        }
    }

    pub fn has_pending(
        conn: &Connection,
        from_user_id: UserId,
        to_username: &str,
    ) -> Result<bool, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM connection_requests
             WHERE from_user_id = ?1 AND to_username = ?2 AND status = 'pending'",
            rusqlite::params![from_user_id.get(), to_username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Pending requests addressed to `to_username`, oldest first.
    #[instrument(skip(conn))]
    pub fn pending_for(
        conn: &Connection,
        to_username: &str,
    ) -> Result<Vec<ConnectionRequest>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM connection_requests
             WHERE to_username = ?1 AND status = 'pending'
             ORDER BY created_at ASC, id ASC"
        ))?;
        let mut rows = stmt.query([to_username])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_request(row)?);
        }
        Ok(results)
    }

    /// Move a pending request to a terminal status. Returns rows changed;
    /// zero means it was no longer pending.
    #[instrument(skip(conn), fields(request_id = %id, status = %status))]
    pub fn resolve(
        conn: &Connection,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<usize, StoreError> {
        Ok(conn.execute(
            "UPDATE connection_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![status.to_string(), id.get()],
        )?)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> Result<ConnectionRequest, StoreError> {
    let status: String = row_helpers::get(row, 4, "connection_requests", "status")?;
    Ok(ConnectionRequest {
        id: RequestId::from_raw(row_helpers::get(row, 0, "connection_requests", "id")?),
        from_user_id: UserId::from_raw(row_helpers::get(
            row,
            1,
            "connection_requests",
            "from_user_id",
        )?),
        from_username: row_helpers::get(row, 2, "connection_requests", "from_username")?,
        to_username: row_helpers::get(row, 3, "connection_requests", "to_username")?,
        status: row_helpers::parse_enum(&status, "connection_requests", "status")?,
        created_at: row_helpers::get_ts(row, 5, "connection_requests", "created_at")?,
    })
}
