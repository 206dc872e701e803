use rusqlite::{Connection, OptionalExtension};
use tracing::instrument;

use tandem_core::models::Message;
use tandem_core::{ConnectionId, MessageId, UserId};

use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, connection_id, sender_id, sender_username, content, timestamp";

pub struct MessageRepo;

impl MessageRepo {
    /// Append a message. The timestamp is clamped so it never precedes the
    /// latest message already stored for the connection.
    #[instrument(skip(conn, sender_username, content), fields(connection_id = %connection_id, sender_id = %sender_id))]
    pub fn append(
        conn: &Connection,
        connection_id: ConnectionId,
        sender_id: UserId,
        sender_username: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let latest = Self::latest_timestamp(conn, connection_id)?;
        let now = row_helpers::now();
        let timestamp = match latest {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        conn.execute(
            "INSERT INTO messages (connection_id, sender_id, sender_username, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                connection_id.get(),
                sender_id.get(),
                sender_username,
                content,
                row_helpers::format_ts(timestamp)
            ],
        )?;

        Ok(Message {
            id: MessageId::from_raw(conn.last_insert_rowid()),
            connection_id,
            sender_id,
            sender_username: sender_username.to_string(),
            content: content.to_string(),
            timestamp,
        })
    }

    fn latest_timestamp(
        conn: &Connection,
        connection_id: ConnectionId,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, StoreError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM messages WHERE connection_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                [connection_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| row_helpers::parse_ts(&r, "messages", "timestamp"))
            .transpose()
    }

    /// A page of messages in ascending order. `offset` counts back from the
    /// most recent message.
    #[instrument(skip(conn), fields(connection_id = %connection_id))]
    pub fn page(
        conn: &Connection,
        connection_id: ConnectionId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM messages WHERE connection_id = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let mut rows = stmt.query(rusqlite::params![connection_id.get(), limit, offset])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_message(row)?);
        }
        results.reverse();
        Ok(results)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        id: MessageId::from_raw(row_helpers::get(row, 0, "messages", "id")?),
        connection_id: ConnectionId::from_raw(row_helpers::get(row, 1, "messages", "connection_id")?),
        sender_id: UserId::from_raw(row_helpers::get(row, 2, "messages", "sender_id")?),
        sender_username: row_helpers::get(row, 3, "messages", "sender_username")?,
        content: row_helpers::get(row, 4, "messages", "content")?,
        timestamp: row_helpers::get_ts(row, 5, "messages", "timestamp")?,
    })
}
