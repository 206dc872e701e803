use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Current time at storage precision, so returned models equal re-read rows.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so that text order is
/// chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

pub fn get_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    parse_ts(&raw, table, column)
}

pub fn get_ts_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    get_opt::<String>(row, idx, table, column)?
        .map(|raw| parse_ts(&raw, table, column))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::models::ConnectionStatus;

    #[test]
    fn parse_enum_success() {
        let status: ConnectionStatus = parse_enum("connected", "connections", "status").unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<ConnectionStatus, _> = parse_enum("INVALID", "connections", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "connections", column: "status", .. })
        ));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:00:00.5Z").unwrap().with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z").unwrap().with_timezone(&Utc);
        assert!(format_ts(early) < format_ts(late));
        assert_eq!(format_ts(late), "2026-01-01T10:00:00.000000Z");
    }

    #[test]
    fn timestamp_roundtrip_and_failure() {
        let now = Utc::now();
        let back = parse_ts(&format_ts(now), "messages", "timestamp").unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
        assert!(matches!(
            parse_ts("yesterday", "messages", "timestamp"),
            Err(StoreError::CorruptRow { column: "timestamp", .. })
        ));
    }
}
