use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `state` so the
/// paged awaiting-jobs query stays cheap as finished jobs pile up.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            state       TEXT    NOT NULL,   -- kind of the last history entry
            history     TEXT    NOT NULL,   -- JSON array of JobState
            version     INTEGER NOT NULL,   -- optimistic concurrency counter
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- Evaluation paging: WHERE state = 'AWAITING' AND (created_at, id) > (?, ?)
        CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs (state, created_at, id);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'jobs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
