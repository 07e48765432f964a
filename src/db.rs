use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::models::MailState;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mail_state (
    message_id TEXT NOT NULL,
    state TEXT NOT NULL,
    subject TEXT,
    marked_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (message_id, state)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Add a marker to a message. Marking twice is a no-op.
pub fn mark_state(conn: &Connection, message_id: &str, state: MailState, subject: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO mail_state (message_id, state, subject) VALUES (?1, ?2, ?3)",
        rusqlite::params![message_id, state.as_str(), subject],
    )?;
    Ok(())
}

pub fn states_for(conn: &Connection, message_id: &str) -> Result<BTreeSet<MailState>> {
    let mut stmt = conn.prepare_cached("SELECT state FROM mail_state WHERE message_id = ?1")?;
    let states = stmt
        .query_map([message_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .filter_map(|s| MailState::parse(&s))
        .collect();
    Ok(states)
}

pub fn has_state(conn: &Connection, message_id: &str, state: MailState) -> Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM mail_state WHERE message_id = ?1 AND state = ?2")?;
    Ok(stmt.exists(rusqlite::params![message_id, state.as_str()])?)
}

pub fn count_by_state(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT state, count(*) FROM mail_state GROUP BY state ORDER BY state",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"mail_state".to_string()));
    }

    #[test]
    fn test_connection_pragmas() {
        let (_dir, conn) = test_db();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(mode, "wal");
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 0);
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_mark_state_is_idempotent() {
        let (_dir, conn) = test_db();
        mark_state(&conn, "<a@b>", MailState::Processed, Some("Ordered: thing")).unwrap();
        mark_state(&conn, "<a@b>", MailState::Processed, None).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM mail_state", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_states_are_cumulative() {
        let (_dir, conn) = test_db();
        mark_state(&conn, "m1", MailState::Processed, None).unwrap();
        mark_state(&conn, "m1", MailState::Matched, None).unwrap();
        let states = states_for(&conn, "m1").unwrap();
        assert!(states.contains(&MailState::Processed));
        assert!(states.contains(&MailState::Matched));
        assert!(!states.contains(&MailState::Created));
        assert!(has_state(&conn, "m1", MailState::Matched).unwrap());
        assert!(!has_state(&conn, "m2", MailState::Processed).unwrap());
    }

    #[test]
    fn test_count_by_state() {
        let (_dir, conn) = test_db();
        mark_state(&conn, "m1", MailState::Processed, None).unwrap();
        mark_state(&conn, "m2", MailState::Processed, None).unwrap();
        mark_state(&conn, "m2", MailState::Created, None).unwrap();
        let counts = count_by_state(&conn).unwrap();
        assert_eq!(
            counts,
            vec![("created".to_string(), 1), ("processed".to_string(), 2)]
        );
    }
}
