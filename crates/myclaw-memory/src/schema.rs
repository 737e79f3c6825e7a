use rusqlite::Connection;

use crate::error::{MemoryError, Result};

/// Current schema version, stored in SQLite's `user_version` pragma.
pub const SCHEMA_VERSION: i32 = 1;

/// Open (or create) the memory database with the pragmas §4.4 requires:
/// WAL journal mode, a 5s busy timeout, and foreign keys on.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    migrate(&conn)?;
    Ok(conn)
}

/// Open a read-only connection to the same database file. Readers never
/// block on the write mutex (§5 "Memory writes block on the engine mutex;
/// reads are lock-free") because they hold an entirely separate connection
/// object; WAL mode lets them run concurrently with the writer.
pub fn open_reader(path: &str) -> Result<Connection> {
    use rusqlite::OpenFlags;
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(conn)
}

/// Forward-only migration: each step checks the columns it expects exist
/// before advancing `user_version` (§4.4).
fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        create_v1(conn)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    verify_v1_columns(conn)?;
    Ok(())
}

fn create_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            tier                INTEGER NOT NULL,
            project             TEXT NOT NULL DEFAULT '_global',
            topic               TEXT NOT NULL DEFAULT '_general',
            category            TEXT NOT NULL,
            content             TEXT NOT NULL,
            importance          REAL NOT NULL DEFAULT 0.5,
            source              TEXT NOT NULL DEFAULT '',
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            last_accessed       INTEGER NOT NULL,
            access_count        INTEGER NOT NULL DEFAULT 0,
            is_archived         INTEGER NOT NULL DEFAULT 0,
            embedding           BLOB,
            embedding_model     TEXT,
            embedding_dim       INTEGER NOT NULL DEFAULT 0,
            embedding_updated_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_memories_tier_project_topic_archived
            ON memories(tier, project, topic, is_archived);
        CREATE INDEX IF NOT EXISTS idx_memories_category_last_accessed
            ON memories(category, last_accessed);
        CREATE INDEX IF NOT EXISTS idx_memories_created_at
            ON memories(created_at);

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(content, content='memories', content_rowid='id');

        CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', old.id, old.content);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', old.id, old.content);
            INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
        END;

        CREATE TABLE IF NOT EXISTS daily_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_date      TEXT NOT NULL,
            channel         TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            summary         TEXT NOT NULL,
            raw_tokens      INTEGER NOT NULL DEFAULT 0,
            is_compressed   INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_daily_events_date_compressed
            ON daily_events(event_date, is_compressed);

        CREATE TABLE IF NOT EXISTS extraction_buffer (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel         TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            token_count     REAL NOT NULL,
            created_at      INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn verify_v1_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id, tier, project, topic, category, content, importance, source, created_at, updated_at, last_accessed, access_count, is_archived, embedding, embedding_model, embedding_dim FROM memories LIMIT 0")?;
    stmt.query([])?.next()?;
    conn.prepare("SELECT id, event_date, channel, sender_id, summary, raw_tokens, is_compressed, created_at FROM daily_events LIMIT 0")
        .map_err(|e| MemoryError::Migration(e.to_string()))?;
    conn.prepare("SELECT id, channel, sender_id, role, content, token_count, created_at FROM extraction_buffer LIMIT 0")
        .map_err(|e| MemoryError::Migration(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let path = path.to_str().unwrap();

        let conn = open(path).unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        drop(conn);

        // Reopening must not error or reset state.
        let conn2 = open(path).unwrap();
        let version2: i32 = conn2.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version2, SCHEMA_VERSION);
    }

    #[test]
    fn fts_trigger_keeps_index_synchronized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let conn = open(path.to_str().unwrap()).unwrap();

        conn.execute(
            "INSERT INTO memories (tier, project, topic, category, content, importance, source, created_at, updated_at, last_accessed)
             VALUES (2, '_global', '_general', 'event', 'hotfix rollout note', 0.5, 'test', 0, 0, 0)",
            [],
        ).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories_fts WHERE memories_fts MATCH 'hotfix'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
