use anyhow::Result;
use log::warn;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buckets (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT 'new bucket'
);

-- Ids of deleted tasks are never reused; orphaned children keep pointing at a dead id.
CREATE TABLE IF NOT EXISTS tasks (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id  INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
    parent_id  INTEGER NOT NULL DEFAULT -1 CHECK(parent_id >= -1),
    task_order INTEGER NOT NULL DEFAULT 0 CHECK(task_order >= 0),
    content    TEXT NOT NULL DEFAULT '',
    is_checked INTEGER NOT NULL DEFAULT 0 CHECK(is_checked IN (0, 1))
);

CREATE INDEX IF NOT EXISTS tasks_sibling_order ON tasks(bucket_id, parent_id, task_order);

CREATE TRIGGER IF NOT EXISTS tasks_bucket_immutable
BEFORE UPDATE OF bucket_id ON tasks
WHEN NEW.bucket_id != OLD.bucket_id
BEGIN
    SELECT RAISE(ABORT, 'task bucket_id is immutable');
END;
";

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}

/// Run `f` inside `BEGIN IMMEDIATE`, committing on success and rolling back
/// on any error so a multi-row rewrite is applied all-or-nothing.
pub fn with_transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    match f(conn) {
        Ok(v) => {
            conn.execute_batch("COMMIT")?;
            Ok(v)
        }
        Err(e) => {
            warn!("rolling back transaction: {e:#}");
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}
