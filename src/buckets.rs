use anyhow::Result;
use log::info;
use rusqlite::{Connection, OptionalExtension};

use crate::model::{Bucket, DEFAULT_BUCKET_NAME};

fn read_bucket_row(row: &rusqlite::Row) -> rusqlite::Result<Bucket> {
    Ok(Bucket {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

pub fn bucket_exists(conn: &Connection, id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM buckets WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_bucket(conn: &Connection, name: Option<&str>) -> Result<Bucket> {
    let name = name.unwrap_or(DEFAULT_BUCKET_NAME);
    conn.execute("INSERT INTO buckets (name) VALUES (?1)", [name])?;
    let id = conn.last_insert_rowid();
    info!("created bucket {id} '{name}'");
    Ok(Bucket {
        id,
        name: name.to_string(),
    })
}

pub fn find_bucket(conn: &Connection, id: i64) -> Result<Option<Bucket>> {
    let bucket = conn
        .query_row(
            "SELECT id, name FROM buckets WHERE id = ?1",
            [id],
            read_bucket_row,
        )
        .optional()?;
    Ok(bucket)
}

/// All buckets in creation order.
pub fn list_buckets(conn: &Connection) -> Result<Vec<Bucket>> {
    let mut stmt = conn.prepare_cached("SELECT id, name FROM buckets ORDER BY id")?;
    let rows = stmt.query_map([], read_bucket_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Returns false if the bucket does not exist.
pub fn rename_bucket(conn: &Connection, id: i64, name: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE buckets SET name = ?1 WHERE id = ?2",
        rusqlite::params![name, id],
    )?;
    if rows > 0 {
        info!("renamed bucket {id} to '{name}'");
    }
    Ok(rows > 0)
}

/// Delete buckets and every task they hold. Returns the number of buckets
/// removed; ids that do not exist are ignored.
pub fn delete_buckets(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let mut removed = 0;
    for &id in ids {
        let tasks = conn.execute("DELETE FROM tasks WHERE bucket_id = ?1", [id])?;
        let rows = conn.execute("DELETE FROM buckets WHERE id = ?1", [id])?;
        if rows > 0 {
            info!("deleted bucket {id} with {tasks} tasks");
        }
        removed += rows;
    }
    Ok(removed)
}
