use std::collections::{HashSet, VecDeque};
use std::fmt;

use anyhow::{bail, Result};
use log::debug;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;

use crate::buckets;
use crate::layout::Layout;
use crate::model::{Task, ROOT_PARENT};
use crate::validate::{is_within_subtree, root_ancestor};

/// Why a structural operation left the forest untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    MissingTask,
    MissingBucket,
    AlreadyRoot,
    AlreadyChild,
    SamePosition,
    IntoOwnSubtree,
    CrossBucket,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingTask => "task not found",
            Self::MissingBucket => "bucket not found",
            Self::AlreadyRoot => "task is already a root task",
            Self::AlreadyChild => "task is already a child",
            Self::SamePosition => "task is already at that position",
            Self::IntoOwnSubtree => "target is inside the moving subtree",
            Self::CrossBucket => "tasks belong to different buckets",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Committed; `rows` is the number of rows inserted, rewritten or deleted.
    Applied { rows: usize },
    Skipped(Skip),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

fn skipped(op: &str, reason: Skip) -> Result<Outcome> {
    debug!("{op}: do nothing, {reason}");
    Ok(Outcome::Skipped(reason))
}

/// What `delete_task` removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// The task and all of its descendants; the sibling group is renumbered.
    #[default]
    Subtree,
    /// Exactly the one row: siblings keep their orders and children are orphaned.
    Row,
}

impl DeletePolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "subtree" => Ok(Self::Subtree),
            "row" => Ok(Self::Row),
            _ => bail!("invalid delete policy '{s}': must be subtree or row"),
        }
    }
}

const TASK_COLUMNS: &str = "id, bucket_id, parent_id, task_order, content, is_checked";

const INSERT_TASK: &str = "
INSERT INTO tasks (bucket_id, parent_id, task_order, content)
VALUES (?1, ?2, ?3, ?4)
";

const SET_PLACEMENT: &str = "
UPDATE tasks
SET parent_id = ?1, task_order = ?2
WHERE id = ?3
";

const SET_CONTENT: &str = "UPDATE tasks SET content = ?1 WHERE id = ?2";

const SET_CHECKED: &str = "UPDATE tasks SET is_checked = ?1 WHERE id = ?2";

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        bucket_id: row.get(1)?,
        parent_id: row.get(2)?,
        task_order: row.get(3)?,
        content: row.get(4)?,
        is_checked: row.get::<_, i64>(5)? != 0,
    })
}

pub fn find_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let task = conn.query_row(&query, [id], read_task_row).optional()?;
    Ok(task)
}

/// All tasks of a bucket in storage order (by parent, then order).
/// Use [`crate::forest`] to put them in display order.
pub fn list_tasks(conn: &Connection, bucket_id: i64) -> Result<Vec<Task>> {
    let query = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE bucket_id = ?1 ORDER BY parent_id, task_order, id"
    );
    let mut stmt = conn.prepare_cached(&query)?;
    let rows = stmt.query_map([bucket_id], read_task_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// The sibling group `(bucket_id, parent_id)`, ordered by `task_order`.
pub fn list_children(conn: &Connection, bucket_id: i64, parent_id: i64) -> Result<Vec<Task>> {
    let query = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE bucket_id = ?1 AND parent_id = ?2 ORDER BY task_order, id"
    );
    let mut stmt = conn.prepare_cached(&query)?;
    let rows = stmt.query_map([bucket_id, parent_id], read_task_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

fn load_group(conn: &Connection, layout: &mut Layout, bucket_id: i64, parent_id: i64) -> Result<()> {
    if !layout.is_loaded(parent_id) {
        layout.load(parent_id, list_children(conn, bucket_id, parent_id)?);
    }
    Ok(())
}

/// Write every changed placement of `layout`. Returns the number of rows written.
fn apply(conn: &Connection, layout: &Layout) -> Result<usize> {
    let placements = layout.placements();
    let mut stmt = conn.prepare_cached(SET_PLACEMENT)?;
    for p in &placements {
        stmt.execute(rusqlite::params![p.parent_id, p.task_order, p.id])?;
    }
    Ok(placements.len())
}

fn position_in(layout: &Layout, parent_id: i64, id: i64) -> Result<usize> {
    match layout.position(parent_id, id) {
        Some(pos) => Ok(pos),
        None => bail!("task {id} is missing from the sibling group under {parent_id}"),
    }
}

/// Create a task as the last root of `bucket_id`.
/// Returns `None` if the bucket does not exist.
pub fn append_task(conn: &Connection, bucket_id: i64, content: &str) -> Result<Option<Task>> {
    if !buckets::bucket_exists(conn, bucket_id)? {
        debug!("append: do nothing, {}", Skip::MissingBucket);
        return Ok(None);
    }
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(task_order) FROM tasks WHERE bucket_id = ?1 AND parent_id = ?2",
        [bucket_id, ROOT_PARENT],
        |row| row.get(0),
    )?;
    let order = last.map_or(0, |o| o + 1);
    conn.execute(
        INSERT_TASK,
        rusqlite::params![bucket_id, ROOT_PARENT, order, content],
    )?;
    find_task(conn, conn.last_insert_rowid())
}

/// Create a task on the line below `reference_id`, outline-editor style:
/// it becomes the first child if the reference has children, otherwise its
/// next sibling. Returns `None` if the reference does not exist.
pub fn insert_task_above(conn: &Connection, reference_id: i64, content: &str) -> Result<Option<Task>> {
    let Some(reference) = find_task(conn, reference_id)? else {
        debug!("insert: do nothing, {}", Skip::MissingTask);
        return Ok(None);
    };
    let bucket_id = reference.bucket_id;

    let mut layout = Layout::new();
    load_group(conn, &mut layout, bucket_id, reference.id)?;
    let (parent_id, index) = if layout.group(reference.id).is_empty() {
        load_group(conn, &mut layout, bucket_id, reference.parent_id)?;
        let pos = position_in(&layout, reference.parent_id, reference.id)?;
        (reference.parent_id, pos + 1)
    } else {
        (reference.id, 0)
    };

    // Provisionally at the end of the group; placed by the layout below.
    let provisional = layout.group(parent_id).len() as i64;
    conn.execute(
        INSERT_TASK,
        rusqlite::params![bucket_id, parent_id, provisional, content],
    )?;
    let id = conn.last_insert_rowid();
    layout.insert(parent_id, index, &[id])?;
    let rows = apply(conn, &layout)?;
    debug!("insert {id} below {reference_id}: {rows} rows placed");
    find_task(conn, id)
}

pub fn update_task_content(conn: &Connection, id: i64, content: &str) -> Result<Outcome> {
    let rows = conn.execute(SET_CONTENT, rusqlite::params![content, id])?;
    if rows == 0 {
        return skipped("update content", Skip::MissingTask);
    }
    Ok(Outcome::Applied { rows })
}

pub fn update_task_checked(conn: &Connection, id: i64, is_checked: bool) -> Result<Outcome> {
    let rows = conn.execute(SET_CHECKED, rusqlite::params![is_checked, id])?;
    if rows == 0 {
        return skipped("update checked", Skip::MissingTask);
    }
    Ok(Outcome::Applied { rows })
}

fn collect_descendants(conn: &Connection, bucket_id: i64, id: i64) -> Result<Vec<i64>> {
    let mut result = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        let mut stmt =
            conn.prepare_cached("SELECT id FROM tasks WHERE bucket_id = ?1 AND parent_id = ?2")?;
        let children: Vec<i64> = stmt
            .query_map([bucket_id, current], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for child in children {
            if seen.insert(child) {
                result.push(child);
                queue.push_back(child);
            }
        }
    }
    Ok(result)
}

pub fn delete_task(conn: &Connection, id: i64, policy: DeletePolicy) -> Result<Outcome> {
    let Some(task) = find_task(conn, id)? else {
        return skipped("delete", Skip::MissingTask);
    };

    match policy {
        DeletePolicy::Row => {
            let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            Ok(Outcome::Applied { rows })
        }
        DeletePolicy::Subtree => {
            let descendants = collect_descendants(conn, task.bucket_id, id)?;
            let mut layout = Layout::new();
            load_group(conn, &mut layout, task.bucket_id, task.parent_id)?;
            layout.remove(task.parent_id, id)?;

            let mut stmt = conn.prepare_cached("DELETE FROM tasks WHERE id = ?1")?;
            for desc in descendants.iter().rev() {
                stmt.execute([desc])?;
            }
            stmt.execute([id])?;
            let shifted = apply(conn, &layout)?;
            debug!(
                "delete {id}: {} descendants removed, {shifted} siblings renumbered",
                descendants.len()
            );
            Ok(Outcome::Applied {
                rows: descendants.len() + 1 + shifted,
            })
        }
    }
}

/// Approximate vertical position used to tell "moving up" from "moving
/// down" across parents: a root's own order, else its parent's order.
fn order_key(conn: &Connection, task: &Task) -> Result<i64> {
    if task.is_root() {
        return Ok(task.task_order);
    }
    Ok(find_task(conn, task.parent_id)?.map_or(-1, |p| p.task_order))
}

/// Drag-and-drop: move `from_id` to the slot currently held by `to_id`.
///
/// Within one sibling group this is a plain reorder. Across groups the
/// moved block is `from` followed by its direct children, all placed as
/// consecutive siblings under the new parent:
/// - moving up: the block takes `to`'s slot, `to` and later siblings shift;
/// - moving down onto a task with children: the block becomes its first children;
/// - moving down onto a leaf: the block goes right after it.
///
/// The group `from` left is renumbered so it stays gapless.
pub fn reorder_task(conn: &Connection, from_id: i64, to_id: i64) -> Result<Outcome> {
    let (Some(from), Some(to)) = (find_task(conn, from_id)?, find_task(conn, to_id)?) else {
        return skipped("reorder", Skip::MissingTask);
    };
    if from.bucket_id != to.bucket_id {
        return skipped("reorder", Skip::CrossBucket);
    }
    if from.parent_id == to.parent_id && from.task_order == to.task_order {
        return skipped("reorder", Skip::SamePosition);
    }
    if is_within_subtree(conn, to.id, from.id)? {
        return skipped("reorder", Skip::IntoOwnSubtree);
    }

    let bucket_id = from.bucket_id;
    let mut layout = Layout::new();

    if from.parent_id == to.parent_id {
        load_group(conn, &mut layout, bucket_id, from.parent_id)?;
        let target = position_in(&layout, to.parent_id, to.id)?;
        layout.remove(from.parent_id, from.id)?;
        layout.insert(to.parent_id, target, &[from.id])?;
    } else {
        let moving_up = order_key(conn, &from)? >= order_key(conn, &to)?;

        load_group(conn, &mut layout, bucket_id, from.parent_id)?;
        load_group(conn, &mut layout, bucket_id, from.id)?;
        layout.remove(from.parent_id, from.id)?;
        let mut block = vec![from.id];
        block.extend(layout.take(from.id)?);

        if moving_up {
            load_group(conn, &mut layout, bucket_id, to.parent_id)?;
            let at = position_in(&layout, to.parent_id, to.id)?;
            layout.insert(to.parent_id, at, &block)?;
        } else {
            load_group(conn, &mut layout, bucket_id, to.id)?;
            if layout.group(to.id).is_empty() {
                load_group(conn, &mut layout, bucket_id, to.parent_id)?;
                let at = position_in(&layout, to.parent_id, to.id)? + 1;
                layout.insert(to.parent_id, at, &block)?;
            } else {
                layout.insert(to.id, 0, &block)?;
            }
        }
    }

    let rows = apply(conn, &layout)?;
    debug!("reorder {from_id} -> {to_id}: {rows} rows rewritten");
    Ok(Outcome::Applied { rows })
}

/// Un-indent a task to root level, right after the root its former parent
/// hangs under. Its former younger siblings become its last children.
///
/// ```text
/// A           A
/// -B          -B
/// -C   =>     C
/// -D          -D
/// E           E
/// ```
pub fn promote_to_root(conn: &Connection, id: i64) -> Result<Outcome> {
    let Some(task) = find_task(conn, id)? else {
        return skipped("promote", Skip::MissingTask);
    };
    if task.is_root() {
        return skipped("promote", Skip::AlreadyRoot);
    }
    let Some(parent) = find_task(conn, task.parent_id)? else {
        return skipped("promote", Skip::MissingTask);
    };
    let Some(anchor) = root_ancestor(conn, parent.id)? else {
        return skipped("promote", Skip::MissingTask);
    };

    let bucket_id = task.bucket_id;
    let mut layout = Layout::new();
    load_group(conn, &mut layout, bucket_id, parent.id)?;
    load_group(conn, &mut layout, bucket_id, task.id)?;
    load_group(conn, &mut layout, bucket_id, ROOT_PARENT)?;

    let pos = position_in(&layout, parent.id, task.id)?;
    let younger = layout.split_off(parent.id, pos + 1)?;
    layout.remove(parent.id, task.id)?;
    let end = layout.group(task.id).len();
    layout.insert(task.id, end, &younger)?;

    let at = position_in(&layout, ROOT_PARENT, anchor)? + 1;
    layout.insert(ROOT_PARENT, at, &[task.id])?;

    let rows = apply(conn, &layout)?;
    debug!("promote {id}: {rows} rows rewritten");
    Ok(Outcome::Applied { rows })
}

/// Indent a root task under the task displayed above it. If that task is a
/// root, this one becomes its first child; otherwise its next sibling.
/// The task's own children follow it as consecutive siblings.
///
/// ```text
/// A           A            A           A
/// B           B            -B          -B
/// C    =>     -C           C    =>     -C
/// -D          -D           -D          -D
/// ```
pub fn demote_to_child(conn: &Connection, id: i64, above_id: i64) -> Result<Outcome> {
    let (Some(task), Some(above)) = (find_task(conn, id)?, find_task(conn, above_id)?) else {
        return skipped("demote", Skip::MissingTask);
    };
    if !task.is_root() {
        return skipped("demote", Skip::AlreadyChild);
    }
    if task.id == above.id {
        return skipped("demote", Skip::SamePosition);
    }
    if task.bucket_id != above.bucket_id {
        return skipped("demote", Skip::CrossBucket);
    }
    if is_within_subtree(conn, above.id, task.id)? {
        return skipped("demote", Skip::IntoOwnSubtree);
    }

    let bucket_id = task.bucket_id;
    let mut layout = Layout::new();
    load_group(conn, &mut layout, bucket_id, ROOT_PARENT)?;
    load_group(conn, &mut layout, bucket_id, task.id)?;
    layout.remove(ROOT_PARENT, task.id)?;
    let mut block = vec![task.id];
    block.extend(layout.take(task.id)?);

    if above.is_root() {
        load_group(conn, &mut layout, bucket_id, above.id)?;
        layout.insert(above.id, 0, &block)?;
    } else {
        load_group(conn, &mut layout, bucket_id, above.parent_id)?;
        let at = position_in(&layout, above.parent_id, above.id)? + 1;
        layout.insert(above.parent_id, at, &block)?;
    }

    let rows = apply(conn, &layout)?;
    debug!("demote {id} below {above_id}: {rows} rows rewritten");
    Ok(Outcome::Applied { rows })
}
