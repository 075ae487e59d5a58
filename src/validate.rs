use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{bail, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::model::Task;

/// True if `ancestor_id` appears on the parent chain of `task_id`
/// (or is `task_id` itself). Moving `ancestor_id` relative to such a task
/// would make it its own ancestor.
///
/// The walk is bounded by the number of tasks in the table; a longer chain
/// means the stored parent pointers already contain a cycle.
pub fn is_within_subtree(conn: &Connection, task_id: i64, ancestor_id: i64) -> Result<bool> {
    if task_id == ancestor_id {
        return Ok(true);
    }
    let limit: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
    let mut current = task_id;
    for _ in 0..=limit {
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_id FROM tasks WHERE id = ?1",
                [current],
                |row| row.get(0),
            )
            .optional()?;
        match parent {
            Some(p) if p == ancestor_id => return Ok(true),
            Some(p) if p >= 0 => current = p,
            _ => return Ok(false),
        }
    }
    bail!("parent chain of task {task_id} does not terminate");
}

/// Walk up from `task_id` to the root-level task it hangs under.
/// Returns `None` if the chain ends at a missing parent.
pub fn root_ancestor(conn: &Connection, task_id: i64) -> Result<Option<i64>> {
    let limit: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
    let mut current = task_id;
    for _ in 0..=limit {
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_id FROM tasks WHERE id = ?1",
                [current],
                |row| row.get(0),
            )
            .optional()?;
        match parent {
            Some(p) if p < 0 => return Ok(Some(current)),
            Some(p) => current = p,
            None => return Ok(None),
        }
    }
    bail!("parent chain of task {task_id} does not terminate");
}

/// A broken forest invariant found by [`check_forest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The sibling group's orders are not exactly `0..n-1`.
    OrderGap { parent_id: i64, orders: Vec<i64> },
    /// The parent is not a task of the same bucket.
    MissingParent { id: i64, parent_id: i64 },
    /// Following parents from this task never reaches a root.
    Cycle { id: i64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderGap { parent_id, orders } => {
                write!(f, "sibling group under {parent_id} has orders {orders:?}")
            }
            Self::MissingParent { id, parent_id } => {
                write!(f, "task {id} points at missing parent {parent_id}")
            }
            Self::Cycle { id } => write!(f, "task {id} is its own ancestor"),
        }
    }
}

/// Check one bucket's rows against the forest invariants: gapless
/// per-parent ordering, parents inside the bucket, and no cycles.
pub fn check_forest(tasks: &[Task]) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.parent_id).or_default().push(task.task_order);
    }
    for (parent_id, mut orders) in groups {
        orders.sort_unstable();
        let gapless = orders.iter().enumerate().all(|(i, &o)| o == i as i64);
        if !gapless {
            violations.push(Violation::OrderGap { parent_id, orders });
        }
    }

    let parents: HashMap<i64, i64> = tasks.iter().map(|t| (t.id, t.parent_id)).collect();
    for task in tasks {
        if task.parent_id >= 0 && !parents.contains_key(&task.parent_id) {
            violations.push(Violation::MissingParent {
                id: task.id,
                parent_id: task.parent_id,
            });
        }
    }
    for task in tasks {
        let mut current = task.parent_id;
        let mut steps = 0;
        while current >= 0 && steps <= tasks.len() {
            match parents.get(&current) {
                Some(&p) => current = p,
                None => break,
            }
            steps += 1;
        }
        if steps > tasks.len() {
            violations.push(Violation::Cycle { id: task.id });
        }
    }

    violations
}
