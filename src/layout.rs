//! Sibling-group editing for structural operations.
//!
//! A [`Layout`] holds the sibling groups an operation touches, each as the
//! ordered list of task ids loaded from storage. Operations remove and
//! insert ids in those lists; [`Layout::placements`] then reports every task
//! whose `(parent_id, task_order)` differs from what was loaded, with the
//! order taken as the index in its group. Every group written back is thus
//! numbered `0..n-1`.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};

use crate::model::Task;

/// New position for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub id: i64,
    pub parent_id: i64,
    pub task_order: i64,
}

#[derive(Debug, Default)]
pub struct Layout {
    groups: BTreeMap<i64, Vec<i64>>,
    loaded: HashMap<i64, (i64, i64)>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, parent_id: i64) -> bool {
        self.groups.contains_key(&parent_id)
    }

    /// Register the members of `parent_id`'s group, sorted by `task_order`.
    pub fn load(&mut self, parent_id: i64, mut tasks: Vec<Task>) {
        tasks.sort_by_key(|t| (t.task_order, t.id));
        let ids = tasks
            .iter()
            .map(|t| {
                self.loaded.insert(t.id, (t.parent_id, t.task_order));
                t.id
            })
            .collect();
        self.groups.insert(parent_id, ids);
    }

    pub fn group(&self, parent_id: i64) -> &[i64] {
        self.groups
            .get(&parent_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn position(&self, parent_id: i64, id: i64) -> Option<usize> {
        self.group(parent_id).iter().position(|&x| x == id)
    }

    fn group_mut(&mut self, parent_id: i64) -> Result<&mut Vec<i64>> {
        match self.groups.get_mut(&parent_id) {
            Some(g) => Ok(g),
            None => bail!("sibling group under {parent_id} was not loaded"),
        }
    }

    /// Remove `id` from `parent_id`'s group. Returns false if it was absent.
    pub fn remove(&mut self, parent_id: i64, id: i64) -> Result<bool> {
        let group = self.group_mut(parent_id)?;
        match group.iter().position(|&x| x == id) {
            Some(pos) => {
                group.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove and return every member of `parent_id`'s group.
    pub fn take(&mut self, parent_id: i64) -> Result<Vec<i64>> {
        Ok(std::mem::take(self.group_mut(parent_id)?))
    }

    /// Remove and return the members after position `index`.
    pub fn split_off(&mut self, parent_id: i64, index: usize) -> Result<Vec<i64>> {
        let group = self.group_mut(parent_id)?;
        let at = index.min(group.len());
        Ok(group.split_off(at))
    }

    /// Insert `ids` as a contiguous block at `index` (clamped to the group end).
    pub fn insert(&mut self, parent_id: i64, index: usize, ids: &[i64]) -> Result<()> {
        let group = self.group_mut(parent_id)?;
        let at = index.min(group.len());
        group.splice(at..at, ids.iter().copied());
        Ok(())
    }

    /// Every task whose position changed since loading. Ids that were never
    /// loaded (freshly inserted rows) are always reported.
    pub fn placements(&self) -> Vec<Placement> {
        let mut out = Vec::new();
        for (&parent_id, ids) in &self.groups {
            for (order, &id) in ids.iter().enumerate() {
                let task_order = order as i64;
                if self.loaded.get(&id) != Some(&(parent_id, task_order)) {
                    out.push(Placement {
                        id,
                        parent_id,
                        task_order,
                    });
                }
            }
        }
        out
    }
}
