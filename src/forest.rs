//! Depth-first linearization of a bucket's parent-pointer rows.
//!
//! Rows arrive in storage order. [`Forest`] indexes them by parent once and
//! hands out preorder walks over the roots: every task is followed by its
//! children (sorted by `task_order`) before its next sibling. Tasks whose
//! parent is not in the set are never reached, so orphans are left out.

use std::collections::HashMap;

use crate::model::{Task, ROOT_PARENT};

/// Children-by-parent index over one bucket's rows.
pub struct Forest<'a> {
    children: HashMap<i64, Vec<&'a Task>>,
}

/// One step of a preorder walk.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    pub task: &'a Task,
    pub depth: usize,
}

impl<'a> Forest<'a> {
    pub fn new(tasks: &'a [Task]) -> Self {
        let mut children: HashMap<i64, Vec<&'a Task>> = HashMap::new();
        for task in tasks {
            children.entry(task.parent_id).or_default().push(task);
        }
        for group in children.values_mut() {
            group.sort_by_key(|t| (t.task_order, t.id));
        }
        Forest { children }
    }

    pub fn roots(&self) -> &[&'a Task] {
        self.children(ROOT_PARENT)
    }

    pub fn children(&self, parent_id: i64) -> &[&'a Task] {
        self.children
            .get(&parent_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// A fresh preorder walk; call again to restart.
    pub fn preorder(&self) -> Preorder<'_, 'a> {
        Preorder {
            forest: self,
            stack: vec![self.roots().iter()],
        }
    }
}

pub struct Preorder<'f, 'a> {
    forest: &'f Forest<'a>,
    stack: Vec<std::slice::Iter<'f, &'a Task>>,
}

impl<'f, 'a> Iterator for Preorder<'f, 'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Node<'a>> {
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            match self.stack[depth].next() {
                Some(&task) => {
                    let children = self.forest.children(task.id);
                    if !children.is_empty() {
                        self.stack.push(children.iter());
                    }
                    return Some(Node { task, depth });
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Collect the linearized task sequence for `tasks`.
pub fn linearize(tasks: &[Task]) -> Vec<&Task> {
    Forest::new(tasks).preorder().map(|n| n.task).collect()
}
