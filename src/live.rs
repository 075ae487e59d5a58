//! Reactive read model.
//!
//! Every committed write publishes a [`Change`] on the store's
//! [`ChangeBus`]. Feeds subscribe to the bus, and on each relevant change
//! re-read their rows and rebuild the display sequence. A [`DragSession`]
//! is the second input of a task feed: while a task is being dragged its
//! descendants are reported as not visible.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::forest::Forest;
use crate::model::{check_icon, Bucket, Task};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Buckets,
    Tasks { bucket_id: i64 },
    Drag,
    /// The database was modified by another process.
    External,
}

/// Fan-out of change notifications, in publication order.
/// Dropping a receiver unsubscribes it at the next publication.
#[derive(Debug, Default)]
pub struct ChangeBus {
    subscribers: Mutex<Vec<Sender<Change>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Change> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, change: Change) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(change).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The task currently being dragged in one UI session.
#[derive(Debug)]
pub struct DragSession {
    moving: Mutex<Option<i64>>,
    bus: Arc<ChangeBus>,
}

impl DragSession {
    pub fn new(bus: Arc<ChangeBus>) -> Self {
        DragSession {
            moving: Mutex::new(None),
            bus,
        }
    }

    pub fn start(&self, task_id: i64) {
        *self.moving.lock().unwrap_or_else(PoisonError::into_inner) = Some(task_id);
        self.bus.publish(Change::Drag);
    }

    /// Clear the drag, but only if `task_id` is the task being dragged.
    pub fn end(&self, task_id: i64) {
        let mut moving = self.moving.lock().unwrap_or_else(PoisonError::into_inner);
        if *moving == Some(task_id) {
            *moving = None;
            drop(moving);
            self.bus.publish(Change::Drag);
        }
    }

    pub fn moving(&self) -> Option<i64> {
        *self.moving.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A task as the UI shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub bucket_id: i64,
    pub content: String,
    pub is_checked: bool,
    pub is_child: bool,
    pub depth: usize,
    pub is_visible: bool,
}

impl TaskRow {
    pub fn icon(&self) -> &'static str {
        check_icon(self.is_checked)
    }
}

/// Linearize `tasks` and hide everything below the task being moved.
pub fn annotate(tasks: &[Task], moving: Option<i64>) -> Vec<TaskRow> {
    let forest = Forest::new(tasks);
    let mut hidden_below: Option<usize> = None;
    let mut rows = Vec::with_capacity(tasks.len());

    for node in forest.preorder() {
        let is_visible = match hidden_below {
            Some(depth) if node.depth > depth => false,
            _ => {
                hidden_below = None;
                true
            }
        };
        if moving == Some(node.task.id) {
            hidden_below = Some(node.depth);
        }
        rows.push(TaskRow {
            id: node.task.id,
            bucket_id: node.task.bucket_id,
            content: node.task.content.clone(),
            is_checked: node.task.is_checked,
            is_child: !node.task.is_root(),
            depth: node.depth,
            is_visible,
        });
    }
    rows
}

/// Block until `relevant` matches a change, then swallow whatever else is
/// already queued so a burst of commits costs one re-read.
/// Returns false on timeout or when the bus is gone.
fn wait_relevant(
    rx: &Receiver<Change>,
    timeout: Option<Duration>,
    relevant: impl Fn(Change) -> bool,
) -> bool {
    loop {
        let change = match timeout {
            Some(t) => match rx.recv_timeout(t) {
                Ok(c) => c,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            },
            None => match rx.recv() {
                Ok(c) => c,
                Err(_) => return false,
            },
        };
        if relevant(change) {
            while rx.try_recv().is_ok() {}
            return true;
        }
    }
}

/// Live, display-ordered view of one bucket's tasks.
///
/// As an iterator it yields the current rows first, then a fresh snapshot
/// after every relevant change.
pub struct TaskFeed {
    store: Arc<Store>,
    bucket_id: i64,
    session: Arc<DragSession>,
    rx: Receiver<Change>,
    primed: bool,
}

impl TaskFeed {
    pub fn new(store: Arc<Store>, bucket_id: i64, session: Arc<DragSession>) -> Self {
        let rx = store.bus().subscribe();
        TaskFeed {
            store,
            bucket_id,
            session,
            rx,
            primed: false,
        }
    }

    pub fn bucket_id(&self) -> i64 {
        self.bucket_id
    }

    pub fn snapshot(&self) -> Result<Vec<TaskRow>> {
        let tasks = self.store.tasks(self.bucket_id)?;
        Ok(annotate(&tasks, self.session.moving()))
    }

    fn is_relevant(&self, change: Change) -> bool {
        match change {
            Change::Tasks { bucket_id } => bucket_id == self.bucket_id,
            Change::Drag | Change::External => true,
            Change::Buckets => false,
        }
    }

    /// Wait up to `timeout` for a relevant change. `None` means nothing changed.
    pub fn poll(&mut self, timeout: Duration) -> Option<Result<Vec<TaskRow>>> {
        if !self.primed {
            self.primed = true;
            return Some(self.snapshot());
        }
        if wait_relevant(&self.rx, Some(timeout), |c| self.is_relevant(c)) {
            Some(self.snapshot())
        } else {
            None
        }
    }
}

impl Iterator for TaskFeed {
    type Item = Result<Vec<TaskRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            return Some(self.snapshot());
        }
        if wait_relevant(&self.rx, None, |c| self.is_relevant(c)) {
            Some(self.snapshot())
        } else {
            None
        }
    }
}

/// Live list of buckets.
pub struct BucketFeed {
    store: Arc<Store>,
    rx: Receiver<Change>,
    primed: bool,
}

impl BucketFeed {
    pub fn new(store: Arc<Store>) -> Self {
        let rx = store.bus().subscribe();
        BucketFeed {
            store,
            rx,
            primed: false,
        }
    }

    fn is_relevant(change: Change) -> bool {
        matches!(change, Change::Buckets | Change::External)
    }

    pub fn poll(&mut self, timeout: Duration) -> Option<Result<Vec<Bucket>>> {
        if !self.primed {
            self.primed = true;
            return Some(self.store.buckets());
        }
        if wait_relevant(&self.rx, Some(timeout), Self::is_relevant) {
            Some(self.store.buckets())
        } else {
            None
        }
    }
}

impl Iterator for BucketFeed {
    type Item = Result<Vec<Bucket>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            return Some(self.store.buckets());
        }
        if wait_relevant(&self.rx, None, Self::is_relevant) {
            Some(self.store.buckets())
        } else {
            None
        }
    }
}
