//! Serialized, transactional front door to the task database.
//!
//! A [`Store`] owns the one connection. Each write runs in its own
//! `BEGIN IMMEDIATE` transaction under the connection lock, so structural
//! operations never interleave, and publishes its [`Change`] after commit
//! while still holding the lock. Subscribers therefore see changes in
//! commit order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::buckets;
use crate::db;
use crate::live::{BucketFeed, Change, ChangeBus, DragSession, TaskFeed};
use crate::model::{Bucket, Task};
use crate::ops::{self, DeletePolicy, Outcome};
use crate::validate::{self, Violation};

pub struct Store {
    conn: Mutex<Connection>,
    bus: Arc<ChangeBus>,
    writers: AtomicUsize,
    delete_policy: DeletePolicy,
}

/// Marks a write in progress for as long as it lives, including when the
/// write fails.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(writers: &'a AtomicUsize) -> Self {
        writers.fetch_add(1, Ordering::SeqCst);
        BusyGuard(writers)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Store {
    pub fn from_connection(conn: Connection) -> Self {
        Store {
            conn: Mutex::new(conn),
            bus: Arc::new(ChangeBus::new()),
            writers: AtomicUsize::new(0),
            delete_policy: DeletePolicy::default(),
        }
    }

    /// Open (and initialize if needed) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = db::open(path)?;
        db::init(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(db::open_memory()?))
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    /// True while any write is queued on the connection or running.
    pub fn is_writing(&self) -> bool {
        self.writers.load(Ordering::SeqCst) > 0
    }

    pub fn drag_session(&self) -> Arc<DragSession> {
        Arc::new(DragSession::new(Arc::clone(&self.bus)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<(T, Vec<Change>)>) -> Result<T> {
        let _busy = BusyGuard::enter(&self.writers);
        let conn = self.lock()?;
        let (value, changes) = db::with_transaction(&conn, f)?;
        for change in changes {
            self.bus.publish(change);
        }
        Ok(value)
    }

    /// Run a task-level operation and announce its bucket if it applied.
    fn edit_task(
        &self,
        id: i64,
        op: impl FnOnce(&Connection) -> Result<Outcome>,
    ) -> Result<Outcome> {
        self.write(|conn| {
            let bucket_id = ops::find_task(conn, id)?.map(|t| t.bucket_id);
            let outcome = op(conn)?;
            let changes = match bucket_id {
                Some(bucket_id) if outcome.is_applied() => vec![Change::Tasks { bucket_id }],
                _ => Vec::new(),
            };
            Ok((outcome, changes))
        })
    }

    fn created(task: Option<Task>) -> (Option<Task>, Vec<Change>) {
        let changes = task
            .iter()
            .map(|t| Change::Tasks {
                bucket_id: t.bucket_id,
            })
            .collect();
        (task, changes)
    }

    // Buckets

    pub fn buckets_live(self: &Arc<Self>) -> BucketFeed {
        BucketFeed::new(Arc::clone(self))
    }

    pub fn buckets(&self) -> Result<Vec<Bucket>> {
        self.read(buckets::list_buckets)
    }

    pub fn bucket(&self, id: i64) -> Result<Option<Bucket>> {
        self.read(|conn| buckets::find_bucket(conn, id))
    }

    pub fn create_bucket(&self, name: Option<&str>) -> Result<Bucket> {
        self.write(|conn| Ok((buckets::create_bucket(conn, name)?, vec![Change::Buckets])))
    }

    pub fn rename_bucket(&self, id: i64, name: &str) -> Result<bool> {
        self.write(|conn| {
            let renamed = buckets::rename_bucket(conn, id, name)?;
            let changes = if renamed { vec![Change::Buckets] } else { Vec::new() };
            Ok((renamed, changes))
        })
    }

    pub fn delete_bucket(&self, id: i64) -> Result<bool> {
        Ok(self.delete_buckets(&[id])? > 0)
    }

    pub fn delete_buckets(&self, ids: &[i64]) -> Result<usize> {
        self.write(|conn| {
            let removed = buckets::delete_buckets(conn, ids)?;
            let mut changes = Vec::new();
            if removed > 0 {
                changes.push(Change::Buckets);
                changes.extend(ids.iter().map(|&bucket_id| Change::Tasks { bucket_id }));
            }
            Ok((removed, changes))
        })
    }

    // Tasks

    pub fn tasks_live(self: &Arc<Self>, bucket_id: i64, session: Arc<DragSession>) -> TaskFeed {
        TaskFeed::new(Arc::clone(self), bucket_id, session)
    }

    /// Raw rows of one bucket in storage order.
    pub fn tasks(&self, bucket_id: i64) -> Result<Vec<Task>> {
        self.read(|conn| ops::list_tasks(conn, bucket_id))
    }

    pub fn task(&self, id: i64) -> Result<Option<Task>> {
        self.read(|conn| ops::find_task(conn, id))
    }

    pub fn append_task(&self, bucket_id: i64, content: &str) -> Result<Option<Task>> {
        self.write(|conn| Ok(Self::created(ops::append_task(conn, bucket_id, content)?)))
    }

    pub fn insert_task_above(&self, reference_id: i64, content: &str) -> Result<Option<Task>> {
        self.write(|conn| {
            Ok(Self::created(ops::insert_task_above(
                conn,
                reference_id,
                content,
            )?))
        })
    }

    pub fn update_task_content(&self, id: i64, content: &str) -> Result<Outcome> {
        self.edit_task(id, |conn| ops::update_task_content(conn, id, content))
    }

    pub fn update_task_checked(&self, id: i64, is_checked: bool) -> Result<Outcome> {
        self.edit_task(id, |conn| ops::update_task_checked(conn, id, is_checked))
    }

    pub fn delete_task(&self, id: i64) -> Result<Outcome> {
        let policy = self.delete_policy;
        self.edit_task(id, |conn| ops::delete_task(conn, id, policy))
    }

    pub fn reorder_task(&self, from_id: i64, to_id: i64) -> Result<Outcome> {
        self.edit_task(from_id, |conn| ops::reorder_task(conn, from_id, to_id))
    }

    pub fn promote_to_root(&self, id: i64) -> Result<Outcome> {
        self.edit_task(id, |conn| ops::promote_to_root(conn, id))
    }

    pub fn demote_to_child(&self, id: i64, above_id: i64) -> Result<Outcome> {
        self.edit_task(id, |conn| ops::demote_to_child(conn, id, above_id))
    }

    /// Forest invariant violations in one bucket.
    pub fn check(&self, bucket_id: i64) -> Result<Vec<Violation>> {
        let tasks = self.tasks(bucket_id)?;
        Ok(validate::check_forest(&tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn setup() -> (Store, i64) {
        let store = Store::open_memory().unwrap();
        let bucket = store.create_bucket(Some("b")).unwrap();
        (store, bucket.id)
    }

    #[test]
    fn applied_writes_publish_bucket_change() {
        let (store, bucket) = setup();
        let rx = store.bus().subscribe();
        let a = store.append_task(bucket, "a").unwrap().unwrap();
        store.update_task_checked(a.id, true).unwrap();
        let changes: Vec<Change> = rx.try_iter().collect();
        assert_eq!(
            changes,
            vec![
                Change::Tasks { bucket_id: bucket },
                Change::Tasks { bucket_id: bucket }
            ]
        );
    }

    #[test]
    fn skipped_writes_publish_nothing() {
        let (store, bucket) = setup();
        let a = store.append_task(bucket, "a").unwrap().unwrap();
        let rx = store.bus().subscribe();
        assert!(!store.promote_to_root(a.id).unwrap().is_applied());
        assert!(!store.update_task_content(999, "x").unwrap().is_applied());
        assert!(store.append_task(999, "x").unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bucket_writes_publish_bucket_list_change() {
        let store = Store::open_memory().unwrap();
        let rx = store.bus().subscribe();
        let b = store.create_bucket(None).unwrap();
        assert!(store.rename_bucket(b.id, "x").unwrap());
        assert!(!store.rename_bucket(999, "x").unwrap());
        assert!(store.delete_bucket(b.id).unwrap());
        let changes: Vec<Change> = rx.try_iter().collect();
        assert_eq!(
            changes,
            vec![
                Change::Buckets,
                Change::Buckets,
                Change::Buckets,
                Change::Tasks { bucket_id: b.id }
            ]
        );
    }

    #[test]
    fn delete_follows_configured_policy() {
        let (store, bucket) = setup();
        let store = store.with_delete_policy(DeletePolicy::Row);
        let a = store.append_task(bucket, "a").unwrap().unwrap();
        let child = store.append_task(bucket, "child").unwrap().unwrap();
        assert!(store.demote_to_child(child.id, a.id).unwrap().is_applied());
        store.delete_task(a.id).unwrap();
        // Row policy leaves the child behind.
        assert!(store.task(child.id).unwrap().is_some());
        assert!(!store.check(bucket).unwrap().is_empty());
    }

    #[test]
    fn not_writing_when_idle() {
        let (store, bucket) = setup();
        assert!(!store.is_writing());
        store.append_task(bucket, "a").unwrap();
        assert!(!store.is_writing());
    }

    #[test]
    fn writing_flag_visible_while_write_waits_for_lock() {
        let (store, bucket) = setup();
        let store = Arc::new(store);
        let held = store.lock().unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                store.append_task(bucket, "a").unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };
        while !store.is_writing() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!done.load(Ordering::SeqCst));
        drop(held);
        handle.join().unwrap();
        assert!(!store.is_writing());
        assert_eq!(store.tasks(bucket).unwrap().len(), 1);
    }

    #[test]
    fn writing_flag_clears_after_failed_write() {
        let (store, _) = setup();
        let result: Result<()> = store.write(|_| Err(anyhow!("boom")));
        assert!(result.is_err());
        assert!(!store.is_writing());
    }
}
