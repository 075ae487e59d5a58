//! Background write queue.
//!
//! UI code must not block on SQLite. A [`Writer`] owns a thread that runs
//! submitted jobs against the [`Store`] one at a time, in submission order;
//! each submission hands back a [`Pending`] the caller can wait on or ignore.
//! Observers learn about the result through the store's change feeds either way.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use log::{debug, error};

use crate::model::{Bucket, Task};
use crate::ops::Outcome;
use crate::store::Store;

type Job = Box<dyn FnOnce(&Store) + Send>;

/// Result of a submitted write, delivered once the job has run.
#[must_use = "dropping a Pending does not cancel the write, but its result is lost"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until the job has run.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| anyhow!("writer stopped before the job ran"))?
    }

    /// Take the result if the job already ran.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(anyhow!("writer stopped before the job ran"))),
        }
    }
}

pub struct Writer {
    store: Arc<Store>,
    tx: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Writer {
    pub fn spawn(store: Arc<Store>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker_store = Arc::clone(&store);
        let thread = thread::Builder::new()
            .name("taskit-writer".into())
            .spawn(move || {
                for job in rx {
                    job(&*worker_store);
                }
                debug!("writer queue closed");
            })?;
        Ok(Writer {
            store,
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Queue `f` to run on the writer thread.
    pub fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let (reply, rx) = mpsc::channel();
        let job: Job = Box::new(move |store: &Store| {
            let result = f(store);
            if let Err(e) = &result {
                error!("write failed: {e:#}");
            }
            // The caller may have dropped its Pending.
            let _ = reply.send(result);
        });
        if let Some(tx) = &self.tx {
            // On failure the job and its reply sender are dropped, which
            // the Pending reports as an error.
            let _ = tx.send(job);
        }
        Pending { rx }
    }

    pub fn create_bucket(&self, name: Option<String>) -> Pending<Bucket> {
        self.submit(move |s| s.create_bucket(name.as_deref()))
    }

    pub fn rename_bucket(&self, id: i64, name: impl Into<String>) -> Pending<bool> {
        let name = name.into();
        self.submit(move |s| s.rename_bucket(id, &name))
    }

    pub fn delete_buckets(&self, ids: Vec<i64>) -> Pending<usize> {
        self.submit(move |s| s.delete_buckets(&ids))
    }

    pub fn append_task(&self, bucket_id: i64, content: impl Into<String>) -> Pending<Option<Task>> {
        let content = content.into();
        self.submit(move |s| s.append_task(bucket_id, &content))
    }

    pub fn insert_task_above(
        &self,
        reference_id: i64,
        content: impl Into<String>,
    ) -> Pending<Option<Task>> {
        let content = content.into();
        self.submit(move |s| s.insert_task_above(reference_id, &content))
    }

    pub fn update_task_content(&self, id: i64, content: impl Into<String>) -> Pending<Outcome> {
        let content = content.into();
        self.submit(move |s| s.update_task_content(id, &content))
    }

    pub fn update_task_checked(&self, id: i64, is_checked: bool) -> Pending<Outcome> {
        self.submit(move |s| s.update_task_checked(id, is_checked))
    }

    pub fn delete_task(&self, id: i64) -> Pending<Outcome> {
        self.submit(move |s| s.delete_task(id))
    }

    pub fn reorder_task(&self, from_id: i64, to_id: i64) -> Pending<Outcome> {
        self.submit(move |s| s.reorder_task(from_id, to_id))
    }

    pub fn promote_to_root(&self, id: i64) -> Pending<Outcome> {
        self.submit(move |s| s.promote_to_root(id))
    }

    pub fn demote_to_child(&self, id: i64, above_id: i64) -> Pending<Outcome> {
        self.submit(move |s| s.demote_to_child(id, above_id))
    }
}

impl Drop for Writer {
    /// Finish every queued job before returning.
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Skip;

    fn setup() -> (Writer, i64) {
        let store = Arc::new(Store::open_memory().unwrap());
        let bucket = store.create_bucket(None).unwrap();
        (Writer::spawn(store).unwrap(), bucket.id)
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let (writer, bucket) = setup();
        let pending: Vec<_> = (0..5)
            .map(|i| writer.append_task(bucket, format!("t{i}")))
            .collect();
        let orders: Vec<i64> = pending
            .into_iter()
            .map(|p| p.wait().unwrap().unwrap().task_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn outcome_is_reported() {
        let (writer, bucket) = setup();
        let a = writer.append_task(bucket, "a").wait().unwrap().unwrap();
        assert_eq!(
            writer.promote_to_root(a.id).wait().unwrap(),
            Outcome::Skipped(Skip::AlreadyRoot)
        );
    }

    #[test]
    fn drop_drains_queue() {
        let (writer, bucket) = setup();
        let store = Arc::clone(writer.store());
        for i in 0..3 {
            let _ = writer.append_task(bucket, format!("t{i}"));
        }
        drop(writer);
        assert_eq!(store.tasks(bucket).unwrap().len(), 3);
    }

    #[test]
    fn errors_reach_the_caller() {
        let (writer, _) = setup();
        let pending = writer.submit(|_| -> Result<()> { Err(anyhow!("nope")) });
        assert!(pending.wait().is_err());
    }

    #[test]
    fn try_take_after_wait_for_queue() {
        let (writer, bucket) = setup();
        let first = writer.append_task(bucket, "a");
        writer.append_task(bucket, "b").wait().unwrap();
        // Jobs run in order, so the first one is done too.
        assert!(first.try_take().unwrap().unwrap().is_some());
    }
}
