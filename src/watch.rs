use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, trace};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::live::{Change, ChangeBus};

/// Quiet period after a file event before feeds re-read. A single commit
/// touches the db, -wal and -shm files; this folds them into one change.
const SETTLE: Duration = Duration::from_millis(50);

/// Whether `event` touches the database file or one of its SQLite
/// auxiliaries (-wal, -shm, -journal). Access events are ignored: every
/// reader fires them.
fn is_db_event(db_filename: &str, event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|p| {
        p.file_name()
            .map(|f| f.to_string_lossy().starts_with(db_filename))
            .unwrap_or(false)
    })
}

/// Creates a watcher for the database file and returns a receiver for change events.
/// The watcher must be kept alive for events to be received.
///
/// The parent directory is watched since SQLite writes through side files.
pub fn watch_db(db_path: &str) -> Result<(RecommendedWatcher, Receiver<()>)> {
    let (tx, rx) = mpsc::channel();

    let db_filename = Path::new(db_path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if is_db_event(&db_filename, &event) {
                let _ = tx.send(());
            }
        }
    })
    .context("failed to create file watcher")?;

    let path = Path::new(db_path);
    let watch_path = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    watcher
        .watch(watch_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", watch_path.display()))?;

    Ok((watcher, rx))
}

/// Drains any pending events from the receiver.
pub fn drain_events(rx: &Receiver<()>) {
    while rx.try_recv().is_ok() {}
}

/// Keeps a database watcher alive and republishes its events on a
/// [`ChangeBus`] as [`Change::External`]. Dropping it stops forwarding.
pub struct ExternalChanges {
    _watcher: RecommendedWatcher,
}

/// Publish [`Change::External`] whenever another process writes `db_path`.
pub fn forward_external(db_path: &str, bus: Arc<ChangeBus>) -> Result<ExternalChanges> {
    let (watcher, rx) = watch_db(db_path)?;
    thread::Builder::new()
        .name("taskit-watch".into())
        .spawn(move || forward(&rx, &bus))
        .context("failed to spawn watch thread")?;
    debug!("watching {db_path} for external changes");
    Ok(ExternalChanges { _watcher: watcher })
}

/// Runs until the watcher is dropped.
fn forward(rx: &Receiver<()>, bus: &ChangeBus) {
    while rx.recv().is_ok() {
        thread::sleep(SETTLE);
        drain_events(rx);
        trace!("database file changed");
        bus.publish(Change::External);
    }
}
