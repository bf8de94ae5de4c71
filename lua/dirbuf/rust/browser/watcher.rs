use super::WorkerMessage;
use crate::error::{Error, Result};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

type ShutdownSignal = Arc<(Mutex<bool>, Condvar)>;

struct ActiveWatch {
    path: PathBuf,
    shutdown: ShutdownSignal,
    handle: thread::JoinHandle<()>,
}

/// Watches exactly one directory at a time. Any change inside it is reported
/// as `WorkerMessage::DirectoryChanged`.
pub struct DirectoryWatcher {
    debounce: Duration,
    results: mpsc::Sender<WorkerMessage>,
    active: Option<ActiveWatch>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("path", &self.watched_path())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    pub fn new(debounce: Duration, results: mpsc::Sender<WorkerMessage>) -> Self {
        Self {
            debounce,
            results,
            active: None,
        }
    }

    pub fn watched_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| active.path.as_path())
    }

    /// Re-arms the watcher on `path`, releasing the previous registration.
    /// Returns once the new watch is registered or has failed to register.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        self.stop();

        let shutdown: ShutdownSignal = Arc::new((Mutex::new(false), Condvar::new()));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handle = spawn_watch_thread(
            path.to_path_buf(),
            self.debounce,
            self.results.clone(),
            Arc::clone(&shutdown),
            ready_tx,
        )?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.active = Some(ActiveWatch {
                    path: path.to_path_buf(),
                    shutdown,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(Error::Watcher(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Io(std::io::Error::other(format!(
                    "watcher thread for {} exited early",
                    path.display()
                ))))
            }
        }
    }

    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let (shutdown_mutex, condvar) = &*active.shutdown;
        match shutdown_mutex.lock() {
            Ok(mut flag) => *flag = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        condvar.notify_all();

        if active.handle.join().is_err() {
            error!("WATCH_STOP: watcher thread for {} panicked", active.path.display());
        }
        debug!("WATCH_STOP: released {}", active.path.display());
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_watch_thread(
    path: PathBuf,
    debounce: Duration,
    results: mpsc::Sender<WorkerMessage>,
    shutdown: ShutdownSignal,
    ready: mpsc::SyncSender<notify::Result<()>>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("dirbuf-watch".to_string())
        .spawn(move || {
            let mut debouncer = match new_debouncer(debounce, None, {
                let path = path.clone();
                let results = results.clone();
                move |result: DebounceEventResult| match result {
                    Ok(events) => handle_debounced_events(&events, &path, &results),
                    Err(errors) => error!("File watcher errors: {:?}", errors),
                }
            }) {
                Ok(debouncer) => debouncer,
                Err(e) => {
                    error!("Failed to create debouncer: {:?}", e);
                    let _ = ready.send(Err(e));
                    return;
                }
            };

            if let Err(e) = debouncer.watch(&path, RecursiveMode::NonRecursive) {
                debug!("WATCH_START: cannot watch {}: {:?}", path.display(), e);
                let _ = ready.send(Err(e));
                return;
            }
            info!("WATCH_START: watching {}", path.display());
            let _ = ready.send(Ok(()));

            let (shutdown_mutex, condvar) = &*shutdown;
            let mut shutdown_flag = match shutdown_mutex.lock() {
                Ok(flag) => flag,
                Err(poisoned) => {
                    error!("Shutdown mutex poisoned, recovering: {:?}", poisoned);
                    poisoned.into_inner()
                }
            };
            while !*shutdown_flag {
                shutdown_flag = match condvar.wait(shutdown_flag) {
                    Ok(flag) => flag,
                    Err(poisoned) => {
                        error!("Condvar wait poisoned, recovering: {:?}", poisoned);
                        poisoned.into_inner()
                    }
                };
            }
            drop(shutdown_flag);

            let _ = debouncer.unwatch(&path);
        })
}

fn handle_debounced_events(
    events: &[DebouncedEvent],
    dir: &Path,
    results: &mpsc::Sender<WorkerMessage>,
) {
    // reads of the directory (our own listings and previews) are not changes
    let relevant = events.iter().any(|event| {
        !matches!(event.event.kind, EventKind::Access(_))
            && event
                .event
                .paths
                .iter()
                .any(|path| path == dir || path.parent() == Some(dir))
    });
    if !relevant {
        return;
    }

    debug!("WATCH_EVENT: {} events in {}", events.len(), dir.display());
    if results
        .send(WorkerMessage::DirectoryChanged(dir.to_path_buf()))
        .is_err()
    {
        debug!("WATCH_EVENT: session is gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for_change(rx: &mpsc::Receiver<WorkerMessage>, wait: Duration) -> Option<PathBuf> {
        let deadline = Instant::now() + wait;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(WorkerMessage::DirectoryChanged(path)) => return Some(path),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn test_change_in_watched_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut watcher = DirectoryWatcher::new(Duration::from_millis(50), tx);

        watcher.watch(dir.path()).unwrap();
        assert_eq!(watcher.watched_path(), Some(dir.path()));
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();

        assert_eq!(
            wait_for_change(&rx, Duration::from_secs(5)).as_deref(),
            Some(dir.path())
        );
        watcher.stop();
        assert!(watcher.watched_path().is_none());
    }

    #[test]
    fn test_rearm_releases_previous_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut watcher = DirectoryWatcher::new(Duration::from_millis(50), tx);

        watcher.watch(first.path()).unwrap();
        watcher.watch(second.path()).unwrap();
        assert_eq!(watcher.watched_path(), Some(second.path()));

        std::fs::write(first.path().join("ignored.txt"), "x").unwrap();
        assert!(wait_for_change(&rx, Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_missing_directory_fails_to_register() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut watcher = DirectoryWatcher::new(Duration::from_millis(50), tx);
        watcher.watch(dir.path()).unwrap();

        let err = watcher.watch(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, Error::Watcher(_)));
        assert!(watcher.watched_path().is_none());
    }
}
