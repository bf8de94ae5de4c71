use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::ui::EventQueue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A session together with the queue its UI events land in.
pub struct HostedSession {
    pub session: Session,
    pub events: EventQueue,
}

type SharedSession = Arc<Mutex<HostedSession>>;

/// Sessions addressed by id for an embedding host. The map lock is only held
/// to look a session up; each session is used under its own lock, so a long
/// `pump` on one session never blocks the others.
pub struct SessionHost {
    sessions: Mutex<HashMap<u64, SharedSession>>,
    next_id: AtomicU64,
}

impl Default for SessionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHost {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn open(&self, dir: &Path, config: SessionConfig) -> Result<u64> {
        let events = EventQueue::new();
        let session = Session::new(dir, config, Box::new(events.clone()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .insert(id, Arc::new(Mutex::new(HostedSession { session, events })));
        Ok(id)
    }

    /// Forgets the session; its workers are joined once the last in-flight
    /// call on it returns.
    pub fn close(&self, id: u64) -> Result<bool> {
        let removed = self
            .sessions
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .remove(&id);
        Ok(removed.is_some())
    }

    pub fn with<R>(&self, id: u64, f: impl FnOnce(&mut HostedSession) -> R) -> Result<R> {
        let shared = self
            .sessions
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownSession(id))?;
        let mut hosted = shared.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(f(&mut hosted))
    }
}
