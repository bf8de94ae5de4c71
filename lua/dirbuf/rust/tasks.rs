use crate::error::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Search,
    Info,
    Icons,
    Archive,
}

impl TaskKind {
    fn thread_name(self) -> &'static str {
        match self {
            TaskKind::Search => "dirbuf-search",
            TaskKind::Info => "dirbuf-info",
            TaskKind::Icons => "dirbuf-icons",
            TaskKind::Archive => "dirbuf-archive",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs after the token is flipped, e.g. to kill a child process the task is
/// blocked on.
pub type CancelHook = Box<dyn Fn() + Send>;

struct TaskEntry {
    kind: TaskKind,
    token: CancelToken,
    on_cancel: Option<CancelHook>,
    handle: thread::JoinHandle<()>,
}

/// Background tasks keyed by id. Every task is joined either by `reap` once it
/// finishes or by `drain` on teardown.
#[derive(Default)]
pub struct TaskRegistry {
    next_id: TaskId,
    tasks: HashMap<TaskId, TaskEntry>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("next_id", &self.next_id)
            .field("active", &self.tasks.len())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, kind: TaskKind, on_cancel: Option<CancelHook>, task: F) -> Result<TaskId>
    where
        F: FnOnce(TaskId, CancelToken) + Send + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        let token = CancelToken::new();
        let task_token = token.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-{}", kind.thread_name(), id))
            .spawn(move || task(id, task_token))?;

        debug!("TASK_SPAWN: {:?} task {}", kind, id);
        self.tasks.insert(
            id,
            TaskEntry {
                kind,
                token,
                on_cancel,
                handle,
            },
        );
        Ok(id)
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(entry) = self.tasks.get(&id) else {
            return false;
        };
        entry.token.cancel();
        if let Some(hook) = &entry.on_cancel {
            hook();
        }
        debug!("TASK_CANCEL: {:?} task {}", entry.kind, id);
        true
    }

    pub fn cancel_kind(&mut self, kind: TaskKind) {
        let ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.cancel(id);
        }
    }

    #[inline]
    pub fn is_active(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Joins tasks whose threads already returned.
    pub fn reap(&mut self) {
        let finished: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(entry) = self.tasks.remove(&id) {
                join_task(id, entry);
            }
        }
    }

    /// Cancels and joins every registered task.
    pub fn drain(&mut self) {
        for (id, entry) in &self.tasks {
            entry.token.cancel();
            if let Some(hook) = &entry.on_cancel {
                hook();
            }
            debug!("TASK_DRAIN: cancelling {:?} task {}", entry.kind, id);
        }
        for (id, entry) in self.tasks.drain() {
            join_task(id, entry);
        }
    }
}

fn join_task(id: TaskId, entry: TaskEntry) {
    if entry.handle.join().is_err() {
        error!("TASK_PANIC: {:?} task {} panicked", entry.kind, id);
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.drain();
    }
}
