use super::WorkerMessage;
use crate::error::Result;
use crate::path_utils::is_visible;
use crate::tasks::{CancelToken, TaskId, TaskKind, TaskRegistry};
use crate::types::FileEntry;
use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EXTERNAL_CANDIDATES: [&str; 2] = ["fd", "fdfind"];
/// Upper bound on a blocking wait with nothing pending, so cancellation is seen.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub dir: PathBuf,
    pub pattern: String,
    pub show_hidden: bool,
    pub flush_interval: Duration,
    /// Fast search executable; `None` walks the tree in-process.
    pub external: Option<PathBuf>,
}

/// Locates the fast search tool on `PATH`. Absence is not an error.
pub fn find_external_tool(preferred: Option<&str>) -> Option<PathBuf> {
    let found = match preferred {
        Some(program) => which::which(program).ok(),
        None => EXTERNAL_CANDIDATES
            .iter()
            .find_map(|program| which::which(program).ok()),
    };
    match &found {
        Some(path) => debug!("SEARCH_TOOL: using {}", path.display()),
        None => debug!("SEARCH_TOOL: none found, using built-in walk"),
    }
    found
}

/// Turns the user pattern into a glob: bare words become `*word*`.
pub fn glob_for(pattern: &str) -> String {
    if pattern.contains(['*', '?', '[']) {
        pattern.to_string()
    } else {
        format!("*{pattern}*")
    }
}

/// Starts a streaming search task. Batches go out as `SearchBatch` at most every
/// `flush_interval`, then one `SearchDone`. A cancelled task emits nothing more.
pub fn spawn_search(
    tasks: &mut TaskRegistry,
    request: SearchRequest,
    results: mpsc::Sender<WorkerMessage>,
) -> Result<TaskId> {
    let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
    let hook_slot = Arc::clone(&child_slot);
    let on_cancel = Box::new(move || {
        if let Ok(mut slot) = hook_slot.lock() {
            if let Some(child) = slot.as_mut() {
                let _ = child.kill();
            }
        }
    });

    tasks.spawn(TaskKind::Search, Some(on_cancel), move |id, token| {
        run_search(id, request, results, token, child_slot)
    })
}

fn run_search(
    id: TaskId,
    request: SearchRequest,
    results: mpsc::Sender<WorkerMessage>,
    token: CancelToken,
    child_slot: Arc<Mutex<Option<Child>>>,
) {
    let started = Instant::now();
    let glob = glob_for(&request.pattern);
    info!(
        "SEARCH_START: '{}' in {} (task {})",
        request.pattern,
        request.dir.display(),
        id
    );

    let mut batcher = Batcher::new(id, &request, results.clone(), token.clone());

    let used_external = match &request.external {
        Some(program) => run_external(program, &glob, &request, &mut batcher, &token, &child_slot),
        None => false,
    };

    if !used_external && !token.is_cancelled() {
        match Pattern::new(&glob) {
            Ok(pattern) => walk_builtin(&pattern, &request, &mut batcher, &token),
            Err(e) => warn!("SEARCH_PATTERN: '{}' is not a valid glob: {}", glob, e),
        }
    }

    if token.is_cancelled() {
        debug!("SEARCH_CANCELLED: task {}", id);
        return;
    }

    batcher.flush();
    let match_count = batcher.total();
    info!(
        "SEARCH_DONE: {} matches for '{}' in {:?}",
        match_count,
        request.pattern,
        started.elapsed()
    );
    let _ = results.send(WorkerMessage::SearchDone {
        task: id,
        dir: request.dir,
        pattern: request.pattern,
        match_count,
    });
}

fn run_external(
    program: &Path,
    glob: &str,
    request: &SearchRequest,
    batcher: &mut Batcher,
    token: &CancelToken,
    child_slot: &Arc<Mutex<Option<Child>>>,
) -> bool {
    let mut command = Command::new(program);
    command
        .arg("--glob")
        .arg("--ignore-case")
        .arg("--no-ignore")
        .arg("--absolute-path")
        .arg("--color")
        .arg("never");
    if request.show_hidden {
        command.arg("--hidden");
    }
    command
        .arg(glob)
        .arg(&request.dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("SEARCH_TOOL: failed to run {}: {}", program.display(), e);
            return false;
        }
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return false;
    };

    match child_slot.lock() {
        Ok(mut slot) => *slot = Some(child),
        Err(_) => return false,
    }
    // cancel may have fired before the child was registered
    if token.is_cancelled() {
        kill_child(child_slot);
        return true;
    }

    let stdout = BufReader::new(stdout);
    thread::scope(|scope| {
        let (matches_tx, matches_rx) = mpsc::channel();
        scope.spawn(move || {
            for line in stdout.lines() {
                let Ok(line) = line else {
                    break;
                };
                let trimmed = line.trim_end_matches('/');
                if trimmed.is_empty() {
                    continue;
                }
                if matches_tx.send(PathBuf::from(trimmed)).is_err() {
                    break;
                }
            }
        });

        collect_matches(&matches_rx, batcher, token);
        // the reader only returns once the child's stdout closes
        if token.is_cancelled() {
            kill_child(child_slot);
        }
    });

    if let Ok(mut slot) = child_slot.lock() {
        if let Some(mut child) = slot.take() {
            let _ = child.wait();
        }
    }
    true
}

fn kill_child(child_slot: &Arc<Mutex<Option<Child>>>) {
    if let Ok(mut slot) = child_slot.lock() {
        if let Some(mut child) = slot.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn walk_builtin(pattern: &Pattern, request: &SearchRequest, batcher: &mut Batcher, token: &CancelToken) {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    thread::scope(|scope| {
        let (matches_tx, matches_rx) = mpsc::channel();
        scope.spawn(move || {
            let walker = WalkBuilder::new(&request.dir)
                .hidden(!request.show_hidden)
                .git_ignore(false)
                .git_exclude(false)
                .git_global(false)
                .ignore(false)
                .parents(false)
                .follow_links(false)
                .sort_by_file_name(std::cmp::Ord::cmp)
                .build();

            for entry in walker {
                if token.is_cancelled() {
                    return;
                }
                let Ok(entry) = entry else {
                    continue;
                };
                if entry.depth() == 0 {
                    continue;
                }
                if pattern.matches_with(&entry.file_name().to_string_lossy(), options)
                    && matches_tx.send(entry.into_path()).is_err()
                {
                    return;
                }
            }
        });

        collect_matches(&matches_rx, batcher, token);
    });
}

/// Feeds matches from a producer into `batcher` until the producer hangs up,
/// flushing on time even while the producer is blocked.
fn collect_matches(matches: &mpsc::Receiver<PathBuf>, batcher: &mut Batcher, token: &CancelToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        match matches.recv_timeout(batcher.next_wait()) {
            Ok(path) => batcher.push(path),
            Err(RecvTimeoutError::Timeout) => batcher.tick(),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Accumulates matches and flushes them on a timer.
struct Batcher {
    task: TaskId,
    dir: PathBuf,
    show_hidden: bool,
    interval: Duration,
    results: mpsc::Sender<WorkerMessage>,
    token: CancelToken,
    pending: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    last_flush: Instant,
    sent_batches: usize,
    total: usize,
}

impl Batcher {
    fn new(
        task: TaskId,
        request: &SearchRequest,
        results: mpsc::Sender<WorkerMessage>,
        token: CancelToken,
    ) -> Self {
        Self {
            task,
            dir: request.dir.clone(),
            show_hidden: request.show_hidden,
            interval: request.flush_interval,
            results,
            token,
            pending: Vec::new(),
            seen: HashSet::new(),
            last_flush: Instant::now(),
            sent_batches: 0,
            total: 0,
        }
    }

    fn push(&mut self, path: PathBuf) {
        let visible = path
            .file_name()
            .is_some_and(|name| is_visible(&name.to_string_lossy(), self.show_hidden));
        if visible && self.seen.insert(path.clone()) {
            self.pending.push(path);
        }
        self.tick();
    }

    /// How long the collector may block before the next flush is due.
    fn next_wait(&self) -> Duration {
        if self.pending.is_empty() {
            return IDLE_WAIT;
        }
        self.interval
            .saturating_sub(self.last_flush.elapsed())
            .max(Duration::from_millis(1))
    }

    fn tick(&mut self) {
        if !self.pending.is_empty() && self.last_flush.elapsed() >= self.interval {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.pending.is_empty() || self.token.is_cancelled() {
            return;
        }

        let entries: Vec<FileEntry> = self
            .pending
            .drain(..)
            .map(|path| FileEntry::new(path, Some(&self.dir), self.show_hidden))
            .collect();
        self.total += entries.len();
        let first = self.sent_batches == 0;
        self.sent_batches += 1;

        debug!(
            "SEARCH_BATCH: task {} batch {} with {} entries",
            self.task,
            self.sent_batches,
            entries.len()
        );
        let _ = self.results.send(WorkerMessage::SearchBatch {
            task: self.task,
            entries,
            first,
        });
    }

    #[inline]
    fn total(&self) -> usize {
        self.total
    }
}
