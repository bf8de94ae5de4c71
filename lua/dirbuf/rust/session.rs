use crate::archive;
use crate::browser::{
    compile_rule, filter_by_pattern, find_external_tool, read_sorted, sort_entries, spawn_search,
    ArchiveOp, DirectoryWatcher, PreviewOptions, PreviewWorker, SearchRequest, Snapshot, SortState,
    WorkerMessage,
};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::git::RepoInfo;
use crate::icons::IconCache;
use crate::mime;
use crate::ops;
use crate::path_utils::expand_home;
use crate::prompt::{PendingAction, PromptRegistry};
use crate::tasks::{TaskId, TaskKind, TaskRegistry};
use crate::types::{BatchRenameItem, FileEntry, SortKey};
use crate::ui::{PromptResponse, UiSurface};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the current snapshot was derived from.
#[derive(Debug, Clone)]
pub enum ViewState {
    Browsing {
        dir: PathBuf,
    },
    Searching {
        dir: PathBuf,
        pattern: String,
    },
    /// Listing of `dir` narrowed by every rule in order.
    Narrowed {
        dir: PathBuf,
        rules: Vec<(String, Regex)>,
    },
}

impl ViewState {
    pub fn dir(&self) -> &Path {
        match self {
            ViewState::Browsing { dir }
            | ViewState::Searching { dir, .. }
            | ViewState::Narrowed { dir, .. } => dir,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ViewState::Browsing { .. } => "browsing",
            ViewState::Searching { .. } => "searching",
            ViewState::Narrowed { .. } => "narrowed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Move,
    Copy,
}

impl Transfer {
    fn verb(self) -> &'static str {
        match self {
            Transfer::Move => "Moved",
            Transfer::Copy => "Copied",
        }
    }
}

/// One browsing tab: owns the snapshot and the state machine, dispatches the
/// workers and applies their results in `pump`. Every method runs on the
/// thread that owns the session.
pub struct Session {
    config: SessionConfig,
    state: ViewState,
    snapshot: Snapshot,
    sort: SortState,
    show_hidden: bool,
    preview_enabled: bool,
    pending_select: Option<PathBuf>,
    marked: HashSet<PathBuf>,
    changed: HashMap<PathBuf, Instant>,
    suppress_changed: bool,
    surface: Box<dyn UiSurface>,
    prompts: PromptRegistry,
    tasks: TaskRegistry,
    preview: PreviewWorker,
    search_task: Option<TaskId>,
    watcher: DirectoryWatcher,
    icons: Option<Arc<IconCache>>,
    icons_requested: HashSet<String>,
    external_search: Option<PathBuf>,
    batch: Vec<BatchRenameItem>,
    next_batch_id: u64,
    sender: mpsc::Sender<WorkerMessage>,
    receiver: mpsc::Receiver<WorkerMessage>,
    shut_down: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state.name())
            .field("dir", &self.state.dir())
            .field("entries", &self.snapshot.len())
            .field("selected", &self.snapshot.selected_index())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(dir: &Path, config: SessionConfig, surface: Box<dyn UiSurface>) -> Result<Self> {
        let dir = dir.canonicalize().map_err(|e| Error::from_io(e, dir))?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir));
        }
        info!("SESSION_NEW: {}", dir.display());

        let (sender, receiver) = mpsc::channel();
        let preview = PreviewWorker::spawn(config.preview_debounce(), sender.clone());
        let watcher = DirectoryWatcher::new(config.watcher_debounce(), sender.clone());

        let external_search = if config.use_external_search {
            find_external_tool(config.external_search_program.as_deref())
        } else {
            None
        };

        let icons = config.icon_cache_dir.clone().and_then(|cache_dir| {
            IconCache::with_placeholder(cache_dir)
                .map(Arc::new)
                .map_err(|e| warn!("SESSION_ICONS: icon cache unavailable: {}", e))
                .ok()
        });

        let mut session = Self {
            sort: SortState::new(config.sort_key, config.sort_reverse),
            show_hidden: config.show_hidden,
            preview_enabled: config.preview_enabled,
            state: ViewState::Browsing { dir: dir.clone() },
            snapshot: Snapshot::default(),
            pending_select: None,
            marked: HashSet::new(),
            changed: HashMap::new(),
            suppress_changed: false,
            surface,
            prompts: PromptRegistry::new(),
            tasks: TaskRegistry::new(),
            preview,
            search_task: None,
            watcher,
            icons,
            icons_requested: HashSet::new(),
            external_search,
            batch: Vec::new(),
            next_batch_id: 1,
            sender,
            receiver,
            shut_down: false,
            config,
        };

        session.navigate(&dir, None);
        Ok(session)
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn dir(&self) -> &Path {
        self.state.dir()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn sort(&self) -> SortState {
        self.sort
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview_enabled
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_searching(&self) -> bool {
        matches!(self.state, ViewState::Searching { .. })
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Marked paths in snapshot order.
    pub fn marked_paths(&self) -> Vec<PathBuf> {
        self.snapshot
            .entries()
            .iter()
            .filter(|entry| self.marked.contains(&entry.path))
            .map(|entry| entry.path.clone())
            .collect()
    }

    pub fn changed_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.changed.keys().cloned().collect();
        paths.sort();
        paths
    }

    // ---- state machine ----

    /// Enters `Browsing` at `dir`, selecting `preferred` when it is listed.
    pub fn navigate(&mut self, dir: &Path, preferred: Option<&Path>) {
        let entries = match read_sorted(dir, self.show_hidden, self.sort) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("SESSION_NAVIGATE: {} failed: {}", dir.display(), e);
                self.surface.message(&e.to_string());
                return;
            }
        };

        self.cancel_search();
        self.marked.clear();
        self.changed.clear();
        self.pending_select = None;
        self.suppress_changed = false;
        self.state = ViewState::Browsing {
            dir: dir.to_path_buf(),
        };
        self.snapshot = Snapshot::with_preferred(entries, preferred);
        info!(
            "SESSION_NAVIGATE: {} ({} entries, selected {})",
            dir.display(),
            self.snapshot.len(),
            self.snapshot.selected_index()
        );

        self.ensure_icons();
        self.render();
        self.arm_watcher(dir);
        self.request_selected_preview();
        self.spawn_info(dir.to_path_buf());
    }

    fn arm_watcher(&mut self, dir: &Path) {
        if let Err(e) = self.watcher.watch(dir) {
            warn!("SESSION_WATCH: {} not watched: {}", dir.display(), e);
        }
    }

    /// Goes to the parent of the directory holding `current_file`, selecting
    /// the directory that was left. `current_file` equal to the session
    /// directory means the listing was empty.
    pub fn navigate_up(&mut self, current_file: &Path) {
        let dir = self.dir().to_path_buf();
        let leaving = if current_file == dir {
            dir
        } else {
            current_file.parent().map(Path::to_path_buf).unwrap_or(dir)
        };

        match leaving.parent() {
            Some(parent) => {
                let parent = parent.to_path_buf();
                self.navigate(&parent, Some(&leaving));
            }
            None => self.surface.message("Already in root directory"),
        }
    }

    /// Streams a recursive search of `dir`; an empty pattern just browses `dir`.
    pub fn search(&mut self, dir: &Path, pattern: &str) {
        if pattern.trim().is_empty() {
            self.navigate(dir, None);
            return;
        }

        self.cancel_search();
        self.marked.clear();
        self.changed.clear();
        self.pending_select = None;
        self.state = ViewState::Searching {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        };
        self.snapshot = Snapshot::default();
        self.surface.change_path(dir, &[], 0);
        self.arm_watcher(dir);

        let request = SearchRequest {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
            show_hidden: self.show_hidden,
            flush_interval: self.config.search_flush_interval(),
            external: self.external_search.clone(),
        };
        match spawn_search(&mut self.tasks, request, self.sender.clone()) {
            Ok(task) => {
                info!("SESSION_SEARCH: '{}' in {} (task {})", pattern, dir.display(), task);
                self.search_task = Some(task);
            }
            Err(e) => {
                warn!("SESSION_SEARCH: could not start: {}", e);
                self.surface.message(&format!("Search failed: {}", e));
            }
        }
    }

    /// Filters the current listing by a case-insensitive regex without reading
    /// the disk. Rules stack; an empty rule restores the full listing.
    pub fn narrow(&mut self, rule: &str) {
        if self.is_searching() {
            self.surface.message("Cannot narrow while searching");
            return;
        }
        if rule.is_empty() {
            let dir = self.dir().to_path_buf();
            let selected = self.selected_path();
            self.navigate(&dir, selected.as_deref());
            return;
        }

        let regex = match compile_rule(rule) {
            Ok(regex) => regex,
            Err(e) => {
                self.surface.message(&e.to_string());
                return;
            }
        };

        let entries = filter_by_pattern(self.snapshot.entries(), &regex);
        let dir = self.dir().to_path_buf();
        let mut rules = match std::mem::replace(
            &mut self.state,
            ViewState::Browsing { dir: dir.clone() },
        ) {
            ViewState::Narrowed { rules, .. } => rules,
            _ => Vec::new(),
        };
        rules.push((rule.to_string(), regex));
        debug!("SESSION_NARROW: {} rules, {} entries", rules.len(), entries.len());

        self.state = ViewState::Narrowed { dir, rules };
        self.snapshot = Snapshot::new(entries, 0);
        self.render();
        self.request_selected_preview();
    }

    pub fn toggle_hidden(&mut self) {
        self.show_hidden = !self.show_hidden;
        self.suppress_changed = true;
        info!("SESSION_HIDDEN: show_hidden={}", self.show_hidden);
        self.refresh();
    }

    pub fn set_preview_enabled(&mut self, enabled: bool) {
        self.preview_enabled = enabled;
        if enabled {
            self.request_selected_preview();
        }
    }

    /// Same key twice flips the direction; the selection follows its entry.
    pub fn sort_by(&mut self, key: SortKey) {
        self.sort.toggle(key);
        let selected = self.selected_path();
        let mut entries = self.snapshot.entries().to_vec();
        sort_entries(&mut entries, self.sort.key, self.sort.reverse);
        self.snapshot = Snapshot::with_preferred(entries, selected.as_deref());
        debug!("SESSION_SORT: {:?} reverse={}", self.sort.key, self.sort.reverse);
        self.render();
    }

    /// Re-derives the snapshot for the active state from disk. Paths that are
    /// new or whose mtime moved are highlighted as changed, unless the
    /// triggering action asked to suppress that.
    pub fn refresh(&mut self) {
        let (dir, rules) = match &self.state {
            ViewState::Searching { dir, pattern } => {
                let (dir, pattern) = (dir.clone(), pattern.clone());
                self.search(&dir, &pattern);
                return;
            }
            ViewState::Browsing { dir } => (dir.clone(), Vec::new()),
            ViewState::Narrowed { dir, rules } => (
                dir.clone(),
                rules.iter().map(|(_, regex)| regex.clone()).collect::<Vec<_>>(),
            ),
        };

        let mut entries = match read_sorted(&dir, self.show_hidden, self.sort) {
            Ok(entries) => entries,
            Err(Error::NotFound(_)) => {
                self.leave_vanished_directory(&dir);
                return;
            }
            Err(e) => {
                warn!("SESSION_REFRESH: {} failed: {}", dir.display(), e);
                self.surface.message(&e.to_string());
                return;
            }
        };
        for regex in &rules {
            entries = filter_by_pattern(&entries, regex);
        }

        let previous: HashMap<&Path, u64> = self
            .snapshot
            .entries()
            .iter()
            .map(|entry| (entry.path.as_path(), entry.mtime))
            .collect();
        let mut newly_changed = Vec::new();
        if !self.suppress_changed {
            for entry in &entries {
                match previous.get(entry.path.as_path()) {
                    Some(mtime) if *mtime == entry.mtime => {}
                    _ => newly_changed.push(entry.path.clone()),
                }
            }
        }
        self.suppress_changed = false;

        let old_selected = self.snapshot.selected_index();
        let old_path = self.selected_path();
        let selected = self
            .pending_select
            .take()
            .and_then(|path| entries.iter().position(|entry| entry.path == path))
            .or_else(|| {
                old_path
                    .as_ref()
                    .and_then(|path| entries.iter().position(|entry| &entry.path == path))
            })
            .unwrap_or_else(|| old_selected.min(entries.len().saturating_sub(1)));

        self.marked
            .retain(|path| entries.iter().any(|entry| &entry.path == path));
        let deadline = Instant::now() + self.config.changed_highlight();
        for path in newly_changed {
            self.changed.insert(path, deadline);
        }
        self.changed
            .retain(|path, _| entries.iter().any(|entry| &entry.path == path));

        self.snapshot = Snapshot::new(entries, selected).with_marks(&self.marked);
        debug!(
            "SESSION_REFRESH: {} ({} entries, {} changed)",
            dir.display(),
            self.snapshot.len(),
            self.changed.len()
        );

        self.ensure_icons();
        self.render();
        let indices = self.changed_indices();
        if !indices.is_empty() {
            self.surface.mark_changed(&indices);
        }
        self.request_selected_preview();
    }

    fn leave_vanished_directory(&mut self, dir: &Path) {
        let mut ancestor = dir.parent();
        while let Some(candidate) = ancestor {
            if candidate.is_dir() {
                let candidate = candidate.to_path_buf();
                info!("SESSION_REFRESH: {} vanished, moving to {}", dir.display(), candidate.display());
                self.navigate(&candidate, None);
                return;
            }
            ancestor = candidate.parent();
        }
        self.surface
            .message(&Error::NotFound(dir.to_path_buf()).to_string());
    }

    // ---- UI-originated calls ----

    pub fn select_index(&mut self, index: usize) {
        if index >= self.snapshot.len() {
            debug!("SESSION_SELECT: index {} out of range", index);
            return;
        }
        if index == self.snapshot.selected_index() {
            return;
        }
        self.snapshot = self.snapshot.with_selected(index);
        self.request_selected_preview();
    }

    pub fn toggle_mark(&mut self, index: usize) {
        let Some(entry) = self.snapshot.get(index) else {
            return;
        };
        let path = entry.path.clone();
        if !self.marked.remove(&path) {
            self.marked.insert(path);
        }
        self.apply_marks();
    }

    pub fn mark_all(&mut self) {
        self.marked = self.snapshot.paths().map(Path::to_path_buf).collect();
        self.apply_marks();
    }

    pub fn unmark_all(&mut self) {
        self.marked.clear();
        self.apply_marks();
    }

    fn apply_marks(&mut self) {
        self.snapshot = self.snapshot.with_marks(&self.marked);
        self.render();
    }

    /// Opens a directory, or the parent of a file with the file selected.
    pub fn request_navigate(&mut self, path: &Path) {
        let path = self.resolve_input(&path.to_string_lossy());
        if path.is_dir() {
            self.navigate(&path, None);
        } else if path.symlink_metadata().is_ok() {
            match path.parent() {
                Some(parent) => {
                    let parent = parent.to_path_buf();
                    self.navigate(&parent, Some(&path));
                }
                None => self.surface.message("Already in root directory"),
            }
        } else {
            self.surface.message(&Error::NotFound(path).to_string());
        }
    }

    pub fn request_narrow(&mut self, rule: &str) {
        self.narrow(rule);
    }

    /// Surfaces the session directory for the host clipboard.
    pub fn copy_dir_path(&mut self) -> PathBuf {
        let dir = self.dir().to_path_buf();
        self.surface.message(&format!("Copy '{}'", dir.display()));
        dir
    }

    // ---- prompt-driven mutations ----

    pub fn new_file(&mut self) {
        let dir = self.dir().to_path_buf();
        self.issue_prompt(PendingAction::CreateFile { dir }, "Create file: ".to_string(), None);
    }

    pub fn new_directory(&mut self) {
        let dir = self.dir().to_path_buf();
        self.issue_prompt(
            PendingAction::CreateDirectory { dir },
            "Create directory: ".to_string(),
            None,
        );
    }

    pub fn rename_selected(&mut self) {
        let Some(path) = self.selected_path() else {
            self.surface.message("Nothing to rename");
            return;
        };
        let name = file_name(&path);
        self.issue_prompt(
            PendingAction::RenameFile { path },
            format!("Rename file name '{}' to: ", name),
            Some(name),
        );
    }

    pub fn delete_selected(&mut self) {
        let Some(path) = self.selected_path() else {
            self.surface.message("Nothing to delete");
            return;
        };
        self.issue_prompt(
            PendingAction::DeleteCurrent { path },
            "Are you sure you want to delete current file?".to_string(),
            None,
        );
    }

    pub fn delete_marked(&mut self) {
        let paths = self.marked_paths();
        if paths.is_empty() {
            self.surface.message("No deletions requested");
            return;
        }
        self.issue_prompt(
            PendingAction::DeleteMarked { paths },
            "Are you sure you want to delete selected files?".to_string(),
            None,
        );
    }

    pub fn move_marked(&mut self) {
        let sources = self.operation_sources();
        if sources.is_empty() {
            self.surface.message("Nothing to move");
            return;
        }
        let message = format!("Move {} file(s) to: ", sources.len());
        let initial = Some(self.dir_input());
        self.issue_prompt(PendingAction::MoveFiles { sources }, message, initial);
    }

    pub fn copy_marked(&mut self) {
        let sources = self.operation_sources();
        if sources.is_empty() {
            self.surface.message("Nothing to copy");
            return;
        }
        let message = format!("Copy {} file(s) to: ", sources.len());
        let initial = Some(self.dir_input());
        self.issue_prompt(PendingAction::CopyFiles { sources }, message, initial);
    }

    pub fn compress_selected(&mut self) {
        let Some(source) = self.selected_path() else {
            self.surface.message("Nothing to compress");
            return;
        };
        let initial = archive::default_archive_path(&source)
            .to_string_lossy()
            .into_owned();
        self.issue_prompt(
            PendingAction::Compress { source },
            "Compress to: ".to_string(),
            Some(initial),
        );
    }

    pub fn decompress_selected(&mut self) {
        let Some(entry) = self.snapshot.selected_entry() else {
            self.surface.message("Nothing to extract");
            return;
        };
        if entry.kind != crate::types::EntryKind::File || !mime::is_archive(&entry.mime) {
            self.surface
                .message(&format!("'{}' is not an archive", entry.name));
            return;
        }
        let archive_path = entry.path.clone();
        let initial = archive::default_extract_dir(&archive_path)
            .to_string_lossy()
            .into_owned();
        self.issue_prompt(
            PendingAction::Decompress {
                archive: archive_path,
            },
            "Extract to: ".to_string(),
            Some(initial),
        );
    }

    /// Hands the marked entries (or all entries when none are marked) to the
    /// host for editing. Ids are unique for the session's lifetime.
    pub fn begin_batch_rename(&mut self) {
        let marked = self.marked_paths();
        let entries: Vec<FileEntry> = self
            .snapshot
            .entries()
            .iter()
            .filter(|entry| marked.is_empty() || self.marked.contains(&entry.path))
            .cloned()
            .collect();
        if entries.is_empty() {
            self.surface.message("Nothing to rename");
            return;
        }

        self.batch = ops::batch_items(&entries, self.next_batch_id);
        self.next_batch_id += self.batch.len() as u64;
        debug!("SESSION_BATCH_RENAME: {} items", self.batch.len());
        self.surface.open_batch_rename(&self.batch);
    }

    pub fn apply_batch_rename(&mut self, edits: &[BatchRenameItem]) {
        if self.batch.is_empty() {
            self.surface.message("No batch rename in progress");
            return;
        }

        let outcomes = ops::batch_rename(&self.batch, edits);
        self.batch.clear();

        let mut renamed = 0;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(target) => {
                    if self.marked.remove(&outcome.from) {
                        self.marked.insert(target.clone());
                    }
                    if renamed == 0 {
                        self.pending_select = Some(target);
                    }
                    renamed += 1;
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        self.suppress_changed = true;
        self.refresh();
        if failures.is_empty() {
            self.surface.message(&format!("Renamed {} file(s)", renamed));
        } else {
            self.surface.message(&format!(
                "Renamed {} file(s), {} failed: {}",
                renamed,
                failures.len(),
                failures.join("; ")
            ));
        }
    }

    /// Resolves the answer to a prompt issued under `tag`.
    pub fn handle_prompt_response(&mut self, tag: &str, response: PromptResponse) {
        let Some(action) = self.prompts.take(tag) else {
            warn!("SESSION_PROMPT: response for unknown tag '{}'", tag);
            return;
        };
        debug!("SESSION_PROMPT: {} -> {:?}", tag, response);

        match (action, response) {
            (_, PromptResponse::Cancelled) | (_, PromptResponse::Confirmed(false)) => {}
            (PendingAction::CreateFile { dir }, PromptResponse::Text(name)) => {
                match ops::create_file(&dir, &name) {
                    Ok(path) => self.after_create(path, "file"),
                    Err(Error::Collision(_)) => self.issue_prompt(
                        PendingAction::CreateFile { dir },
                        format!("File '{}' exists, choose different name: ", name),
                        Some(name),
                    ),
                    Err(e) => self.surface.message(&e.to_string()),
                }
            }
            (PendingAction::CreateDirectory { dir }, PromptResponse::Text(name)) => {
                match ops::create_directory(&dir, &name) {
                    Ok(path) => self.after_create(path, "directory"),
                    Err(Error::Collision(_)) => self.issue_prompt(
                        PendingAction::CreateDirectory { dir },
                        format!("Directory '{}' exists, choose different name: ", name),
                        Some(name),
                    ),
                    Err(e) => self.surface.message(&e.to_string()),
                }
            }
            (PendingAction::RenameFile { path }, PromptResponse::Text(name)) => {
                self.rename_path(path, &name);
            }
            (PendingAction::DeleteCurrent { path }, PromptResponse::Confirmed(true)) => {
                self.delete(vec![path]);
            }
            (PendingAction::DeleteMarked { paths }, PromptResponse::Confirmed(true)) => {
                self.delete(paths);
            }
            (PendingAction::MoveFiles { sources }, PromptResponse::Text(dest)) => {
                let dest = self.resolve_input(&dest);
                self.transfer(Transfer::Move, sources, dest, false);
            }
            (PendingAction::CopyFiles { sources }, PromptResponse::Text(dest)) => {
                let dest = self.resolve_input(&dest);
                self.transfer(Transfer::Copy, sources, dest, false);
            }
            (PendingAction::OverwriteMove { sources, dest }, PromptResponse::Confirmed(true)) => {
                self.transfer(Transfer::Move, sources, dest, true);
            }
            (PendingAction::OverwriteCopy { sources, dest }, PromptResponse::Confirmed(true)) => {
                self.transfer(Transfer::Copy, sources, dest, true);
            }
            (PendingAction::Compress { source }, PromptResponse::Text(dest)) => {
                let dest = self.resolve_input(&dest);
                self.start_archive(ArchiveOp::Compress, source, dest);
            }
            (PendingAction::Decompress { archive }, PromptResponse::Text(dest)) => {
                let dest = self.resolve_input(&dest);
                self.start_archive(ArchiveOp::Decompress, archive, dest);
            }
            (action, response) => {
                warn!(
                    "SESSION_PROMPT: response {:?} does not answer {}",
                    response,
                    action.tag()
                );
            }
        }
    }

    // ---- direct mutations ----

    pub fn create_file(&mut self, name: &str) -> Result<PathBuf> {
        let path = ops::create_file(self.dir(), name)?;
        self.after_create(path.clone(), "file");
        Ok(path)
    }

    pub fn create_directory(&mut self, name: &str) -> Result<PathBuf> {
        let path = ops::create_directory(self.dir(), name)?;
        self.after_create(path.clone(), "directory");
        Ok(path)
    }

    fn after_create(&mut self, path: PathBuf, what: &str) {
        self.surface
            .message(&format!("Created {} {}", what, path.display()));
        self.pending_select = Some(path);
        self.refresh();
    }

    /// Renames `path` in place; a taken name re-prompts.
    pub fn rename_path(&mut self, path: PathBuf, new_name: &str) {
        if file_name(&path) == new_name {
            self.surface
                .message("Same as original name, the file name remains unchanged.");
            return;
        }

        match ops::rename(&path, new_name) {
            Ok(target) => {
                if self.marked.remove(&path) {
                    self.marked.insert(target.clone());
                }
                self.pending_select = Some(target);
                self.refresh();
                self.surface.message(&format!("Rename to '{}'", new_name));
            }
            Err(Error::Collision(_)) => {
                self.issue_prompt(
                    PendingAction::RenameFile { path },
                    format!("File name '{}' exists, choose different name: ", new_name),
                    Some(new_name.to_string()),
                );
            }
            Err(e) => self.surface.message(&e.to_string()),
        }
    }

    /// Deletes `paths`, then selects the nearest surviving neighbour.
    pub fn delete(&mut self, paths: Vec<PathBuf>) {
        let doomed: HashSet<PathBuf> = paths.iter().cloned().collect();
        let neighbor = ops::neighbor_after_delete(
            self.snapshot.entries(),
            &doomed,
            self.snapshot.selected_index(),
        );

        let outcome = ops::delete_paths(&paths);
        for path in &outcome.deleted {
            self.marked.remove(path);
        }
        self.pending_select = neighbor;
        self.refresh();

        match (outcome.deleted.as_slice(), outcome.failed.as_slice()) {
            ([single], []) => self
                .surface
                .message(&format!("Delete file {} success.", single.display())),
            (_, []) => self.surface.message("Delete selected files success."),
            (deleted, failed) => {
                let reasons: Vec<String> = failed.iter().map(|(_, e)| e.to_string()).collect();
                self.surface.message(&format!(
                    "Deleted {} file(s), {} failed: {}",
                    deleted.len(),
                    failed.len(),
                    reasons.join("; ")
                ));
            }
        }
    }

    /// Moves or copies `sources` to `dest`. Existing targets ask for an
    /// overwrite confirmation unless `overwrite` is already granted.
    pub fn transfer_paths(&mut self, copy: bool, sources: Vec<PathBuf>, dest: PathBuf, overwrite: bool) {
        let kind = if copy { Transfer::Copy } else { Transfer::Move };
        self.transfer(kind, sources, dest, overwrite);
    }

    fn transfer(&mut self, kind: Transfer, sources: Vec<PathBuf>, dest: PathBuf, overwrite: bool) {
        let plan = match ops::plan_transfer(&sources, &dest) {
            Ok(plan) => plan,
            Err(e) => {
                self.surface.message(&e.to_string());
                return;
            }
        };

        let taken = ops::collisions(&plan);
        if !overwrite && !taken.is_empty() {
            let message = format!(
                "{} file(s) already exist in {}, overwrite?",
                taken.len(),
                dest.display()
            );
            let action = match kind {
                Transfer::Move => PendingAction::OverwriteMove { sources, dest },
                Transfer::Copy => PendingAction::OverwriteCopy { sources, dest },
            };
            self.issue_prompt(action, message, None);
            return;
        }

        let result = match kind {
            Transfer::Move => ops::move_paths(&sources, &dest, overwrite),
            Transfer::Copy => ops::copy_paths(&sources, &dest, overwrite),
        };
        match result {
            Ok(targets) => {
                if kind == Transfer::Move {
                    for source in &sources {
                        self.marked.remove(source);
                    }
                }
                self.pending_select = targets
                    .iter()
                    .find(|target| target.parent() == Some(self.dir()))
                    .cloned();
                self.refresh();
                self.surface.message(&format!(
                    "{} {} file(s) to {}",
                    kind.verb(),
                    targets.len(),
                    dest.display()
                ));
            }
            Err(e) => {
                self.refresh();
                self.surface.message(&e.to_string());
            }
        }
    }

    /// Runs compression or extraction as a cancelable task.
    pub fn start_archive(&mut self, op: ArchiveOp, source: PathBuf, dest: PathBuf) -> Option<TaskId> {
        let results = self.sender.clone();
        let spawned = self.tasks.spawn(TaskKind::Archive, None, move |task, token| {
            let progress = |percent| {
                let _ = results.send(WorkerMessage::ArchiveProgress { task, percent });
            };
            let outcome = match op {
                ArchiveOp::Compress => archive::compress(&source, &dest, &token, progress),
                ArchiveOp::Decompress => archive::decompress(&source, &dest, &token, progress),
            };
            let outcome = outcome.map(|_| dest).map_err(|e| e.to_string());
            let _ = results.send(WorkerMessage::ArchiveDone { task, op, outcome });
        });

        match spawned {
            Ok(task) => {
                info!("SESSION_ARCHIVE: {:?} task {}", op, task);
                Some(task)
            }
            Err(e) => {
                self.surface.message(&e.to_string());
                None
            }
        }
    }

    pub fn cancel_task(&mut self, task: TaskId) -> bool {
        self.tasks.cancel(task)
    }

    // ---- worker results ----

    /// Waits up to `timeout` for worker results, applies everything queued,
    /// joins finished tasks and expires changed highlights. Returns the
    /// number of results applied.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let mut handled = 0;
        if let Ok(message) = self.receiver.recv_timeout(timeout) {
            self.handle_message(message);
            handled += 1;
            while let Ok(message) = self.receiver.try_recv() {
                self.handle_message(message);
                handled += 1;
            }
        }

        self.tasks.reap();
        self.expire_changed(Instant::now());
        handled
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Preview { request, preview } => {
                if !self.preview_enabled || !self.preview.is_current(request) {
                    debug!("SESSION_PREVIEW: dropping stale {}", preview.path.display());
                    return;
                }
                self.surface.set_preview(&preview);
            }
            WorkerMessage::SearchBatch {
                task,
                entries,
                first,
            } => {
                if self.search_task != Some(task) || !self.is_searching() {
                    return;
                }
                let before = self.snapshot.len();
                self.snapshot = self.snapshot.appended(&entries);
                let added = &self.snapshot.entries()[before..];
                if added.is_empty() {
                    return;
                }
                let added = added.to_vec();
                self.ensure_icons_for(&added);
                self.surface.append_search_results(&added);
                if first {
                    self.request_selected_preview();
                }
            }
            WorkerMessage::SearchDone {
                task,
                dir,
                pattern,
                match_count,
            } => {
                if self.search_task != Some(task) {
                    return;
                }
                self.search_task = None;
                self.surface.finish_search(&dir, &pattern, match_count);
                if match_count == 0 {
                    self.surface
                        .message(&format!("No file matches '{}' in {}", pattern, dir.display()));
                }
            }
            WorkerMessage::DirectoryChanged(dir) => {
                if dir != self.dir() || self.is_searching() {
                    return;
                }
                debug!("SESSION_WATCH: {} changed on disk", dir.display());
                self.refresh();
            }
            WorkerMessage::RepoInfo { dir, line } => {
                if dir == self.dir() {
                    self.surface.update_info_line(&line);
                }
            }
            WorkerMessage::ArchiveProgress { task, percent } => {
                self.surface.archive_progress(task, percent);
            }
            WorkerMessage::ArchiveDone { task, op, outcome } => match outcome {
                Ok(path) => {
                    info!("SESSION_ARCHIVE: task {} wrote {}", task, path.display());
                    if path.parent() == Some(self.dir()) {
                        self.pending_select = Some(path.clone());
                    }
                    if !self.is_searching() {
                        self.refresh();
                    }
                    let verb = match op {
                        ArchiveOp::Compress => "Compressed to",
                        ArchiveOp::Decompress => "Extracted to",
                    };
                    self.surface.message(&format!("{} {}", verb, path.display()));
                }
                Err(reason) => {
                    warn!("SESSION_ARCHIVE: task {} failed: {}", task, reason);
                    self.surface.message(&reason);
                }
            },
        }
    }

    fn expire_changed(&mut self, now: Instant) {
        let expired: Vec<PathBuf> = self
            .changed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let indices: Vec<usize> = expired
            .iter()
            .filter_map(|path| {
                self.changed.remove(path);
                self.snapshot.index_of(path)
            })
            .collect();
        if !indices.is_empty() {
            self.surface.clear_changed(&indices);
        }
    }

    // ---- helpers ----

    fn selected_path(&self) -> Option<PathBuf> {
        self.snapshot.selected_entry().map(|entry| entry.path.clone())
    }

    fn operation_sources(&self) -> Vec<PathBuf> {
        let marked = self.marked_paths();
        if marked.is_empty() {
            self.selected_path().into_iter().collect()
        } else {
            marked
        }
    }

    fn dir_input(&self) -> String {
        let mut input = self.dir().to_string_lossy().into_owned();
        if !input.ends_with('/') {
            input.push('/');
        }
        input
    }

    /// Prompt input as a path: `~` expanded, relative to the session directory.
    fn resolve_input(&self, input: &str) -> PathBuf {
        let path = expand_home(input.trim());
        if path.is_absolute() {
            path
        } else {
            self.dir().join(path)
        }
    }

    fn changed_indices(&self) -> Vec<usize> {
        self.snapshot
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| self.changed.contains_key(&entry.path))
            .map(|(index, _)| index)
            .collect()
    }

    fn issue_prompt(&mut self, action: PendingAction, message: String, initial: Option<String>) {
        let request = self.prompts.issue(action, message, initial);
        self.surface.prompt(&request);
    }

    fn render(&mut self) {
        self.surface.change_path(
            self.state.dir(),
            self.snapshot.entries(),
            self.snapshot.selected_index(),
        );
    }

    fn preview_options(&self) -> PreviewOptions {
        PreviewOptions {
            show_hidden: self.show_hidden,
            sort: self.sort,
            max_text_bytes: self.config.preview_max_text_bytes,
            theme: self.config.highlight_theme.clone(),
        }
    }

    fn request_selected_preview(&mut self) {
        if !self.preview_enabled {
            return;
        }
        let path = self.selected_path().unwrap_or_default();
        self.preview.request(path, self.preview_options());
    }

    fn ensure_icons(&mut self) {
        let entries = self.snapshot.entries().to_vec();
        self.ensure_icons_for(&entries);
    }

    /// Renders icons for mimes not seen before on the icon worker.
    fn ensure_icons_for(&mut self, entries: &[FileEntry]) {
        let Some(icons) = self.icons.clone() else {
            return;
        };
        let mut fresh = Vec::new();
        for entry in entries {
            if self.icons_requested.insert(entry.mime.clone()) {
                fresh.push(entry.mime.clone());
            }
        }
        if fresh.is_empty() {
            return;
        }

        let spawned = self.tasks.spawn(TaskKind::Icons, None, move |_, token| {
            for mime in fresh {
                if token.is_cancelled() {
                    return;
                }
                icons.ensure(&mime);
            }
        });
        if let Err(e) = spawned {
            debug!("SESSION_ICONS: could not start icon task: {}", e);
        }
    }

    fn spawn_info(&mut self, dir: PathBuf) {
        self.tasks.cancel_kind(TaskKind::Info);
        let results = self.sender.clone();
        let spawned = self.tasks.spawn(TaskKind::Info, None, move |_, token| {
            let line = RepoInfo::read(&dir)
                .map(|info| info.info_line())
                .unwrap_or_default();
            if !token.is_cancelled() {
                let _ = results.send(WorkerMessage::RepoInfo { dir, line });
            }
        });
        if let Err(e) = spawned {
            debug!("SESSION_INFO: could not start info task: {}", e);
        }
    }

    fn cancel_search(&mut self) {
        if let Some(task) = self.search_task.take() {
            self.tasks.cancel(task);
        }
    }

    /// Cancels and joins every worker, then releases the watcher and the icon
    /// cache. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.search_task = None;
        self.tasks.drain();
        self.preview.shutdown();
        self.watcher.stop();
        self.prompts.clear();
        self.icons = None;
        info!("SESSION_SHUTDOWN: {}", self.dir().display());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
