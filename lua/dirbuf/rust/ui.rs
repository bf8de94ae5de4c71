//! Boundary towards the host editor: UI updates going out, prompts going out,
//! and the queue-backed surface used by the Lua bridge and the tests.

use crate::types::{BatchRenameItem, FileEntry, Preview};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// yes-or-no
    Confirm,
    Text,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub tag: String,
    pub kind: PromptKind,
    pub message: String,
    pub initial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    Confirmed(bool),
    Text(String),
    Cancelled,
}

/// Calls the session makes on the host UI.
pub trait UiSurface: Send {
    fn change_path(&mut self, dir: &Path, entries: &[FileEntry], selected: usize);
    fn append_search_results(&mut self, entries: &[FileEntry]);
    fn finish_search(&mut self, dir: &Path, pattern: &str, match_count: usize);
    fn set_preview(&mut self, preview: &Preview);
    fn mark_changed(&mut self, indices: &[usize]);
    fn clear_changed(&mut self, indices: &[usize]);
    fn update_info_line(&mut self, text: &str);
    fn message(&mut self, text: &str);
    fn prompt(&mut self, request: &PromptRequest);
    fn open_batch_rename(&mut self, items: &[BatchRenameItem]);
    fn archive_progress(&mut self, task: u64, percent: u8);
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ChangePath {
        dir: PathBuf,
        entries: Vec<FileEntry>,
        selected: usize,
    },
    AppendSearchResults(Vec<FileEntry>),
    FinishSearch {
        dir: PathBuf,
        pattern: String,
        match_count: usize,
    },
    SetPreview(Preview),
    MarkChanged(Vec<usize>),
    ClearChanged(Vec<usize>),
    UpdateInfoLine(String),
    Message(String),
    Prompt(PromptRequest),
    BatchRename(Vec<BatchRenameItem>),
    ArchiveProgress { task: u64, percent: u8 },
}

/// Surface that queues every call as a `UiEvent`. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Arc<Mutex<VecDeque<UiEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: UiEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push_back(event),
            Err(poisoned) => poisoned.into_inner().push_back(event),
        }
    }

    pub fn drain(&self) -> Vec<UiEvent> {
        match self.events.lock() {
            Ok(mut events) => events.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn snapshot(&self) -> Vec<UiEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl UiSurface for EventQueue {
    fn change_path(&mut self, dir: &Path, entries: &[FileEntry], selected: usize) {
        self.push(UiEvent::ChangePath {
            dir: dir.to_path_buf(),
            entries: entries.to_vec(),
            selected,
        });
    }

    fn append_search_results(&mut self, entries: &[FileEntry]) {
        self.push(UiEvent::AppendSearchResults(entries.to_vec()));
    }

    fn finish_search(&mut self, dir: &Path, pattern: &str, match_count: usize) {
        self.push(UiEvent::FinishSearch {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
            match_count,
        });
    }

    fn set_preview(&mut self, preview: &Preview) {
        self.push(UiEvent::SetPreview(preview.clone()));
    }

    fn mark_changed(&mut self, indices: &[usize]) {
        self.push(UiEvent::MarkChanged(indices.to_vec()));
    }

    fn clear_changed(&mut self, indices: &[usize]) {
        self.push(UiEvent::ClearChanged(indices.to_vec()));
    }

    fn update_info_line(&mut self, text: &str) {
        self.push(UiEvent::UpdateInfoLine(text.to_string()));
    }

    fn message(&mut self, text: &str) {
        self.push(UiEvent::Message(text.to_string()));
    }

    fn prompt(&mut self, request: &PromptRequest) {
        self.push(UiEvent::Prompt(request.clone()));
    }

    fn open_batch_rename(&mut self, items: &[BatchRenameItem]) {
        self.push(UiEvent::BatchRename(items.to_vec()));
    }

    fn archive_progress(&mut self, task: u64, percent: u8) {
        self.push(UiEvent::ArchiveProgress { task, percent });
    }
}

#[cfg(feature = "lua")]
mod lua_conversions {
    use super::*;
    use mlua::prelude::*;

    fn path_string(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    impl IntoLua for UiEvent {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            let table = lua.create_table()?;
            match self {
                UiEvent::ChangePath {
                    dir,
                    entries,
                    selected,
                } => {
                    table.set("event", "change_path")?;
                    table.set("dir", path_string(&dir))?;
                    table.set("entries", entries)?;
                    // Lua indices are 1-based
                    table.set("selected", selected + 1)?;
                }
                UiEvent::AppendSearchResults(entries) => {
                    table.set("event", "append_search_results")?;
                    table.set("entries", entries)?;
                }
                UiEvent::FinishSearch {
                    dir,
                    pattern,
                    match_count,
                } => {
                    table.set("event", "finish_search")?;
                    table.set("dir", path_string(&dir))?;
                    table.set("pattern", pattern)?;
                    table.set("match_count", match_count)?;
                }
                UiEvent::SetPreview(preview) => {
                    table.set("event", "set_preview")?;
                    table.set("preview", preview)?;
                }
                UiEvent::MarkChanged(indices) => {
                    table.set("event", "mark_changed")?;
                    table.set("indices", indices.into_iter().map(|i| i + 1).collect::<Vec<_>>())?;
                }
                UiEvent::ClearChanged(indices) => {
                    table.set("event", "clear_changed")?;
                    table.set("indices", indices.into_iter().map(|i| i + 1).collect::<Vec<_>>())?;
                }
                UiEvent::UpdateInfoLine(text) => {
                    table.set("event", "update_info_line")?;
                    table.set("text", text)?;
                }
                UiEvent::Message(text) => {
                    table.set("event", "message")?;
                    table.set("text", text)?;
                }
                UiEvent::Prompt(request) => {
                    table.set("event", "prompt")?;
                    table.set("tag", request.tag)?;
                    table.set(
                        "kind",
                        match request.kind {
                            PromptKind::Confirm => "yes-or-no",
                            PromptKind::Text => "string",
                            PromptKind::Path => "file",
                        },
                    )?;
                    table.set("message", request.message)?;
                    table.set("initial", request.initial)?;
                }
                UiEvent::BatchRename(items) => {
                    table.set("event", "batch_rename")?;
                    table.set("items", items)?;
                }
                UiEvent::ArchiveProgress { task, percent } => {
                    table.set("event", "archive_progress")?;
                    table.set("task", task)?;
                    table.set("percent", percent)?;
                }
            }
            Ok(LuaValue::Table(table))
        }
    }
}
