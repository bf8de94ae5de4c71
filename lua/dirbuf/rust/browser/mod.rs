// Snapshot model and the background workers feeding the session

pub mod preview;
pub mod search;
pub mod snapshot;
pub mod watcher;

pub use preview::{fetch_preview, PreviewOptions, PreviewWorker};
pub use search::{find_external_tool, spawn_search, SearchRequest};
pub use snapshot::{
    compile_rule, filter_by_pattern, list_directory, read_sorted, sort_entries, Snapshot,
    SortState,
};
pub use watcher::DirectoryWatcher;

use crate::tasks::TaskId;
use crate::types::{FileEntry, Preview};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOp {
    Compress,
    Decompress,
}

/// Results workers hand back to the session thread. Workers never touch the
/// snapshot; the session applies these in `pump`.
#[derive(Debug)]
pub enum WorkerMessage {
    Preview {
        request: u64,
        preview: Preview,
    },
    SearchBatch {
        task: TaskId,
        entries: Vec<FileEntry>,
        first: bool,
    },
    SearchDone {
        task: TaskId,
        dir: PathBuf,
        pattern: String,
        match_count: usize,
    },
    DirectoryChanged(PathBuf),
    RepoInfo {
        dir: PathBuf,
        line: String,
    },
    ArchiveProgress {
        task: TaskId,
        percent: u8,
    },
    ArchiveDone {
        task: TaskId,
        op: ArchiveOp,
        outcome: Result<PathBuf, String>,
    },
}
