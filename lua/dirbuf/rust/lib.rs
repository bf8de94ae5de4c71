pub mod archive;
pub mod browser;
pub mod config;
pub mod error;
pub mod git;
pub mod highlight;
pub mod host;
pub mod icons;
pub mod log;
pub mod mime;
pub mod ops;
pub mod path_utils;
pub mod prompt;
pub mod session;
pub mod tasks;
pub mod types;
pub mod ui;

#[cfg(feature = "lua")]
mod lua_api;

pub use browser::{Snapshot, SortState, WorkerMessage};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use host::{HostedSession, SessionHost};
pub use session::{Session, ViewState};
pub use types::{BatchRenameItem, EntryKind, FileEntry, Preview, PreviewBody, SortKey};
pub use ui::{EventQueue, PromptKind, PromptRequest, PromptResponse, UiEvent, UiSurface};

#[cfg(feature = "lua")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
