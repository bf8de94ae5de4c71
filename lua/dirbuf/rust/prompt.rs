use crate::ui::{PromptKind, PromptRequest};
use std::collections::HashMap;
use std::path::PathBuf;

pub const CREATE_FILE: &str = "create_file";
pub const CREATE_DIRECTORY: &str = "create_directory";
pub const RENAME_FILE: &str = "rename_file";
pub const DELETE_CURRENT_FILE: &str = "delete_current_file";
pub const DELETE_MARKED: &str = "delete_marked";
pub const MOVE_FILES: &str = "move_files";
pub const COPY_FILES: &str = "copy_files";
pub const OVERWRITE_MOVE: &str = "overwrite_move";
pub const OVERWRITE_COPY: &str = "overwrite_copy";
pub const COMPRESS: &str = "compress";
pub const DECOMPRESS: &str = "decompress";

/// What to do with the answer to an outstanding prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    CreateFile { dir: PathBuf },
    CreateDirectory { dir: PathBuf },
    RenameFile { path: PathBuf },
    DeleteCurrent { path: PathBuf },
    DeleteMarked { paths: Vec<PathBuf> },
    MoveFiles { sources: Vec<PathBuf> },
    CopyFiles { sources: Vec<PathBuf> },
    OverwriteMove { sources: Vec<PathBuf>, dest: PathBuf },
    OverwriteCopy { sources: Vec<PathBuf>, dest: PathBuf },
    Compress { source: PathBuf },
    Decompress { archive: PathBuf },
}

impl PendingAction {
    pub fn tag(&self) -> &'static str {
        match self {
            PendingAction::CreateFile { .. } => CREATE_FILE,
            PendingAction::CreateDirectory { .. } => CREATE_DIRECTORY,
            PendingAction::RenameFile { .. } => RENAME_FILE,
            PendingAction::DeleteCurrent { .. } => DELETE_CURRENT_FILE,
            PendingAction::DeleteMarked { .. } => DELETE_MARKED,
            PendingAction::MoveFiles { .. } => MOVE_FILES,
            PendingAction::CopyFiles { .. } => COPY_FILES,
            PendingAction::OverwriteMove { .. } => OVERWRITE_MOVE,
            PendingAction::OverwriteCopy { .. } => OVERWRITE_COPY,
            PendingAction::Compress { .. } => COMPRESS,
            PendingAction::Decompress { .. } => DECOMPRESS,
        }
    }

    pub fn prompt_kind(&self) -> PromptKind {
        match self {
            PendingAction::CreateFile { .. }
            | PendingAction::CreateDirectory { .. }
            | PendingAction::RenameFile { .. } => PromptKind::Text,
            PendingAction::MoveFiles { .. }
            | PendingAction::CopyFiles { .. }
            | PendingAction::Compress { .. }
            | PendingAction::Decompress { .. } => PromptKind::Path,
            PendingAction::DeleteCurrent { .. }
            | PendingAction::DeleteMarked { .. }
            | PendingAction::OverwriteMove { .. }
            | PendingAction::OverwriteCopy { .. } => PromptKind::Confirm,
        }
    }
}

/// Outstanding prompts keyed by tag. Issuing a tag again replaces the older
/// action, so a response always resolves against the latest question.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    pending: HashMap<String, PendingAction>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(
        &mut self,
        action: PendingAction,
        message: String,
        initial: Option<String>,
    ) -> PromptRequest {
        let request = PromptRequest {
            tag: action.tag().to_string(),
            kind: action.prompt_kind(),
            message,
            initial,
        };
        self.pending.insert(request.tag.clone(), action);
        request
    }

    pub fn take(&mut self, tag: &str) -> Option<PendingAction> {
        self.pending.remove(tag)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_take_by_tag() {
        let mut registry = PromptRegistry::new();
        let request = registry.issue(
            PendingAction::RenameFile {
                path: PathBuf::from("/tmp/a"),
            },
            "Rename 'a' to: ".to_string(),
            Some("a".to_string()),
        );

        assert_eq!(request.tag, RENAME_FILE);
        assert_eq!(request.kind, PromptKind::Text);
        assert!(registry.take(CREATE_FILE).is_none());
        assert_eq!(
            registry.take(RENAME_FILE),
            Some(PendingAction::RenameFile {
                path: PathBuf::from("/tmp/a")
            })
        );
        assert!(registry.take(RENAME_FILE).is_none());
    }

    #[test]
    fn test_reissue_replaces_action() {
        let mut registry = PromptRegistry::new();
        registry.issue(
            PendingAction::DeleteCurrent {
                path: PathBuf::from("/a"),
            },
            String::new(),
            None,
        );
        registry.issue(
            PendingAction::DeleteCurrent {
                path: PathBuf::from("/b"),
            },
            String::new(),
            None,
        );
        assert_eq!(
            registry.take(DELETE_CURRENT_FILE),
            Some(PendingAction::DeleteCurrent {
                path: PathBuf::from("/b")
            })
        );
    }
}
