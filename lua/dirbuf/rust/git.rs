use chrono::{Local, TimeZone};
use git2::{Repository, Status, StatusOptions};
use std::path::Path;
use tracing::{debug, error};

/// Last-commit and branch summary for the repository containing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub branch: Option<String>,
    pub short_id: String,
    pub summary: String,
    /// Seconds since the epoch.
    pub time: i64,
    pub modified_count: usize,
}

impl RepoInfo {
    /// Best effort: `None` for a directory outside any repository, an unborn
    /// HEAD, or any libgit2 failure.
    pub fn read(dir: &Path) -> Option<Self> {
        let repository = Repository::discover(dir).ok()?;
        let head = repository.head().ok()?;
        let branch = if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        };

        let commit = head
            .peel_to_commit()
            .map_err(|e| {
                debug!("GIT_INFO: HEAD of {} has no commit: {}", dir.display(), e);
                e
            })
            .ok()?;

        let short_id = commit
            .as_object()
            .short_id()
            .ok()
            .and_then(|buf| buf.as_str().map(str::to_string))
            .unwrap_or_else(|| commit.id().to_string().chars().take(7).collect());

        Some(Self {
            branch,
            short_id,
            summary: commit.summary().unwrap_or_default().to_string(),
            time: commit.time().seconds(),
            modified_count: count_modified(&repository),
        })
    }

    pub fn info_line(&self) -> String {
        let when = Local
            .timestamp_opt(self.time, 0)
            .single()
            .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        let mut line = match &self.branch {
            Some(branch) => format!("{} | {} {}", branch, self.short_id, self.summary),
            None => format!("(detached) {} {}", self.short_id, self.summary),
        };
        if !when.is_empty() {
            line.push_str(&format!(" | {}", when));
        }
        if self.modified_count > 0 {
            line.push_str(&format!(" | {} modified", self.modified_count));
        }
        line
    }
}

fn count_modified(repository: &Repository) -> usize {
    let statuses = repository
        .statuses(Some(&mut StatusOptions::new().include_untracked(true)))
        .map_err(|e| {
            error!("Failed to get git statuses: {}", e);
            e
        });

    match statuses {
        Ok(statuses) => statuses
            .iter()
            .filter(|entry| is_modified_status(entry.status()))
            .count(),
        Err(_) => 0,
    }
}

#[inline]
pub fn is_modified_status(status: Status) -> bool {
    status.intersects(
        Status::WT_MODIFIED
            | Status::INDEX_MODIFIED
            | Status::WT_NEW
            | Status::INDEX_NEW
            | Status::WT_RENAMED
            | Status::WT_DELETED
            | Status::INDEX_DELETED,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit_file(repository: &Repository, name: &str, message: &str) {
        let workdir = repository.workdir().unwrap().to_path_buf();
        std::fs::write(workdir.join(name), message).unwrap();

        let mut index = repository.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repository.find_tree(tree_id).unwrap();
        let signature = Signature::now("Test", "test@example.com").unwrap();

        let parent = repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repository
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_reads_branch_and_last_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        commit_file(&repository, "a.txt", "first commit");
        commit_file(&repository, "b.txt", "second commit");
        std::fs::write(dir.path().join("untracked.txt"), "x").unwrap();

        let nested = dir.path().join("sub");
        std::fs::create_dir(&nested).unwrap();

        let info = RepoInfo::read(&nested).unwrap();
        assert_eq!(info.summary, "second commit");
        assert!(info.branch.is_some());
        assert!(!info.short_id.is_empty());
        assert_eq!(info.modified_count, 1);

        let line = info.info_line();
        assert!(line.contains("second commit"));
        assert!(line.contains("1 modified"));
    }

    #[test]
    fn test_non_repository_and_unborn_head_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoInfo::read(dir.path()).is_none());

        Repository::init(dir.path()).unwrap();
        assert!(RepoInfo::read(dir.path()).is_none());
    }

    #[test]
    fn test_modified_status_flags() {
        assert!(is_modified_status(Status::WT_NEW));
        assert!(is_modified_status(Status::INDEX_MODIFIED));
        assert!(!is_modified_status(Status::CURRENT));
        assert!(!is_modified_status(Status::IGNORED));
    }
}
