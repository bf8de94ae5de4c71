//! Filesystem mutations behind the session's create, rename, move, copy,
//! delete and batch-rename commands. Every function checks for collisions
//! before touching the disk and reports failures as `Error` values; the
//! session turns them into user-visible messages.

use crate::error::{Error, Result};
use crate::path_utils::resolve_destination;
use crate::types::{BatchRenameItem, FileEntry};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

fn validate_name(name: &str) -> Result<&Path> {
    let trimmed = name.trim();
    let candidate = Path::new(trimmed);
    let valid = !trimmed.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(candidate)
    } else {
        Err(Error::InvalidPath(name.to_string()))
    }
}

/// Creates an empty file `name` (which may contain subdirectories) under `dir`.
pub fn create_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let target = dir.join(validate_name(name)?);
    if target.symlink_metadata().is_ok() {
        return Err(Error::Collision(target));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::from_io(e, parent))?;
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|e| Error::from_io(e, &target))?;
    info!("OPS_CREATE_FILE: {}", target.display());
    Ok(target)
}

pub fn create_directory(dir: &Path, name: &str) -> Result<PathBuf> {
    let target = dir.join(validate_name(name)?);
    if target.symlink_metadata().is_ok() {
        return Err(Error::Collision(target));
    }
    fs::create_dir_all(&target).map_err(|e| Error::from_io(e, &target))?;
    info!("OPS_CREATE_DIR: {}", target.display());
    Ok(target)
}

/// Renames `path` to `new_name` inside the same directory.
pub fn rename(path: &Path, new_name: &str) -> Result<PathBuf> {
    if path.symlink_metadata().is_err() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let name = validate_name(new_name)?;
    if name.components().count() != 1 {
        return Err(Error::InvalidPath(new_name.to_string()));
    }

    let target = path.with_file_name(name);
    if target == path {
        return Ok(target);
    }
    if target.symlink_metadata().is_ok() {
        return Err(Error::Collision(target));
    }

    fs::rename(path, &target).map_err(|e| Error::from_io(e, path))?;
    info!("OPS_RENAME: {} -> {}", path.display(), target.display());
    Ok(target)
}

/// Source and final target for each path of a move or copy.
pub type TransferPlan = Vec<(PathBuf, PathBuf)>;

/// Resolves final targets: an existing directory destination receives every
/// source under its basename; several sources require such a directory.
pub fn plan_transfer(sources: &[PathBuf], dest: &Path) -> Result<TransferPlan> {
    if sources.len() > 1 && !dest.is_dir() {
        return Err(Error::NotADirectory(dest.to_path_buf()));
    }

    let mut plan = Vec::with_capacity(sources.len());
    for source in sources {
        if source.symlink_metadata().is_err() {
            return Err(Error::NotFound(source.clone()));
        }
        let target = resolve_destination(source, dest);
        if target.starts_with(source) {
            return Err(Error::InvalidPath(format!(
                "cannot place {} inside itself",
                source.display()
            )));
        }
        if let Some(parent) = target.parent() {
            if !parent.is_dir() {
                return Err(Error::NotADirectory(parent.to_path_buf()));
            }
        }
        plan.push((source.clone(), target));
    }
    Ok(plan)
}

/// Targets in `plan` that already exist.
pub fn collisions(plan: &TransferPlan) -> Vec<PathBuf> {
    plan.iter()
        .filter(|(_, target)| target.symlink_metadata().is_ok())
        .map(|(_, target)| target.clone())
        .collect()
}

fn clear_target(target: &Path, overwrite: bool) -> Result<()> {
    let Ok(metadata) = target.symlink_metadata() else {
        return Ok(());
    };
    if !overwrite {
        return Err(Error::Collision(target.to_path_buf()));
    }
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    removed.map_err(|e| Error::from_io(e, target))
}

pub fn move_paths(sources: &[PathBuf], dest: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    let plan = plan_transfer(sources, dest)?;
    if !overwrite {
        if let Some(taken) = collisions(&plan).into_iter().next() {
            return Err(Error::Collision(taken));
        }
    }

    let mut moved = Vec::with_capacity(plan.len());
    for (source, target) in plan {
        clear_target(&target, overwrite)?;
        if let Err(e) = fs::rename(&source, &target) {
            // rename(2) cannot cross filesystems
            debug!("OPS_MOVE: rename failed ({}), copying {}", e, source.display());
            copy_recursive(&source, &target)?;
            remove_path(&source)?;
        }
        info!("OPS_MOVE: {} -> {}", source.display(), target.display());
        moved.push(target);
    }
    Ok(moved)
}

pub fn copy_paths(sources: &[PathBuf], dest: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    let plan = plan_transfer(sources, dest)?;
    if !overwrite {
        if let Some(taken) = collisions(&plan).into_iter().next() {
            return Err(Error::Collision(taken));
        }
    }

    let mut copied = Vec::with_capacity(plan.len());
    for (source, target) in plan {
        clear_target(&target, overwrite)?;
        copy_recursive(&source, &target)?;
        info!("OPS_COPY: {} -> {}", source.display(), target.display());
        copied.push(target);
    }
    Ok(copied)
}

/// Copies `source` to exactly `target`; directories are copied recursively.
fn copy_recursive(source: &Path, target: &Path) -> Result<()> {
    let metadata = source
        .symlink_metadata()
        .map_err(|e| Error::from_io(e, source))?;

    if metadata.file_type().is_symlink() {
        return copy_symlink(source, target);
    }
    if !metadata.is_dir() {
        fs::copy(source, target).map_err(|e| Error::from_io(e, source))?;
        return Ok(());
    }

    fs::create_dir_all(target).map_err(|e| Error::from_io(e, target))?;
    for entry in fs::read_dir(source).map_err(|e| Error::from_io(e, source))? {
        let entry = entry?;
        copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source).map_err(|e| Error::from_io(e, source))?;
    std::os::unix::fs::symlink(link, target).map_err(|e| Error::from_io(e, target))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target).map_err(|e| Error::from_io(e, source))?;
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    let metadata = path
        .symlink_metadata()
        .map_err(|e| Error::from_io(e, path))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| Error::from_io(e, path))
}

#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, Error)>,
}

/// Deletes every path it can; one failure does not stop the rest.
pub fn delete_paths(paths: &[PathBuf]) -> DeleteOutcome {
    let mut outcome = DeleteOutcome::default();
    for path in paths {
        match remove_path(path) {
            Ok(()) => {
                info!("OPS_DELETE: {}", path.display());
                outcome.deleted.push(path.clone());
            }
            Err(e) => {
                warn!("OPS_DELETE: {} failed: {}", path.display(), e);
                outcome.failed.push((path.clone(), e));
            }
        }
    }
    outcome
}

/// Entry to select once `deleted` is gone: the first survivor at or after
/// `selected`, else the closest survivor before it.
pub fn neighbor_after_delete(
    entries: &[FileEntry],
    deleted: &HashSet<PathBuf>,
    selected: usize,
) -> Option<PathBuf> {
    let start = selected.min(entries.len());
    entries[start..]
        .iter()
        .find(|entry| !deleted.contains(&entry.path))
        .or_else(|| {
            entries[..start]
                .iter()
                .rev()
                .find(|entry| !deleted.contains(&entry.path))
        })
        .map(|entry| entry.path.clone())
}

#[derive(Debug)]
pub struct RenameOutcome {
    pub id: u64,
    pub from: PathBuf,
    pub result: Result<PathBuf>,
}

/// Applies edited names from the host. Edits are matched to `batch` by `id`;
/// the path always comes from `batch`, never from the edit.
pub fn batch_rename(batch: &[BatchRenameItem], edits: &[BatchRenameItem]) -> Vec<RenameOutcome> {
    let originals: HashMap<u64, &BatchRenameItem> = batch.iter().map(|item| (item.id, item)).collect();

    let mut outcomes = Vec::new();
    for edit in edits {
        let Some(original) = originals.get(&edit.id) else {
            warn!("OPS_BATCH_RENAME: unknown id {}", edit.id);
            continue;
        };
        if edit.new_name == original.old_name {
            continue;
        }
        outcomes.push(RenameOutcome {
            id: edit.id,
            from: original.path.clone(),
            result: rename(&original.path, &edit.new_name),
        });
    }
    outcomes
}

/// Items for a batch rename of `entries`, ids assigned from `first_id`.
pub fn batch_items(entries: &[FileEntry], first_id: u64) -> Vec<BatchRenameItem> {
    entries
        .iter()
        .enumerate()
        .map(|(ordinal, entry)| {
            let old_name = entry
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.name.clone());
            BatchRenameItem {
                ordinal: ordinal + 1,
                id: first_id + ordinal as u64,
                path: entry.path.clone(),
                new_name: old_name.clone(),
                old_name,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{read_sorted, SortState};
    use crate::types::SortKey;

    #[test]
    fn test_create_file_and_directory_collide() {
        let dir = tempfile::tempdir().unwrap();
        let file = create_file(dir.path(), "notes.md").unwrap();
        assert!(file.is_file());
        assert!(matches!(
            create_file(dir.path(), "notes.md"),
            Err(Error::Collision(_))
        ));
        assert!(matches!(
            create_directory(dir.path(), "notes.md"),
            Err(Error::Collision(_))
        ));

        let nested = create_directory(dir.path(), "a/b").unwrap();
        assert!(nested.is_dir());
        assert!(matches!(create_file(dir.path(), "../x"), Err(Error::InvalidPath(_))));
        assert!(matches!(create_file(dir.path(), "  "), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_rename_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.txt");
        fs::write(&original, "x").unwrap();
        fs::write(dir.path().join("taken"), "y").unwrap();

        assert!(matches!(rename(&original, "taken"), Err(Error::Collision(_))));
        assert!(matches!(
            rename(&dir.path().join("missing"), "z"),
            Err(Error::NotFound(_))
        ));

        let renamed = rename(&original, "b.txt").unwrap();
        assert_eq!(renamed, dir.path().join("b.txt"));
        let back = rename(&renamed, "a.txt").unwrap();
        assert_eq!(back, original);
        assert!(original.is_file());
    }

    #[test]
    fn test_copy_directory_into_existing_destination_nests_basename() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("X");
        fs::create_dir_all(source.join("inner")).unwrap();
        fs::write(source.join("inner/file.txt"), "content").unwrap();
        let dest = dir.path().join("dst");
        fs::create_dir(&dest).unwrap();

        let copied = copy_paths(&[source.clone()], &dest, false).unwrap();
        assert_eq!(copied, vec![dest.join("X")]);
        assert_eq!(
            fs::read_to_string(dest.join("X/inner/file.txt")).unwrap(),
            "content"
        );
        assert!(!dest.join("inner").exists());
        assert!(source.join("inner/file.txt").exists());

        assert!(matches!(
            copy_paths(&[source.clone()], &dest, false),
            Err(Error::Collision(_))
        ));
        fs::write(source.join("extra.txt"), "new").unwrap();
        copy_paths(&[source], &dest, true).unwrap();
        assert!(dest.join("X/extra.txt").is_file());
    }

    #[test]
    fn test_move_requires_directory_for_many_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        assert!(matches!(
            move_paths(&[a.clone(), b.clone()], &dir.path().join("nowhere"), false),
            Err(Error::NotADirectory(_))
        ));

        let dest = dir.path().join("into");
        fs::create_dir(&dest).unwrap();
        let moved = move_paths(&[a.clone(), b.clone()], &dest, false).unwrap();
        assert_eq!(moved, vec![dest.join("a"), dest.join("b")]);
        assert!(!a.exists() && !b.exists());

        assert!(matches!(
            move_paths(&[dest.clone()], &dest, false),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_move_onto_existing_file_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "new").unwrap();
        fs::write(&b, "old").unwrap();

        assert!(matches!(
            move_paths(&[a.clone()], &b, false),
            Err(Error::Collision(_))
        ));
        move_paths(&[a.clone()], &b, true).unwrap();
        assert_eq!(fs::read_to_string(&b).unwrap(), "new");
        assert!(!a.exists());
    }

    #[test]
    fn test_delete_reports_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let sub = dir.path().join("sub");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(sub.join("deep")).unwrap();

        let outcome = delete_paths(&[dir.path().join("ghost"), file.clone(), sub.clone()]);
        assert_eq!(outcome.deleted, vec![file.clone(), sub.clone()]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(outcome.failed[0].1, Error::NotFound(_)));
        assert!(!file.exists() && !sub.exists());
    }

    #[test]
    fn test_neighbor_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let entries = read_sorted(dir.path(), false, SortState::new(SortKey::Name, false)).unwrap();
        let path = |name: &str| dir.path().join(name);

        let last: HashSet<PathBuf> = [path("c")].into_iter().collect();
        assert_eq!(neighbor_after_delete(&entries, &last, 2), Some(path("b")));

        let middle: HashSet<PathBuf> = [path("b")].into_iter().collect();
        assert_eq!(neighbor_after_delete(&entries, &middle, 1), Some(path("c")));

        let all: HashSet<PathBuf> = ["a", "b", "c"].iter().map(|n| path(n)).collect();
        assert_eq!(neighbor_after_delete(&entries, &all, 0), None);
    }

    #[test]
    fn test_batch_rename_matches_by_id() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["one", "two", "three"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let entries = read_sorted(dir.path(), false, SortState::new(SortKey::Name, false)).unwrap();
        let batch = batch_items(&entries, 10);

        let two = batch.iter().find(|item| item.old_name == "two").unwrap();
        let one = batch.iter().find(|item| item.old_name == "one").unwrap();
        // edits come back reordered, with stale paths
        let edits = vec![
            BatchRenameItem {
                ordinal: 1,
                path: PathBuf::from("/elsewhere"),
                new_name: "TWO".to_string(),
                ..two.clone()
            },
            BatchRenameItem {
                ordinal: 2,
                ..one.clone()
            },
            BatchRenameItem {
                id: 999,
                new_name: "ghost".to_string(),
                ..one.clone()
            },
        ];

        let outcomes = batch_rename(&batch, &edits);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].id, two.id);
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &dir.path().join("TWO"));
        assert!(dir.path().join("TWO").is_file());
        assert!(dir.path().join("one").is_file());
    }
}
