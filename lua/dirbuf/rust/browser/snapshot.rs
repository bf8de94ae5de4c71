use crate::error::{Error, Result};
use crate::icons::icon_name;
use crate::mime;
use crate::path_utils::{display_name, format_size, is_visible, unix_secs};
use crate::types::{EntryKind, FileEntry, SortKey};
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ordered, point-in-time listing plus the selected index. Replaced wholesale on
/// every navigation, sort, filter or refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<FileEntry>,
    selected: usize,
}

impl Snapshot {
    pub fn new(entries: Vec<FileEntry>, selected: usize) -> Self {
        let selected = clamp_index(selected, entries.len());
        Self { entries, selected }
    }

    /// Selects `preferred` when it is present, otherwise index 0.
    pub fn with_preferred(entries: Vec<FileEntry>, preferred: Option<&Path>) -> Self {
        let selected = preferred
            .and_then(|path| entries.iter().position(|entry| entry.path == path))
            .unwrap_or(0);
        Self::new(entries, selected)
    }

    #[inline]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_entry(&self) -> Option<&FileEntry> {
        self.entries.get(self.selected)
    }

    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|entry| entry.path == path)
    }

    pub fn with_selected(&self, index: usize) -> Self {
        Self::new(self.entries.clone(), index)
    }

    /// Re-applies mark flags from `marked`, keeping order and selection.
    pub fn with_marks(&self, marked: &HashSet<PathBuf>) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mark = marked.contains(&entry.path);
                if entry.mark == mark {
                    entry.clone()
                } else {
                    entry.with_mark(mark)
                }
            })
            .collect();
        Self {
            entries,
            selected: self.selected,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }

    /// Appends streamed search results, skipping paths already present.
    pub fn appended(&self, batch: &[FileEntry]) -> Self {
        let known: HashSet<&Path> = self.paths().collect();
        let mut entries = self.entries.clone();
        entries.extend(
            batch
                .iter()
                .filter(|entry| !known.contains(entry.path.as_path()))
                .cloned(),
        );
        Self {
            entries,
            selected: self.selected,
        }
    }
}

#[inline]
fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        index.min(len - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub key: SortKey,
    pub reverse: bool,
}

impl SortState {
    pub fn new(key: SortKey, reverse: bool) -> Self {
        Self { key, reverse }
    }

    /// Same key flips the direction, a different key resets it.
    pub fn toggle(&mut self, key: SortKey) {
        if self.key == key {
            self.reverse = !self.reverse;
        } else {
            self.key = key;
            self.reverse = false;
        }
    }
}

impl FileEntry {
    /// Builds an entry from disk. `kind` is decided once here, in
    /// file / directory / symlink priority.
    pub fn new(path: PathBuf, base: Option<&Path>, show_hidden: bool) -> Self {
        let kind = if path.is_file() {
            EntryKind::File
        } else if path.is_dir() {
            EntryKind::Directory
        } else if path.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Unknown
        };

        let metadata = std::fs::metadata(&path).or_else(|_| std::fs::symlink_metadata(&path));
        let (mtime, ctime, atime) = match &metadata {
            Ok(metadata) => entry_times(metadata),
            Err(_) => (0, 0, 0),
        };

        let (size_bytes, size_display) = match kind {
            EntryKind::File => {
                let size = metadata.as_ref().map_or(0, Metadata::len);
                (size, format_size(size))
            }
            EntryKind::Directory => {
                let count = count_children(&path, show_hidden);
                (count, count.to_string())
            }
            EntryKind::Symlink => (1, "1".to_string()),
            EntryKind::Unknown => (0, String::new()),
        };

        let mime = match kind {
            EntryKind::Directory => mime::DIRECTORY.to_string(),
            EntryKind::File => mime::classify(&path),
            EntryKind::Symlink | EntryKind::Unknown => "inode-symlink".to_string(),
        };

        let extension = match kind {
            EntryKind::Directory => String::new(),
            _ => path
                .extension()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
        };

        Self {
            name: display_name(&path, base),
            icon: icon_name(&mime),
            path,
            extension,
            kind,
            size_bytes,
            size_display,
            mtime,
            ctime,
            atime,
            mark: false,
            mime,
        }
    }
}

#[cfg(unix)]
fn entry_times(metadata: &Metadata) -> (u64, u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (
        unix_secs(metadata.modified()),
        metadata.ctime().max(0) as u64,
        unix_secs(metadata.accessed()),
    )
}

#[cfg(not(unix))]
fn entry_times(metadata: &Metadata) -> (u64, u64, u64) {
    (
        unix_secs(metadata.modified()),
        unix_secs(metadata.created()),
        unix_secs(metadata.accessed()),
    )
}

fn count_children(dir: &Path, show_hidden: bool) -> u64 {
    match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_visible(&entry.file_name().to_string_lossy(), show_hidden))
            .count() as u64,
        Err(_) => 0,
    }
}

/// Immediate children of `dir` that pass the hidden-file filter, unsorted.
/// An unreadable directory yields an empty listing.
pub fn list_directory(dir: &Path, show_hidden: bool) -> Result<Vec<FileEntry>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            debug!("LIST_DENIED: {} is not readable", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::NotADirectory(dir.to_path_buf()));
            }
            return Err(Error::from_io(e, dir));
        }
    };

    let paths: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_visible(&entry.file_name().to_string_lossy(), show_hidden))
        .map(|entry| entry.path())
        .collect();

    Ok(paths
        .into_par_iter()
        .map(|path| FileEntry::new(path, None, show_hidden))
        .collect())
}

/// Kind rank first, then `key`; `reverse` flips only the secondary ordering.
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, reverse: bool) {
    entries.sort_by(|a, b| {
        a.kind.rank().cmp(&b.kind.rank()).then_with(|| {
            let secondary = a
                .compare_by(b, key)
                .then_with(|| a.name.as_bytes().cmp(b.name.as_bytes()))
                .then_with(|| a.path.cmp(&b.path));
            if reverse {
                secondary.reverse()
            } else {
                secondary
            }
        })
    });
}

pub fn compile_rule(rule: &str) -> Result<Regex> {
    RegexBuilder::new(rule)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::InvalidPattern {
            pattern: rule.to_string(),
            reason: e.to_string(),
        })
}

/// Narrows `entries` to those whose name matches `regex`, keeping their order.
pub fn filter_by_pattern(entries: &[FileEntry], regex: &Regex) -> Vec<FileEntry> {
    entries
        .iter()
        .filter(|entry| regex.is_match(&entry.name))
        .cloned()
        .collect()
}

/// Lists and sorts `dir` in one step.
pub fn read_sorted(dir: &Path, show_hidden: bool, sort: SortState) -> Result<Vec<FileEntry>> {
    let mut entries = list_directory(dir, show_hidden)?;
    sort_entries(&mut entries, sort.key, sort.reverse);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "0123456789").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join(".h"), "").unwrap();
        dir
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn test_list_directory_hides_dotfiles() {
        let dir = fixture();
        let entries = read_sorted(dir.path(), false, SortState::new(SortKey::Name, false)).unwrap();
        assert_eq!(names(&entries), vec!["b", "a.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].size_display, "0");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size_bytes, 10);
        assert_eq!(entries[1].size_display, "10.0B");
    }

    #[test]
    fn test_hidden_files_sort_bytewise_before_lowercase() {
        let dir = fixture();
        let entries = read_sorted(dir.path(), true, SortState::new(SortKey::Name, false)).unwrap();
        // '.' (0x2e) orders before 'a' (0x61)
        assert_eq!(names(&entries), vec!["b", ".h", "a.txt"]);
    }

    #[test]
    fn test_empty_directory_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let entries = list_directory(dir.path(), false).unwrap();
        assert!(entries.is_empty());
        let snapshot = Snapshot::with_preferred(entries, None);
        assert!(snapshot.selected_entry().is_none());
        assert_eq!(snapshot.selected_index(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_lists_empty() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret.txt"), "x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root reads through mode 000
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let entries = list_directory(&locked, false);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(entries.unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_directory(&dir.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let file = dir.path().join("file");
        fs::write(&file, "x").unwrap();
        let err = list_directory(&file, false).unwrap_err();
        assert!(matches!(err, Error::NotADirectory(_)));
    }

    #[test]
    fn test_reverse_keeps_kind_grouping() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["x.txt", "y.txt"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        for name in ["d1", "d2"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let mut sort = SortState::new(SortKey::Name, false);
        let forward = read_sorted(dir.path(), false, sort).unwrap();
        assert_eq!(names(&forward), vec!["d1", "d2", "x.txt", "y.txt"]);

        sort.toggle(SortKey::Name);
        assert!(sort.reverse);
        let reversed = read_sorted(dir.path(), false, sort).unwrap();
        assert_eq!(names(&reversed), vec!["d2", "d1", "y.txt", "x.txt"]);

        sort.toggle(SortKey::Size);
        assert_eq!(sort, SortState::new(SortKey::Size, false));
    }

    #[test]
    fn test_sort_by_size_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.b"), "0123456789").unwrap();
        fs::write(dir.path().join("small.c"), "0").unwrap();
        fs::write(dir.path().join("mid.a"), "01234").unwrap();

        let by_size = read_sorted(dir.path(), false, SortState::new(SortKey::Size, false)).unwrap();
        assert_eq!(names(&by_size), vec!["small.c", "mid.a", "big.b"]);

        let by_ext =
            read_sorted(dir.path(), false, SortState::new(SortKey::Extension, false)).unwrap();
        assert_eq!(names(&by_ext), vec!["mid.a", "big.b", "small.c"]);
    }

    #[test]
    fn test_filter_by_pattern_is_case_insensitive() {
        let dir = fixture();
        fs::write(dir.path().join("README.md"), "").unwrap();
        let entries = read_sorted(dir.path(), false, SortState::new(SortKey::Name, false)).unwrap();

        let regex = compile_rule("readme|^A").unwrap();
        let narrowed = filter_by_pattern(&entries, &regex);
        assert_eq!(names(&narrowed), vec!["README.md", "a.txt"]);

        assert!(matches!(
            compile_rule("(unclosed"),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_snapshot_preferred_selection_and_marks() {
        let dir = fixture();
        let entries = read_sorted(dir.path(), false, SortState::new(SortKey::Name, false)).unwrap();
        let target = dir.path().join("a.txt");

        let snapshot = Snapshot::with_preferred(entries.clone(), Some(target.as_path()));
        assert_eq!(snapshot.selected_index(), 1);

        let missing = Snapshot::with_preferred(entries, Some(dir.path().join("gone").as_path()));
        assert_eq!(missing.selected_index(), 0);

        let marked: HashSet<PathBuf> = [target.clone()].into_iter().collect();
        let with_marks = snapshot.with_marks(&marked);
        assert!(with_marks.get(1).unwrap().mark);
        assert!(!with_marks.get(0).unwrap().mark);
        assert!(!snapshot.get(1).unwrap().mark);
    }

    #[test]
    fn test_symlink_to_file_is_a_file() {
        #[cfg(unix)]
        {
            let dir = fixture();
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(dir.path().join("a.txt"), &link).unwrap();
            let dangling = dir.path().join("dangling");
            std::os::unix::fs::symlink(dir.path().join("gone"), &dangling).unwrap();

            assert_eq!(FileEntry::new(link, None, false).kind, EntryKind::File);
            let entry = FileEntry::new(dangling, None, false);
            assert_eq!(entry.kind, EntryKind::Symlink);
            assert_eq!(entry.size_bytes, 1);
        }
    }
}
