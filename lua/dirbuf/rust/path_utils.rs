use std::path::{Path, PathBuf};
use std::time::SystemTime;

const SIZE_UNITS: [&str; 8] = ["", "K", "M", "G", "T", "P", "E", "Z"];

/// Formats a byte count scaled by 1024, e.g. `10.0B`, `1.5KB`, past zetta `1.0YiB`.
pub fn format_size(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in SIZE_UNITS {
        if num.abs() < 1024.0 {
            return format!("{num:3.1}{unit}B");
        }
        num /= 1024.0;
    }
    format!("{num:.1}YiB")
}

#[inline]
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

#[inline]
pub fn is_visible(name: &str, show_hidden: bool) -> bool {
    show_hidden || !is_hidden_name(name)
}

/// Display name for `path`: the file name, or the path relative to `base` in search mode.
pub fn display_name(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Some(relative) = pathdiff::diff_paths(path, base) {
            if !relative.as_os_str().is_empty() {
                return relative.to_string_lossy().into_owned();
            }
        }
    }

    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[inline]
pub fn unix_secs(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

/// Resolves the destination for moving or copying `source` to `dest`: an existing
/// directory receives `source` under its own basename.
pub fn resolve_destination(source: &Path, dest: &Path) -> PathBuf {
    if dest.is_dir() {
        if let Some(name) = source.file_name() {
            return dest.join(name);
        }
    }
    dest.to_path_buf()
}

/// Expands a leading `~` the way shell-style path prompts are typed.
pub fn expand_home(input: &str) -> PathBuf {
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if input == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0B");
        assert_eq!(format_size(10), "10.0B");
        assert_eq!(format_size(1023), "1023.0B");
        assert_eq!(format_size(1024), "1.0KB");
        assert_eq!(format_size(1536), "1.5KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0MB");
        assert_eq!(format_size(u64::MAX), "16.0EB");
    }

    #[test]
    fn test_hidden_predicate() {
        assert!(is_visible("a.txt", false));
        assert!(!is_visible(".h", false));
        assert!(is_visible(".h", true));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/tmp/d/a.txt"), None), "a.txt");
        assert_eq!(
            display_name(Path::new("/tmp/d/sub/a.txt"), Some(Path::new("/tmp/d"))),
            "sub/a.txt"
        );
        assert_eq!(display_name(Path::new("/"), None), "/");
    }

    #[test]
    fn test_resolve_destination_into_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        assert_eq!(
            resolve_destination(Path::new("/src/X"), &dest),
            dest.join("X")
        );
        assert_eq!(
            resolve_destination(Path::new("/src/X"), &dir.path().join("fresh")),
            dir.path().join("fresh")
        );
    }
}
