use crate::error::Result;
use crate::types::SortKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub show_hidden: bool,
    pub preview_enabled: bool,
    pub sort_key: SortKey,
    pub sort_reverse: bool,
    pub preview_debounce_ms: u64,
    /// Text previews at or above this size degrade to a size-only indicator.
    pub preview_max_text_bytes: u64,
    pub search_flush_ms: u64,
    pub changed_highlight_secs: u64,
    pub watcher_debounce_ms: u64,
    pub use_external_search: bool,
    pub external_search_program: Option<String>,
    pub icon_cache_dir: Option<PathBuf>,
    pub highlight_theme: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            show_hidden: false,
            preview_enabled: true,
            sort_key: SortKey::Name,
            sort_reverse: false,
            preview_debounce_ms: 300,
            preview_max_text_bytes: 100_000,
            search_flush_ms: 300,
            changed_highlight_secs: 10,
            watcher_debounce_ms: 200,
            use_external_search: true,
            external_search_program: None,
            icon_cache_dir: None,
            highlight_theme: String::from("base16-ocean.dark"),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Loads the config file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    #[inline]
    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }

    #[inline]
    pub fn search_flush_interval(&self) -> Duration {
        Duration::from_millis(self.search_flush_ms)
    }

    #[inline]
    pub fn changed_highlight(&self) -> Duration {
        Duration::from_secs(self.changed_highlight_secs)
    }

    #[inline]
    pub fn watcher_debounce(&self) -> Duration {
        Duration::from_millis(self.watcher_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            show_hidden = true
            sort_key = "size"
            preview_debounce_ms = 50
            "#,
        )
        .unwrap();

        assert!(config.show_hidden);
        assert_eq!(config.sort_key, SortKey::Size);
        assert_eq!(config.preview_debounce(), Duration::from_millis(50));
        assert_eq!(config.preview_max_text_bytes, 100_000);
        assert_eq!(config.changed_highlight(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = SessionConfig::from_toml_str("show_hidden = 3").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }
}
