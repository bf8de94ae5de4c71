use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    Unknown,
}

impl EntryKind {
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            EntryKind::Directory => 0,
            EntryKind::File => 1,
            EntryKind::Symlink => 2,
            EntryKind::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Unknown => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Size,
    Extension,
    Modified,
    Created,
    Accessed,
}

impl SortKey {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "name" => Some(SortKey::Name),
            "size" => Some(SortKey::Size),
            "extension" | "type" => Some(SortKey::Extension),
            "modified" | "mtime" => Some(SortKey::Modified),
            "created" | "ctime" => Some(SortKey::Created),
            "accessed" | "atime" => Some(SortKey::Accessed),
            _ => None,
        }
    }
}

/// One filesystem object under the session directory. Treated as an immutable
/// value once built; marking produces a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
    pub kind: EntryKind,
    /// Byte size for files, visible child count for directories, 1 for symlinks.
    pub size_bytes: u64,
    pub size_display: String,
    pub mtime: u64,
    pub ctime: u64,
    pub atime: u64,
    pub mark: bool,
    pub mime: String,
    pub icon: String,
}

impl FileEntry {
    pub fn with_mark(&self, mark: bool) -> Self {
        Self {
            mark,
            ..self.clone()
        }
    }

    /// Secondary ordering for `key`. Names compare byte-wise so that the order
    /// never depends on the host locale.
    pub fn compare_by(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::Name => self.name.as_bytes().cmp(other.name.as_bytes()),
            SortKey::Size => self.size_bytes.cmp(&other.size_bytes),
            SortKey::Extension => self.extension.as_bytes().cmp(other.extension.as_bytes()),
            SortKey::Modified => self.mtime.cmp(&other.mtime),
            SortKey::Created => self.ctime.cmp(&other.ctime),
            SortKey::Accessed => self.atime.cmp(&other.atime),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    /// `#rrggbb`
    pub foreground: String,
    pub bold: bool,
    pub italic: bool,
}

pub type HighlightedLine = Vec<StyledSpan>;

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewBody {
    /// Nothing selected (empty directory).
    Empty,
    Listing(Vec<FileEntry>),
    Code {
        language: String,
        lines: Vec<HighlightedLine>,
    },
    /// Text file too large to fetch.
    SizeOnly,
    /// Binary or unreadable file: size and mime only.
    Metadata,
    Image {
        tags: Vec<(String, String)>,
    },
    Symlink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub path: PathBuf,
    pub kind: Option<EntryKind>,
    pub size_bytes: u64,
    pub size_display: String,
    pub mime: String,
    pub body: PreviewBody,
}

impl Preview {
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            kind: None,
            size_bytes: 0,
            size_display: String::new(),
            mime: String::new(),
            body: PreviewBody::Empty,
        }
    }

    pub fn content_kind(&self) -> &'static str {
        match self.body {
            PreviewBody::Empty => "empty",
            PreviewBody::Listing(_) => "listing",
            PreviewBody::Code { .. } => "code",
            PreviewBody::SizeOnly => "size_only",
            PreviewBody::Metadata => "metadata",
            PreviewBody::Image { .. } => "image",
            PreviewBody::Symlink => "symlink",
        }
    }
}

/// One row of a batch rename exchanged with the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRenameItem {
    pub ordinal: usize,
    pub id: u64,
    pub path: PathBuf,
    pub old_name: String,
    pub new_name: String,
}

#[cfg(feature = "lua")]
mod lua_conversions {
    use super::*;
    use mlua::prelude::*;

    impl IntoLua for FileEntry {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            let table = lua.create_table()?;
            table.set("path", self.path.to_string_lossy().to_string())?;
            table.set("name", self.name)?;
            table.set("extension", self.extension)?;
            table.set("type", self.kind.as_str())?;
            table.set("size", self.size_display)?;
            table.set("size_bytes", self.size_bytes)?;
            table.set("mtime", self.mtime)?;
            table.set("ctime", self.ctime)?;
            table.set("atime", self.atime)?;
            table.set("mark", self.mark)?;
            table.set("mime", self.mime)?;
            table.set("icon", self.icon)?;
            Ok(LuaValue::Table(table))
        }
    }

    impl IntoLua for StyledSpan {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            let table = lua.create_table()?;
            table.set("text", self.text)?;
            table.set("fg", self.foreground)?;
            table.set("bold", self.bold)?;
            table.set("italic", self.italic)?;
            Ok(LuaValue::Table(table))
        }
    }

    impl IntoLua for Preview {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            let table = lua.create_table()?;
            table.set("path", self.path.to_string_lossy().to_string())?;
            table.set("type", self.kind.map_or("", EntryKind::as_str))?;
            table.set("content_kind", self.content_kind())?;
            table.set("size", self.size_display)?;
            table.set("size_bytes", self.size_bytes)?;
            table.set("mime", self.mime)?;
            match self.body {
                PreviewBody::Listing(entries) => table.set("entries", entries)?,
                PreviewBody::Code { language, lines } => {
                    table.set("language", language)?;
                    table.set("lines", lines)?;
                }
                PreviewBody::Image { tags } => {
                    let extra = lua.create_table()?;
                    for (key, value) in tags {
                        extra.set(key, value)?;
                    }
                    table.set("extra", extra)?;
                }
                PreviewBody::Empty
                | PreviewBody::SizeOnly
                | PreviewBody::Metadata
                | PreviewBody::Symlink => {}
            }
            Ok(LuaValue::Table(table))
        }
    }

    impl IntoLua for BatchRenameItem {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            let table = lua.create_table()?;
            table.set("ordinal", self.ordinal)?;
            table.set("id", self.id)?;
            table.set("path", self.path.to_string_lossy().to_string())?;
            table.set("old_name", self.old_name)?;
            table.set("new_name", self.new_name)?;
            Ok(LuaValue::Table(table))
        }
    }

    impl FromLua for BatchRenameItem {
        fn from_lua(value: LuaValue, _lua: &Lua) -> LuaResult<Self> {
            let LuaValue::Table(table) = value else {
                return Err(LuaError::FromLuaConversionError {
                    from: value.type_name(),
                    to: "BatchRenameItem".to_string(),
                    message: Some("expected a table".to_string()),
                });
            };
            Ok(Self {
                ordinal: table.get("ordinal")?,
                id: table.get("id")?,
                path: PathBuf::from(table.get::<String>("path")?),
                old_name: table.get("old_name")?,
                new_name: table.get("new_name")?,
            })
        }
    }
}
