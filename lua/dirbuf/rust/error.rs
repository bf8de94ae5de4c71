use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Permission denied: {}", .0.display())]
    Permission(PathBuf),

    #[error("'{}' already exists", .0.display())]
    Collision(PathBuf),

    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Not a valid archive: {}", .0.display())]
    MalformedArchive(PathBuf),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No session with id {0}")]
    UnknownSession(u64),

    #[error("Session lock poisoned")]
    LockPoisoned,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps an io error on `path` into the user-facing taxonomy.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => Error::Permission(path.into()),
            std::io::ErrorKind::AlreadyExists => Error::Collision(path.into()),
            _ => Error::Io(err),
        }
    }
}
