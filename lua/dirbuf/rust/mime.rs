use content_inspector::ContentType;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const SNIFF_BYTES: usize = 8 * 1024;

pub const DIRECTORY: &str = "directory";
pub const OCTET_STREAM: &str = "application-octet-stream";
pub const TEXT_PLAIN: &str = "text-plain";

/// Classifies `path` into a dash-separated mime name (`text-x-rust`, `image-png`, ...).
pub fn classify(path: &Path) -> String {
    if path.is_dir() {
        return DIRECTORY.to_string();
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(mime) = mime_for_extension(&extension) {
        return mime.to_string();
    }

    let Some(head) = read_head(path) else {
        return OCTET_STREAM.to_string();
    };
    if let Some(kind) = infer::get(&head) {
        return kind.mime_type().replace('/', "-");
    }
    match content_inspector::inspect(&head) {
        ContentType::BINARY => OCTET_STREAM.to_string(),
        _ => TEXT_PLAIN.to_string(),
    }
}

fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "txt" | "log" | "text" => "text-plain",
        "md" | "markdown" => "text-markdown",
        "rs" => "text-x-rust",
        "py" => "text-x-python",
        "c" | "h" => "text-x-csrc",
        "cc" | "cpp" | "cxx" | "hpp" => "text-x-c++src",
        "go" => "text-x-go",
        "java" => "text-x-java",
        "js" | "mjs" | "cjs" => "text-javascript",
        "ts" | "tsx" => "text-x-typescript",
        "json" => "application-json",
        "toml" => "application-toml",
        "yaml" | "yml" => "application-x-yaml",
        "xml" => "application-xml",
        "html" | "htm" => "text-html",
        "css" => "text-css",
        "sh" | "bash" | "zsh" => "application-x-shellscript",
        "el" => "text-x-emacs-lisp",
        "lua" => "text-x-lua",
        "rb" => "application-x-ruby",
        "csv" => "text-csv",
        "png" => "image-png",
        "jpg" | "jpeg" => "image-jpeg",
        "gif" => "image-gif",
        "bmp" => "image-bmp",
        "webp" => "image-webp",
        "svg" => "image-svg+xml",
        "ico" => "image-vnd.microsoft.icon",
        "zip" => "application-zip",
        "tar" => "application-x-tar",
        "gz" | "tgz" => "application-gzip",
        "xz" => "application-x-xz",
        "7z" => "application-x-7z-compressed",
        "pdf" => "application-pdf",
        "mp3" => "audio-mpeg",
        "mp4" => "video-mp4",
        "mkv" => "video-x-matroska",
        _ => return None,
    };
    Some(mime)
}

/// First bytes of the file; `None` when it cannot be read.
fn read_head(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut head).ok()?;
    Some(head)
}

/// Mime types whose content is shown as highlighted text.
pub fn is_text_like(mime: &str) -> bool {
    if mime == "image-svg+xml" {
        return true;
    }
    mime.starts_with("text-")
        || matches!(
            mime,
            "application-json"
                | "application-toml"
                | "application-x-yaml"
                | "application-xml"
                | "application-x-shellscript"
                | "application-x-ruby"
        )
}

#[inline]
pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image-") && mime != "image-svg+xml"
}

#[inline]
pub fn is_archive(mime: &str) -> bool {
    mime == "application-zip"
}
