use super::snapshot::{read_sorted, SortState};
use super::WorkerMessage;
use crate::highlight::highlight;
use crate::mime;
use crate::path_utils::format_size;
use crate::types::{EntryKind, Preview, PreviewBody};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub show_hidden: bool,
    pub sort: SortState,
    pub max_text_bytes: u64,
    pub theme: String,
}

struct PreviewRequest {
    id: u64,
    path: PathBuf,
    options: PreviewOptions,
}

/// Debounced preview fetcher. Every request gets an increasing id; a fetch only
/// runs, and its result is only delivered, while its id is still the latest.
pub struct PreviewWorker {
    latest: Arc<AtomicU64>,
    requests: Option<mpsc::Sender<PreviewRequest>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for PreviewWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewWorker")
            .field("latest", &self.latest.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PreviewWorker {
    pub fn spawn(debounce: Duration, results: mpsc::Sender<WorkerMessage>) -> Self {
        let latest = Arc::new(AtomicU64::new(0));
        let (requests, incoming) = mpsc::channel::<PreviewRequest>();

        let handle = {
            let latest = Arc::clone(&latest);
            thread::Builder::new()
                .name("dirbuf-preview".to_string())
                .spawn(move || run_preview_loop(debounce, incoming, results, latest))
        };

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("PREVIEW_SPAWN: failed to start preview thread: {}", e);
                None
            }
        };

        Self {
            latest,
            requests: Some(requests),
            handle,
        }
    }

    /// Records `path` as the latest preview target and (re)starts the debounce window.
    pub fn request(&self, path: PathBuf, options: PreviewOptions) -> u64 {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(requests) = &self.requests {
            if requests.send(PreviewRequest { id, path, options }).is_err() {
                debug!("PREVIEW_REQUEST: worker is gone, dropping request {}", id);
            }
        }
        id
    }

    #[inline]
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_current(&self, id: u64) -> bool {
        self.latest() == id
    }

    /// Stops the worker thread and waits for it.
    pub fn shutdown(&mut self) {
        // bump the id so an in-flight fetch is not delivered
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("PREVIEW_SHUTDOWN: preview thread panicked");
            }
        }
    }
}

impl Drop for PreviewWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_preview_loop(
    debounce: Duration,
    incoming: mpsc::Receiver<PreviewRequest>,
    results: mpsc::Sender<WorkerMessage>,
    latest: Arc<AtomicU64>,
) {
    let mut pending: Option<PreviewRequest> = None;

    loop {
        let next = if pending.is_some() {
            incoming.recv_timeout(debounce)
        } else {
            incoming.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match next {
            Ok(request) => {
                // a newer request restarts the window
                pending = Some(request);
            }
            Err(RecvTimeoutError::Timeout) => {
                let Some(request) = pending.take() else {
                    continue;
                };
                if latest.load(Ordering::SeqCst) != request.id {
                    debug!("PREVIEW_STALE: dropping {}", request.path.display());
                    continue;
                }

                debug!("PREVIEW_FETCH: {}", request.path.display());
                let preview = fetch_preview(&request.path, &request.options);
                if latest.load(Ordering::SeqCst) != request.id {
                    debug!("PREVIEW_STALE: fetched {} too late", request.path.display());
                    continue;
                }
                if results
                    .send(WorkerMessage::Preview {
                        request: request.id,
                        preview,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("PREVIEW_EXIT: preview thread stopped");
}

/// Classifies and renders the preview for `path`. Never fails: unreadable input
/// degrades to metadata only.
pub fn fetch_preview(path: &Path, options: &PreviewOptions) -> Preview {
    if path.as_os_str().is_empty() {
        return Preview::empty(PathBuf::new());
    }

    if path.is_file() {
        return file_preview(path, options);
    }

    if path.is_dir() {
        let entries = read_sorted(path, options.show_hidden, options.sort).unwrap_or_default();
        return Preview {
            path: path.to_path_buf(),
            kind: Some(EntryKind::Directory),
            size_bytes: entries.len() as u64,
            size_display: entries.len().to_string(),
            mime: mime::DIRECTORY.to_string(),
            body: PreviewBody::Listing(entries),
        };
    }

    if path.is_symlink() {
        return Preview {
            path: path.to_path_buf(),
            kind: Some(EntryKind::Symlink),
            size_bytes: 1,
            size_display: "1".to_string(),
            mime: "inode-symlink".to_string(),
            body: PreviewBody::Symlink,
        };
    }

    Preview::empty(path.to_path_buf())
}

fn file_preview(path: &Path, options: &PreviewOptions) -> Preview {
    let size = std::fs::metadata(path).map_or(0, |metadata| metadata.len());
    let mime = mime::classify(path);

    let body = if mime::is_text_like(&mime) {
        if size < options.max_text_bytes {
            match std::fs::read(path) {
                Ok(bytes) => {
                    let content = String::from_utf8_lossy(&bytes);
                    let extension = path
                        .extension()
                        .map(|ext| ext.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let (language, lines) = highlight(&content, &extension, &options.theme);
                    PreviewBody::Code { language, lines }
                }
                Err(e) => {
                    debug!("PREVIEW_READ: {}: {}", path.display(), e);
                    PreviewBody::Metadata
                }
            }
        } else {
            PreviewBody::SizeOnly
        }
    } else if mime::is_image(&mime) {
        PreviewBody::Image {
            tags: image_tags(path),
        }
    } else {
        PreviewBody::Metadata
    };

    Preview {
        path: path.to_path_buf(),
        kind: Some(EntryKind::File),
        size_bytes: size,
        size_display: format_size(size),
        mime,
        body,
    }
}

/// Best-effort image tags; any failure yields an empty list.
fn image_tags(path: &Path) -> Vec<(String, String)> {
    let reader = match image::ImageReader::open(path).and_then(|reader| reader.with_guessed_format()) {
        Ok(reader) => reader,
        Err(e) => {
            debug!("PREVIEW_IMAGE: {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut tags = Vec::new();
    if let Some(format) = reader.format() {
        tags.push(("format".to_string(), format!("{format:?}")));
    }
    match reader.into_dimensions() {
        Ok((width, height)) => {
            tags.push(("width".to_string(), width.to_string()));
            tags.push(("height".to_string(), height.to_string()));
            tags
        }
        Err(e) => {
            debug!("PREVIEW_IMAGE: {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SortKey;
    use std::fs;
    use std::time::Instant;

    fn options(max_text_bytes: u64) -> PreviewOptions {
        PreviewOptions {
            show_hidden: false,
            sort: SortState::new(SortKey::Name, false),
            max_text_bytes,
            theme: "base16-ocean.dark".to_string(),
        }
    }

    fn collect_previews(
        rx: &mpsc::Receiver<WorkerMessage>,
        wait: Duration,
    ) -> Vec<(u64, Preview)> {
        let deadline = Instant::now() + wait;
        let mut previews = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(WorkerMessage::Preview { request, preview }) => previews.push((request, preview)),
                Ok(_) => {}
                Err(_) => break,
            }
        }
        previews
    }

    #[test]
    fn test_text_preview_is_highlighted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        fs::write(&file, "pub fn answer() -> u32 { 42 }\n").unwrap();

        let preview = fetch_preview(&file, &options(100_000));
        assert_eq!(preview.kind, Some(EntryKind::File));
        assert_eq!(preview.mime, "text-x-rust");
        match preview.body {
            PreviewBody::Code { language, lines } => {
                assert_eq!(language, "Rust");
                assert_eq!(lines.len(), 1);
            }
            other => panic!("expected code preview, got {other:?}"),
        }
    }

    #[test]
    fn test_large_text_degrades_to_size_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.txt");
        fs::write(&file, "x".repeat(200)).unwrap();

        let preview = fetch_preview(&file, &options(200));
        assert_eq!(preview.body, PreviewBody::SizeOnly);
        assert_eq!(preview.size_bytes, 200);

        let preview = fetch_preview(&file, &options(201));
        assert!(matches!(preview.body, PreviewBody::Code { .. }));
    }

    #[test]
    fn test_binary_and_broken_image_previews() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blob.bin");
        fs::write(&blob, [0u8, 159, 146, 150]).unwrap();
        let fake_png = dir.path().join("fake.png");
        fs::write(&fake_png, b"not an image").unwrap();

        assert_eq!(fetch_preview(&blob, &options(100_000)).body, PreviewBody::Metadata);
        assert_eq!(
            fetch_preview(&fake_png, &options(100_000)).body,
            PreviewBody::Image { tags: Vec::new() }
        );
    }

    #[test]
    fn test_image_tags() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("dot.png");
        image::RgbaImage::new(3, 2).save(&png).unwrap();

        match fetch_preview(&png, &options(100_000)).body {
            PreviewBody::Image { tags } => {
                assert!(tags.contains(&("width".to_string(), "3".to_string())));
                assert!(tags.contains(&("height".to_string(), "2".to_string())));
                assert!(tags.contains(&("format".to_string(), "Png".to_string())));
            }
            other => panic!("expected image preview, got {other:?}"),
        }
    }

    #[test]
    fn test_directory_preview_lists_children() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();

        let preview = fetch_preview(dir.path(), &options(100_000));
        match preview.body {
            PreviewBody::Listing(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "a");
            }
            other => panic!("expected listing, got {other:?}"),
        }
    }

    #[test]
    fn test_rapid_requests_deliver_only_latest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let (tx, rx) = mpsc::channel();
        let mut worker = PreviewWorker::spawn(Duration::from_millis(100), tx);
        worker.request(a, options(100_000));
        let second = worker.request(b.clone(), options(100_000));

        let previews = collect_previews(&rx, Duration::from_millis(800));
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].0, second);
        assert_eq!(previews[0].1.path, b);
        assert!(worker.is_current(second));

        worker.shutdown();
    }

    #[test]
    fn test_shutdown_drops_pending_request() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, "a").unwrap();

        let (tx, rx) = mpsc::channel();
        let mut worker = PreviewWorker::spawn(Duration::from_millis(200), tx);
        worker.request(a, options(100_000));
        worker.shutdown();

        assert!(collect_previews(&rx, Duration::from_millis(400)).is_empty());
    }
}
