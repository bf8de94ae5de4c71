use crate::error::{Error, Result};
use crate::tasks::CancelToken;
use ignore::WalkBuilder;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// `<source>.zip` next to the source.
pub fn default_archive_path(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "archive".into());
    name.push(".zip");
    source.with_file_name(name)
}

/// Directory named after the archive stem, next to the archive.
pub fn default_extract_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_else(|| "extracted".into());
    archive.with_file_name(stem)
}

struct Progress<F: FnMut(u8)> {
    total: usize,
    done: usize,
    last: Option<u8>,
    report: F,
}

impl<F: FnMut(u8)> Progress<F> {
    fn new(total: usize, report: F) -> Self {
        Self {
            total,
            done: 0,
            last: None,
            report,
        }
    }

    fn advance(&mut self) {
        self.done += 1;
        let percent = if self.total == 0 {
            100
        } else {
            (self.done * 100 / self.total).min(100) as u8
        };
        if self.last != Some(percent) {
            self.last = Some(percent);
            (self.report)(percent);
        }
    }

    fn finish(&mut self) {
        if self.last != Some(100) {
            self.last = Some(100);
            (self.report)(100);
        }
    }
}

/// Zips `source` (a file, or a directory walked recursively) into `dest`.
/// Entry names are relative to the source's parent so extracting recreates the
/// source by name. Returns the number of files written.
pub fn compress<F>(source: &Path, dest: &Path, token: &CancelToken, progress: F) -> Result<usize>
where
    F: FnMut(u8),
{
    if !source.exists() {
        return Err(Error::NotFound(source.to_path_buf()));
    }
    if dest.exists() {
        return Err(Error::Collision(dest.to_path_buf()));
    }

    let base = source.parent().unwrap_or(source);
    let mut paths: Vec<PathBuf> = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .build()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path != dest)
        .collect();
    paths.sort();

    let file_count = paths.iter().filter(|path| !path.is_dir()).count();
    let mut progress = Progress::new(file_count, progress);

    let file = File::create(dest).map_err(|e| Error::from_io(e, dest))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let result = (|| -> Result<usize> {
        let mut written = 0;
        for path in &paths {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let name = archive_name(path, base);
            if name.is_empty() {
                continue;
            }

            if path.is_dir() {
                writer.add_directory(name, options)?;
                continue;
            }

            writer.start_file(name, options)?;
            let mut input = File::open(path).map_err(|e| Error::from_io(e, path))?;
            io::copy(&mut input, &mut writer)?;
            written += 1;
            progress.advance();
        }
        writer.finish()?;
        Ok(written)
    })();
    drop(writer);

    match result {
        Ok(written) => {
            progress.finish();
            info!("ARCHIVE_COMPRESS: {} files into {}", written, dest.display());
            Ok(written)
        }
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(dest) {
                warn!(
                    "ARCHIVE_COMPRESS: failed to remove partial archive {}: {}",
                    dest.display(),
                    remove_err
                );
            }
            debug!("ARCHIVE_COMPRESS: aborted {}: {}", source.display(), e);
            Err(e)
        }
    }
}

fn archive_name(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extracts `archive` into `dest_dir`. The central directory is read before
/// anything is written; entries whose names would escape `dest_dir` are
/// skipped. Returns the number of files extracted.
pub fn decompress<F>(archive: &Path, dest_dir: &Path, token: &CancelToken, progress: F) -> Result<usize>
where
    F: FnMut(u8),
{
    let file = File::open(archive).map_err(|e| Error::from_io(e, archive))?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        debug!("ARCHIVE_DECOMPRESS: {} rejected: {}", archive.display(), e);
        Error::MalformedArchive(archive.to_path_buf())
    })?;

    std::fs::create_dir_all(dest_dir).map_err(|e| Error::from_io(e, dest_dir))?;
    let mut progress = Progress::new(zip.len(), progress);
    let mut extracted = 0;

    for index in 0..zip.len() {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = zip.by_index(index)?;
        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(
                "ARCHIVE_DECOMPRESS: skipping unsafe entry '{}' in {}",
                entry.name(),
                archive.display()
            );
            progress.advance();
            continue;
        };
        let out_path = dest_dir.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| Error::from_io(e, &out_path))?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::from_io(e, parent))?;
            }
            let mut output = File::create(&out_path).map_err(|e| Error::from_io(e, &out_path))?;
            io::copy(&mut entry, &mut output)?;
            extracted += 1;
        }
        progress.advance();
    }

    progress.finish();
    info!(
        "ARCHIVE_DECOMPRESS: {} files from {} into {}",
        extracted,
        archive.display(),
        dest_dir.display()
    );
    Ok(extracted)
}
