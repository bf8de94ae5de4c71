use crate::error::Result;
use image::{ImageBuffer, Rgba};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const ICON_SIZE: u32 = 64;

#[inline]
pub fn icon_name(mime: &str) -> String {
    format!("{mime}.png")
}

/// Renders the icon for a mime classification. Hosts with a real icon theme
/// plug their own renderer in.
pub trait IconRenderer: Send + Sync {
    fn render(&self, mime: &str, target: &Path) -> Result<()>;
}

/// Solid badge coloured by mime family.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    fn color_for(mime: &str) -> Rgba<u8> {
        let family = mime.split('-').next().unwrap_or_default();
        match family {
            "directory" => Rgba([0x51, 0x9a, 0xba, 0xff]),
            "text" => Rgba([0xa0, 0xa0, 0xa0, 0xff]),
            "image" => Rgba([0x8d, 0xc1, 0x49, 0xff]),
            "audio" | "video" => Rgba([0xa0, 0x74, 0xc4, 0xff]),
            "application" => Rgba([0xe3, 0x79, 0x33, 0xff]),
            _ => Rgba([0x6d, 0x80, 0x86, 0xff]),
        }
    }
}

impl IconRenderer for PlaceholderRenderer {
    fn render(&self, mime: &str, target: &Path) -> Result<()> {
        let color = Self::color_for(mime);
        let icon = ImageBuffer::from_fn(ICON_SIZE, ICON_SIZE, |x, y| {
            let border = x < 4 || y < 4 || x >= ICON_SIZE - 4 || y >= ICON_SIZE - 4;
            if border {
                Rgba([0, 0, 0, 0])
            } else {
                color
            }
        });
        icon.save(target)?;
        Ok(())
    }
}

/// Per-mime icon files under one cache directory. Lookups are keyed by mime
/// name, so every entry of the same type shares one file.
pub struct IconCache {
    dir: PathBuf,
    renderer: Box<dyn IconRenderer>,
    rendered: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for IconCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconCache")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl IconCache {
    pub fn new(dir: PathBuf, renderer: Box<dyn IconRenderer>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            renderer,
            rendered: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_placeholder(dir: PathBuf) -> Result<Self> {
        Self::new(dir, Box::new(PlaceholderRenderer))
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the cached icon path for `mime`, rendering it on first use.
    pub fn ensure(&self, mime: &str) -> Option<PathBuf> {
        let name = icon_name(mime);
        let target = self.dir.join(&name);

        let mut rendered = match self.rendered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if rendered.contains(&name) {
            return Some(target);
        }

        if !target.exists() {
            if let Err(e) = self.renderer.render(mime, &target) {
                warn!("ICON_RENDER: failed for {}: {}", mime, e);
                return None;
            }
            debug!("ICON_RENDER: cached {}", target.display());
        }
        rendered.insert(name);
        Some(target)
    }
}
