//! Output file naming.

use std::io;
use std::path::{Path, PathBuf};

/// Directory under the media root that holds saved images.
pub const IMAGE_DIR: &str = "myImages";

/// Extension of persisted images.
pub const IMAGE_EXTENSION: &str = "png";

/// A saved (or to-be-saved) image location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedImage {
    /// Directory containing the file.
    pub directory: PathBuf,
    /// `image<N>.png`
    pub filename: String,
    /// Sequence number the name was derived from.
    pub sequence: u32,
}

impl PersistedImage {
    /// Full path of the image.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// Derives output paths from externally supplied sequence numbers.
///
/// The namer never advances the sequence itself; whoever owns the counter
/// decides when a number is used up.
#[derive(Debug, Clone)]
pub struct FileNamer {
    media_root: PathBuf,
}

impl FileNamer {
    /// Names files under `media_root`.
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    /// Root the image directory lives in.
    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// `<media_root>/myImages`
    pub fn directory(&self) -> PathBuf {
        self.media_root.join(IMAGE_DIR)
    }

    /// File name for a sequence number.
    pub fn file_name(sequence: u32) -> String {
        format!("image{sequence}.{IMAGE_EXTENSION}")
    }

    /// Path for `sequence`, creating the image directory if needed.
    pub fn next_path(&self, sequence: u32) -> io::Result<PathBuf> {
        Ok(self.target(sequence)?.path())
    }

    /// Like [`FileNamer::next_path`], keeping the parts separate.
    pub fn target(&self, sequence: u32) -> io::Result<PersistedImage> {
        let directory = self.directory();
        std::fs::create_dir_all(&directory)?;
        Ok(PersistedImage {
            directory,
            filename: Self::file_name(sequence),
            sequence,
        })
    }
}
