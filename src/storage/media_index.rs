//! Media index notifications.
//!
//! After an image is written (or discarded) the host's media index has to
//! learn about it, otherwise the file stays invisible to galleries.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// External collaborator that indexes saved media.
pub trait MediaIndex: Send + Sync {
    /// A new file is available at `path` (absolute).
    fn file_added(&self, path: &Path);

    /// A previously announced file was deleted.
    fn file_removed(&self, path: &Path);
}

/// Index that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMediaIndex;

impl MediaIndex for LogMediaIndex {
    fn file_added(&self, path: &Path) {
        tracing::info!(path = %path.display(), "Media file added");
    }

    fn file_removed(&self, path: &Path) {
        tracing::info!(path = %path.display(), "Media file removed");
    }
}

/// In-memory index of announced files.
#[derive(Debug, Default)]
pub struct MemoryMediaIndex {
    files: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl MemoryMediaIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Files currently indexed, in announcement order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Files that were announced and later removed.
    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MediaIndex for MemoryMediaIndex {
    fn file_added(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
    }

    fn file_removed(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| p != path);
        self.removed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
    }
}
