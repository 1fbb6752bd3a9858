//! Transient per-capture artifact.
//!
//! Every capture request gets a `JPEG_<yyyyMMdd_HHmmss>_*.jpg` file in the
//! pictures directory. It identifies the request in logs and is removed when
//! the request finishes.

use chrono::Local;
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Temporary capture target, deleted on drop.
#[derive(Debug)]
pub struct TransientCapture {
    file: NamedTempFile,
}

impl TransientCapture {
    /// Creates the artifact in `dir`, creating the directory if needed.
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let prefix = format!("JPEG_{}_", Local::now().format("%Y%m%d_%H%M%S"));
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".jpg")
            .tempfile_in(dir)?;
        Ok(Self { file })
    }

    /// Location of the artifact.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// File name, used as the capture identifier.
    pub fn name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TransientCapture::create(&dir.path().join("Pictures")).unwrap();
        let name = artifact.name();

        assert!(name.starts_with("JPEG_"));
        assert!(name.ends_with(".jpg"));
        // JPEG_ + yyyyMMdd_HHmmss + _
        let stamp = &name[5..20];
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
        assert!(artifact.path().exists());
    }

    #[test]
    fn test_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TransientCapture::create(dir.path()).unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = TransientCapture::create(dir.path()).unwrap();
        let b = TransientCapture::create(dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
