//! Still image pipeline.
//!
//! Decodes the encoded buffer delivered by the camera, turns it upright,
//! re-encodes it losslessly and writes it out. The encoded image is staged
//! in a temporary file beside its destination and moved into place without
//! replacing an existing file.

use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors produced while converting or writing an image.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture is not a readable image.
    #[error("failed to decode captured image: {0}")]
    Decode(#[source] image::ImageError),
    /// PNG encoding failed.
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    /// The destination file already exists.
    #[error("refusing to overwrite existing file {}", .0.display())]
    AlreadyExists(PathBuf),
    /// Writing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The blocking worker panicked or was cancelled.
    #[error("image worker failed: {0}")]
    Worker(String),
}

/// Orientation correction applied to every capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// Keep the sensor orientation.
    None,
    /// Quarter turn clockwise.
    #[default]
    Clockwise90,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    /// Final location.
    pub path: PathBuf,
    /// Width after rotation.
    pub width: u32,
    /// Height after rotation.
    pub height: u32,
    /// Encoded size on disk.
    pub bytes: u64,
}

/// Decode → rotate → PNG → write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePipeline {
    rotation: Rotation,
}

impl ImagePipeline {
    /// Pipeline applying `rotation` before encoding.
    pub fn new(rotation: Rotation) -> Self {
        Self { rotation }
    }

    /// Configured rotation.
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Decodes and rotates the raw capture.
    pub fn transform(&self, raw: &[u8]) -> Result<DynamicImage, PipelineError> {
        let decoded = image::load_from_memory(raw).map_err(PipelineError::Decode)?;
        Ok(match self.rotation {
            Rotation::None => decoded,
            Rotation::Clockwise90 => decoded.rotate90(),
        })
    }

    /// Produces the PNG bytes for a raw capture.
    pub fn encode(&self, raw: &[u8]) -> Result<(Vec<u8>, u32, u32), PipelineError> {
        let image = self.transform(raw)?;
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(PipelineError::Encode)?;
        Ok((png, image.width(), image.height()))
    }

    /// Converts the raw capture and writes it to a temporary file in `dir`.
    ///
    /// Nothing is visible under the final name until the returned
    /// [`StagedImage`] is committed.
    pub fn stage(&self, raw: &[u8], dir: &Path) -> Result<StagedImage, PipelineError> {
        let (png, width, height) = self.encode(raw)?;

        let mut file = tempfile::Builder::new()
            .prefix(".image-")
            .suffix(".part")
            .tempfile_in(dir)?;
        file.write_all(&png)?;
        file.as_file().sync_all()?;

        Ok(StagedImage {
            file,
            width,
            height,
            bytes: png.len() as u64,
        })
    }

    /// Converts the raw capture and writes it to `path`.
    pub fn persist(&self, raw: &[u8], path: &Path) -> Result<WrittenImage, PipelineError> {
        self.stage(raw, parent_dir(path))?.commit(path)
    }

    /// Encodes on the blocking thread pool, then commits to `path`.
    ///
    /// Dropping the future before it completes leaves no file behind: the
    /// staged copy is deleted once the worker finishes.
    pub async fn persist_blocking(
        &self,
        raw: Vec<u8>,
        path: PathBuf,
    ) -> Result<WrittenImage, PipelineError> {
        let pipeline = *self;
        let dir = parent_dir(&path).to_path_buf();
        let staged = tokio::task::spawn_blocking(move || pipeline.stage(&raw, &dir))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        staged.commit(&path)
    }
}

/// An encoded image waiting in a temporary file next to its destination.
///
/// Dropping it removes the temporary file.
#[derive(Debug)]
pub struct StagedImage {
    file: NamedTempFile,
    width: u32,
    height: u32,
    bytes: u64,
}

impl StagedImage {
    /// Moves the image to `path`, failing if a file is already there.
    pub fn commit(self, path: &Path) -> Result<WrittenImage, PipelineError> {
        let Self {
            file,
            width,
            height,
            bytes,
        } = self;
        file.persist_noclobber(path).map_err(|e| match e.error.kind() {
            std::io::ErrorKind::AlreadyExists => PipelineError::AlreadyExists(path.to_path_buf()),
            _ => PipelineError::Io(e.error),
        })?;

        tracing::debug!(path = %path.display(), width, height, bytes, "Image written");
        Ok(WrittenImage {
            path: path.to_path_buf(),
            width,
            height,
            bytes,
        })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use proptest::prelude::*;

    fn png_of(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn labelled(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn test_rotates_clockwise() {
        let raw = png_of(&labelled(3, 2));
        let rotated = ImagePipeline::default().transform(&raw).unwrap().to_rgb8();

        assert_eq!(rotated.dimensions(), (2, 3));
        // Top-left of the source ends up top-right
        assert_eq!(rotated.get_pixel(1, 0), &Rgb([0, 0, 7]));
        // Bottom-left of the source ends up top-left
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 1, 7]));
    }

    #[test]
    fn test_rotation_none() {
        let raw = png_of(&labelled(3, 2));
        let image = ImagePipeline::new(Rotation::None).transform(&raw).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn test_decode_error() {
        let result = ImagePipeline::default().encode(b"not an image");
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_persist_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image1.png");
        let written = ImagePipeline::default()
            .persist(&png_of(&labelled(4, 2)), &path)
            .unwrap();

        assert_eq!((written.width, written.height), (2, 4));
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&on_disk).unwrap(), ImageFormat::Png);
        assert_eq!(on_disk.len() as u64, written.bytes);
    }

    #[test]
    fn test_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image1.png");
        std::fs::write(&path, b"existing").unwrap();

        let result = ImagePipeline::default().persist(&png_of(&labelled(2, 2)), &path);
        assert!(matches!(result, Err(PipelineError::AlreadyExists(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("myImages");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();

        let result =
            ImagePipeline::default().persist(&png_of(&labelled(2, 2)), &blocker.join("image1.png"));
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let staged = ImagePipeline::default()
            .stage(&png_of(&labelled(2, 2)), dir.path())
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(staged);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image1.png");
        std::fs::write(&path, b"existing").unwrap();

        let staged = ImagePipeline::default()
            .stage(&png_of(&labelled(2, 2)), dir.path())
            .unwrap();
        assert!(matches!(
            staged.commit(&path),
            Err(PipelineError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
        // The staged copy went away with the failed commit.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_persist_writes_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image1.png");
        let raw = png_of(&labelled(400, 300));

        // Zero timeout: the worker is started, then the future is dropped.
        let cancelled = tokio::time::timeout(
            std::time::Duration::ZERO,
            ImagePipeline::default().persist_blocking(raw, path.clone()),
        )
        .await;
        assert!(cancelled.is_err());

        // Wait for the detached worker to finish and clean up.
        for _ in 0..100 {
            if std::fs::read_dir(dir.path()).unwrap().count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_persist_blocking_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image1.png");
        let written = ImagePipeline::default()
            .persist_blocking(png_of(&labelled(4, 2)), path.clone())
            .await
            .unwrap();

        assert_eq!(written.path, path);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    proptest! {
        #[test]
        fn rotation_maps_every_pixel(width in 1u32..12, height in 1u32..12) {
            let source = labelled(width, height);
            let rotated = ImagePipeline::default()
                .transform(&png_of(&source))
                .unwrap()
                .to_rgb8();

            prop_assert_eq!(rotated.dimensions(), (height, width));
            for (x, y, pixel) in source.enumerate_pixels() {
                prop_assert_eq!(rotated.get_pixel(height - 1 - y, x), pixel);
            }
        }
    }
}
