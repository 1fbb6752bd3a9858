//! Image persistence.
//!
//! Turns the raw still capture into the saved file: orientation fix,
//! lossless encoding, collision-free naming, and the notifications the host
//! needs once a file exists.

mod artifact;
mod media_index;
mod naming;
mod pipeline;

pub use artifact::TransientCapture;
pub use media_index::{LogMediaIndex, MediaIndex, MemoryMediaIndex};
pub use naming::{FileNamer, PersistedImage, IMAGE_DIR, IMAGE_EXTENSION};
pub use pipeline::{ImagePipeline, PipelineError, Rotation, StagedImage, WrittenImage};
