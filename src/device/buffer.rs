//! Single-slot buffer reader for still captures.
//!
//! The hardware writes one encoded image into a [`ReaderSurface`]; the session
//! owner takes it out of the paired [`BufferReader`] as an [`ImageBuffer`].
//! An `ImageBuffer` is a scope guard: dropping it releases the slot, so the
//! release happens exactly once on every exit path.

use super::stream::Resolution;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Identifies a buffer reader within the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(pub u64);

/// Encoding of the bytes delivered into a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// Lossy intermediate encoding used for still captures.
    Jpeg,
}

/// Reasons a delivery into the slot is refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The previous image has not been acquired yet.
    #[error("buffer reader slot is full")]
    SlotFull,
    /// The reader was released.
    #[error("buffer reader is closed")]
    Closed,
}

/// Acquire/release accounting for one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Images written into the slot by the hardware.
    pub delivered: u64,
    /// Deliveries refused because the slot was occupied or closed.
    pub rejected: u64,
    /// Buffers handed out by `acquire_latest`.
    pub acquired: u64,
    /// Buffers released by dropping their guard.
    pub released: u64,
}

struct ReaderSlot {
    id: ReaderId,
    resolution: Resolution,
    format: BufferFormat,
    slot: Mutex<Option<Vec<u8>>>,
    outstanding: AtomicBool,
    closed: AtomicBool,
    delivered: AtomicU64,
    rejected: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ReaderSlot {
    fn slot(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        // The slot only holds plain bytes, a poisoned lock is still usable.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> BufferStats {
        BufferStats {
            delivered: self.delivered.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            acquired: self.acquired.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
        }
    }
}

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Consumer side of a single-slot image reader.
///
/// Dropping the reader closes it; later deliveries are refused.
pub struct BufferReader {
    inner: Arc<ReaderSlot>,
}

impl BufferReader {
    /// Allocates a reader with room for exactly one image.
    pub fn new(resolution: Resolution, format: BufferFormat) -> Self {
        let id = ReaderId(NEXT_READER_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(reader = id.0, %resolution, ?format, "Buffer reader allocated");
        Self {
            inner: Arc::new(ReaderSlot {
                id,
                resolution,
                format,
                slot: Mutex::new(None),
                outstanding: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Reader identifier, matched against `ImageAvailable` events.
    pub fn id(&self) -> ReaderId {
        self.inner.id
    }

    /// Producer handle given to the hardware as a capture target.
    pub fn surface(&self) -> ReaderSurface {
        ReaderSurface {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Takes the pending image out of the slot.
    ///
    /// Returns `None` if nothing was delivered or a previously acquired
    /// buffer has not been released yet.
    pub fn acquire_latest(&self) -> Option<ImageBuffer<'_>> {
        if self.inner.outstanding.swap(true, Ordering::AcqRel) {
            return None;
        }
        match self.inner.slot().take() {
            Some(bytes) => {
                self.inner.acquired.fetch_add(1, Ordering::AcqRel);
                Some(ImageBuffer {
                    bytes,
                    format: self.inner.format,
                    resolution: self.inner.resolution,
                    reader: &*self.inner,
                })
            }
            None => {
                self.inner.outstanding.store(false, Ordering::Release);
                None
            }
        }
    }

    /// Current accounting.
    pub fn stats(&self) -> BufferStats {
        self.inner.stats()
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.slot().take();
        tracing::debug!(reader = self.inner.id.0, "Buffer reader released");
    }
}

/// Producer side of a [`BufferReader`], held by the hardware layer.
#[derive(Clone)]
pub struct ReaderSurface {
    inner: Arc<ReaderSlot>,
}

impl ReaderSurface {
    /// Reader identifier.
    pub fn id(&self) -> ReaderId {
        self.inner.id
    }

    /// Resolution the reader was allocated for.
    pub fn resolution(&self) -> Resolution {
        self.inner.resolution
    }

    /// Encoding the reader expects.
    pub fn format(&self) -> BufferFormat {
        self.inner.format
    }

    /// Returns true once the consumer side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Writes an encoded image into the slot.
    pub fn deliver(&self, bytes: Vec<u8>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            self.inner.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(DeliveryError::Closed);
        }
        let mut slot = self.inner.slot();
        if slot.is_some() || self.inner.outstanding.load(Ordering::Acquire) {
            self.inner.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(DeliveryError::SlotFull);
        }
        *slot = Some(bytes);
        self.inner.delivered.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Accounting for the paired reader.
    pub fn stats(&self) -> BufferStats {
        self.inner.stats()
    }
}

impl std::fmt::Debug for ReaderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSurface")
            .field("id", &self.inner.id)
            .field("resolution", &self.inner.resolution)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An acquired image. Released when dropped.
pub struct ImageBuffer<'a> {
    bytes: Vec<u8>,
    format: BufferFormat,
    resolution: Resolution,
    reader: &'a ReaderSlot,
}

impl ImageBuffer<'_> {
    /// Encoded bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoding tag.
    #[inline]
    pub fn format(&self) -> BufferFormat {
        self.format
    }

    /// Resolution of the reader that produced this buffer.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Copies the bytes out so the buffer can be released immediately.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Drop for ImageBuffer<'_> {
    fn drop(&mut self) {
        self.reader.released.fetch_add(1, Ordering::AcqRel);
        self.reader.outstanding.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ImageBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("format", &self.format)
            .field("resolution", &self.resolution)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
