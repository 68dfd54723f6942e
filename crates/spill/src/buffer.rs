//! In-memory buffers handed to the spiller.
//!
//! A [Buffer] owns a [MemorySegment] that was handed out by an upstream
//! allocator.  The segment goes back to that allocator through its
//! [BufferRecycler] exactly once: either explicitly with
//! [Buffer::recycle], or implicitly when the buffer is dropped.  Since
//! [Buffer] is neither `Clone` nor `Copy`, a buffer submitted for spilling
//! can no longer be touched by its previous owner.

use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::FrameError;

/// The kind of content a [Buffer] carries.
///
/// The discriminant is the tag stored in a frame header, so the order of the
/// variants is part of the on-disk format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DataType {
    /// No data.  Never produced by a healthy writer.
    #[default]
    None = 0,

    /// Regular serialized records.
    DataBuffer = 1,

    /// A serialized control event.
    EventBuffer = 2,

    /// An event that overtakes data buffers queued ahead of it.
    PriorityEventBuffer = 3,

    /// A checkpoint barrier that blocks the upstream until it is aligned.
    AlignedCheckpointBarrier = 4,

    /// An aligned checkpoint barrier that may time out into an unaligned one.
    TimeoutableAlignedCheckpointBarrier = 5,

    /// Marks the end of recovered state.
    RecoveryCompletion = 6,

    /// Metadata describing recovered state.
    RecoveryMetadata = 7,

    /// Marks the end of a segment of a subpartition.
    EndOfSegment = 8,
}

impl DataType {
    /// All data types, in tag order.
    pub const ALL: [DataType; 9] = [
        Self::None,
        Self::DataBuffer,
        Self::EventBuffer,
        Self::PriorityEventBuffer,
        Self::AlignedCheckpointBarrier,
        Self::TimeoutableAlignedCheckpointBarrier,
        Self::RecoveryCompletion,
        Self::RecoveryMetadata,
        Self::EndOfSegment,
    ];

    /// The tag written to frame headers.
    pub fn tag(&self) -> u16 {
        *self as u16
    }

    /// Returns true if this carries records rather than an event.
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::DataBuffer)
    }

    /// Returns true if this carries a control event.
    pub fn is_event(&self) -> bool {
        !matches!(self, Self::None | Self::DataBuffer)
    }

    /// Returns true if this must be delivered ahead of queued data.
    pub fn has_priority(&self) -> bool {
        matches!(self, Self::PriorityEventBuffer)
    }

    /// Returns true if this blocks its upstream channel until consumed.
    pub fn is_blocking_upstream(&self) -> bool {
        matches!(
            self,
            Self::AlignedCheckpointBarrier | Self::TimeoutableAlignedCheckpointBarrier
        )
    }

    /// Returns true if the consumer must be told about this buffer before it
    /// arrives.
    pub fn requires_announcement(&self) -> bool {
        matches!(self, Self::TimeoutableAlignedCheckpointBarrier)
    }
}

impl TryFrom<u16> for DataType {
    type Error = FrameError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(FrameError::UnknownDataType(tag))
    }
}

/// A fixed-capacity region of memory owned by one buffer at a time.
pub struct MemorySegment {
    data: Box<[u8]>,
}

impl MemorySegment {
    /// Allocates a zeroed segment of `capacity` bytes.
    pub fn allocate(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
        }
    }

    /// Wraps `data` as a segment whose capacity is `data.len()`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Writes `value` at byte `index` in native byte order.
    ///
    /// # Panics
    ///
    /// If `index + 4` exceeds the capacity.
    pub fn put_i32(&mut self, index: usize, value: i32) {
        self.data[index..index + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Reads an `i32` at byte `index` in native byte order.
    ///
    /// # Panics
    ///
    /// If `index + 4` exceeds the capacity.
    pub fn get_i32(&self, index: usize) -> i32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.data[index..index + 4]);
        i32::from_ne_bytes(bytes)
    }
}

impl Debug for MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySegment")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Takes back the memory of buffers that are no longer needed.
pub trait BufferRecycler: Send + Sync {
    /// Reclaims `segment`.  Called exactly once per buffer.
    fn recycle(&self, segment: MemorySegment);
}

/// A [BufferRecycler] that frees the memory.
#[derive(Copy, Clone, Debug, Default)]
pub struct FreeingBufferRecycler;

impl FreeingBufferRecycler {
    pub fn shared() -> Arc<dyn BufferRecycler> {
        Arc::new(Self)
    }
}

impl BufferRecycler for FreeingBufferRecycler {
    fn recycle(&self, segment: MemorySegment) {
        drop(segment);
    }
}

/// A logical buffer: the first `size` bytes of a memory segment, tagged with
/// a [DataType].
pub struct Buffer {
    /// `None` once the segment has gone back to the recycler.
    segment: Option<MemorySegment>,
    recycler: Arc<dyn BufferRecycler>,
    data_type: DataType,
    size: usize,
    compressed: bool,
}

impl Buffer {
    /// Creates a buffer whose readable content is the first `size` bytes of
    /// `segment`.
    pub fn new(
        segment: MemorySegment,
        recycler: Arc<dyn BufferRecycler>,
        data_type: DataType,
        size: usize,
    ) -> Result<Self, FrameError> {
        if size > segment.capacity() {
            return Err(FrameError::SizeMismatch {
                length: size,
                capacity: segment.capacity(),
            });
        }
        Ok(Self {
            segment: Some(segment),
            recycler,
            data_type,
            size,
            compressed: false,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Marks the payload as compressed.  The spiller stores the flag but never
    /// compresses or decompresses anything itself.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    /// Number of payload bytes.
    pub fn readable_bytes(&self) -> usize {
        self.size
    }

    /// The payload.
    pub fn readable(&self) -> &[u8] {
        match &self.segment {
            Some(segment) => &segment.as_slice()[..self.size],
            None => &[],
        }
    }

    /// Returns the memory to the recycler.
    pub fn recycle(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(segment) = self.segment.take() {
            self.recycler.recycle(segment);
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("data_type", &self.data_type)
            .field("size", &self.size)
            .field("compressed", &self.compressed)
            .finish()
    }
}
