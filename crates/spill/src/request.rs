//! Inputs and outputs of a spill.

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::frame::HEADER_LENGTH;

/// A buffer together with the coordinate it will be looked up by.
#[derive(Debug)]
pub struct BufferWithIdentity {
    buffer: Buffer,
    /// Producer-assigned sequence number within the subpartition.
    buffer_index: u32,
    subpartition_id: u32,
}

impl BufferWithIdentity {
    pub fn new(buffer: Buffer, buffer_index: u32, subpartition_id: u32) -> Self {
        Self {
            buffer,
            buffer_index,
            subpartition_id,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_index(&self) -> u32 {
        self.buffer_index
    }

    pub fn subpartition_id(&self) -> u32 {
        self.subpartition_id
    }

    /// Size of this buffer once framed.
    pub fn frame_len(&self) -> u64 {
        (HEADER_LENGTH + self.buffer.readable_bytes()) as u64
    }

    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

/// An ordered batch of buffers to spill together.
///
/// The buffers are written in the order given, whatever subpartitions they
/// belong to.
#[derive(Debug, Default)]
pub struct SpillRequest {
    items: Vec<BufferWithIdentity>,
}

impl SpillRequest {
    pub fn new(items: Vec<BufferWithIdentity>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[BufferWithIdentity] {
        &self.items
    }

    /// Total number of bytes the request occupies once written.
    pub fn frames_len(&self) -> u64 {
        self.items.iter().map(BufferWithIdentity::frame_len).sum()
    }

    /// Returns the index entries the request produces when its first frame
    /// is written at `start_offset`.
    pub fn spilled_buffers(&self, start_offset: u64) -> Vec<SpilledBuffer> {
        let mut offset = start_offset;
        self.items
            .iter()
            .map(|item| {
                let spilled = SpilledBuffer::new(item.subpartition_id, item.buffer_index, offset);
                offset += item.frame_len();
                spilled
            })
            .collect()
    }

    pub(crate) fn into_items(self) -> Vec<BufferWithIdentity> {
        self.items
    }
}

impl From<Vec<BufferWithIdentity>> for SpillRequest {
    fn from(items: Vec<BufferWithIdentity>) -> Self {
        Self::new(items)
    }
}

impl FromIterator<BufferWithIdentity> for SpillRequest {
    fn from_iter<T: IntoIterator<Item = BufferWithIdentity>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Where a spilled buffer landed.  This is what the spilled-data index
/// records for `(subpartition_id, buffer_index)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpilledBuffer {
    pub subpartition_id: u32,
    pub buffer_index: u32,
    /// Offset of the frame header in the spill file.
    pub file_offset: u64,
}

impl SpilledBuffer {
    pub fn new(subpartition_id: u32, buffer_index: u32, file_offset: u64) -> Self {
        Self {
            subpartition_id,
            buffer_index,
            file_offset,
        }
    }
}
