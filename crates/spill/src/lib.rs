//! Spilling of in-memory shuffle buffers to disk.
//!
//! A producer hands batches of [Buffer]s to a [MemoryDataSpiller], which
//! appends them to a single file as self-describing frames (see [frame]) on
//! a background thread.  For every buffer, the spiller reports a
//! [SpilledBuffer] that says where its frame starts, so that a reader can
//! later fetch it back with [read_frame_at].
//!
//! ```no_run
//! use std::fs::OpenOptions;
//! use shuffle_spill::{
//!     Buffer, BufferWithIdentity, DataType, FreeingBufferRecycler, MemoryDataSpiller,
//!     MemorySegment, SpillRequest,
//! };
//!
//! let file = OpenOptions::new().create(true).read(true).write(true).open("shuffle.data")?;
//! let spiller = MemoryDataSpiller::new(file)?;
//!
//! let segment = MemorySegment::from_vec(b"hello".to_vec());
//! let buffer = Buffer::new(segment, FreeingBufferRecycler::shared(), DataType::DataBuffer, 5)?;
//! let request = SpillRequest::new(vec![BufferWithIdentity::new(buffer, 0, 0)]);
//! let spilled = spiller.spill(request).wait()?;
//! assert_eq!(spilled[0].file_offset, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod file;
pub mod frame;
pub mod metrics;
pub mod request;
pub mod spiller;


pub use buffer::{Buffer, BufferRecycler, DataType, FreeingBufferRecycler, MemorySegment};
pub use config::SpillerConfig;
pub use error::{FrameError, SpillError};
pub use file::{MemoryFile, SpillFile};
pub use frame::{
    encode, read_frame, read_frame_at, read_header, skip_frame, write_frame, EncodedFrame,
    FrameHeader, HEADER_LENGTH, MAX_PAYLOAD_LENGTH,
};
pub use request::{BufferWithIdentity, SpillRequest, SpilledBuffer};
pub use spiller::{MemoryDataSpiller, SpillFuture};
