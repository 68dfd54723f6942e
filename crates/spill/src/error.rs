use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::io::ErrorKind;
use thiserror::Error;

/// An error decoding or constructing a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum FrameError {
    /// The payload does not fit into the destination segment.
    #[error("Buffer length {length} exceeds the destination capacity of {capacity} bytes.")]
    SizeMismatch { length: usize, capacity: usize },

    /// The input ended partway through a frame header.
    #[error("The frame header is truncated.")]
    TruncatedHeader,

    /// The header names a data type that this version does not know.
    #[error("Unknown buffer data type {0}.")]
    UnknownDataType(u16),

    /// The header sets flag bits that are not defined.
    #[error("Invalid frame flags {0:#06x}.")]
    InvalidFlags(u16),

    /// The header's event flag disagrees with its data type.
    #[error("The event flag does not match the buffer data type.")]
    EventFlagMismatch,

    /// The payload length cannot be represented in a frame header.
    #[error("Payload length {0} exceeds the maximum frame payload length.")]
    LengthOverflow(u64),

    /// I/O error while reading or writing a frame.
    #[error("{0}")]
    #[serde(serialize_with = "serialize_io_error")]
    Io(ErrorKind),
}

impl From<std::io::Error> for FrameError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.kind())
    }
}

/// An error that can occur while spilling buffers to disk.
///
/// Errors are reported once per [SpillRequest](crate::SpillRequest); the
/// buffers of a failed request have been released regardless.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum SpillError {
    /// I/O error.
    #[error("{0}")]
    #[serde(serialize_with = "serialize_io_error")]
    StdIo(ErrorKind),

    /// A buffer could not be framed.
    #[error("{0}")]
    Frame(#[from] FrameError),

    /// The spiller's writer thread is no longer running.
    #[error("The spiller has been closed.")]
    Closed,

    /// A previous failure left the output at an unknown length, so the
    /// spiller refuses further writes.
    #[error("The spill file could not be repaired after a failed write.")]
    Poisoned,
}

impl From<std::io::Error> for SpillError {
    fn from(value: std::io::Error) -> Self {
        Self::StdIo(value.kind())
    }
}

fn serialize_io_error<S>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut ser = serializer.serialize_struct("IOError", 1)?;
    ser.serialize_field("kind", &kind.to_string())?;
    ser.end()
}

impl SpillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpillError::StdIo(kind) => *kind,
            SpillError::Frame(FrameError::Io(kind)) => *kind,
            SpillError::Frame(_) => ErrorKind::InvalidData,
            SpillError::Closed => ErrorKind::BrokenPipe,
            SpillError::Poisoned => ErrorKind::Other,
        }
    }
}
