//! # Spill file format
//!
//! A spill file is a sequence of frames with nothing before, between, or
//! after them.  Each frame encodes one [Buffer] as an 8-byte [FrameHeader]
//! followed immediately by the buffer's payload bytes.  The header carries
//! the payload length, so a file can be scanned from the start with
//! [skip_frame] or entered at any frame offset with [read_frame_at].
//!
//! The header is serialized with [`mod@binrw`] in little-endian byte order:
//!
//! | bytes  | field       | contents                                        |
//! |--------|-------------|-------------------------------------------------|
//! | 0..2   | `data_type` | [DataType] tag                                  |
//! | 2..4   | `flags`     | [FLAG_COMPRESSED] and [FLAG_EVENT]               |
//! | 4..8   | `length`    | payload length, at most [MAX_PAYLOAD_LENGTH]    |
//!
//! Changing this layout breaks every existing spill file.

use std::io::{Cursor, ErrorKind, IoSlice, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use binrw::{binrw, BinRead, BinWrite};

use crate::buffer::{Buffer, BufferRecycler, DataType, MemorySegment};
use crate::error::FrameError;

/// Length of a frame header in bytes.
pub const HEADER_LENGTH: usize = 8;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LENGTH: usize = i32::MAX as usize;

/// Header flag: the payload is compressed.
pub const FLAG_COMPRESSED: u16 = 1 << 0;

/// Header flag: the payload is an event.  Redundant with the data type, which
/// lets readers reject headers that were not written by a frame encoder.
pub const FLAG_EVENT: u16 = 1 << 1;

const KNOWN_FLAGS: u16 = FLAG_COMPRESSED | FLAG_EVENT;

#[binrw]
#[brw(little)]
struct RawFrameHeader {
    data_type: u16,
    flags: u16,
    length: u32,
}

/// Decoded frame header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub data_type: DataType,
    pub compressed: bool,
    /// Payload length in bytes.
    pub length: usize,
}

impl FrameHeader {
    /// Returns the header for `buffer`.
    pub fn for_buffer(buffer: &Buffer) -> Result<Self, FrameError> {
        let length = buffer.readable_bytes();
        if length > MAX_PAYLOAD_LENGTH {
            return Err(FrameError::LengthOverflow(length as u64));
        }
        Ok(Self {
            data_type: buffer.data_type(),
            compressed: buffer.is_compressed(),
            length,
        })
    }

    /// Total length of the frame, header included.
    pub fn frame_len(&self) -> u64 {
        (HEADER_LENGTH + self.length) as u64
    }

    pub fn to_bytes(&self) -> Result<[u8; HEADER_LENGTH], FrameError> {
        let mut flags = 0;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.data_type.is_event() {
            flags |= FLAG_EVENT;
        }
        let raw = RawFrameHeader {
            data_type: self.data_type.tag(),
            flags,
            length: self.length as u32,
        };

        let mut bytes = [0; HEADER_LENGTH];
        raw.write(&mut Cursor::new(&mut bytes[..]))
            .map_err(binrw_error)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LENGTH]) -> Result<Self, FrameError> {
        let raw = RawFrameHeader::read(&mut Cursor::new(&bytes[..]))
            .map_err(|_| FrameError::TruncatedHeader)?;

        let data_type = DataType::try_from(raw.data_type)?;
        if raw.flags & !KNOWN_FLAGS != 0 {
            return Err(FrameError::InvalidFlags(raw.flags));
        }
        if (raw.flags & FLAG_EVENT != 0) != data_type.is_event() {
            return Err(FrameError::EventFlagMismatch);
        }
        if raw.length as usize > MAX_PAYLOAD_LENGTH {
            return Err(FrameError::LengthOverflow(raw.length as u64));
        }
        Ok(Self {
            data_type,
            compressed: raw.flags & FLAG_COMPRESSED != 0,
            length: raw.length as usize,
        })
    }
}

fn binrw_error(error: binrw::Error) -> FrameError {
    match error {
        binrw::Error::Io(error) => error.into(),
        _ => FrameError::Io(ErrorKind::InvalidData),
    }
}

/// A buffer encoded as a frame.  The payload is borrowed from the buffer, not
/// copied.
#[derive(Debug)]
pub struct EncodedFrame<'a> {
    header: [u8; HEADER_LENGTH],
    payload: &'a [u8],
}

impl<'a> EncodedFrame<'a> {
    pub fn header(&self) -> &[u8; HEADER_LENGTH] {
        &self.header
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Total length of the frame, header included.
    pub fn len(&self) -> u64 {
        (HEADER_LENGTH + self.payload.len()) as u64
    }

    /// Slices for a gathering write of the whole frame.
    pub fn io_slices(&self) -> [IoSlice<'_>; 2] {
        [IoSlice::new(&self.header), IoSlice::new(self.payload)]
    }

    /// Copies the frame into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() as usize);
        bytes.extend_from_slice(&self.header);
        bytes.extend_from_slice(self.payload);
        bytes
    }
}

/// Encodes `buffer` as a frame.
pub fn encode(buffer: &Buffer) -> Result<EncodedFrame<'_>, FrameError> {
    let header = FrameHeader::for_buffer(buffer)?;
    Ok(EncodedFrame {
        header: header.to_bytes()?,
        payload: buffer.readable(),
    })
}

/// Writes `buffer` as one frame to `writer` and returns the number of bytes
/// written.
pub fn write_frame<W>(writer: &mut W, buffer: &Buffer) -> Result<u64, FrameError>
where
    W: Write + ?Sized,
{
    let frame = encode(buffer)?;
    writer.write_all(frame.header())?;
    writer.write_all(frame.payload())?;
    Ok(frame.len())
}

/// Reads a frame header from `reader`.
///
/// Returns `None` if `reader` is at end of input.  End of input partway
/// through the header is [FrameError::TruncatedHeader].
pub fn read_header<R>(reader: &mut R) -> Result<Option<FrameHeader>, FrameError>
where
    R: Read + ?Sized,
{
    let mut bytes = [0; HEADER_LENGTH];
    let mut n = 0;
    while n < HEADER_LENGTH {
        match reader.read(&mut bytes[n..]) {
            Ok(0) if n == 0 => return Ok(None),
            Ok(0) => return Err(FrameError::TruncatedHeader),
            Ok(count) => n += count,
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => return Err(error.into()),
        }
    }
    FrameHeader::from_bytes(&bytes).map(Some)
}

/// Reads the next frame from `reader` into `segment`.
///
/// Returns `None` at end of input.  On success the segment belongs to the
/// returned buffer, which hands it to `recycler` when released; in every
/// other case the segment goes straight back to `recycler`.
pub fn read_frame<R>(
    reader: &mut R,
    mut segment: MemorySegment,
    recycler: Arc<dyn BufferRecycler>,
) -> Result<Option<Buffer>, FrameError>
where
    R: Read + ?Sized,
{
    let header = match read_header(reader) {
        Ok(Some(header)) => header,
        Ok(None) => {
            recycler.recycle(segment);
            return Ok(None);
        }
        Err(error) => {
            recycler.recycle(segment);
            return Err(error);
        }
    };

    if header.length > segment.capacity() {
        let capacity = segment.capacity();
        recycler.recycle(segment);
        return Err(FrameError::SizeMismatch {
            length: header.length,
            capacity,
        });
    }
    if let Err(error) = reader.read_exact(&mut segment.as_mut_slice()[..header.length]) {
        recycler.recycle(segment);
        return Err(error.into());
    }

    let mut buffer = Buffer::new(segment, recycler, header.data_type, header.length)?;
    buffer.set_compressed(header.compressed);
    Ok(Some(buffer))
}

/// Reads the frame that starts at byte `offset` of `reader`.
///
/// Unlike [read_frame], end of input at `offset` is an error, since the
/// caller expects a frame there.
pub fn read_frame_at<R>(
    reader: &mut R,
    offset: u64,
    segment: MemorySegment,
    recycler: Arc<dyn BufferRecycler>,
) -> Result<Buffer, FrameError>
where
    R: Read + Seek + ?Sized,
{
    if let Err(error) = reader.seek(SeekFrom::Start(offset)) {
        recycler.recycle(segment);
        return Err(error.into());
    }
    read_frame(reader, segment, recycler)?.ok_or(FrameError::Io(ErrorKind::UnexpectedEof))
}

/// Skips over the next frame in `reader` and returns its header, or `None`
/// at end of input.
pub fn skip_frame<R>(reader: &mut R) -> Result<Option<FrameHeader>, FrameError>
where
    R: Read + Seek + ?Sized,
{
    let Some(header) = read_header(reader)? else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Current(header.length as i64))?;
    Ok(Some(header))
}
