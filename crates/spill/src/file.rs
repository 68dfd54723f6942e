//! Outputs the spiller can append frames to.
//!
//! The spiller only needs positioned writes, because it is the sole writer
//! of its output and tracks the write cursor itself.  Readers may have the
//! same file open and keep their own positions.

use std::fs::File;
use std::io::{self, ErrorKind, IoSlice};
use std::sync::{Arc, Mutex};

/// A file that spilled frames are appended to.
pub trait SpillFile: Send + 'static {
    /// Returns the current length of the file in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Writes `bufs`, in order, at byte `offset`.  Returns the number of
    /// bytes written, which may be less than the total length of `bufs`.
    fn write_vectored_at(&mut self, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize>;

    /// Shrinks or extends the file to exactly `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Flushes written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl SpillFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn write_vectored_at(&mut self, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
        pwritev_at(self, bufs, offset)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// A file that the caller keeps open alongside the spiller, for example to
/// read spilled frames back.  Dropping the spiller only drops its own
/// reference.
impl SpillFile for Arc<File> {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn write_vectored_at(&mut self, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
        pwritev_at(self, bufs, offset)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[cfg(target_family = "unix")]
fn pwritev_at(file: &File, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    use nix::sys::uio::pwritev;
    Ok(pwritev(file, bufs, offset as nix::libc::off_t)?)
}

#[cfg(not(target_family = "unix"))]
fn pwritev_at(mut file: &File, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_vectored(bufs)
}

/// An in-memory [SpillFile].  Clones share the same contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a file that already holds `data`.
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Returns a copy of the file's contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl SpillFile for MemoryFile {
    fn len(&self) -> io::Result<u64> {
        Ok(self.data.lock().unwrap().len() as u64)
    }

    fn write_vectored_at(&mut self, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
        let mut data = self.data.lock().unwrap();
        let mut position = offset as usize;
        for buf in bufs {
            let end = position + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[position..end].copy_from_slice(buf);
            position = end;
        }
        Ok(position - offset as usize)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.data.lock().unwrap().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes all of `bufs` at `offset`, retrying short writes.
///
/// `written` is advanced by every byte that reaches the file, so on error it
/// tells how much of `bufs` was written before the failure.
pub fn write_all_vectored_at<F>(
    file: &mut F,
    mut bufs: &mut [IoSlice<'_>],
    offset: u64,
    written: &mut u64,
) -> io::Result<()>
where
    F: SpillFile + ?Sized,
{
    let mut remaining = bufs.iter().map(|buf| buf.len() as u64).sum::<u64>();
    let start = *written;
    while remaining > 0 {
        match file.write_vectored_at(bufs, offset + (*written - start)) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                *written += n as u64;
                remaining -= n as u64;
                IoSlice::advance_slices(&mut bufs, n);
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => return Err(error),
        }
    }
    Ok(())
}
