//! Asynchronous spilling of in-memory buffers to a shared file.
//!
//! A [MemoryDataSpiller] owns one output file and one writer thread.  Every
//! [SpillRequest] is queued to that thread, which writes the requests in the
//! order they were submitted, so frames from different requests never
//! interleave and no lock is needed around the file.

use std::fmt::{self, Debug};
use std::fs::File;
use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver, SendError, Sender};
use metrics::{counter, gauge, histogram};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::buffer::Buffer;
use crate::config::SpillerConfig;
use crate::error::SpillError;
use crate::file::{write_all_vectored_at, SpillFile};
use crate::frame::{encode, FrameHeader};
use crate::metrics::{
    describe_metrics, QUEUE_LENGTH, TOTAL_BUFFERS_SPILLED, TOTAL_BYTES_WRITTEN, TOTAL_FAILED_REQUESTS,
    TOTAL_REQUESTS, WRITE_LATENCY,
};
use crate::request::{BufferWithIdentity, SpillRequest, SpilledBuffer};

static DESCRIBE_METRICS: Once = Once::new();

type SpillResult = Result<Vec<SpilledBuffer>, SpillError>;

enum Command {
    Spill {
        request: SpillRequest,
        reply: oneshot::Sender<SpillResult>,
    },
}

/// Write position shared between the writer thread and the handle.
#[derive(Debug, Default)]
struct Progress {
    cursor: AtomicU64,
    bytes_written: AtomicU64,
}

/// Spills buffers to a file on a dedicated writer thread.
///
/// The first frame lands at the length the file had when the spiller was
/// created, so a file can be shared with earlier spillers as long as only
/// one of them is alive at a time.
///
/// The spiller never opens the file.  To keep the file open after the
/// spiller is gone, or to read frames back while it runs, hand it an
/// `Arc<File>` and keep a clone.
pub struct MemoryDataSpiller<F = File>
where
    F: SpillFile,
{
    sender: Option<Sender<Command>>,
    thread: Option<JoinHandle<F>>,
    progress: Arc<Progress>,
}

impl<F> MemoryDataSpiller<F>
where
    F: SpillFile,
{
    /// Starts a spiller that appends to `file`.
    pub fn new(file: F) -> Result<Self, SpillError> {
        Self::with_config(file, SpillerConfig::default())
    }

    /// Starts a spiller that appends to `file`, configured by `config`.
    pub fn with_config(file: F, config: SpillerConfig) -> Result<Self, SpillError> {
        DESCRIBE_METRICS.call_once(describe_metrics);
        let cursor = file.len()?;
        let progress = Arc::new(Progress {
            cursor: AtomicU64::new(cursor),
            bytes_written: AtomicU64::new(0),
        });
        let (sender, receiver) = unbounded();
        let writer = SpillWriter {
            file,
            receiver,
            cursor,
            poisoned: false,
            progress: progress.clone(),
            config: config.clone(),
        };
        let thread = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || writer.run())?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
            progress,
        })
    }

    /// Queues `request` for writing and returns a future for the index
    /// entries of its buffers, in the order of the request's items.
    ///
    /// This does not block.  The buffers are released to their recyclers as
    /// soon as they are written, or when the request fails.  Dropping the
    /// returned future does not cancel the write.
    pub fn spill(&self, request: SpillRequest) -> SpillFuture {
        let (reply, receiver) = oneshot::channel();
        if request.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return SpillFuture { receiver };
        }

        match &self.sender {
            Some(sender) => {
                if let Err(SendError(Command::Spill { request, reply })) =
                    sender.send(Command::Spill { request, reply })
                {
                    drop(request);
                    let _ = reply.send(Err(SpillError::Closed));
                }
            }
            None => {
                drop(request);
                let _ = reply.send(Err(SpillError::Closed));
            }
        }
        SpillFuture { receiver }
    }

    /// Offset in the file at which the next frame will be written.
    ///
    /// Requests that are still queued are not accounted for.
    pub fn write_cursor(&self) -> u64 {
        self.progress.cursor.load(Ordering::Acquire)
    }

    /// Number of bytes this spiller has written so far.
    pub fn bytes_written(&self) -> u64 {
        self.progress.bytes_written.load(Ordering::Acquire)
    }

    /// Completes every queued request, stops the writer thread, and returns
    /// the file.
    pub fn close(mut self) -> Result<F, SpillError> {
        self.sender.take();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| SpillError::Closed),
            None => Err(SpillError::Closed),
        }
    }
}

impl<F> Drop for MemoryDataSpiller<F>
where
    F: SpillFile,
{
    fn drop(&mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("spill writer thread panicked");
            }
        }
    }
}

impl<F> Debug for MemoryDataSpiller<F>
where
    F: SpillFile,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDataSpiller")
            .field("write_cursor", &self.write_cursor())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

/// The eventual result of [MemoryDataSpiller::spill].
#[must_use = "the spill result is only observable through the future"]
pub struct SpillFuture {
    receiver: oneshot::Receiver<SpillResult>,
}

impl SpillFuture {
    /// Blocks the current thread until the request completes.
    ///
    /// # Panics
    ///
    /// If called from within an asynchronous execution context.
    pub fn wait(self) -> SpillResult {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(SpillError::Closed))
    }
}

impl Future for SpillFuture {
    type Output = SpillResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SpillError::Closed)))
    }
}

/// State owned by the writer thread.
struct SpillWriter<F> {
    file: F,
    receiver: Receiver<Command>,
    /// End of the last frame known to be completely written.
    cursor: u64,
    /// Set when a failed request could not be truncated away.
    poisoned: bool,
    progress: Arc<Progress>,
    config: SpillerConfig,
}

impl<F> SpillWriter<F>
where
    F: SpillFile,
{
    fn run(mut self) -> F {
        info!(
            "spill writer starting at offset {} on thread {:?}",
            self.cursor,
            self.config.thread_name
        );
        // Keeps receiving after the last sender is gone until the queue is
        // empty, so every submitted request gets an answer.
        while let Ok(command) = self.receiver.recv() {
            gauge!(QUEUE_LENGTH).set(self.receiver.len() as f64);
            match command {
                Command::Spill { request, reply } => {
                    let result = self.spill(request);
                    let _ = reply.send(result);
                }
            }
        }
        info!(
            "spill writer exiting after writing up to offset {}",
            self.cursor
        );
        self.file
    }

    fn spill(&mut self, request: SpillRequest) -> SpillResult {
        if self.poisoned {
            return Err(SpillError::Poisoned);
        }
        for item in request.items() {
            FrameHeader::for_buffer(item.buffer())?;
        }

        let start = Instant::now();
        let start_offset = self.cursor;
        let spilled = request.spilled_buffers(start_offset);
        let n_buffers = request.len();
        debug!(
            "spilling {n_buffers} buffers ({} bytes) at offset {start_offset}",
            request.frames_len()
        );

        let mut result = self.write_items(request.into_items());
        let write_failed = result.is_err();
        if result.is_ok() && self.config.sync_on_spill {
            result = self.file.sync().map_err(SpillError::from);
        }

        match result {
            Ok(()) => {
                counter!(TOTAL_REQUESTS).increment(1);
                counter!(TOTAL_BUFFERS_SPILLED).increment(n_buffers as u64);
                histogram!(WRITE_LATENCY).record(start.elapsed().as_secs_f64());
                Ok(spilled)
            }
            Err(error) => {
                counter!(TOTAL_FAILED_REQUESTS).increment(1);
                warn!(
                    "spilling {n_buffers} buffers at offset {start_offset} failed after {} bytes: {error}",
                    self.cursor - start_offset
                );
                // A failed sync leaves only complete frames behind.
                if write_failed {
                    self.repair();
                }
                Err(error)
            }
        }
    }

    /// Writes the buffers of `items` in order, in groups that fit in one
    /// gathering write.  Buffers that were not written by the time of an
    /// error are dropped, which releases them.
    fn write_items(&mut self, items: Vec<BufferWithIdentity>) -> Result<(), SpillError> {
        let frames_per_write = self.config.io_slices() / 2;
        let mut buffers = items.into_iter().map(BufferWithIdentity::into_buffer);
        loop {
            let batch = buffers.by_ref().take(frames_per_write).collect::<Vec<_>>();
            if batch.is_empty() {
                return Ok(());
            }
            self.write_batch(batch)?;
        }
    }

    fn write_batch(&mut self, batch: Vec<Buffer>) -> Result<(), SpillError> {
        let mut written = 0;
        let mut frame_lens = Vec::with_capacity(batch.len());
        let result = {
            let frames = batch
                .iter()
                .map(encode)
                .collect::<Result<Vec<_>, _>>()?;
            frame_lens.extend(frames.iter().map(|frame| frame.len()));
            let mut slices = frames
                .iter()
                .flat_map(|frame| frame.io_slices())
                .collect::<Vec<IoSlice<'_>>>();
            write_all_vectored_at(&mut self.file, &mut slices, self.cursor, &mut written)
        };
        trace!(
            "wrote {written} bytes of {} frames at offset {}",
            batch.len(),
            self.cursor
        );

        let mut committed = 0;
        for (buffer, frame_len) in batch.into_iter().zip(frame_lens) {
            if committed + frame_len > written {
                break;
            }
            committed += frame_len;
            buffer.recycle();
        }
        self.cursor += committed;
        self.progress.cursor.store(self.cursor, Ordering::Release);
        self.progress
            .bytes_written
            .fetch_add(committed, Ordering::AcqRel);
        counter!(TOTAL_BYTES_WRITTEN).increment(committed);

        result.map_err(SpillError::from)
    }

    /// Cuts off a partially written frame after a failed write, so the file
    /// ends at a frame boundary again.
    fn repair(&mut self) {
        match self.file.truncate(self.cursor) {
            Ok(()) => debug!("truncated spill file to offset {}", self.cursor),
            Err(error) => {
                warn!(
                    "failed to truncate spill file to offset {}, refusing further spills: {error}",
                    self.cursor
                );
                self.poisoned = true;
            }
        }
    }
}
