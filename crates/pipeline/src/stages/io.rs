//! Sources and sinks backed by readers, writers and memory.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::engine::{ReadyHandle, ResumeHandle};
use crate::error::StageFailure;
use crate::traits::{Backpressure, Pull, Sink, Source};

/// Retry delay after a non-blocking reader reports `WouldBlock`.
const DEFAULT_RETRY: Duration = Duration::from_millis(10);

/// Reads fixed-size chunks from any [`Read`].
///
/// A `WouldBlock` read reports `Pending` and re-arms itself after a short
/// retry delay.
pub struct ReaderSource<R> {
    reader: R,
    chunk_size: usize,
    retry: Duration,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            retry: DEFAULT_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }
}

impl ReaderSource<File> {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, StageFailure> {
        Ok(Self::new(File::open(path)?, chunk_size))
    }
}

impl<R: Read> Source for ReaderSource<R> {
    fn name(&self) -> &str {
        "reader"
    }

    fn pull(&mut self, ready: &ReadyHandle) -> Result<Pull, StageFailure> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(Pull::Done),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Pull::Chunk(Bytes::from(buf)));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    ready.ready_after(self.retry);
                    return Ok(Pull::Pending);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Yields prepared chunks, optionally with simulated arrival latency.
pub struct IterSource {
    chunks: VecDeque<Bytes>,
    latency: Option<Duration>,
    arrived: bool,
}

impl IterSource {
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            latency: None,
            arrived: false,
        }
    }

    /// Split `data` into chunks of at most `chunk_size` bytes.
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        Self::new(
            data.chunks(chunk_size.max(1))
                .map(Bytes::copy_from_slice)
                .collect::<Vec<_>>(),
        )
    }

    /// Every chunk becomes available `latency` after it was asked for.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl Source for IterSource {
    fn name(&self) -> &str {
        "iter"
    }

    fn pull(&mut self, ready: &ReadyHandle) -> Result<Pull, StageFailure> {
        if let Some(latency) = self.latency {
            if !self.arrived && !self.chunks.is_empty() {
                self.arrived = true;
                ready.ready_after(latency);
                return Ok(Pull::Pending);
            }
            self.arrived = false;
        }
        Ok(match self.chunks.pop_front() {
            Some(chunk) => Pull::Chunk(chunk),
            None => Pull::Done,
        })
    }
}

/// Writes every chunk to a [`Write`], flushing on close.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl WriterSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StageFailure> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn name(&self) -> &str {
        "writer"
    }

    fn write(&mut self, chunk: Bytes, _resume: &ResumeHandle) -> Result<Backpressure, StageFailure> {
        self.writer.write_all(&chunk)?;
        Ok(Backpressure::Ready)
    }

    fn close(&mut self) -> Result<(), StageFailure> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read side of a [`VecSink`].
#[derive(Debug, Clone, Default)]
pub struct SinkOutput {
    data: Rc<RefCell<Vec<u8>>>,
    closed: Rc<Cell<bool>>,
    aborted: Rc<Cell<u32>>,
}

impl SinkOutput {
    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Number of abort signals the sink received.
    pub fn aborts(&self) -> u32 {
        self.aborted.get()
    }
}

/// Collects everything into memory. Can be told to push back every `n`
/// chunks, resuming after a delay.
pub struct VecSink {
    output: SinkOutput,
    pause_every: Option<(usize, Duration)>,
    writes: usize,
}

impl VecSink {
    pub fn new() -> (Self, SinkOutput) {
        let output = SinkOutput::default();
        let sink = Self {
            output: output.clone(),
            pause_every: None,
            writes: 0,
        };
        (sink, output)
    }

    pub fn pause_every(mut self, chunks: usize, resume_after: Duration) -> Self {
        self.pause_every = Some((chunks.max(1), resume_after));
        self
    }
}

impl Sink for VecSink {
    fn name(&self) -> &str {
        "vec"
    }

    fn write(&mut self, chunk: Bytes, resume: &ResumeHandle) -> Result<Backpressure, StageFailure> {
        if self.output.closed.get() {
            return Err(StageFailure::other("write after close"));
        }
        self.output.data.borrow_mut().extend_from_slice(&chunk);
        self.writes += 1;
        match self.pause_every {
            Some((every, delay)) if self.writes % every == 0 => {
                trace!(writes = self.writes, "vec sink pausing");
                resume.resume_after(delay);
                Ok(Backpressure::Pause)
            }
            _ => Ok(Backpressure::Ready),
        }
    }

    fn close(&mut self) -> Result<(), StageFailure> {
        self.output.closed.set(true);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.output.aborted.set(self.output.aborted.get() + 1);
        Ok(())
    }
}
