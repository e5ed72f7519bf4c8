//! Stage contracts.
//!
//! Stages are plain synchronous objects. The engine calls them one at a
//! time from scheduler tasks; a stage that cannot make progress reports it
//! (`Pull::Pending`, `Backpressure::Pause`) and later wakes the engine
//! through the handle it was given.

use bytes::Bytes;

use crate::engine::{ReadyHandle, ResumeHandle};
use crate::error::StageFailure;

/// Result of asking a source for its next chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    Chunk(Bytes),
    /// Nothing available yet. The source must call
    /// [`ReadyHandle::ready`] when data arrives.
    Pending,
    /// The source is exhausted.
    Done,
}

/// Answer of a sink to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Ready,
    /// The chunk was accepted but no more should be written until the sink
    /// calls [`ResumeHandle::resume`].
    Pause,
}

/// Produces a finite, non-restartable sequence of chunks.
pub trait Source {
    fn name(&self) -> &str {
        "source"
    }

    fn pull(&mut self, ready: &ReadyHandle) -> Result<Pull, StageFailure>;

    /// Release resources after another stage failed. Called at most once.
    fn abort(&mut self) -> Result<(), StageFailure> {
        Ok(())
    }
}

/// Maps chunks to chunks. May buffer; an empty output emits nothing.
pub trait Transform {
    fn name(&self) -> &str;

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure>;

    /// Emit whatever is still buffered. Called once, after the source is
    /// exhausted.
    fn flush(&mut self) -> Result<Bytes, StageFailure>;

    fn abort(&mut self) -> Result<(), StageFailure> {
        Ok(())
    }
}

/// Consumes chunks and may push back.
pub trait Sink {
    fn name(&self) -> &str {
        "sink"
    }

    fn write(&mut self, chunk: Bytes, resume: &ResumeHandle) -> Result<Backpressure, StageFailure>;

    /// Called once, after every chunk has been written.
    fn close(&mut self) -> Result<(), StageFailure>;

    fn abort(&mut self) -> Result<(), StageFailure> {
        Ok(())
    }
}
