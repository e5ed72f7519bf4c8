use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::{PipelineStats, ReadyHandle, ResumeHandle, Shared, StageState};
use crate::error::{PipelineError, StageError, StageFailure};
use crate::traits::{Backpressure, Pull};

type Failure = (usize, StageFailure);

impl Shared {
    /// Schedule one pump task unless one is already queued.
    pub(super) fn request_pump(shared: &Rc<Shared>) {
        {
            let mut flow = shared.flow.borrow_mut();
            if flow.finished || flow.pump_scheduled {
                return;
            }
            flow.pump_scheduled = true;
        }
        let this = Rc::clone(shared);
        shared.scheduler.spawn("pipeline pump", move |_| Shared::pump(&this));
    }

    fn pump(shared: &Rc<Shared>) {
        {
            let mut flow = shared.flow.borrow_mut();
            flow.pump_scheduled = false;
            if flow.finished {
                return;
            }
        }

        if let Err((index, cause)) = Shared::drain(shared) {
            Shared::terminate(shared, Some((index, cause)));
            return;
        }

        let (close, pull) = {
            let flow = shared.flow.borrow();
            let close = flow.source_done && flow.buffer.is_empty() && !flow.sink_paused;
            let pull = !flow.source_done
                && !flow.sink_paused
                && !flow.source_waiting
                && flow.buffered < shared.config.high_water_mark;
            (close, pull)
        };
        if close {
            Shared::close_sink(shared);
            return;
        }
        if !pull {
            trace!(
                buffered = shared.flow.borrow().buffered,
                "pipeline waiting for readiness"
            );
            return;
        }

        if let Err((index, cause)) = Shared::pull_once(shared) {
            Shared::terminate(shared, Some((index, cause)));
        }
    }

    /// Pull one chunk and push it through every transform.
    fn pull_once(shared: &Rc<Shared>) -> Result<(), Failure> {
        shared.flow.borrow_mut().ready_signal = false;
        let ready = ReadyHandle::new(shared);
        let pulled = shared.source.borrow_mut().pull(&ready);

        match pulled.map_err(|e| (0, e))? {
            Pull::Chunk(chunk) => {
                {
                    let mut flow = shared.flow.borrow_mut();
                    flow.stats.chunks_in += 1;
                    flow.stats.bytes_in += chunk.len() as u64;
                }
                let out = shared.through(0, chunk)?;
                shared.enqueue(out);
                Shared::request_pump(shared);
            }
            Pull::Pending => {
                let mut flow = shared.flow.borrow_mut();
                if !flow.ready_signal {
                    flow.source_waiting = true;
                }
            }
            Pull::Done => {
                shared.flow.borrow_mut().stages[0] = StageState::Closed;
                shared.flush_transforms()?;
                {
                    let mut flow = shared.flow.borrow_mut();
                    flow.source_done = true;
                    let sink = shared.sink_index();
                    flow.stages[sink] = StageState::Draining;
                }
                debug!(stats = ?shared.flow.borrow().stats, "pipeline source exhausted");
                Shared::request_pump(shared);
            }
        }
        Ok(())
    }

    /// Run `chunk` through transforms `from..`, by zero-based transform
    /// position.
    fn through(&self, from: usize, mut chunk: Bytes) -> Result<Bytes, Failure> {
        let mut transforms = self.transforms.borrow_mut();
        for (position, transform) in transforms.iter_mut().enumerate().skip(from) {
            if chunk.is_empty() {
                break;
            }
            chunk = transform.transform(chunk).map_err(|e| (position + 1, e))?;
        }
        Ok(chunk)
    }

    fn flush_transforms(&self) -> Result<(), Failure> {
        let count = self.transforms.borrow().len();
        for position in 0..count {
            let index = position + 1;
            self.flow.borrow_mut().stages[index] = StageState::Draining;
            let flushed = self.transforms.borrow_mut()[position]
                .flush()
                .map_err(|e| (index, e))?;
            let out = self.through(position + 1, flushed)?;
            self.enqueue(out);
            self.flow.borrow_mut().stages[index] = StageState::Closed;
        }
        Ok(())
    }

    fn enqueue(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let mut flow = self.flow.borrow_mut();
        flow.buffered += chunk.len();
        flow.buffer.push_back(chunk);
    }

    /// Write buffered chunks until the buffer is empty or the sink pauses.
    fn drain(shared: &Rc<Shared>) -> Result<(), Failure> {
        loop {
            let chunk = {
                let mut flow = shared.flow.borrow_mut();
                if flow.sink_paused {
                    return Ok(());
                }
                let Some(chunk) = flow.buffer.pop_front() else {
                    return Ok(());
                };
                flow.buffered -= chunk.len();
                flow.resume_signal = false;
                chunk
            };

            let len = chunk.len() as u64;
            let resume = ResumeHandle::new(shared);
            let written = shared.sink.borrow_mut().write(chunk, &resume);

            let mut flow = shared.flow.borrow_mut();
            match written.map_err(|e| (shared.sink_index(), e))? {
                Backpressure::Ready => flow.stats.bytes_out += len,
                Backpressure::Pause => {
                    flow.stats.bytes_out += len;
                    flow.stats.pauses += 1;
                    if !flow.resume_signal {
                        flow.sink_paused = true;
                    }
                    trace!(buffered = flow.buffered, "sink paused");
                }
            }
        }
    }

    fn close_sink(shared: &Rc<Shared>) {
        let closed = shared.sink.borrow_mut().close();
        if let Err(cause) = closed {
            Shared::terminate(shared, Some((shared.sink_index(), cause)));
            return;
        }
        if !shared.settled.try_settle() {
            return;
        }
        let stats = {
            let mut flow = shared.flow.borrow_mut();
            flow.finished = true;
            flow.stages.fill(StageState::Closed);
            flow.stats
        };
        info!(
            chunks_in = stats.chunks_in,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            pauses = stats.pauses,
            "pipeline finished"
        );
        shared.complete(Ok(stats));
    }

    /// Settle the pipeline with an error. The failing stage (if any) is
    /// left `Errored`; every other stage that is not closed yet is aborted
    /// exactly once. Returns `false` if the pipeline had already settled.
    pub(super) fn terminate(shared: &Rc<Shared>, failed: Option<Failure>) -> bool {
        if !shared.settled.try_settle() {
            if let Some((index, cause)) = failed {
                debug!(stage = index, error = %cause, "secondary pipeline error suppressed");
            }
            return false;
        }

        let failed_index = failed.as_ref().map(|(index, _)| *index);
        let to_abort: Vec<usize> = {
            let mut flow = shared.flow.borrow_mut();
            flow.finished = true;
            flow.buffer.clear();
            flow.buffered = 0;
            if let Some(index) = failed_index {
                flow.stages[index] = StageState::Errored;
            }
            flow.stages
                .iter()
                .enumerate()
                .filter(|(i, state)| Some(*i) != failed_index && **state != StageState::Closed)
                .map(|(i, _)| i)
                .collect()
        };

        for index in to_abort {
            if let Err(e) = shared.abort_stage(index) {
                debug!(stage = index, error = %e, "error during abort suppressed");
            }
            shared.flow.borrow_mut().stages[index] = StageState::Closed;
        }

        let error = match failed {
            Some((index, cause)) => PipelineError::Stage(StageError {
                index,
                name: shared.names[index].clone(),
                cause,
            }),
            None => PipelineError::Aborted,
        };
        warn!(error = %error, "pipeline failed");
        shared.complete(Err(error));
        true
    }

    fn abort_stage(&self, index: usize) -> Result<(), StageFailure> {
        trace!(stage = index, name = %self.names[index], "aborting stage");
        if index == 0 {
            self.source.borrow_mut().abort()
        } else if index == self.sink_index() {
            self.sink.borrow_mut().abort()
        } else {
            self.transforms.borrow_mut()[index - 1].abort()
        }
    }

    fn complete(&self, result: Result<PipelineStats, PipelineError>) {
        let callback = self.on_complete.borrow_mut().take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}
