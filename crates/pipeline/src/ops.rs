//! One-call pipelines for buffers and files.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use serde::Serialize;
use tracing::info;
use turnloop_compute::{ManualClock, Scheduler};

use crate::config::PipelineConfig;
use crate::engine::{PipelineEngine, PipelineStats};
use crate::error::PipelineError;
use crate::stages::{Codec, IterSource, ReaderSource, Sha256Tap, VecSink, WriterSink};
use crate::traits::Transform;

/// Start `engine` and turn `scheduler` until it completes.
///
/// Returns [`PipelineError::Unfinished`] if the loop runs out of work first,
/// for example when a source never signals readiness.
pub fn run_to_completion(
    scheduler: &Scheduler,
    engine: PipelineEngine,
) -> Result<PipelineStats, PipelineError> {
    let result: Rc<RefCell<Option<Result<PipelineStats, PipelineError>>>> =
        Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    let handle = engine.run(move |r| *slot.borrow_mut() = Some(r));

    scheduler.run_while(|| result.borrow().is_none());

    if !handle.is_finished() {
        handle.abort();
    }
    let outcome = result.borrow_mut().take();
    outcome.unwrap_or(Err(PipelineError::Unfinished))
}

fn in_memory(data: &[u8], transform: Box<dyn Transform>) -> Result<Vec<u8>, PipelineError> {
    let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let config = PipelineConfig::default();
    let (sink, output) = VecSink::new();
    let engine = PipelineEngine::connect_with(
        &scheduler,
        config.clone(),
        Box::new(IterSource::from_bytes(data, config.read_chunk_size)),
        vec![transform],
        Box::new(sink),
    );
    run_to_completion(&scheduler, engine)?;
    Ok(output.take())
}

/// Compress a buffer on a private virtual-time loop.
pub fn compress(data: &[u8], codec: Codec, level: u32) -> Result<Vec<u8>, PipelineError> {
    in_memory(data, codec.encoder(level).map_err(PipelineError::Setup)?)
}

pub fn decompress(data: &[u8], codec: Codec) -> Result<Vec<u8>, PipelineError> {
    in_memory(data, codec.decoder().map_err(PipelineError::Setup)?)
}

/// Result of a file pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub codec: Codec,
    pub stats: PipelineStats,
    pub input_sha256: String,
    pub output_sha256: String,
}

fn transcode_file(
    scheduler: &Scheduler,
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    codec: Codec,
    transform: Box<dyn Transform>,
) -> Result<FileReport, PipelineError> {
    let source = ReaderSource::open(input, config.read_chunk_size).map_err(PipelineError::Setup)?;
    let sink = WriterSink::create(output).map_err(PipelineError::Setup)?;
    let (input_tap, input_digest) = Sha256Tap::new("sha256-in");
    let (output_tap, output_digest) = Sha256Tap::new("sha256-out");

    let engine = PipelineEngine::connect_with(
        scheduler,
        config.clone(),
        Box::new(source),
        vec![Box::new(input_tap), transform, Box::new(output_tap)],
        Box::new(sink),
    );
    let stats = run_to_completion(scheduler, engine)?;

    let report = FileReport {
        codec,
        stats,
        input_sha256: input_digest.get().unwrap_or_default(),
        output_sha256: output_digest.get().unwrap_or_default(),
    };
    info!(
        input = %input.display(),
        output = %output.display(),
        codec = %codec,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        "file pipeline finished"
    );
    Ok(report)
}

pub fn compress_file(
    scheduler: &Scheduler,
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    codec: Codec,
    level: u32,
) -> Result<FileReport, PipelineError> {
    let encoder = codec.encoder(level).map_err(PipelineError::Setup)?;
    transcode_file(scheduler, config, input, output, codec, encoder)
}

pub fn decompress_file(
    scheduler: &Scheduler,
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    codec: Codec,
) -> Result<FileReport, PipelineError> {
    let decoder = codec.decoder().map_err(PipelineError::Setup)?;
    transcode_file(scheduler, config, input, output, codec, decoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_round_trips() {
        for codec in [Codec::Gzip, Codec::Deflate, Codec::Zlib, Codec::Zstd] {
            let packed = compress(b"", codec, 6).unwrap();
            assert!(!packed.is_empty(), "{codec} still writes a frame");
            assert!(decompress(&packed, codec).unwrap().is_empty());
        }
    }

    #[test]
    fn garbage_is_a_stage_error_at_the_decoder() {
        let err = decompress(b"not compressed at all", Codec::Gzip).unwrap_err();
        assert_eq!(err.stage_index(), Some(1));
    }
}
