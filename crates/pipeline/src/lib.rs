pub mod config;
pub mod engine;
pub mod error;
pub mod ops;
pub mod stages;
pub mod traits;

pub use config::PipelineConfig;
pub use engine::{
    PipelineEngine, PipelineHandle, PipelineStats, ReadyHandle, ResumeHandle, StageState,
};
pub use error::{PipelineError, StageError, StageFailure};
pub use ops::{compress, compress_file, decompress, decompress_file, run_to_completion, FileReport};
pub use stages::{
    Codec, DeflateDecoder, DeflateEncoder, DigestHandle, GzipDecoder, GzipEncoder, IterSource,
    ReaderSource, Sha256Tap, SinkOutput, VecSink, WriterSink, ZlibDecoder, ZlibEncoder,
    ZstdDecoder, ZstdEncoder,
};
pub use traits::{Backpressure, Pull, Sink, Source, Transform};
