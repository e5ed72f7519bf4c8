//! Built-in stages.

pub mod codec;
pub mod digest;
pub mod io;

pub use codec::{
    Codec, DeflateDecoder, DeflateEncoder, GzipDecoder, GzipEncoder, ZlibDecoder, ZlibEncoder,
    ZstdDecoder, ZstdEncoder,
};
pub use digest::{DigestHandle, Sha256Tap};
pub use io::{IterSource, ReaderSource, SinkOutput, VecSink, WriterSink};
