//! Streaming gzip, deflate, zlib and zstd transforms.
//!
//! Encoders wrap a `Write`-based encoder over a `Vec<u8>` and hand out
//! whatever output the codec produced for each input chunk. The deflate,
//! zlib and zstd decoders drive the raw codec state directly so that
//! `flush` can tell a complete stream from a truncated one.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use bytes::Bytes;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::Serialize;
use zstd::stream::raw::Operation;

use crate::error::StageFailure;
use crate::traits::Transform;

fn finished() -> StageFailure {
    StageFailure::other("codec already finished")
}

fn corrupt(e: std::io::Error) -> StageFailure {
    StageFailure::Corrupt(e.to_string())
}

fn take_output(buf: &mut Vec<u8>) -> Bytes {
    Bytes::from(std::mem::take(buf))
}

fn stalled(format: &str) -> StageFailure {
    StageFailure::Corrupt(format!("{format} decoder made no progress"))
}

fn truncated(format: &str) -> StageFailure {
    StageFailure::Corrupt(format!("truncated {format} stream"))
}

/// Supported compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Gzip,
    /// Raw deflate, no header or checksum.
    Deflate,
    Zlib,
    Zstd,
}

impl Codec {
    /// Conventional file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Deflate => "deflate",
            Codec::Zlib => "zz",
            Codec::Zstd => "zst",
        }
    }

    pub fn encoder(&self, level: u32) -> Result<Box<dyn Transform>, StageFailure> {
        Ok(match self {
            Codec::Gzip => Box::new(GzipEncoder::new(level)),
            Codec::Deflate => Box::new(DeflateEncoder::new(level)),
            Codec::Zlib => Box::new(ZlibEncoder::new(level)),
            Codec::Zstd => Box::new(ZstdEncoder::new(level)?),
        })
    }

    pub fn decoder(&self) -> Result<Box<dyn Transform>, StageFailure> {
        Ok(match self {
            Codec::Gzip => Box::new(GzipDecoder::new()),
            Codec::Deflate => Box::new(DeflateDecoder::new()),
            Codec::Zlib => Box::new(ZlibDecoder::new()),
            Codec::Zstd => Box::new(ZstdDecoder::new()?),
        })
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Gzip => f.write_str("gzip"),
            Codec::Deflate => f.write_str("deflate"),
            Codec::Zlib => f.write_str("zlib"),
            Codec::Zstd => f.write_str("zstd"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Codec::Gzip),
            "deflate" => Ok(Codec::Deflate),
            "zlib" | "zz" => Ok(Codec::Zlib),
            "zstd" | "zst" => Ok(Codec::Zstd),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}

pub struct GzipEncoder {
    inner: Option<flate2::write::GzEncoder<Vec<u8>>>,
}

impl GzipEncoder {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            inner: Some(flate2::write::GzEncoder::new(
                Vec::new(),
                Compression::new(level.min(9)),
            )),
        }
    }
}

impl Transform for GzipEncoder {
    fn name(&self) -> &str {
        "gzip-encode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.as_mut().ok_or_else(finished)?;
        encoder.write_all(&chunk)?;
        Ok(take_output(encoder.get_mut()))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.take().ok_or_else(finished)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

pub struct GzipDecoder {
    inner: Option<flate2::write::GzDecoder<Vec<u8>>>,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            inner: Some(flate2::write::GzDecoder::new(Vec::new())),
        }
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for GzipDecoder {
    fn name(&self) -> &str {
        "gzip-decode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let decoder = self.inner.as_mut().ok_or_else(finished)?;
        decoder.write_all(&chunk).map_err(corrupt)?;
        Ok(take_output(decoder.get_mut()))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let decoder = self.inner.take().ok_or_else(finished)?;
        Ok(Bytes::from(decoder.finish().map_err(corrupt)?))
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

pub struct DeflateEncoder {
    inner: Option<flate2::write::DeflateEncoder<Vec<u8>>>,
}

impl DeflateEncoder {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            inner: Some(flate2::write::DeflateEncoder::new(
                Vec::new(),
                Compression::new(level.min(9)),
            )),
        }
    }
}

impl Transform for DeflateEncoder {
    fn name(&self) -> &str {
        "deflate-encode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.as_mut().ok_or_else(finished)?;
        encoder.write_all(&chunk)?;
        Ok(take_output(encoder.get_mut()))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.take().ok_or_else(finished)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

pub struct ZlibEncoder {
    inner: Option<flate2::write::ZlibEncoder<Vec<u8>>>,
}

impl ZlibEncoder {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            inner: Some(flate2::write::ZlibEncoder::new(
                Vec::new(),
                Compression::new(level.min(9)),
            )),
        }
    }
}

impl Transform for ZlibEncoder {
    fn name(&self) -> &str {
        "zlib-encode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.as_mut().ok_or_else(finished)?;
        encoder.write_all(&chunk)?;
        Ok(take_output(encoder.get_mut()))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.take().ok_or_else(finished)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

/// Output grows by at least this much whenever the inflater fills it.
const INFLATE_STEP: usize = 16 * 1024;

/// Raw inflate state shared by the deflate and zlib decoders.
struct Inflater {
    format: &'static str,
    raw: Decompress,
    ended: bool,
}

impl Inflater {
    fn new(format: &'static str, zlib_header: bool) -> Self {
        Self {
            format,
            raw: Decompress::new(zlib_header),
            ended: false,
        }
    }

    fn feed(&mut self, mut input: &[u8]) -> Result<Bytes, StageFailure> {
        let mut out = Vec::with_capacity(input.len().saturating_mul(2).max(INFLATE_STEP));
        loop {
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
            if self.ended {
                if !input.is_empty() {
                    return Err(StageFailure::Corrupt(format!(
                        "{} trailing bytes after the {} stream",
                        input.len(),
                        self.format
                    )));
                }
                break;
            }
            if out.len() == out.capacity() {
                out.reserve(INFLATE_STEP);
            }

            let (in_before, out_before) = (self.raw.total_in(), self.raw.total_out());
            let status = self
                .raw
                .decompress_vec(input, &mut out, FlushDecompress::None)
                .map_err(|e| StageFailure::Corrupt(e.to_string()))?;
            let read = (self.raw.total_in() - in_before) as usize;
            let produced = self.raw.total_out() - out_before;
            input = &input[read..];

            if status == Status::StreamEnd {
                self.ended = true;
            } else if read == 0 && produced == 0 {
                if input.is_empty() {
                    break;
                }
                return Err(stalled(self.format));
            }
        }
        Ok(Bytes::from(out))
    }

    fn finish(&self) -> Result<Bytes, StageFailure> {
        if self.ended {
            Ok(Bytes::new())
        } else {
            Err(truncated(self.format))
        }
    }
}

pub struct DeflateDecoder {
    inner: Option<Inflater>,
}

impl DeflateDecoder {
    pub fn new() -> Self {
        Self {
            inner: Some(Inflater::new("deflate", false)),
        }
    }
}

impl Default for DeflateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for DeflateDecoder {
    fn name(&self) -> &str {
        "deflate-decode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        self.inner.as_mut().ok_or_else(finished)?.feed(&chunk)
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        self.inner.take().ok_or_else(finished)?.finish()
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

pub struct ZlibDecoder {
    inner: Option<Inflater>,
}

impl ZlibDecoder {
    pub fn new() -> Self {
        Self {
            inner: Some(Inflater::new("zlib", true)),
        }
    }
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ZlibDecoder {
    fn name(&self) -> &str {
        "zlib-decode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        self.inner.as_mut().ok_or_else(finished)?.feed(&chunk)
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        self.inner.take().ok_or_else(finished)?.finish()
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

pub struct ZstdEncoder {
    inner: Option<zstd::stream::write::Encoder<'static, Vec<u8>>>,
}

impl ZstdEncoder {
    pub fn new(level: u32) -> Result<Self, StageFailure> {
        let level = i32::try_from(level).unwrap_or(i32::MAX).min(22);
        Ok(Self {
            inner: Some(zstd::stream::write::Encoder::new(Vec::new(), level)?),
        })
    }
}

impl Transform for ZstdEncoder {
    fn name(&self) -> &str {
        "zstd-encode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.as_mut().ok_or_else(finished)?;
        encoder.write_all(&chunk)?;
        Ok(take_output(encoder.get_mut()))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let encoder = self.inner.take().ok_or_else(finished)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}

/// Size of the scratch buffer each zstd decode step writes into.
const ZSTD_SCRATCH: usize = 128 * 1024;

struct ZstdState {
    raw: zstd::stream::raw::Decoder<'static>,
    scratch: Vec<u8>,
    frame_done: bool,
}

pub struct ZstdDecoder {
    inner: Option<ZstdState>,
}

impl ZstdDecoder {
    pub fn new() -> Result<Self, StageFailure> {
        Ok(Self {
            inner: Some(ZstdState {
                raw: zstd::stream::raw::Decoder::new()?,
                scratch: vec![0; ZSTD_SCRATCH],
                frame_done: false,
            }),
        })
    }
}

impl Transform for ZstdDecoder {
    fn name(&self) -> &str {
        "zstd-decode"
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        let state = self.inner.as_mut().ok_or_else(finished)?;
        let mut input = &chunk[..];
        let mut out = Vec::new();
        loop {
            let status = state
                .raw
                .run_on_buffers(input, &mut state.scratch)
                .map_err(corrupt)?;
            input = &input[status.bytes_read..];
            out.extend_from_slice(&state.scratch[..status.bytes_written]);
            if status.bytes_read == 0 && status.bytes_written == 0 {
                if input.is_empty() {
                    break;
                }
                return Err(stalled("zstd"));
            }
            // Zero means the current frame is decoded and fully flushed.
            state.frame_done = status.remaining == 0;
            if input.is_empty() && status.bytes_written < state.scratch.len() {
                break;
            }
        }
        Ok(Bytes::from(out))
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        let state = self.inner.take().ok_or_else(finished)?;
        if state.frame_done {
            Ok(Bytes::new())
        } else {
            Err(truncated("zstd"))
        }
    }

    fn abort(&mut self) -> Result<(), StageFailure> {
        self.inner = None;
        Ok(())
    }
}
