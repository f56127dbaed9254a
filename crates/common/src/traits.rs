use anyhow::Result;
use thiserror::Error;

use crate::{CompressionType, ThreadData};

/// Trait implemented by block compression engines.
pub trait Compressor: Send + Sync {
    /// Compresses `data` into `out[header_reserve..]`.
    ///
    /// The first `header_reserve` bytes of `out` are left for the caller to fill
    /// with a block header. Returns the compressed length, or 0 when compression
    /// failed or did not shrink the input; `out` is unspecified in that case.
    fn compress(&self, data: &[u8], out: &mut Vec<u8>, header_reserve: usize) -> usize;

    /// Restores a payload produced by [`Compressor::compress`].
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>>;

    /// Value recorded in the trace file header.
    fn compression_type(&self) -> CompressionType;
}

/// Failures surfaced by a trace sink.
#[derive(Debug, Error)]
pub enum StreamWriteError {
    #[error("IO error while writing trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace sink has been closed")]
    Closed,

    #[error("trace sink lock poisoned")]
    Poisoned,
}

/// Destination for encoded blocks.
///
/// Implementations serialize `output_stream_write` internally; it is the only
/// contended step of capture. Everything before it happens in the caller's
/// [`ThreadData`].
pub trait OutputStreamWriter: Send + Sync {
    /// Writes `data` as one unit. A block is never split across calls.
    fn output_stream_write(&self, data: &[u8]) -> std::result::Result<(), StreamWriteError>;

    /// Stages `buffers` back to back in the worker's scratch buffer and writes
    /// them with a single [`OutputStreamWriter::output_stream_write`].
    fn combine_and_write(
        &self,
        ctx: &mut ThreadData,
        buffers: &[&[u8]],
    ) -> std::result::Result<(), StreamWriteError> {
        let scratch = ctx.scratch_buffer();
        scratch.clear();
        for buffer in buffers {
            scratch.extend_from_slice(buffer);
        }
        self.output_stream_write(scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreadId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl OutputStreamWriter for RecordingWriter {
        fn output_stream_write(&self, data: &[u8]) -> std::result::Result<(), StreamWriteError> {
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn combine_and_write_issues_one_write() {
        let writer = RecordingWriter::default();
        let mut ctx = ThreadData::new(ThreadId(1));

        writer
            .combine_and_write(&mut ctx, &[b"head", b"", b"payload"])
            .unwrap();
        writer.combine_and_write(&mut ctx, &[b"x", b"y"]).unwrap();

        let writes = writer.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"headpayload");
        assert_eq!(writes[1], b"xy");
    }
}
