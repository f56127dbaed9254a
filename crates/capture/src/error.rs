use common::traits::StreamWriteError;
use thiserror::Error;

/// Failures while encoding or emitting a command.
#[derive(Debug, Error)]
pub enum CommandWriteError {
    #[error(transparent)]
    Stream(#[from] StreamWriteError),

    #[error("range of {size} bytes at offset {offset} exceeds the {len} byte source")]
    SourceOutOfRange { offset: u64, size: u64, len: usize },
}
