use thiserror::Error;

/// Failures while reading or decoding a trace.
#[derive(Debug, Error)]
pub enum TraceReadError {
    #[error("IO error while reading trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a trace file (fourcc {0:#010x})")]
    InvalidMagic(u32),

    #[error("unsupported trace format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("trace truncated while reading {context}")]
    Truncated { context: &'static str },

    #[error("block at offset {offset} declares {size} bytes, limit is {limit}")]
    BlockTooLarge { offset: u64, size: u64, limit: u64 },

    #[error("block at offset {offset} declares a {size} byte payload, limit is {limit}")]
    PayloadTooLarge { offset: u64, size: u64, limit: u64 },

    #[error("unknown meta-data id {0:#010x}")]
    UnknownMetaDataId(u32),

    #[error("payload of {expected} bytes expected, found {actual}")]
    PayloadSizeMismatch { expected: u64, actual: u64 },

    #[error("compressed block found but no decompressor is configured")]
    MissingCompressor,

    #[error("failed to decompress block payload")]
    Decompression(#[source] anyhow::Error),
}

impl TraceReadError {
    pub fn truncated(context: &'static str) -> Self {
        TraceReadError::Truncated { context }
    }

    pub fn payload_mismatch(expected: u64, actual: usize) -> Self {
        TraceReadError::PayloadSizeMismatch {
            expected,
            actual: actual as u64,
        }
    }
}
