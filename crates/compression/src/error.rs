use thiserror::Error;

/// Errors produced by compression routines.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Compression skipped because the data is already high entropy.
    #[error("Entropy too high ({entropy:.2} bits/byte) for {size} bytes")]
    EntropySkip { entropy: f32, size: usize },

    /// Compression skipped because the output was not smaller than the input.
    #[error("Compression ineffective ({compressed} >= {size} bytes)")]
    Ineffective { compressed: usize, size: usize },

    /// Compression backend produced an IO error.
    #[error("IO error while using {algorithm}: {source}")]
    Io {
        algorithm: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Codec-specific failure without an underlying IO error.
    #[error("Codec error in {algorithm}: {message}")]
    Codec {
        algorithm: &'static str,
        message: String,
    },

    /// Decompressed payload did not match what the block header promised.
    #[error("{algorithm} payload decompressed to {actual} bytes, expected {expected}")]
    LengthMismatch {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Integrity validation failed after compressing a payload.
    #[error("Integrity check failed for {algorithm}")]
    IntegrityFailure { algorithm: &'static str },
}

impl CompressionError {
    pub fn codec(algorithm: &'static str, message: impl Into<String>) -> Self {
        CompressionError::Codec {
            algorithm,
            message: message.into(),
        }
    }

    pub fn integrity(algorithm: &'static str) -> Self {
        CompressionError::IntegrityFailure { algorithm }
    }

    pub fn io(algorithm: &'static str, source: std::io::Error) -> Self {
        CompressionError::Io { algorithm, source }
    }
}
