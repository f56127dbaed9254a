mod error;

use std::io::{Read, Write};

use anyhow::{Context, Result};
use common::{traits::Compressor, CaptureSettings, CompressionPolicy, CompressionType};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

pub use error::CompressionError;

type CompressionOpResult<T> = std::result::Result<T, CompressionError>;

fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

/// Estimate Shannon entropy of data sample
/// Returns bits per byte (0.0 = constant, 8.0 = random)
fn estimate_entropy(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let total = data.len() as f32;
    let mut entropy = 0.0;

    for &count in freq.iter() {
        if count > 0 {
            let p = count as f32 / total;
            entropy -= p * p.log2();
        }
    }

    entropy
}

/// Returns the sampled entropy when the payload is not worth compressing.
fn entropy_skip(data: &[u8]) -> Option<f32> {
    if data.len() < 1024 {
        return None;
    }

    let entropy = estimate_entropy(&data[..1024]);
    (entropy >= 7.5).then_some(entropy)
}

/// Compress data using LZ4
#[instrument(skip(data), fields(algorithm = "lz4", level, input_len = data.len()))]
fn compress_lz4(data: &[u8], level: i32) -> CompressionOpResult<Vec<u8>> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(level as u32)
        .build(Vec::new())
        .map_err(|err| CompressionError::codec("lz4", err.to_string()))?;

    encoder
        .write_all(data)
        .map_err(|err| CompressionError::io("lz4", err))?;
    let (compressed, result) = encoder.finish();
    result.map_err(|err| CompressionError::codec("lz4", err.to_string()))?;

    debug!(
        compressed_len = compressed.len(),
        "lz4 compression complete"
    );
    Ok(compressed)
}

/// Reads at most `max_len + 1` bytes; a longer stream surfaces as a length
/// mismatch.
fn read_bounded(
    decoder: impl Read,
    max_len: usize,
    algorithm: &'static str,
) -> CompressionOpResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    decoder
        .take((max_len as u64).saturating_add(1))
        .read_to_end(&mut decompressed)
        .map_err(|err| CompressionError::io(algorithm, err))?;
    Ok(decompressed)
}

/// Decompress LZ4 data
#[instrument(skip(data), fields(algorithm = "lz4", input_len = data.len()))]
pub fn decompress_lz4(data: &[u8], max_len: usize) -> CompressionOpResult<Vec<u8>> {
    let decoder =
        lz4::Decoder::new(data).map_err(|err| CompressionError::codec("lz4", err.to_string()))?;
    read_bounded(decoder, max_len, "lz4")
}

/// Compress data using Zstd
#[instrument(skip(data), fields(algorithm = "zstd", level, input_len = data.len()))]
fn compress_zstd(data: &[u8], level: i32) -> CompressionOpResult<Vec<u8>> {
    let compressed = zstd::encode_all(data, level)
        .map_err(|err| CompressionError::codec("zstd", err.to_string()))?;
    Ok(compressed)
}

/// Decompress Zstd data
#[instrument(skip(data), fields(algorithm = "zstd", input_len = data.len()))]
pub fn decompress_zstd(data: &[u8], max_len: usize) -> CompressionOpResult<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|err| CompressionError::codec("zstd", err.to_string()))?;
    read_bounded(decoder, max_len, "zstd")
}

/// Adjust compression level based on policy
fn adjusted_level(level: i32, algorithm: &'static str) -> i32 {
    let clamped = match algorithm {
        "lz4" => level.clamp(1, 16),
        "zstd" => level.clamp(-5, 22),
        _ => level,
    };

    if clamped != level {
        warn!(
            original_level = level,
            clamped_level = clamped,
            algorithm,
            "Compression level clamped to supported range"
        );
    }

    clamped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Lz4 { level: i32 },
    Zstd { level: i32 },
}

impl Algorithm {
    fn name(self) -> &'static str {
        match self {
            Algorithm::Lz4 { .. } => "lz4",
            Algorithm::Zstd { .. } => "zstd",
        }
    }

    fn compress(self, data: &[u8]) -> CompressionOpResult<Vec<u8>> {
        match self {
            Algorithm::Lz4 { level } => compress_lz4(data, level),
            Algorithm::Zstd { level } => compress_zstd(data, level),
        }
    }

    fn decompress(self, data: &[u8], max_len: usize) -> CompressionOpResult<Vec<u8>> {
        match self {
            Algorithm::Lz4 { .. } => decompress_lz4(data, max_len),
            Algorithm::Zstd { .. } => decompress_zstd(data, max_len),
        }
    }
}

/// Verify integrity by decompressing and comparing with the original.
fn verify_integrity(
    algorithm: Algorithm,
    compressed: &[u8],
    original: &[u8],
) -> CompressionOpResult<()> {
    let decompressed = algorithm.decompress(compressed, original.len())?;
    if !constant_time_equal(&decompressed, original) {
        return Err(CompressionError::integrity(algorithm.name()));
    }
    Ok(())
}

/// LZ4/Zstd block compressor used for trace payloads.
#[derive(Debug, Clone)]
pub struct BlockCompressor {
    algorithm: Algorithm,
    verify: bool,
}

impl BlockCompressor {
    /// Builds a compressor for `policy`; `CompressionPolicy::None` yields no compressor.
    pub fn from_policy(policy: &CompressionPolicy, verify: bool) -> Option<Self> {
        let algorithm = match policy {
            CompressionPolicy::None => return None,
            CompressionPolicy::LZ4 { level } => Algorithm::Lz4 {
                level: adjusted_level(*level, "lz4"),
            },
            CompressionPolicy::Zstd { level } => Algorithm::Zstd {
                level: adjusted_level(*level, "zstd"),
            },
        };
        Some(Self { algorithm, verify })
    }

    pub fn from_settings(settings: &CaptureSettings) -> Option<Self> {
        Self::from_policy(&settings.compression, settings.verify_compression)
    }

    /// Decompression-only compressor matching a trace file header.
    pub fn for_type(compression: CompressionType) -> Option<Self> {
        let algorithm = match compression {
            CompressionType::None => return None,
            CompressionType::Lz4 => Algorithm::Lz4 { level: 1 },
            CompressionType::Zstd => Algorithm::Zstd { level: 3 },
        };
        Some(Self {
            algorithm,
            verify: false,
        })
    }

    fn try_compress(&self, data: &[u8]) -> CompressionOpResult<Vec<u8>> {
        if let Some(entropy) = entropy_skip(data) {
            return Err(CompressionError::EntropySkip {
                entropy,
                size: data.len(),
            });
        }

        let compressed = self.algorithm.compress(data)?;
        if compressed.len() >= data.len() {
            return Err(CompressionError::Ineffective {
                compressed: compressed.len(),
                size: data.len(),
            });
        }

        if self.verify {
            verify_integrity(self.algorithm, &compressed, data)?;
        }

        Ok(compressed)
    }
}

impl Compressor for BlockCompressor {
    #[instrument(skip(self, data, out), fields(algorithm = self.algorithm.name(), input_len = data.len()))]
    fn compress(&self, data: &[u8], out: &mut Vec<u8>, header_reserve: usize) -> usize {
        match self.try_compress(data) {
            Ok(compressed) => {
                out.clear();
                out.resize(header_reserve, 0);
                out.extend_from_slice(&compressed);
                compressed.len()
            }
            Err(
                err @ (CompressionError::EntropySkip { .. } | CompressionError::Ineffective { .. }),
            ) => {
                debug!(%err, "Storing payload uncompressed");
                0
            }
            Err(err) => {
                info!(%err, "Compression failed, storing payload uncompressed");
                0
            }
        }
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let algorithm = self.algorithm.name();
        let decompressed = self
            .algorithm
            .decompress(data, expected_len)
            .with_context(|| format!("{algorithm} payload is corrupt"))?;
        if decompressed.len() != expected_len {
            return Err(CompressionError::LengthMismatch {
                algorithm,
                expected: expected_len,
                actual: decompressed.len(),
            }
            .into());
        }
        Ok(decompressed)
    }

    fn compression_type(&self) -> CompressionType {
        match self.algorithm {
            Algorithm::Lz4 { .. } => CompressionType::Lz4,
            Algorithm::Zstd { .. } => CompressionType::Zstd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_roundtrip_lz4() {
        let original = b"capture roundtrip test! ".repeat(500);
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::LZ4 { level: 4 }, true)
            .unwrap();

        let mut out = Vec::new();
        let len = compressor.compress(&original, &mut out, 0);
        assert!(len > 0 && len < original.len());
        assert_eq!(out.len(), len);

        let decompressed = compressor.decompress(&out, original.len()).unwrap();
        assert_eq!(original, decompressed);
    }

    #[test]
    fn test_roundtrip_zstd() {
        let original = b"capture Zstd roundtrip! ".repeat(500);
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::Zstd { level: 6 }, true)
            .unwrap();

        let mut out = Vec::new();
        let len = compressor.compress(&original, &mut out, 0);
        assert!(len > 0);

        let reader = BlockCompressor::for_type(CompressionType::Zstd).unwrap();
        assert_eq!(reader.decompress(&out, original.len()).unwrap(), original);
    }

    #[test]
    fn test_header_reserve_is_left_in_place() {
        let original = vec![7u8; 4096];
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::LZ4 { level: 1 }, false)
            .unwrap();

        let mut out = vec![0xEE; 3];
        let len = compressor.compress(&original, &mut out, 44);
        assert!(len > 0);
        assert_eq!(out.len(), 44 + len);
        assert!(out[..44].iter().all(|&b| b == 0));
        assert_eq!(
            compressor.decompress(&out[44..], original.len()).unwrap(),
            original
        );
    }

    #[test]
    fn test_small_payload_is_not_beneficial() {
        let data: Vec<u8> = (0u8..16).collect();
        for policy in [
            CompressionPolicy::LZ4 { level: 1 },
            CompressionPolicy::Zstd { level: 3 },
        ] {
            let compressor = BlockCompressor::from_policy(&policy, true).unwrap();
            let mut out = Vec::new();
            assert_eq!(compressor.compress(&data, &mut out, 0), 0);
        }
    }

    #[test]
    fn test_no_policy_no_compressor() {
        assert!(BlockCompressor::from_policy(&CompressionPolicy::None, true).is_none());
        assert!(BlockCompressor::for_type(CompressionType::None).is_none());
        assert!(BlockCompressor::from_settings(&CaptureSettings::uncompressed()).is_none());
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let original = b"mismatch ".repeat(300);
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::LZ4 { level: 1 }, false)
            .unwrap();
        let mut out = Vec::new();
        compressor.compress(&original, &mut out, 0);

        let err = compressor.decompress(&out, original.len() + 1).unwrap_err();
        let err = err.downcast::<CompressionError>().unwrap();
        assert!(matches!(err, CompressionError::LengthMismatch { .. }));
    }

    #[test]
    fn test_oversized_stream_stops_early() {
        let original = vec![0u8; 1 << 20];
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::Zstd { level: 3 }, false)
            .unwrap();
        let mut out = Vec::new();
        assert!(compressor.compress(&original, &mut out, 0) > 0);

        let err = compressor.decompress(&out, 64).unwrap_err();
        match err.downcast::<CompressionError>().unwrap() {
            CompressionError::LengthMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, 64);
                assert_eq!(actual, 65);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_integrity_detects_tampering() {
        let payload = b"Tamper detection payload".repeat(256);
        let compressed = compress_lz4(payload.as_slice(), 4).unwrap();
        let mut altered = payload.clone();
        altered[0] ^= 0xAA;

        let error = verify_integrity(Algorithm::Lz4 { level: 4 }, &compressed, &altered)
            .unwrap_err();
        assert!(matches!(
            error,
            CompressionError::IntegrityFailure { algorithm: "lz4" }
        ));
    }

    #[test]
    fn test_level_is_clamped() {
        let compressor =
            BlockCompressor::from_policy(&CompressionPolicy::LZ4 { level: 99 }, false).unwrap();
        assert_eq!(compressor.algorithm, Algorithm::Lz4 { level: 16 });
        assert_eq!(compressor.compression_type(), CompressionType::Lz4);
    }

    #[traced_test]
    #[test]
    fn test_entropy_skip_emits_tracing() {
        let random: Vec<u8> = (0..4096u32).map(|i| ((i * 7919) % 256) as u8).collect();
        let compressor = BlockCompressor::from_policy(&CompressionPolicy::Zstd { level: 3 }, true)
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(compressor.compress(&random, &mut out, 0), 0);
        assert!(logs_contain("Storing payload uncompressed"));
    }
}
