use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::CompressionPolicy;

/// Capture-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Destination of the trace file
    pub capture_file: PathBuf,

    /// Per-block compression applied to bulk payloads
    #[serde(default)]
    pub compression: CompressionPolicy,

    /// Flush the sink after every block
    #[serde(default)]
    pub flush_after_write: bool,

    /// Decompress and compare every compressed payload before accepting it
    #[serde(default = "default_verify")]
    pub verify_compression: bool,
}

fn default_verify() -> bool {
    true
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            capture_file: PathBuf::from("capture.gfxr"),
            compression: CompressionPolicy::default(),
            flush_after_write: false,
            verify_compression: default_verify(),
        }
    }
}

impl CaptureSettings {
    /// Settings for debugging a crashing application (every block durable)
    pub fn crash_safe() -> Self {
        Self {
            flush_after_write: true,
            ..Self::default()
        }
    }

    /// Settings favouring trace size over capture overhead
    pub fn archival() -> Self {
        Self {
            compression: CompressionPolicy::Zstd { level: 9 },
            ..Self::default()
        }
    }

    /// Uncompressed traces, handy when diffing raw block output
    pub fn uncompressed() -> Self {
        Self {
            compression: CompressionPolicy::None,
            verify_compression: false,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context("invalid capture settings YAML")
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("invalid capture settings JSON")
    }

    /// Load settings from a `.json`, `.yaml` or `.yml` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&data),
            _ => Self::from_yaml_str(&data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(CaptureSettings::crash_safe().flush_after_write);
        assert!(matches!(
            CaptureSettings::archival().compression,
            CompressionPolicy::Zstd { level: 9 }
        ));
        assert_eq!(
            CaptureSettings::uncompressed().compression,
            CompressionPolicy::None
        );
    }

    #[test]
    fn test_yaml_defaults() {
        let settings = CaptureSettings::from_yaml_str("capture_file: /tmp/app.gfxr\n").unwrap();
        assert_eq!(settings.capture_file, PathBuf::from("/tmp/app.gfxr"));
        assert_eq!(settings.compression, CompressionPolicy::LZ4 { level: 1 });
        assert!(settings.verify_compression);
        assert!(!settings.flush_after_write);
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = CaptureSettings::archival();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed = CaptureSettings::from_json_str(&json).unwrap();
        assert_eq!(parsed.compression, settings.compression);
        assert_eq!(parsed.capture_file, settings.capture_file);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = CaptureSettings::from_yaml_str("compression: [").unwrap_err();
        assert!(err.to_string().contains("invalid capture settings YAML"));
    }
}
