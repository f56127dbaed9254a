use serde::{Deserialize, Serialize};

/// Compression algorithm selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CompressionPolicy {
    /// No compression
    None,
    /// LZ4 fast compression (level 1-16)
    LZ4 { level: i32 },
    /// Zstd balanced compression (level 1-22)
    Zstd { level: i32 },
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        CompressionPolicy::LZ4 { level: 1 }
    }
}

/// Compression identifier stored in the file header option list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl CompressionType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressionType::None => "identity",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CompressionPolicy::default();
        assert!(matches!(policy, CompressionPolicy::LZ4 { level: 1 }));
    }

    #[test]
    fn test_compression_type_codes() {
        for ty in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
            assert_eq!(CompressionType::from_u32(ty as u32), Some(ty));
        }
        assert_eq!(CompressionType::from_u32(9), None);
    }

    #[test]
    fn test_serialization() {
        let policy = CompressionPolicy::Zstd { level: 6 };
        let json = serde_json::to_string(&policy).unwrap();
        let deserialized: CompressionPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, deserialized);
    }
}
