use serde::{Deserialize, Serialize};

pub mod policy;
pub mod settings;
pub mod state_table;
pub mod thread_data;
pub mod traits;

pub use policy::{CompressionPolicy, CompressionType};
pub use settings::CaptureSettings;
pub use state_table::{Category, EntryFamily, IdTable, ObjectKind, StateTable};
pub use thread_data::{ThreadData, ThreadIdAllocator};

/// Capture-assigned identifier of an API object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct HandleId(pub u64);

impl HandleId {
    /// Sentinel meaning "no associated capture id".
    pub const NULL: HandleId = HandleId(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Id of the capturing execution context that produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

/// API family every block and call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ApiFamilyId {
    None = 0,
    Vulkan = 1,
    Dxgi = 2,
    D3D12 = 3,
    OpenXr = 4,
}

impl ApiFamilyId {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Vulkan),
            2 => Some(Self::Dxgi),
            3 => Some(Self::D3D12),
            4 => Some(Self::OpenXr),
            _ => None,
        }
    }
}

/// Entry-point identifier: `family << 16 | index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiCallId(pub u32);

impl ApiCallId {
    pub fn new(family: ApiFamilyId, index: u16) -> Self {
        Self(((family as u32) << 16) | index as u32)
    }

    /// Family bits of the call id; unknown families map to `None`.
    pub fn family(self) -> Option<ApiFamilyId> {
        ApiFamilyId::from_u16((self.0 >> 16) as u16)
    }
}
