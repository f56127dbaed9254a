use common::HandleId;

use crate::format::MetaDataType;

/// Discriminant of [`MetaCommand`], used as the key of decoder capability maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaCommandKind {
    StateBeginMarker,
    StateEndMarker,
    DisplayMessage,
    FillMemory,
    ResizeWindow,
    ResizeWindow2,
    CreateHardwareBuffer,
    DestroyHardwareBuffer,
    SetDeviceProperties,
    SetDeviceMemoryProperties,
    SetBufferAddress,
    SetSwapchainImageState,
    BeginResourceInit,
    EndResourceInit,
    InitBuffer,
    InitImage,
}

impl MetaCommandKind {
    pub const ALL: [MetaCommandKind; 16] = [
        Self::StateBeginMarker,
        Self::StateEndMarker,
        Self::DisplayMessage,
        Self::FillMemory,
        Self::ResizeWindow,
        Self::ResizeWindow2,
        Self::CreateHardwareBuffer,
        Self::DestroyHardwareBuffer,
        Self::SetDeviceProperties,
        Self::SetDeviceMemoryProperties,
        Self::SetBufferAddress,
        Self::SetSwapchainImageState,
        Self::BeginResourceInit,
        Self::EndResourceInit,
        Self::InitBuffer,
        Self::InitImage,
    ];

    /// Kind carried by a meta-data block of type `ty`. State markers travel in
    /// their own block type and have no meta-data type.
    pub fn from_meta_data_type(ty: MetaDataType) -> Option<Self> {
        let kind = match ty {
            MetaDataType::Unknown => return None,
            MetaDataType::DisplayMessage => Self::DisplayMessage,
            MetaDataType::FillMemory => Self::FillMemory,
            MetaDataType::ResizeWindow => Self::ResizeWindow,
            MetaDataType::SetSwapchainImageState => Self::SetSwapchainImageState,
            MetaDataType::BeginResourceInit => Self::BeginResourceInit,
            MetaDataType::EndResourceInit => Self::EndResourceInit,
            MetaDataType::InitBuffer => Self::InitBuffer,
            MetaDataType::InitImage => Self::InitImage,
            MetaDataType::CreateHardwareBuffer => Self::CreateHardwareBuffer,
            MetaDataType::DestroyHardwareBuffer => Self::DestroyHardwareBuffer,
            MetaDataType::SetDeviceProperties => Self::SetDeviceProperties,
            MetaDataType::SetDeviceMemoryProperties => Self::SetDeviceMemoryProperties,
            MetaDataType::ResizeWindow2 => Self::ResizeWindow2,
            MetaDataType::SetBufferAddress => Self::SetBufferAddress,
        };
        Some(kind)
    }
}

/// Out-of-band command decoded from a trace.
///
/// Kinds without a typed variant arrive as [`MetaCommand::Unparsed`] with
/// their body after the thread id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    StateBeginMarker {
        frame_number: u64,
    },
    StateEndMarker {
        frame_number: u64,
    },
    DisplayMessage {
        message: String,
    },
    BeginResourceInit {
        device_id: HandleId,
        max_resource_size: u64,
        max_copy_size: u64,
    },
    EndResourceInit {
        device_id: HandleId,
    },
    InitBuffer {
        device_id: HandleId,
        buffer_id: HandleId,
        data: Vec<u8>,
    },
    InitImage {
        device_id: HandleId,
        image_id: HandleId,
        aspect: u32,
        layout: u32,
        level_sizes: Vec<u64>,
        data: Vec<u8>,
    },
    /// A known kind whose body the block reader does not parse, or a
    /// compressed display message.
    Unparsed {
        kind: MetaCommandKind,
        body: Vec<u8>,
    },
}

impl MetaCommand {
    pub fn kind(&self) -> MetaCommandKind {
        match self {
            Self::StateBeginMarker { .. } => MetaCommandKind::StateBeginMarker,
            Self::StateEndMarker { .. } => MetaCommandKind::StateEndMarker,
            Self::DisplayMessage { .. } => MetaCommandKind::DisplayMessage,
            Self::BeginResourceInit { .. } => MetaCommandKind::BeginResourceInit,
            Self::EndResourceInit { .. } => MetaCommandKind::EndResourceInit,
            Self::InitBuffer { .. } => MetaCommandKind::InitBuffer,
            Self::InitImage { .. } => MetaCommandKind::InitImage,
            Self::Unparsed { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_meta_data_type_but_unknown_has_a_kind() {
        for raw in 1..=14u16 {
            let ty = MetaDataType::from_u16(raw).unwrap();
            assert!(MetaCommandKind::from_meta_data_type(ty).is_some(), "{ty:?}");
        }
        assert_eq!(MetaCommandKind::from_meta_data_type(MetaDataType::Unknown), None);
    }

    #[test]
    fn unparsed_reports_inner_kind() {
        let command = MetaCommand::Unparsed {
            kind: MetaCommandKind::FillMemory,
            body: vec![1, 2, 3],
        };
        assert_eq!(command.kind(), MetaCommandKind::FillMemory);
    }
}
