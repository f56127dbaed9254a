use common::{ApiFamilyId, CompressionType, HandleId, ThreadId};

use crate::error::TraceReadError;

pub const FILE_FOURCC: u32 = u32::from_le_bytes(*b"GFXR");
pub const FILE_MAJOR_VERSION: u16 = 0;
pub const FILE_MINOR_VERSION: u16 = 0;
pub const FILE_HEADER_SIZE: usize = 12;
pub const FILE_OPTION_PAIR_SIZE: usize = 8;

pub const BLOCK_HEADER_SIZE: usize = 12;
pub const META_DATA_HEADER_SIZE: usize = 16;
pub const STATE_MARKER_BLOCK_SIZE: usize = 24;
pub const DISPLAY_MESSAGE_COMMAND_HEADER_SIZE: usize = 20;
pub const BEGIN_RESOURCE_INIT_COMMAND_SIZE: usize = 44;
pub const END_RESOURCE_INIT_COMMAND_SIZE: usize = 28;
pub const INIT_BUFFER_COMMAND_HEADER_SIZE: usize = 44;
pub const INIT_IMAGE_COMMAND_HEADER_SIZE: usize = 56;

/// Value of `BlockHeader::size` for a block whose fixed header is `header_size`
/// bytes and which carries no trailing data.
pub const fn meta_data_block_base_size(header_size: usize) -> u64 {
    (header_size - BLOCK_HEADER_SIZE) as u64
}

/// Block type tag. The high bit flags a compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockType(pub u32);

impl BlockType {
    pub const COMPRESSED_FLAG: u32 = 0x8000_0000;

    pub const UNKNOWN: BlockType = BlockType(0);
    pub const FRAME_MARKER: BlockType = BlockType(1);
    pub const STATE_MARKER: BlockType = BlockType(2);
    pub const META_DATA: BlockType = BlockType(3);
    pub const FUNCTION_CALL: BlockType = BlockType(4);
    pub const ANNOTATION: BlockType = BlockType(5);
    pub const METHOD_CALL: BlockType = BlockType(6);
    pub const COMPRESSED_META_DATA: BlockType = BlockType(3 | Self::COMPRESSED_FLAG);
    pub const COMPRESSED_FUNCTION_CALL: BlockType = BlockType(4 | Self::COMPRESSED_FLAG);
    pub const COMPRESSED_METHOD_CALL: BlockType = BlockType(6 | Self::COMPRESSED_FLAG);

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED_FLAG != 0
    }

    /// The type with the compression flag cleared.
    pub fn base(self) -> BlockType {
        BlockType(self.0 & !Self::COMPRESSED_FLAG)
    }

    pub fn compressed(self) -> BlockType {
        BlockType(self.0 | Self::COMPRESSED_FLAG)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::UNKNOWN => "unknown",
            Self::FRAME_MARKER => "frame-marker",
            Self::STATE_MARKER => "state-marker",
            Self::META_DATA => "meta-data",
            Self::FUNCTION_CALL => "function-call",
            Self::ANNOTATION => "annotation",
            Self::METHOD_CALL => "method-call",
            Self::COMPRESSED_META_DATA => "compressed-meta-data",
            Self::COMPRESSED_FUNCTION_CALL => "compressed-function-call",
            Self::COMPRESSED_METHOD_CALL => "compressed-method-call",
            _ => "unrecognized",
        }
    }
}

/// Kind of out-of-band command carried by a meta-data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MetaDataType {
    Unknown = 0,
    DisplayMessage = 1,
    FillMemory = 2,
    ResizeWindow = 3,
    SetSwapchainImageState = 4,
    BeginResourceInit = 5,
    EndResourceInit = 6,
    InitBuffer = 7,
    InitImage = 8,
    CreateHardwareBuffer = 9,
    DestroyHardwareBuffer = 10,
    SetDeviceProperties = 11,
    SetDeviceMemoryProperties = 12,
    ResizeWindow2 = 13,
    SetBufferAddress = 14,
}

impl MetaDataType {
    pub fn from_u16(value: u16) -> Option<Self> {
        let ty = match value {
            0 => Self::Unknown,
            1 => Self::DisplayMessage,
            2 => Self::FillMemory,
            3 => Self::ResizeWindow,
            4 => Self::SetSwapchainImageState,
            5 => Self::BeginResourceInit,
            6 => Self::EndResourceInit,
            7 => Self::InitBuffer,
            8 => Self::InitImage,
            9 => Self::CreateHardwareBuffer,
            10 => Self::DestroyHardwareBuffer,
            11 => Self::SetDeviceProperties,
            12 => Self::SetDeviceMemoryProperties,
            13 => Self::ResizeWindow2,
            14 => Self::SetBufferAddress,
            _ => return None,
        };
        Some(ty)
    }
}

/// `family << 16 | type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaDataId(pub u32);

impl MetaDataId {
    pub fn new(family: ApiFamilyId, ty: MetaDataType) -> Self {
        Self(((family as u32) << 16) | ty as u32)
    }

    pub fn family(self) -> Option<ApiFamilyId> {
        ApiFamilyId::from_u16((self.0 >> 16) as u16)
    }

    pub fn data_type(self) -> Option<MetaDataType> {
        MetaDataType::from_u16((self.0 & 0xffff) as u16)
    }
}

/// State marker kinds bracketing a state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MarkerType {
    Begin = 0,
    End = 1,
}

/// Little-endian field writer over a fixed-size header buffer.
pub(crate) struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf[self.pos..self.pos + value.len()].copy_from_slice(value);
        self.pos += value.len();
        self
    }

    pub(crate) fn finish(&self) {
        debug_assert_eq!(self.pos, self.buf.len(), "header layout size mismatch");
    }
}

/// Little-endian field reader over untrusted block bytes.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], TraceReadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(TraceReadError::Truncated {
                context: self.context,
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, TraceReadError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, TraceReadError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, TraceReadError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Everything not consumed yet.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptionPair {
    pub key: u32,
    pub value: u32,
}

impl FileOptionPair {
    pub const COMPRESSION_TYPE: u32 = 1;
}

/// Leading header of a trace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub options: Vec<FileOptionPair>,
}

impl FileHeader {
    pub fn new(compression: CompressionType) -> Self {
        Self {
            major_version: FILE_MAJOR_VERSION,
            minor_version: FILE_MINOR_VERSION,
            options: vec![FileOptionPair {
                key: FileOptionPair::COMPRESSION_TYPE,
                value: compression as u32,
            }],
        }
    }

    /// Compression declared by the header; absent or unknown values read as none.
    pub fn compression_type(&self) -> CompressionType {
        self.options
            .iter()
            .find(|option| option.key == FileOptionPair::COMPRESSION_TYPE)
            .and_then(|option| CompressionType::from_u32(option.value))
            .unwrap_or(CompressionType::None)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; FILE_HEADER_SIZE + self.options.len() * FILE_OPTION_PAIR_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        writer
            .u32(FILE_FOURCC)
            .u16(self.major_version)
            .u16(self.minor_version)
            .u32(self.options.len() as u32);
        for option in &self.options {
            writer.u32(option.key).u32(option.value);
        }
        writer.finish();
        out
    }
}

/// Fixed header in front of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Bytes following this header, compressed bytes included.
    pub size: u64,
    pub block_type: BlockType,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        writer.u64(self.size).u32(self.block_type.0);
        writer.finish();
        out
    }

    pub fn parse(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[..8]);
        let mut ty = [0u8; 4];
        ty.copy_from_slice(&bytes[8..]);
        Self {
            size: u64::from_le_bytes(size),
            block_type: BlockType(u32::from_le_bytes(ty)),
        }
    }
}

/// Block header plus the meta-data id of a meta-data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaDataHeader {
    pub block_header: BlockHeader,
    pub meta_data_id: MetaDataId,
}

impl MetaDataHeader {
    /// Header for an uncompressed command of `header_size` bytes with no trailing data yet.
    pub fn new(family: ApiFamilyId, ty: MetaDataType, header_size: usize) -> Self {
        Self {
            block_header: BlockHeader {
                size: meta_data_block_base_size(header_size),
                block_type: BlockType::META_DATA,
            },
            meta_data_id: MetaDataId::new(family, ty),
        }
    }

    fn write(&self, writer: &mut FieldWriter<'_>) {
        writer
            .u64(self.block_header.size)
            .u32(self.block_header.block_type.0)
            .u32(self.meta_data_id.0);
    }
}

/// `InitBufferCmd` header; the payload follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitBufferCommandHeader {
    pub meta_header: MetaDataHeader,
    pub thread_id: ThreadId,
    pub device_id: HandleId,
    pub buffer_id: HandleId,
    /// Uncompressed payload length.
    pub data_size: u64,
}

impl InitBufferCommandHeader {
    pub fn to_bytes(&self) -> [u8; INIT_BUFFER_COMMAND_HEADER_SIZE] {
        let mut out = [0u8; INIT_BUFFER_COMMAND_HEADER_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        self.meta_header.write(&mut writer);
        writer
            .u32(self.thread_id.0)
            .u64(self.device_id.0)
            .u64(self.buffer_id.0)
            .u64(self.data_size);
        writer.finish();
        out
    }
}

/// `InitImageCmd` header; the level-size array and payload follow when
/// `level_count > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitImageCommandHeader {
    pub meta_header: MetaDataHeader,
    pub thread_id: ThreadId,
    pub device_id: HandleId,
    pub image_id: HandleId,
    pub data_size: u64,
    pub aspect: u32,
    pub layout: u32,
    pub level_count: u32,
}

impl InitImageCommandHeader {
    pub fn to_bytes(&self) -> [u8; INIT_IMAGE_COMMAND_HEADER_SIZE] {
        let mut out = [0u8; INIT_IMAGE_COMMAND_HEADER_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        self.meta_header.write(&mut writer);
        writer
            .u32(self.thread_id.0)
            .u64(self.device_id.0)
            .u64(self.image_id.0)
            .u64(self.data_size)
            .u32(self.aspect)
            .u32(self.layout)
            .u32(self.level_count);
        writer.finish();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginResourceInitCommand {
    pub meta_header: MetaDataHeader,
    pub thread_id: ThreadId,
    pub device_id: HandleId,
    pub max_resource_size: u64,
    pub max_copy_size: u64,
}

impl BeginResourceInitCommand {
    pub fn to_bytes(&self) -> [u8; BEGIN_RESOURCE_INIT_COMMAND_SIZE] {
        let mut out = [0u8; BEGIN_RESOURCE_INIT_COMMAND_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        self.meta_header.write(&mut writer);
        writer
            .u32(self.thread_id.0)
            .u64(self.device_id.0)
            .u64(self.max_resource_size)
            .u64(self.max_copy_size);
        writer.finish();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndResourceInitCommand {
    pub meta_header: MetaDataHeader,
    pub thread_id: ThreadId,
    pub device_id: HandleId,
}

impl EndResourceInitCommand {
    pub fn to_bytes(&self) -> [u8; END_RESOURCE_INIT_COMMAND_SIZE] {
        let mut out = [0u8; END_RESOURCE_INIT_COMMAND_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        self.meta_header.write(&mut writer);
        writer.u32(self.thread_id.0).u64(self.device_id.0);
        writer.finish();
        out
    }
}

/// Display-message header; the UTF-8 message bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMessageCommandHeader {
    pub meta_header: MetaDataHeader,
    pub thread_id: ThreadId,
}

impl DisplayMessageCommandHeader {
    pub fn to_bytes(&self) -> [u8; DISPLAY_MESSAGE_COMMAND_HEADER_SIZE] {
        let mut out = [0u8; DISPLAY_MESSAGE_COMMAND_HEADER_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        self.meta_header.write(&mut writer);
        writer.u32(self.thread_id.0);
        writer.finish();
        out
    }
}

/// State snapshot marker. Not a meta-data block and not tied to a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMarkerBlock {
    pub marker_type: MarkerType,
    pub frame_number: u64,
}

impl StateMarkerBlock {
    pub fn to_bytes(&self) -> [u8; STATE_MARKER_BLOCK_SIZE] {
        let mut out = [0u8; STATE_MARKER_BLOCK_SIZE];
        let mut writer = FieldWriter::new(&mut out);
        writer
            .u64(meta_data_block_base_size(STATE_MARKER_BLOCK_SIZE))
            .u32(BlockType::STATE_MARKER.0)
            .u32(self.marker_type as u32)
            .u64(self.frame_number);
        writer.finish();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_flags() {
        assert!(BlockType::COMPRESSED_META_DATA.is_compressed());
        assert!(!BlockType::META_DATA.is_compressed());
        assert_eq!(BlockType::COMPRESSED_META_DATA.base(), BlockType::META_DATA);
        assert_eq!(BlockType::META_DATA.compressed(), BlockType::COMPRESSED_META_DATA);
        assert_eq!(BlockType(77).name(), "unrecognized");
    }

    #[test]
    fn meta_data_id_packs_family_and_type() {
        let id = MetaDataId::new(ApiFamilyId::Vulkan, MetaDataType::InitImage);
        assert_eq!(id.0, 0x0001_0008);
        assert_eq!(id.family(), Some(ApiFamilyId::Vulkan));
        assert_eq!(id.data_type(), Some(MetaDataType::InitImage));
    }

    #[test]
    fn init_buffer_header_layout() {
        let header = InitBufferCommandHeader {
            meta_header: MetaDataHeader::new(
                ApiFamilyId::D3D12,
                MetaDataType::InitBuffer,
                INIT_BUFFER_COMMAND_HEADER_SIZE,
            ),
            thread_id: ThreadId(9),
            device_id: HandleId(1),
            buffer_id: HandleId(2),
            data_size: 16,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], &32u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x0003_0007u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &9u32.to_le_bytes());
        assert_eq!(&bytes[20..28], &1u64.to_le_bytes());
        assert_eq!(&bytes[28..36], &2u64.to_le_bytes());
        assert_eq!(&bytes[36..44], &16u64.to_le_bytes());
    }

    #[test]
    fn file_header_compression_option() {
        let header = FileHeader::new(CompressionType::Zstd);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), FILE_HEADER_SIZE + FILE_OPTION_PAIR_SIZE);
        assert_eq!(&bytes[0..4], b"GFXR");
        assert_eq!(header.compression_type(), CompressionType::Zstd);

        let bare = FileHeader {
            major_version: 0,
            minor_version: 0,
            options: Vec::new(),
        };
        assert_eq!(bare.compression_type(), CompressionType::None);
    }

    #[test]
    fn field_reader_reports_truncation() {
        let mut reader = FieldReader::new(&[1, 2, 3], "test");
        assert_eq!(reader.u16().unwrap(), 0x0201);
        assert!(matches!(
            reader.u32(),
            Err(TraceReadError::Truncated { context: "test" })
        ));
    }
}
