use std::io::{self, Read};

use common::traits::Compressor;
use common::{ApiCallId, ApiFamilyId, HandleId, ThreadId};
use tracing::debug;

use crate::command::{MetaCommand, MetaCommandKind};
use crate::error::TraceReadError;
use crate::format::{
    BlockHeader, BlockType, FieldReader, FileHeader, FileOptionPair, MarkerType, MetaDataId,
    MetaDataType, BLOCK_HEADER_SIZE, FILE_FOURCC, FILE_HEADER_SIZE, FILE_MAJOR_VERSION,
    FILE_OPTION_PAIR_SIZE,
};

/// Largest block body accepted unless overridden.
pub const DEFAULT_MAX_BLOCK_SIZE: u64 = 1 << 32;

/// One block exactly as stored: header plus the bytes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// File offset of the block header.
    pub offset: u64,
    pub header: BlockHeader,
    pub body: Vec<u8>,
    /// Largest decoded payload the decode functions accept for this block.
    pub max_payload_size: u64,
}

impl RawBlock {
    pub fn block_type(&self) -> BlockType {
        self.header.block_type
    }

    /// Meta-data id of a (possibly compressed) meta-data block.
    pub fn meta_data_id(&self) -> Option<MetaDataId> {
        if self.header.block_type.base() != BlockType::META_DATA || self.body.len() < 4 {
            return None;
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.body[..4]);
        Some(MetaDataId(u32::from_le_bytes(raw)))
    }

    /// Header and body re-joined, byte-identical to the stored block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Sequential reader over a trace stream.
pub struct BlockReader<R> {
    reader: R,
    file_header: FileHeader,
    offset: u64,
    max_block_size: u64,
    max_payload_size: Option<u64>,
    failed: bool,
}

impl<R: Read> BlockReader<R> {
    /// Reads and validates the file header.
    pub fn open(mut reader: R) -> Result<Self, TraceReadError> {
        let file_header = read_file_header(&mut reader)?;
        let offset = (FILE_HEADER_SIZE + file_header.options.len() * FILE_OPTION_PAIR_SIZE) as u64;
        Ok(Self {
            reader,
            file_header,
            offset,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            max_payload_size: None,
            failed: false,
        })
    }

    pub fn with_max_block_size(mut self, max_block_size: u64) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// Caps the decoded size of block payloads. Defaults to the block size
    /// limit; a compressed payload's declared size is checked against it
    /// before anything is decompressed.
    pub fn with_max_payload_size(mut self, max_payload_size: u64) -> Self {
        self.max_payload_size = Some(max_payload_size);
        self
    }

    pub fn max_payload_size(&self) -> u64 {
        self.max_payload_size.unwrap_or(self.max_block_size)
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    /// Next block, or `None` at a clean end of stream.
    pub fn next_block(&mut self) -> Result<Option<RawBlock>, TraceReadError> {
        let mut raw_header = [0u8; BLOCK_HEADER_SIZE];
        match read_fully(&mut self.reader, &mut raw_header)? {
            0 => return Ok(None),
            BLOCK_HEADER_SIZE => {}
            _ => return Err(TraceReadError::truncated("block header")),
        }
        let header = BlockHeader::parse(&raw_header);

        if header.size > self.max_block_size {
            return Err(TraceReadError::BlockTooLarge {
                offset: self.offset,
                size: header.size,
                limit: self.max_block_size,
            });
        }

        // grows with the data actually present, never with the declared size
        let mut body = Vec::new();
        (&mut self.reader).take(header.size).read_to_end(&mut body)?;
        if body.len() as u64 != header.size {
            return Err(TraceReadError::truncated("block body"));
        }

        let block = RawBlock {
            offset: self.offset,
            header,
            body,
            max_payload_size: self.max_payload_size(),
        };
        self.offset += BLOCK_HEADER_SIZE as u64 + header.size;
        Ok(Some(block))
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = Result<RawBlock, TraceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_block().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, TraceReadError> {
    let mut buf = [0u8; 4];
    if read_fully(reader, &mut buf)? != buf.len() {
        return Err(TraceReadError::truncated("file header"));
    }
    Ok(u32::from_le_bytes(buf))
}

fn read_file_header<R: Read>(reader: &mut R) -> Result<FileHeader, TraceReadError> {
    let fourcc = read_u32(reader)?;
    if fourcc != FILE_FOURCC {
        return Err(TraceReadError::InvalidMagic(fourcc));
    }
    let version = read_u32(reader)?;
    let major_version = (version & 0xffff) as u16;
    let minor_version = (version >> 16) as u16;
    if major_version != FILE_MAJOR_VERSION {
        return Err(TraceReadError::UnsupportedVersion {
            major: major_version,
            minor: minor_version,
        });
    }

    let num_options = read_u32(reader)?;
    let mut options = Vec::with_capacity(num_options.min(64) as usize);
    for _ in 0..num_options {
        let key = read_u32(reader)?;
        let value = read_u32(reader)?;
        options.push(FileOptionPair { key, value });
    }

    Ok(FileHeader {
        major_version,
        minor_version,
        options,
    })
}

/// A meta command together with the routing data from its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCommand {
    /// `None` for state markers, which belong to every family.
    pub family: Option<ApiFamilyId>,
    pub thread_id: ThreadId,
    pub command: MetaCommand,
}

/// Decodes a state-marker or meta-data block.
///
/// Returns `Ok(None)` for block types that carry no meta command. A compressed
/// block needs `compressor`; its payload must decompress to exactly the
/// `data_size` recorded in the header, which may not exceed
/// [`RawBlock::max_payload_size`].
pub fn decode_meta_command(
    block: &RawBlock,
    compressor: Option<&dyn Compressor>,
) -> Result<Option<DecodedCommand>, TraceReadError> {
    let block_type = block.header.block_type;
    if block_type == BlockType::STATE_MARKER {
        return decode_state_marker(&block.body).map(Some);
    }
    if block_type.base() != BlockType::META_DATA {
        return Ok(None);
    }

    let mut fields = FieldReader::new(&block.body, "meta-data block");
    let meta_data_id = MetaDataId(fields.u32()?);
    let family = meta_data_id
        .family()
        .ok_or(TraceReadError::UnknownMetaDataId(meta_data_id.0))?;
    let kind = meta_data_id
        .data_type()
        .and_then(MetaCommandKind::from_meta_data_type)
        .ok_or(TraceReadError::UnknownMetaDataId(meta_data_id.0))?;
    let thread_id = ThreadId(fields.u32()?);
    let compressed = block_type.is_compressed();

    let command = match kind {
        MetaCommandKind::InitBuffer => {
            let device_id = HandleId(fields.u64()?);
            let buffer_id = HandleId(fields.u64()?);
            let data_size = fields.u64()?;
            let data = decode_payload(block, fields.rest(), data_size, compressed, compressor)?;
            MetaCommand::InitBuffer {
                device_id,
                buffer_id,
                data,
            }
        }
        MetaCommandKind::InitImage => {
            let device_id = HandleId(fields.u64()?);
            let image_id = HandleId(fields.u64()?);
            let data_size = fields.u64()?;
            let aspect = fields.u32()?;
            let layout = fields.u32()?;
            let level_count = fields.u32()?;

            let mut level_sizes = Vec::new();
            let data = if level_count == 0 {
                let rest = fields.rest();
                if data_size != 0 || !rest.is_empty() {
                    return Err(TraceReadError::payload_mismatch(0, rest.len()));
                }
                Vec::new()
            } else {
                let array_len = (level_count as usize)
                    .checked_mul(8)
                    .ok_or(TraceReadError::truncated("image level sizes"))?;
                let mut sizes = FieldReader::new(fields.take(array_len)?, "image level sizes");
                level_sizes.reserve(level_count as usize);
                for _ in 0..level_count {
                    level_sizes.push(sizes.u64()?);
                }
                decode_payload(block, fields.rest(), data_size, compressed, compressor)?
            };

            MetaCommand::InitImage {
                device_id,
                image_id,
                aspect,
                layout,
                level_sizes,
                data,
            }
        }
        MetaCommandKind::BeginResourceInit => MetaCommand::BeginResourceInit {
            device_id: HandleId(fields.u64()?),
            max_resource_size: fields.u64()?,
            max_copy_size: fields.u64()?,
        },
        MetaCommandKind::EndResourceInit => MetaCommand::EndResourceInit {
            device_id: HandleId(fields.u64()?),
        },
        MetaCommandKind::DisplayMessage if !compressed => MetaCommand::DisplayMessage {
            message: String::from_utf8_lossy(fields.rest()).into_owned(),
        },
        _ => {
            debug!(?kind, compressed, "Meta command body left unparsed");
            MetaCommand::Unparsed {
                kind,
                body: fields.rest().to_vec(),
            }
        }
    };

    Ok(Some(DecodedCommand {
        family: Some(family),
        thread_id,
        command,
    }))
}

fn decode_state_marker(body: &[u8]) -> Result<DecodedCommand, TraceReadError> {
    let mut fields = FieldReader::new(body, "state marker");
    let marker_type = fields.u32()?;
    let frame_number = fields.u64()?;
    let command = if marker_type == MarkerType::End as u32 {
        MetaCommand::StateEndMarker { frame_number }
    } else {
        MetaCommand::StateBeginMarker { frame_number }
    };
    Ok(DecodedCommand {
        family: None,
        thread_id: ThreadId::default(),
        command,
    })
}

fn decode_payload(
    block: &RawBlock,
    trailing: &[u8],
    data_size: u64,
    compressed: bool,
    compressor: Option<&dyn Compressor>,
) -> Result<Vec<u8>, TraceReadError> {
    if data_size > block.max_payload_size {
        return Err(TraceReadError::PayloadTooLarge {
            offset: block.offset,
            size: data_size,
            limit: block.max_payload_size,
        });
    }
    if !compressed {
        if trailing.len() as u64 != data_size {
            return Err(TraceReadError::payload_mismatch(data_size, trailing.len()));
        }
        return Ok(trailing.to_vec());
    }

    let compressor = compressor.ok_or(TraceReadError::MissingCompressor)?;
    let expected = usize::try_from(data_size)
        .map_err(|_| TraceReadError::payload_mismatch(data_size, trailing.len()))?;
    let data = compressor
        .decompress(trailing, expected)
        .map_err(TraceReadError::Decompression)?;
    if data.len() != expected {
        return Err(TraceReadError::payload_mismatch(data_size, data.len()));
    }
    Ok(data)
}

/// An API call record with its parameter buffer still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBlock {
    pub call_id: ApiCallId,
    /// Receiver of a method call; `None` for free functions.
    pub object_id: Option<HandleId>,
    pub thread_id: ThreadId,
    pub parameters: Vec<u8>,
}

/// Splits a function- or method-call block into routing data and parameters.
///
/// Layout after the block header: call id, object id (method calls only),
/// thread id, then for compressed blocks the uncompressed parameter size,
/// then the parameter bytes.
pub fn decode_call_block(
    block: &RawBlock,
    compressor: Option<&dyn Compressor>,
) -> Result<Option<CallBlock>, TraceReadError> {
    let block_type = block.header.block_type;
    let is_method = match block_type.base() {
        BlockType::FUNCTION_CALL => false,
        BlockType::METHOD_CALL => true,
        _ => return Ok(None),
    };

    let mut fields = FieldReader::new(&block.body, "call block");
    let call_id = ApiCallId(fields.u32()?);
    let object_id = if is_method {
        Some(HandleId(fields.u64()?))
    } else {
        None
    };
    let thread_id = ThreadId(fields.u32()?);

    let parameters = if block_type.is_compressed() {
        let data_size = fields.u64()?;
        decode_payload(block, fields.rest(), data_size, true, compressor)?
    } else {
        fields.rest().to_vec()
    };

    Ok(Some(CallBlock {
        call_id,
        object_id,
        thread_id,
        parameters,
    }))
}

/// Meta-data type of a block, if it is a meta-data block of a known type.
pub fn meta_data_type(block: &RawBlock) -> Option<MetaDataType> {
    block.meta_data_id().and_then(MetaDataId::data_type)
}
