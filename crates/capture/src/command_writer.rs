use std::sync::Arc;

use anyhow::{Context, Result};
use common::traits::{Compressor, OutputStreamWriter};
use common::{ApiFamilyId, CaptureSettings, CompressionType, HandleId, ThreadData};
use compression::BlockCompressor;
use storage::FileStreamWriter;
use trace_format::{
    meta_data_block_base_size, BeginResourceInitCommand, BlockType, DisplayMessageCommandHeader,
    EndResourceInitCommand, FileHeader, InitBufferCommandHeader, InitImageCommandHeader,
    MarkerType, MetaDataHeader, MetaDataType, StateMarkerBlock, BEGIN_RESOURCE_INIT_COMMAND_SIZE,
    DISPLAY_MESSAGE_COMMAND_HEADER_SIZE, END_RESOURCE_INIT_COMMAND_SIZE,
    INIT_BUFFER_COMMAND_HEADER_SIZE, INIT_IMAGE_COMMAND_HEADER_SIZE,
};
use tracing::{debug, info, instrument, warn};

use crate::error::CommandWriteError;

type WriteResult = std::result::Result<(), CommandWriteError>;

/// Encodes out-of-band commands and hands each finished block to the sink in
/// one write.
///
/// The writer itself is shared; all per-call staging lives in the caller's
/// [`ThreadData`].
#[derive(Clone)]
pub struct CommandWriter {
    output: Arc<dyn OutputStreamWriter>,
    compressor: Option<Arc<dyn Compressor>>,
}

impl CommandWriter {
    pub fn new(
        output: Arc<dyn OutputStreamWriter>,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> Self {
        Self { output, compressor }
    }

    /// Creates the capture file named by `settings` and writes its file header.
    pub fn open_capture_file(settings: &CaptureSettings) -> Result<(Self, Arc<FileStreamWriter>)> {
        let file = Arc::new(FileStreamWriter::from_settings(settings)?);
        let compressor = BlockCompressor::from_settings(settings)
            .map(|compressor| Arc::new(compressor) as Arc<dyn Compressor>);
        let writer = Self::new(file.clone(), compressor);
        writer
            .write_file_header()
            .with_context(|| format!("failed to write header to {}", file.path().display()))?;

        info!(
            path = %file.path().display(),
            compression = writer.compression_type().as_str(),
            "Capture file ready"
        );
        Ok((writer, file))
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compressor
            .as_ref()
            .map_or(CompressionType::None, |compressor| compressor.compression_type())
    }

    pub fn write_file_header(&self) -> WriteResult {
        let header = FileHeader::new(self.compression_type());
        Ok(self.output.output_stream_write(&header.to_bytes())?)
    }

    pub fn write_state_marker(&self, marker_type: MarkerType, frame_number: u64) -> WriteResult {
        let block = StateMarkerBlock {
            marker_type,
            frame_number,
        };
        Ok(self.output.output_stream_write(&block.to_bytes())?)
    }

    pub fn write_display_message(
        &self,
        ctx: &mut ThreadData,
        family: ApiFamilyId,
        message: &str,
    ) -> WriteResult {
        let mut header = DisplayMessageCommandHeader {
            meta_header: MetaDataHeader::new(
                family,
                MetaDataType::DisplayMessage,
                DISPLAY_MESSAGE_COMMAND_HEADER_SIZE,
            ),
            thread_id: ctx.thread_id(),
        };
        header.meta_header.block_header.size += message.len() as u64;
        Ok(self
            .output
            .combine_and_write(ctx, &[&header.to_bytes(), message.as_bytes()])?)
    }

    /// Opens a run of init commands for `device_id`.
    pub fn write_begin_resource_init_cmd(
        &self,
        ctx: &mut ThreadData,
        family: ApiFamilyId,
        device_id: HandleId,
        max_resource_size: u64,
        max_copy_size: u64,
    ) -> WriteResult {
        let command = BeginResourceInitCommand {
            meta_header: MetaDataHeader::new(
                family,
                MetaDataType::BeginResourceInit,
                BEGIN_RESOURCE_INIT_COMMAND_SIZE,
            ),
            thread_id: ctx.thread_id(),
            device_id,
            max_resource_size,
            max_copy_size,
        };
        Ok(self.output.output_stream_write(&command.to_bytes())?)
    }

    pub fn write_end_resource_init_cmd(
        &self,
        ctx: &mut ThreadData,
        family: ApiFamilyId,
        device_id: HandleId,
    ) -> WriteResult {
        let command = EndResourceInitCommand {
            meta_header: MetaDataHeader::new(
                family,
                MetaDataType::EndResourceInit,
                END_RESOURCE_INIT_COMMAND_SIZE,
            ),
            thread_id: ctx.thread_id(),
            device_id,
        };
        Ok(self.output.output_stream_write(&command.to_bytes())?)
    }

    /// Records the contents of `data[offset..offset + size]` for `buffer_id`.
    ///
    /// The header always carries the uncompressed size; the block is marked
    /// compressed only when compression strictly shrank the payload. A range
    /// outside `data` is rejected before anything is written.
    #[instrument(skip(self, ctx, data), fields(thread_id = ctx.thread_id().0))]
    #[allow(clippy::too_many_arguments)]
    pub fn write_init_buffer_cmd(
        &self,
        ctx: &mut ThreadData,
        family: ApiFamilyId,
        device_id: HandleId,
        buffer_id: HandleId,
        offset: u64,
        size: u64,
        data: &[u8],
    ) -> WriteResult {
        let payload = source_range(data, offset, size)?;

        let mut header = InitBufferCommandHeader {
            meta_header: MetaDataHeader::new(
                family,
                MetaDataType::InitBuffer,
                INIT_BUFFER_COMMAND_HEADER_SIZE,
            ),
            thread_id: ctx.thread_id(),
            device_id,
            buffer_id,
            data_size: size,
        };

        if let Some(compressed_size) =
            self.compress_into(ctx, payload, INIT_BUFFER_COMMAND_HEADER_SIZE)
        {
            header.meta_header.block_header.block_type = BlockType::COMPRESSED_META_DATA;
            header.meta_header.block_header.size =
                meta_data_block_base_size(INIT_BUFFER_COMMAND_HEADER_SIZE) + compressed_size as u64;

            let block = ctx.compressed_buffer();
            block[..INIT_BUFFER_COMMAND_HEADER_SIZE].copy_from_slice(&header.to_bytes());
            let end = INIT_BUFFER_COMMAND_HEADER_SIZE + compressed_size;
            self.output.output_stream_write(&block[..end])?;
            return Ok(());
        }

        header.meta_header.block_header.size += size;
        Ok(self
            .output
            .combine_and_write(ctx, &[&header.to_bytes(), payload])?)
    }

    /// Records the contents of an image.
    ///
    /// With `data` absent the block is the bare command header with no level
    /// sizes and no payload. Otherwise `mip_levels` must be non-zero,
    /// `level_sizes` must hold one entry per level and `data` must hold at
    /// least `size` bytes.
    #[instrument(skip(self, ctx, level_sizes, data), fields(thread_id = ctx.thread_id().0))]
    #[allow(clippy::too_many_arguments)]
    pub fn write_init_image_cmd(
        &self,
        ctx: &mut ThreadData,
        family: ApiFamilyId,
        device_id: HandleId,
        image_id: HandleId,
        aspect: u32,
        layout: u32,
        mip_levels: u32,
        level_sizes: &[u64],
        size: u64,
        data: Option<&[u8]>,
    ) -> WriteResult {
        let mut header = InitImageCommandHeader {
            meta_header: MetaDataHeader::new(
                family,
                MetaDataType::InitImage,
                INIT_IMAGE_COMMAND_HEADER_SIZE,
            ),
            thread_id: ctx.thread_id(),
            device_id,
            image_id,
            data_size: 0,
            aspect,
            layout,
            level_count: 0,
        };

        let Some(data) = data else {
            self.output.output_stream_write(&header.to_bytes())?;
            return Ok(());
        };

        assert!(mip_levels > 0, "image {image_id} has data but no mip levels");
        assert_eq!(
            level_sizes.len(),
            mip_levels as usize,
            "image {image_id} level size count does not match mip levels"
        );

        let payload = source_range(data, 0, size)?;
        let levels: Vec<u8> = level_sizes
            .iter()
            .flat_map(|level_size| level_size.to_le_bytes())
            .collect();
        let prefix_len = INIT_IMAGE_COMMAND_HEADER_SIZE + levels.len();

        header.data_size = size;
        header.level_count = mip_levels;
        let base_size =
            meta_data_block_base_size(INIT_IMAGE_COMMAND_HEADER_SIZE) + levels.len() as u64;

        if let Some(compressed_size) = self.compress_into(ctx, payload, prefix_len) {
            header.meta_header.block_header.block_type = BlockType::COMPRESSED_META_DATA;
            header.meta_header.block_header.size = base_size + compressed_size as u64;

            let block = ctx.compressed_buffer();
            block[..INIT_IMAGE_COMMAND_HEADER_SIZE].copy_from_slice(&header.to_bytes());
            block[INIT_IMAGE_COMMAND_HEADER_SIZE..prefix_len].copy_from_slice(&levels);
            self.output.output_stream_write(&block[..prefix_len + compressed_size])?;
            return Ok(());
        }

        header.meta_header.block_header.size = base_size + size;
        Ok(self
            .output
            .combine_and_write(ctx, &[&header.to_bytes(), &levels, payload])?)
    }

    /// Compresses `payload` into the worker's compression buffer behind
    /// `header_reserve` bytes. Returns the compressed length only when it is a
    /// strict improvement and the buffer actually holds that many bytes.
    fn compress_into(
        &self,
        ctx: &mut ThreadData,
        payload: &[u8],
        header_reserve: usize,
    ) -> Option<usize> {
        let compressor = self.compressor.as_ref()?;
        let compressed_size = compressor.compress(payload, ctx.compressed_buffer(), header_reserve);
        if compressed_size == 0 || compressed_size >= payload.len() {
            debug!(
                compressed_size,
                payload_len = payload.len(),
                "Writing payload uncompressed"
            );
            return None;
        }

        let buffered = ctx.compressed_buffer().len();
        if header_reserve + compressed_size > buffered {
            warn!(
                compressed_size,
                header_reserve,
                buffered,
                "Compressor reported more bytes than it produced; writing payload uncompressed"
            );
            return None;
        }
        Some(compressed_size)
    }
}

fn source_range(data: &[u8], offset: u64, size: u64) -> Result<&[u8], CommandWriteError> {
    let out_of_range = || CommandWriteError::SourceOutOfRange {
        offset,
        size,
        len: data.len(),
    };
    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    let len = usize::try_from(size).map_err(|_| out_of_range())?;
    let end = start.checked_add(len).ok_or_else(out_of_range)?;
    data.get(start..end).ok_or_else(out_of_range)
}
