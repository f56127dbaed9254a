//! Replay-side building blocks: meta-command dispatch to registered consumers,
//! allocator indirection for replay-internal resources, shader identifier
//! translation and the replay id tables.

pub mod decoder;
pub mod direct_allocator;
pub mod objects;
pub mod shader_id_map;

pub use decoder::{process_trace, ApiCallInfo, ApiDecoder, DecoderBase, MetaHandler, TraceStats};
pub use direct_allocator::{
    AllocatorError, BufferCreateInfo, BufferHandle, DirectAllocator, ImageCreateInfo, ImageHandle,
    MappedMemoryRange, MemoryAllocateInfo, MemoryData, MemoryHandle, MemoryPropertyFlags,
    ResourceAllocator, ResourceData,
};
pub use objects::{replay_handle, ReplayObjectInfo, ReplayObjects, ReplayStateTable};
pub use shader_id_map::{ShaderIdMap, ShaderIdentifier, SHADER_IDENTIFIER_SIZE};
