use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use common::HandleId;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by allocator indirection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("resource allocator has not been initialized")]
    NotInitialized,

    #[error("resource allocator lock poisoned")]
    Poisoned,

    #[error("resource allocator failed with code {code}")]
    Backend { code: i32 },
}

/// Driver buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferHandle(pub u64);

/// Driver image handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageHandle(pub u64);

/// Driver device-memory handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryHandle(pub u64);

/// Allocator bookkeeping attached to a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceData(pub u64);

/// Allocator bookkeeping attached to a memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryData(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryPropertyFlags(pub u32);

impl MemoryPropertyFlags {
    pub const DEVICE_LOCAL: MemoryPropertyFlags = MemoryPropertyFlags(0x1);
    pub const HOST_VISIBLE: MemoryPropertyFlags = MemoryPropertyFlags(0x2);
    pub const HOST_COHERENT: MemoryPropertyFlags = MemoryPropertyFlags(0x4);
    pub const HOST_CACHED: MemoryPropertyFlags = MemoryPropertyFlags(0x8);

    pub fn contains(self, other: MemoryPropertyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MemoryPropertyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        MemoryPropertyFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub usage: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageCreateInfo {
    pub format: u32,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryAllocateInfo {
    pub allocation_size: u64,
    pub memory_type_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappedMemoryRange {
    pub memory: MemoryHandle,
    pub offset: u64,
    pub size: u64,
}

/// Strategy that owns replay-time memory placement.
///
/// `capture_id` ties an allocation to a traced object; replay-internal
/// allocations pass [`HandleId::NULL`].
pub trait ResourceAllocator: Send {
    fn create_buffer(
        &mut self,
        create_info: &BufferCreateInfo,
        capture_id: HandleId,
    ) -> Result<(BufferHandle, ResourceData), AllocatorError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle, allocator_data: ResourceData);

    fn create_image(
        &mut self,
        create_info: &ImageCreateInfo,
        capture_id: HandleId,
    ) -> Result<(ImageHandle, ResourceData), AllocatorError>;

    fn destroy_image(&mut self, image: ImageHandle, allocator_data: ResourceData);

    fn allocate_memory(
        &mut self,
        allocate_info: &MemoryAllocateInfo,
        capture_id: HandleId,
    ) -> Result<(MemoryHandle, MemoryData), AllocatorError>;

    fn free_memory(&mut self, memory: MemoryHandle, allocator_data: MemoryData);

    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        memory_offset: u64,
        buffer_data: ResourceData,
        memory_data: MemoryData,
    ) -> Result<MemoryPropertyFlags, AllocatorError>;

    fn bind_image_memory(
        &mut self,
        image: ImageHandle,
        memory: MemoryHandle,
        memory_offset: u64,
        image_data: ResourceData,
        memory_data: MemoryData,
    ) -> Result<MemoryPropertyFlags, AllocatorError>;

    /// Maps the memory a resource is bound to; the pointer addresses the
    /// resource's first byte.
    fn map_resource_memory_direct(
        &mut self,
        size: u64,
        flags: u32,
        allocator_data: ResourceData,
    ) -> Result<NonNull<u8>, AllocatorError>;

    fn unmap_resource_memory_direct(&mut self, allocator_data: ResourceData);

    fn invalidate_mapped_memory_ranges(
        &mut self,
        ranges: &[MappedMemoryRange],
        allocator_data: &[MemoryData],
    ) -> Result<(), AllocatorError>;
}

/// Routes replay-internal allocations (staging buffers and the like) through
/// the trace's allocator without capture-id translation.
///
/// Every call outside an `initialize`/`destroy` bracket fails with
/// [`AllocatorError::NotInitialized`].
#[derive(Default)]
pub struct DirectAllocator {
    allocator: Option<Arc<Mutex<dyn ResourceAllocator>>>,
}

impl DirectAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, allocator: Arc<Mutex<dyn ResourceAllocator>>) {
        debug!("Direct allocator bound");
        self.allocator = Some(allocator);
    }

    pub fn destroy(&mut self) {
        if self.allocator.take().is_some() {
            debug!("Direct allocator released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.allocator.is_some()
    }

    fn with_allocator<T>(
        &self,
        op: impl FnOnce(&mut dyn ResourceAllocator) -> Result<T, AllocatorError>,
    ) -> Result<T, AllocatorError> {
        let allocator = self
            .allocator
            .as_ref()
            .ok_or(AllocatorError::NotInitialized)?;
        let mut guard = allocator.lock().map_err(|_| AllocatorError::Poisoned)?;
        op(&mut *guard)
    }

    pub fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
    ) -> Result<(BufferHandle, ResourceData), AllocatorError> {
        self.with_allocator(|allocator| allocator.create_buffer(create_info, HandleId::NULL))
    }

    pub fn destroy_buffer(
        &self,
        buffer: BufferHandle,
        allocator_data: ResourceData,
    ) -> Result<(), AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.destroy_buffer(buffer, allocator_data);
            Ok(())
        })
    }

    pub fn create_image(
        &self,
        create_info: &ImageCreateInfo,
    ) -> Result<(ImageHandle, ResourceData), AllocatorError> {
        self.with_allocator(|allocator| allocator.create_image(create_info, HandleId::NULL))
    }

    pub fn destroy_image(
        &self,
        image: ImageHandle,
        allocator_data: ResourceData,
    ) -> Result<(), AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.destroy_image(image, allocator_data);
            Ok(())
        })
    }

    pub fn allocate_memory(
        &self,
        allocate_info: &MemoryAllocateInfo,
    ) -> Result<(MemoryHandle, MemoryData), AllocatorError> {
        self.with_allocator(|allocator| allocator.allocate_memory(allocate_info, HandleId::NULL))
    }

    pub fn free_memory(
        &self,
        memory: MemoryHandle,
        allocator_data: MemoryData,
    ) -> Result<(), AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.free_memory(memory, allocator_data);
            Ok(())
        })
    }

    pub fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        memory_offset: u64,
        buffer_data: ResourceData,
        memory_data: MemoryData,
    ) -> Result<MemoryPropertyFlags, AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.bind_buffer_memory(buffer, memory, memory_offset, buffer_data, memory_data)
        })
    }

    pub fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        memory_offset: u64,
        image_data: ResourceData,
        memory_data: MemoryData,
    ) -> Result<MemoryPropertyFlags, AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.bind_image_memory(image, memory, memory_offset, image_data, memory_data)
        })
    }

    pub fn map_resource_memory(
        &self,
        size: u64,
        flags: u32,
        allocator_data: ResourceData,
    ) -> Result<NonNull<u8>, AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.map_resource_memory_direct(size, flags, allocator_data)
        })
    }

    pub fn unmap_resource_memory(
        &self,
        allocator_data: ResourceData,
    ) -> Result<(), AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.unmap_resource_memory_direct(allocator_data);
            Ok(())
        })
    }

    pub fn invalidate_mapped_memory_ranges(
        &self,
        ranges: &[MappedMemoryRange],
        allocator_data: &[MemoryData],
    ) -> Result<(), AllocatorError> {
        self.with_allocator(|allocator| {
            allocator.invalidate_mapped_memory_ranges(ranges, allocator_data)
        })
    }
}
