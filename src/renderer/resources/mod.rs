//! "Resources" refers to device objects backed by memory the renderer allocates itself.
//! They are created empty, then initialized and allocated explicitly by their owner.

pub mod buffer;
pub mod depth_stencil;
pub mod image;
pub mod multi_buffer;
pub mod sampler;
pub mod shader;
pub mod texture;
pub mod uniform_buffer;

use std::ptr::NonNull;
use ash::vk;
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};

/// Sharing mode and the distinct families to share between.
pub(crate) fn sharing_mode(queue_families: &[u32]) -> (vk::SharingMode, SmallVec<[u32; 3]>) {
    let mut distinct: SmallVec<[u32; 3]> = SmallVec::new();
    for family in queue_families {
        if !distinct.contains(family) {
            distinct.push(*family);
        }
    }
    if distinct.len() > 1 {
        (vk::SharingMode::CONCURRENT, distinct)
    } else {
        (vk::SharingMode::EXCLUSIVE, SmallVec::new())
    }
}

pub(crate) fn allocate_memory(
    ctx: &DeviceContext,
    requirements: &vk::MemoryRequirements,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
) -> GfxResult<vk::DeviceMemory> {
    let memory_type_index = ctx.find_memory_type(
        requirements.memory_type_bits,
        properties,
        vk::MemoryHeapFlags::empty(),
    )?;
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(size)
        .memory_type_index(memory_type_index);
    unsafe {
        ctx.device().allocate_memory(&info).map_err(|e| {
            log::error!("Unable to allocate {} bytes of device memory: {}", size, e);
            memory_or(e, GraphicsError::InitializationFailed)
        })
    }
}

/// Copies `data` into a mapped region of `len` bytes starting at `offset`.
pub(crate) fn write_mapped<T: Copy>(
    base: NonNull<u8>,
    len: usize,
    data: &[T],
    offset: usize,
) -> GfxResult<presser::CopyRecord> {
    let mut raw_allocation = presser::RawAllocation::from_raw_parts(base, len);
    let mut slab = unsafe { raw_allocation.borrow_as_slab() };
    presser::copy_from_slice_to_offset(data, &mut slab, offset).map_err(|e| {
        log::error!("Write into mapped memory failed: {:?}", e);
        GraphicsError::TransferFailed
    })
}
