pub mod allocator;
pub mod instance;
pub mod layout;

use ash::vk;
use gpu_descriptor::DescriptorTotalCount;
use smallvec::SmallVec;
use crate::renderer::error::{GfxResult, GraphicsError};

pub use allocator::DescriptorSetAllocator;
pub use instance::{DescriptorInfo, DescriptorSetInstance};
pub use layout::DescriptorSetLayout;

pub(crate) fn empty_total() -> DescriptorTotalCount {
    DescriptorTotalCount {
        sampler: 0,
        combined_image_sampler: 0,
        sampled_image: 0,
        storage_image: 0,
        uniform_texel_buffer: 0,
        storage_texel_buffer: 0,
        uniform_buffer: 0,
        storage_buffer: 0,
        uniform_buffer_dynamic: 0,
        storage_buffer_dynamic: 0,
        input_attachment: 0,
        acceleration_structure: 0,
        inline_uniform_block_bytes: 0,
        inline_uniform_block_bindings: 0,
    }
}

/// Pool-sized descriptor types only; inline uniform blocks and other extension types have no
/// pool count here.
fn counter_mut(total: &mut DescriptorTotalCount, ty: vk::DescriptorType) -> Option<&mut u32> {
    let counter = match ty {
        vk::DescriptorType::SAMPLER => &mut total.sampler,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => &mut total.combined_image_sampler,
        vk::DescriptorType::SAMPLED_IMAGE => &mut total.sampled_image,
        vk::DescriptorType::STORAGE_IMAGE => &mut total.storage_image,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER => &mut total.uniform_texel_buffer,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER => &mut total.storage_texel_buffer,
        vk::DescriptorType::UNIFORM_BUFFER => &mut total.uniform_buffer,
        vk::DescriptorType::STORAGE_BUFFER => &mut total.storage_buffer,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => &mut total.uniform_buffer_dynamic,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => &mut total.storage_buffer_dynamic,
        vk::DescriptorType::INPUT_ATTACHMENT => &mut total.input_attachment,
        vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => &mut total.acceleration_structure,
        _ => return None,
    };
    Some(counter)
}

pub(crate) fn add_descriptors(total: &mut DescriptorTotalCount, ty: vk::DescriptorType, count: u32) -> GfxResult<()> {
    let counter = counter_mut(total, ty).ok_or_else(|| {
        log::error!("Descriptor type {:?} is not supported", ty);
        GraphicsError::UnsupportedFormat
    })?;
    *counter += count;
    Ok(())
}

/// `source` scaled by `factor`, added onto `total`.
pub(crate) fn accumulate(total: &mut DescriptorTotalCount, source: &DescriptorTotalCount, factor: u32) {
    for size in pool_sizes(source) {
        if let Some(counter) = counter_mut(total, size.ty) {
            *counter += size.descriptor_count * factor;
        }
    }
}

/// Non-zero counts as pool sizes, one entry per descriptor type.
pub(crate) fn pool_sizes(total: &DescriptorTotalCount) -> SmallVec<[vk::DescriptorPoolSize; 12]> {
    let counts = [
        (vk::DescriptorType::SAMPLER, total.sampler),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, total.combined_image_sampler),
        (vk::DescriptorType::SAMPLED_IMAGE, total.sampled_image),
        (vk::DescriptorType::STORAGE_IMAGE, total.storage_image),
        (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, total.uniform_texel_buffer),
        (vk::DescriptorType::STORAGE_TEXEL_BUFFER, total.storage_texel_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER, total.uniform_buffer),
        (vk::DescriptorType::STORAGE_BUFFER, total.storage_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, total.uniform_buffer_dynamic),
        (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, total.storage_buffer_dynamic),
        (vk::DescriptorType::INPUT_ATTACHMENT, total.input_attachment),
        (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, total.acceleration_structure),
    ];
    counts
        .into_iter()
        .filter(|(_, count)| *count != 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect()
}
