use std::sync::Arc;
use ash::vk;
use gpu_descriptor::DescriptorTotalCount;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::descriptor::{add_descriptors, empty_total};
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};

/// Ordered bindings of one descriptor set. Frozen once `initialize` succeeds.
pub struct DescriptorSetLayout {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
    counts: DescriptorTotalCount,
    handle: vk::DescriptorSetLayout,
    ctx: Arc<DeviceContext>,
}

impl DescriptorSetLayout {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            bindings: Vec::new(),
            counts: empty_total(),
            handle: vk::DescriptorSetLayout::null(),
            ctx,
        }
    }

    pub fn add_binding(
        &mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> &mut Self {
        assert_eq!(
            self.handle,
            vk::DescriptorSetLayout::null(),
            "bindings cannot change after initialize"
        );
        assert!(
            self.binding(binding).is_none(),
            "binding {} declared twice",
            binding
        );

        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(descriptor_count)
                .stage_flags(stages),
        );
        self
    }

    pub fn initialize(&mut self) -> GfxResult<()> {
        assert_eq!(
            self.handle,
            vk::DescriptorSetLayout::null(),
            "descriptor set layout already initialized"
        );
        let mut counts = empty_total();
        for binding in &self.bindings {
            add_descriptors(&mut counts, binding.descriptor_type, binding.descriptor_count)?;
        }
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        self.handle = unsafe {
            self.ctx.device().create_descriptor_set_layout(&info).map_err(|e| {
                log::error!("Unable to create descriptor set layout: {}", e);
                memory_or(e, GraphicsError::InitializationFailed)
            })?
        };
        self.counts = counts;
        Ok(())
    }

    pub fn binding(&self, binding: u32) -> Option<&vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Descriptors one set of this layout consumes, per type. Filled by `initialize`.
    pub fn descriptor_counts(&self) -> &DescriptorTotalCount {
        &self.counts
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    pub fn is_initialized(&self) -> bool {
        self.handle != vk::DescriptorSetLayout::null()
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        if self.handle != vk::DescriptorSetLayout::null() {
            unsafe { self.ctx.device().destroy_descriptor_set_layout(self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::contexts::device_ctx::mock::test_context;

    #[test]
    fn bindings_accumulate_counts() {
        let mut layout = DescriptorSetLayout::new(test_context(false));
        layout
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(2, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::FRAGMENT);
        layout.initialize().unwrap();

        assert!(layout.is_initialized());
        assert_eq!(layout.descriptor_counts().uniform_buffer, 2);
        assert_eq!(layout.descriptor_counts().combined_image_sampler, 2);
        assert_eq!(layout.binding(1).map(|b| b.descriptor_count), Some(2));
    }

    #[test]
    #[should_panic(expected = "bindings cannot change after initialize")]
    fn bindings_are_frozen_after_initialize() {
        let mut layout = DescriptorSetLayout::new(test_context(false));
        layout.add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX);
        layout.initialize().unwrap();
        layout.add_binding(1, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    #[should_panic(expected = "descriptor set layout already initialized")]
    fn initialize_twice_panics() {
        let mut layout = DescriptorSetLayout::new(test_context(false));
        layout.add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX);
        layout.initialize().unwrap();
        let _ = layout.initialize();
    }

    #[test]
    fn unsupported_descriptor_type_fails_initialize() {
        let mut layout = DescriptorSetLayout::new(test_context(false));
        layout.add_binding(0, vk::DescriptorType::INLINE_UNIFORM_BLOCK, 64, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(layout.initialize(), Err(GraphicsError::UnsupportedFormat));
        assert!(!layout.is_initialized());
        assert_eq!(layout.handle(), vk::DescriptorSetLayout::null());
    }
}
